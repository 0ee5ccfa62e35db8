use serde::{Deserialize, Serialize};

use crate::amas::decision::{DecisionContext, DecisionPolicy};
use crate::amas::types::{DifficultyLevel, StrategyParams, UserState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StressRegime {
    Relaxed,
    Balanced,
    Challenge,
}

/// Picks one of three fixed strategy regimes from a stress index built out of
/// fatigue, inattention and negative motivation.
#[derive(Debug, Clone)]
pub struct FatigueBasedPolicy {
    high_stress: f64,
    low_stress: f64,
    hard_memory_threshold: f64,
    fast_speed_threshold: f64,
}

impl Default for FatigueBasedPolicy {
    fn default() -> Self {
        Self {
            high_stress: 0.7,
            low_stress: 0.4,
            hard_memory_threshold: 0.75,
            fast_speed_threshold: 0.7,
        }
    }
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

impl FatigueBasedPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stress_index(state: &UserState) -> f64 {
        let fatigue = finite_or(state.fatigue, 0.5).clamp(0.0, 1.0);
        let attention = finite_or(state.attention, 0.5).clamp(0.0, 1.0);
        let motivation = finite_or(state.motivation, 0.0).clamp(-1.0, 1.0);

        0.5 * fatigue + 0.3 * (1.0 - attention) + 0.2 * (-motivation).max(0.0)
    }

    pub fn regime(&self, state: &UserState) -> StressRegime {
        let stress = Self::stress_index(state);
        if stress > self.high_stress {
            StressRegime::Relaxed
        } else if stress > self.low_stress {
            StressRegime::Balanced
        } else {
            StressRegime::Challenge
        }
    }

    fn params_for(&self, regime: StressRegime, state: &UserState) -> StrategyParams {
        match regime {
            StressRegime::Relaxed => StrategyParams {
                interval_scale: 0.8,
                new_ratio: 0.1,
                difficulty: DifficultyLevel::Easy,
                batch_size: 5,
                hint_level: 2,
            },
            StressRegime::Balanced => StrategyParams {
                interval_scale: 1.0,
                new_ratio: 0.2,
                difficulty: DifficultyLevel::Mid,
                batch_size: 8,
                hint_level: 1,
            },
            StressRegime::Challenge => {
                let mem = finite_or(state.cognitive.mem, 0.0);
                let speed = finite_or(state.cognitive.speed, 0.0);
                StrategyParams {
                    interval_scale: 1.2,
                    new_ratio: if speed > self.fast_speed_threshold { 0.3 } else { 0.2 },
                    difficulty: if mem >= self.hard_memory_threshold {
                        DifficultyLevel::Hard
                    } else {
                        DifficultyLevel::Mid
                    },
                    batch_size: 12,
                    hint_level: 0,
                }
            }
        }
    }
}

impl DecisionPolicy for FatigueBasedPolicy {
    fn name(&self) -> &'static str {
        "fatigue_based"
    }

    fn decide(&self, state: &UserState, context: Option<&DecisionContext>) -> StrategyParams {
        let params = self.params_for(self.regime(state), state);
        match context.and_then(|c| c.adjustments.as_ref()) {
            Some(adjustments) => params.apply_adjustments(adjustments),
            None => params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amas::types::{CognitiveProfile, StrategyAdjustments};

    fn state(attention: f64, fatigue: f64, motivation: f64) -> UserState {
        UserState {
            attention,
            fatigue,
            cognitive: CognitiveProfile::default(),
            motivation,
        }
    }

    #[test]
    fn regime_boundaries() {
        let policy = FatigueBasedPolicy::new();
        // stress of exactly 0.4 stays in the challenge regime
        assert_eq!(policy.regime(&state(1.0, 0.8, 0.0)), StressRegime::Challenge);
        assert_eq!(policy.regime(&state(0.5, 0.8, 0.0)), StressRegime::Balanced);
        assert_eq!(policy.regime(&state(1.0, 0.0, 1.0)), StressRegime::Challenge);
        assert_eq!(policy.regime(&state(0.0, 1.0, -1.0)), StressRegime::Relaxed);
    }

    #[test]
    fn positive_motivation_is_not_rewarded() {
        let calm = FatigueBasedPolicy::stress_index(&state(0.5, 0.5, 0.0));
        let eager = FatigueBasedPolicy::stress_index(&state(0.5, 0.5, 0.9));
        assert_eq!(calm, eager);
    }

    #[test]
    fn context_adjustments_are_applied() {
        let policy = FatigueBasedPolicy::new();
        let ctx = DecisionContext::with_adjustments(StrategyAdjustments {
            interval_scale: Some(0.8),
            ..Default::default()
        });
        let params = policy.decide(&state(0.5, 0.8, 0.0), Some(&ctx));
        assert_eq!(params.interval_scale, 0.8);
        assert_eq!(params.batch_size, 8);
    }

    #[test]
    fn non_finite_state_still_decides() {
        let policy = FatigueBasedPolicy::new();
        let params = policy.decide(&state(f64::NAN, f64::INFINITY, f64::NAN), None);
        assert!(params.interval_scale.is_finite());
    }
}
