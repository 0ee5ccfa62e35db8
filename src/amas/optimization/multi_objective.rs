use chrono::Utc;

use crate::amas::types::{
    ConstraintCheck, ConstraintViolation, DifficultyLevel, LearningMode, LearningObjectives,
    MultiObjectiveMetrics, ObjectiveEvaluation, PrimaryObjective, RawSessionMetrics,
    StrategyAdjustments, UserState,
};

const WEIGHT_SUM_TOLERANCE: f64 = 0.01;
const GOOD_SCORE_THRESHOLD: f64 = 0.6;
const RESPONSE_TIME_HALF_SCORE_MS: f64 = 3000.0;
const WPM_HALF_SCORE: f64 = 5.0;
const OPTIMAL_COGNITIVE_LOAD: f64 = 0.7;

fn unit(value: f64) -> f64 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

fn non_negative(value: f64) -> f64 {
    if value.is_finite() {
        value.max(0.0)
    } else {
        0.0
    }
}

/// Stateless scoring for short-term, long-term and efficiency objectives.
pub struct MultiObjectiveOptimizer;

impl MultiObjectiveOptimizer {
    pub fn calculate_short_term_score(accuracy: f64, response_time_ms: f64, user_state: &UserState) -> f64 {
        let accuracy = unit(accuracy);
        let rt = if response_time_ms.is_nan() {
            RESPONSE_TIME_HALF_SCORE_MS
        } else {
            response_time_ms.max(0.0)
        };
        // infinite response time scores zero speed
        let speed = if rt.is_finite() {
            RESPONSE_TIME_HALF_SCORE_MS / (RESPONSE_TIME_HALF_SCORE_MS + rt)
        } else {
            0.0
        };
        let attention = unit(user_state.attention);

        unit(0.6 * accuracy + 0.25 * speed + 0.15 * attention)
    }

    pub fn calculate_long_term_score(retention: f64, review_success: f64, stability: f64) -> f64 {
        unit(0.5 * unit(retention) + 0.3 * unit(review_success) + 0.2 * unit(stability))
    }

    pub fn calculate_efficiency_score(words_per_minute: f64, time_utilization: f64, cognitive_load: f64) -> f64 {
        let wpm = non_negative(words_per_minute);
        let wpm_score = if wpm.is_finite() && wpm > 0.0 {
            wpm / (wpm + WPM_HALF_SCORE)
        } else {
            0.0
        };
        let load = unit(cognitive_load);
        let deviation = (load - OPTIMAL_COGNITIVE_LOAD) / OPTIMAL_COGNITIVE_LOAD;
        let load_score = unit(1.0 - deviation * deviation);

        unit(0.4 * wpm_score + 0.3 * unit(time_utilization) + 0.3 * load_score)
    }

    /// Weighted Tchebycheff: `1 - max_i(w_i * (1 - m_i))`.
    pub fn aggregate_objectives(metrics: &MultiObjectiveMetrics, objectives: &LearningObjectives) -> f64 {
        let pairs = [
            (objectives.weight_short_term, metrics.short_term_score),
            (objectives.weight_long_term, metrics.long_term_score),
            (objectives.weight_efficiency, metrics.efficiency_score),
        ];
        let worst = pairs
            .iter()
            .map(|&(w, m)| non_negative(w) * (1.0 - unit(m)))
            .fold(0.0_f64, f64::max);
        unit(1.0 - worst)
    }

    /// Thresholds are inclusive: a value exactly at the limit passes.
    pub fn check_constraints(
        metrics: &MultiObjectiveMetrics,
        objectives: &LearningObjectives,
        session_time_ms: f64,
    ) -> ConstraintCheck {
        let mut violations = Vec::new();

        if let Some(min_accuracy) = objectives.min_accuracy {
            if metrics.short_term_score < min_accuracy {
                violations.push(ConstraintViolation {
                    constraint: "minAccuracy".to_string(),
                    expected: min_accuracy,
                    actual: metrics.short_term_score,
                });
            }
        }

        if let Some(max_daily_time) = objectives.max_daily_time {
            let minutes = session_time_ms / 60_000.0;
            if minutes > max_daily_time {
                violations.push(ConstraintViolation {
                    constraint: "maxDailyTime".to_string(),
                    expected: max_daily_time,
                    actual: minutes,
                });
            }
        }

        if let Some(target_retention) = objectives.target_retention {
            if metrics.long_term_score < target_retention {
                violations.push(ConstraintViolation {
                    constraint: "targetRetention".to_string(),
                    expected: target_retention,
                    actual: metrics.long_term_score,
                });
            }
        }

        ConstraintCheck {
            satisfied: violations.is_empty(),
            violations,
        }
    }

    pub fn evaluate_strategy(
        raw: &RawSessionMetrics,
        user_state: &UserState,
        objectives: &LearningObjectives,
        session_time_ms: f64,
    ) -> ObjectiveEvaluation {
        let short_term_score =
            Self::calculate_short_term_score(raw.accuracy, raw.response_time_ms, user_state);
        let long_term_score =
            Self::calculate_long_term_score(raw.retention, raw.review_success, raw.stability);
        let efficiency_score = Self::calculate_efficiency_score(
            raw.words_per_minute,
            raw.time_utilization,
            raw.cognitive_load,
        );

        let mut metrics = MultiObjectiveMetrics {
            short_term_score,
            long_term_score,
            efficiency_score,
            aggregated_score: 0.0,
            ts: Utc::now().timestamp_millis(),
        };
        metrics.aggregated_score = Self::aggregate_objectives(&metrics, objectives);

        let check = Self::check_constraints(&metrics, objectives, session_time_ms);
        let adjustments = Self::suggest_adjustments(&metrics);

        ObjectiveEvaluation {
            metrics,
            constraints_satisfied: check.satisfied,
            constraint_violations: check.violations,
            suggested_adjustments: (!adjustments.is_empty()).then_some(adjustments),
        }
    }

    fn suggest_adjustments(metrics: &MultiObjectiveMetrics) -> StrategyAdjustments {
        let mut adjustments = StrategyAdjustments::default();
        if metrics.short_term_score < GOOD_SCORE_THRESHOLD {
            adjustments.difficulty = Some(DifficultyLevel::Easy);
            adjustments.hint_level = Some(2);
        }
        if metrics.long_term_score < GOOD_SCORE_THRESHOLD {
            adjustments.interval_scale = Some(0.8);
        }
        if metrics.efficiency_score < GOOD_SCORE_THRESHOLD {
            adjustments.batch_size = Some(6);
            adjustments.new_ratio = Some(0.1);
        }
        adjustments
    }

    pub fn validate_weights(objectives: &LearningObjectives) -> bool {
        let sum = objectives.weight_short_term + objectives.weight_long_term + objectives.weight_efficiency;
        sum.is_finite() && (sum - 1.0).abs() <= WEIGHT_SUM_TOLERANCE
    }

    /// Rescales the three weights to sum to 1. Negative or non-finite weights
    /// count as zero; an all-zero vector becomes equal thirds.
    pub fn normalize_weights(objectives: &LearningObjectives) -> LearningObjectives {
        let short = non_negative(objectives.weight_short_term);
        let long = non_negative(objectives.weight_long_term);
        let efficiency = non_negative(objectives.weight_efficiency);
        let sum = short + long + efficiency;

        let (short, long, efficiency) = if sum > 0.0 && sum.is_finite() {
            let short = short / sum;
            let long = long / sum;
            (short, long, 1.0 - short - long)
        } else {
            let third = 1.0 / 3.0;
            (third, third, third)
        };

        LearningObjectives {
            weight_short_term: short,
            weight_long_term: long,
            weight_efficiency: efficiency.max(0.0),
            ..objectives.clone()
        }
    }

    pub fn preset_mode(mode: LearningMode) -> LearningObjectives {
        match mode {
            LearningMode::Exam => LearningObjectives {
                mode,
                primary_objective: PrimaryObjective::Accuracy,
                weight_short_term: 0.6,
                weight_long_term: 0.3,
                weight_efficiency: 0.1,
                min_accuracy: Some(0.85),
                max_daily_time: None,
                target_retention: None,
            },
            LearningMode::Daily => LearningObjectives {
                mode,
                primary_objective: PrimaryObjective::Retention,
                weight_short_term: 0.3,
                weight_long_term: 0.5,
                weight_efficiency: 0.2,
                min_accuracy: None,
                max_daily_time: None,
                target_retention: Some(0.8),
            },
            LearningMode::Travel => LearningObjectives {
                mode,
                primary_objective: PrimaryObjective::Efficiency,
                weight_short_term: 0.2,
                weight_long_term: 0.3,
                weight_efficiency: 0.5,
                min_accuracy: None,
                max_daily_time: Some(30.0),
                target_retention: None,
            },
            LearningMode::Custom => LearningObjectives {
                mode,
                primary_objective: PrimaryObjective::Accuracy,
                weight_short_term: 0.4,
                weight_long_term: 0.4,
                weight_efficiency: 0.2,
                min_accuracy: None,
                max_daily_time: None,
                target_retention: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(short: f64, long: f64, efficiency: f64) -> MultiObjectiveMetrics {
        MultiObjectiveMetrics {
            short_term_score: short,
            long_term_score: long,
            efficiency_score: efficiency,
            aggregated_score: 0.0,
            ts: 0,
        }
    }

    #[test]
    fn faster_answers_score_higher() {
        let state = UserState::default();
        let fast = MultiObjectiveOptimizer::calculate_short_term_score(0.8, 1000.0, &state);
        let slow = MultiObjectiveOptimizer::calculate_short_term_score(0.8, 8000.0, &state);
        assert!(fast > slow);
    }

    #[test]
    fn load_score_peaks_near_optimum() {
        let at_peak = MultiObjectiveOptimizer::calculate_efficiency_score(5.0, 0.8, 0.7);
        let overloaded = MultiObjectiveOptimizer::calculate_efficiency_score(5.0, 0.8, 1.0);
        let idle = MultiObjectiveOptimizer::calculate_efficiency_score(5.0, 0.8, 0.1);
        assert!(at_peak > overloaded);
        assert!(at_peak > idle);
    }

    #[test]
    fn worst_objective_dominates() {
        let objectives = MultiObjectiveOptimizer::preset_mode(LearningMode::Custom);
        let balanced = MultiObjectiveOptimizer::aggregate_objectives(&metrics(0.8, 0.8, 0.8), &objectives);
        let lopsided = MultiObjectiveOptimizer::aggregate_objectives(&metrics(1.0, 1.0, 0.0), &objectives);
        assert!((balanced - 0.92).abs() < 1e-9);
        assert!((lopsided - 0.8).abs() < 1e-9);
        assert_eq!(
            MultiObjectiveOptimizer::aggregate_objectives(&metrics(1.0, 1.0, 1.0), &objectives),
            1.0
        );
    }

    #[test]
    fn normalize_all_zero_yields_thirds() {
        let mut objectives = MultiObjectiveOptimizer::preset_mode(LearningMode::Custom);
        objectives.weight_short_term = 0.0;
        objectives.weight_long_term = 0.0;
        objectives.weight_efficiency = 0.0;
        let normalized = MultiObjectiveOptimizer::normalize_weights(&objectives);
        assert_eq!(normalized.weight_short_term, 1.0 / 3.0);
        assert_eq!(normalized.weight_efficiency, 1.0 / 3.0);
    }

    #[test]
    fn presets_sum_to_one() {
        for mode in [LearningMode::Exam, LearningMode::Daily, LearningMode::Travel, LearningMode::Custom] {
            assert!(MultiObjectiveOptimizer::validate_weights(&MultiObjectiveOptimizer::preset_mode(mode)));
        }
    }
}
