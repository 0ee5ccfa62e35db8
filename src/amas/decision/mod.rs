pub mod fatigue;

pub use fatigue::{FatigueBasedPolicy, StressRegime};

use crate::amas::types::{StrategyAdjustments, StrategyParams, UserState};

/// Optional inputs from the optimizers that a policy may fold into its output.
#[derive(Debug, Clone, Default)]
pub struct DecisionContext {
    pub adjustments: Option<StrategyAdjustments>,
}

impl DecisionContext {
    pub fn with_adjustments(adjustments: StrategyAdjustments) -> Self {
        Self {
            adjustments: Some(adjustments),
        }
    }
}

/// Maps a cognitive state to session strategy. Implementations must be pure.
pub trait DecisionPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    fn decide(&self, state: &UserState, context: Option<&DecisionContext>) -> StrategyParams;
}
