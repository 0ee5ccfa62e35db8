pub mod config;
pub mod decision;
pub mod optimization;
pub mod params;
pub mod types;

pub use config::{AMASConfig, BayesianOptimizerConfig, ComputePoolConfig, UserParamsConfig};
pub use decision::{DecisionContext, DecisionPolicy, FatigueBasedPolicy};
pub use optimization::{BayesianOptimizer, MultiObjectiveOptimizer};
pub use params::UserParamsManager;
#[allow(unused_imports)]
pub use types::*;
