pub mod bayesian;
pub mod multi_objective;

pub use bayesian::{
    default_user_param_space, BayesianOptimizer, BayesianOptimizerState, BestPoint, Observation,
    OptimizerError, ParamBound, Posterior,
};
pub use multi_objective::MultiObjectiveOptimizer;
