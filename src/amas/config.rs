use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::amas::optimization::bayesian::{default_user_param_space, ParamBound};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("parameter space is empty")]
    EmptyParamSpace,
    #[error("duplicate parameter dimension `{0}`")]
    DuplicateDimension(String),
    #[error("malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

fn env_flag(key: &str) -> Option<bool> {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.trim(), "true" | "1"))
}

fn unit_interval_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() && value > 0.0 && value <= 1.0 {
        value
    } else {
        fallback
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserParamsConfig {
    pub min_update_interval_ms: i64,
    pub accuracy_alpha: f64,
    pub fatigue_alpha: f64,
    pub motivation_alpha: f64,
    pub reward_alpha: f64,
    pub enable_auto_adjust: bool,
    pub ttl_ms: i64,
    pub max_users: usize,
    pub difficulty_step: f64,
    pub fast_recovery_threshold: f64,
    pub high_accuracy_threshold: f64,
    pub low_accuracy_threshold: f64,
    pub fatigue_rise_threshold: f64,
    pub fatigue_k_step: f64,
    pub motivation_rho_step: f64,
    pub alpha_step: f64,
    pub low_reward_threshold: f64,
    pub high_reward_threshold: f64,
}

impl Default for UserParamsConfig {
    fn default() -> Self {
        Self {
            min_update_interval_ms: 1000,
            accuracy_alpha: 0.1,
            fatigue_alpha: 0.1,
            motivation_alpha: 0.1,
            reward_alpha: 0.1,
            enable_auto_adjust: true,
            ttl_ms: 7 * 24 * 60 * 60 * 1000,
            max_users: 10_000,
            difficulty_step: 0.02,
            fast_recovery_threshold: -0.05,
            high_accuracy_threshold: 0.85,
            low_accuracy_threshold: 0.6,
            fatigue_rise_threshold: 0.05,
            fatigue_k_step: 0.005,
            motivation_rho_step: 0.01,
            alpha_step: 0.05,
            low_reward_threshold: -0.2,
            high_reward_threshold: 0.5,
        }
    }
}

impl UserParamsConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("AMAS_PARAMS_MIN_UPDATE_INTERVAL_MS") {
            config.min_update_interval_ms = v;
        }
        if let Some(v) = env_parse("AMAS_PARAMS_TTL_MS") {
            config.ttl_ms = v;
        }
        if let Some(v) = env_parse("AMAS_PARAMS_MAX_USERS") {
            config.max_users = v;
        }
        if let Some(v) = env_flag("AMAS_PARAMS_AUTO_ADJUST") {
            config.enable_auto_adjust = v;
        }
        config.validated()
    }

    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        self.min_update_interval_ms = self.min_update_interval_ms.max(0);
        self.accuracy_alpha = unit_interval_or(self.accuracy_alpha, defaults.accuracy_alpha);
        self.fatigue_alpha = unit_interval_or(self.fatigue_alpha, defaults.fatigue_alpha);
        self.motivation_alpha = unit_interval_or(self.motivation_alpha, defaults.motivation_alpha);
        self.reward_alpha = unit_interval_or(self.reward_alpha, defaults.reward_alpha);
        self.ttl_ms = self.ttl_ms.max(0);
        self.max_users = self.max_users.max(1);
        // steps stay well below the narrowest bound width
        self.difficulty_step = unit_interval_or(self.difficulty_step, defaults.difficulty_step).min(0.05);
        self.fatigue_k_step = unit_interval_or(self.fatigue_k_step, defaults.fatigue_k_step).min(0.02);
        self.motivation_rho_step =
            unit_interval_or(self.motivation_rho_step, defaults.motivation_rho_step).min(0.05);
        self.alpha_step = unit_interval_or(self.alpha_step, defaults.alpha_step).min(0.2);
        for (value, fallback) in [
            (&mut self.fast_recovery_threshold, defaults.fast_recovery_threshold),
            (&mut self.high_accuracy_threshold, defaults.high_accuracy_threshold),
            (&mut self.low_accuracy_threshold, defaults.low_accuracy_threshold),
            (&mut self.fatigue_rise_threshold, defaults.fatigue_rise_threshold),
            (&mut self.low_reward_threshold, defaults.low_reward_threshold),
            (&mut self.high_reward_threshold, defaults.high_reward_threshold),
        ] {
            if !value.is_finite() {
                *value = fallback;
            }
        }
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AcquisitionKind {
    #[default]
    Ucb,
    Ei,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BayesianOptimizerConfig {
    pub param_space: Vec<ParamBound>,
    pub acquisition: AcquisitionKind,
    /// UCB exploration weight.
    pub beta: f64,
    /// EI improvement margin.
    pub xi: f64,
    pub initial_samples: usize,
    pub max_evaluations: usize,
    pub candidate_count: usize,
    /// Per-dimension length scales, measured on the [0, 1]-normalised axis.
    /// Missing entries fall back to `default_length_scale`.
    #[serde(default)]
    pub length_scales: Vec<f64>,
    pub default_length_scale: f64,
    pub output_variance: f64,
    pub noise_variance: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for BayesianOptimizerConfig {
    fn default() -> Self {
        Self {
            param_space: default_user_param_space(),
            acquisition: AcquisitionKind::Ucb,
            beta: 2.0,
            xi: 0.01,
            initial_samples: 5,
            max_evaluations: 50,
            candidate_count: 500,
            length_scales: Vec::new(),
            default_length_scale: 0.25,
            output_variance: 1.0,
            noise_variance: 1e-4,
            seed: None,
        }
    }
}

impl BayesianOptimizerConfig {
    pub fn with_space(param_space: Vec<ParamBound>) -> Self {
        Self {
            param_space,
            ..Self::default()
        }
    }

    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("AMAS_BO_MAX_EVALUATIONS") {
            config.max_evaluations = v;
        }
        if let Some(v) = env_parse::<String>("AMAS_BO_ACQUISITION") {
            config.acquisition = if v.eq_ignore_ascii_case("ei") {
                AcquisitionKind::Ei
            } else {
                AcquisitionKind::Ucb
            };
        }
        config.validated()
    }

    /// Rejects spaces the optimizer cannot search: empty, or with repeated names.
    pub fn check_space(&self) -> Result<(), ConfigError> {
        if self.param_space.is_empty() {
            return Err(ConfigError::EmptyParamSpace);
        }
        let mut seen = std::collections::HashSet::new();
        for bound in &self.param_space {
            if !seen.insert(bound.name.as_str()) {
                return Err(ConfigError::DuplicateDimension(bound.name.clone()));
            }
        }
        Ok(())
    }

    pub fn validated(mut self) -> Self {
        let defaults = Self::default();
        let positive_or = |value: f64, fallback: f64| {
            if value.is_finite() && value > 0.0 {
                value
            } else {
                fallback
            }
        };
        self.beta = if self.beta.is_finite() { self.beta.max(0.0) } else { defaults.beta };
        self.xi = if self.xi.is_finite() { self.xi.max(0.0) } else { defaults.xi };
        self.max_evaluations = self.max_evaluations.max(1);
        self.candidate_count = self.candidate_count.max(1);
        self.default_length_scale = positive_or(self.default_length_scale, defaults.default_length_scale);
        self.output_variance = positive_or(self.output_variance, defaults.output_variance);
        self.noise_variance = positive_or(self.noise_variance, defaults.noise_variance);
        let dims = self.param_space.len();
        let fallback_scale = self.default_length_scale;
        self.length_scales.resize(dims, fallback_scale);
        for scale in &mut self.length_scales {
            *scale = positive_or(*scale, fallback_scale);
        }
        self.param_space = self.param_space.into_iter().map(ParamBound::normalized).collect();
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputePoolConfig {
    pub min_threads: usize,
    pub max_threads: usize,
    pub task_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub max_queue_size: usize,
}

impl Default for ComputePoolConfig {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(2);
        Self {
            min_threads: 1,
            max_threads: parallelism.saturating_sub(1).max(1),
            task_timeout_ms: 30_000,
            idle_timeout_ms: 60_000,
            max_queue_size: 1024,
        }
    }
}

impl ComputePoolConfig {
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_parse("AMAS_POOL_MIN_THREADS") {
            config.min_threads = v;
        }
        if let Some(v) = env_parse("AMAS_POOL_MAX_THREADS") {
            config.max_threads = v;
        }
        if let Some(v) = env_parse("AMAS_POOL_TASK_TIMEOUT_MS") {
            config.task_timeout_ms = v;
        }
        if let Some(v) = env_parse("AMAS_POOL_IDLE_TIMEOUT_MS") {
            config.idle_timeout_ms = v;
        }
        config.validated()
    }

    pub fn validated(mut self) -> Self {
        self.min_threads = self.min_threads.max(1);
        self.max_threads = self.max_threads.max(self.min_threads);
        self.task_timeout_ms = self.task_timeout_ms.max(1);
        self.idle_timeout_ms = self.idle_timeout_ms.max(1);
        self.max_queue_size = self.max_queue_size.max(1);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AMASConfig {
    pub user_params: UserParamsConfig,
    pub bayesian: BayesianOptimizerConfig,
    pub compute_pool: ComputePoolConfig,
}

impl AMASConfig {
    pub fn from_env() -> Self {
        Self {
            user_params: UserParamsConfig::from_env(),
            bayesian: BayesianOptimizerConfig::from_env(),
            compute_pool: ComputePoolConfig::from_env(),
        }
    }
}
