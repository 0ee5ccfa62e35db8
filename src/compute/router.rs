use std::collections::BTreeMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::amas::config::ConfigError;
use crate::compute::task::{
    BAYESIAN_SUGGEST, CHOLESKY_DECOMPOSE, CHOLESKY_RANK1_UPDATE, LINUCB_SELECT, LINUCB_UPDATE,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteDecision {
    /// Offload to the compute pool.
    Native,
    /// Run on the calling thread.
    InProcess,
}

impl RouteDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Native => "native",
            Self::InProcess => "in_process",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Low,
    #[default]
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct OperationConfig {
    pub complexity: Complexity,
    /// Work size at or above which the operation is offloaded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub force_route: Option<RouteDecision>,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RouteOptions {
    pub data_size: Option<usize>,
    /// Defaults to `true` when unset.
    pub native_available: Option<bool>,
}

impl RouteOptions {
    pub fn with_size(data_size: usize) -> Self {
        Self {
            data_size: Some(data_size),
            native_available: None,
        }
    }

    pub fn native_unavailable() -> Self {
        Self {
            data_size: None,
            native_available: Some(false),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteCounts {
    pub native: u64,
    pub in_process: u64,
}

impl RouteCounts {
    fn record(&mut self, decision: RouteDecision) {
        match decision {
            RouteDecision::Native => self.native += 1,
            RouteDecision::InProcess => self.in_process += 1,
        }
    }

    pub fn total(&self) -> u64 {
        self.native + self.in_process
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouterStats {
    pub total: RouteCounts,
    pub by_operation: BTreeMap<String, RouteCounts>,
}

/// Why a decision came out the way it did; rendered by `explain_decision`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Reason {
    Forced,
    ForcedButUnavailable,
    NativeUnavailable,
    AboveThreshold(usize, usize),
    BelowThreshold(usize, usize),
    Complexity(Complexity),
    Unconfigured,
}

pub fn default_operations() -> BTreeMap<String, OperationConfig> {
    let entries = [
        (
            LINUCB_SELECT,
            Complexity::Medium,
            Some(64),
            "LinUCB arm scoring over candidate features",
        ),
        (
            LINUCB_UPDATE,
            Complexity::Medium,
            Some(64),
            "LinUCB covariance and factor update",
        ),
        (
            BAYESIAN_SUGGEST,
            Complexity::High,
            None,
            "Gaussian-process acquisition search",
        ),
        (
            CHOLESKY_DECOMPOSE,
            Complexity::High,
            Some(100),
            "Full Cholesky factorisation",
        ),
        (
            CHOLESKY_RANK1_UPDATE,
            Complexity::Low,
            Some(400),
            "Givens rank-1 factor update",
        ),
    ];
    entries
        .into_iter()
        .map(|(name, complexity, threshold, description)| {
            (
                name.to_string(),
                OperationConfig {
                    complexity,
                    threshold,
                    force_route: None,
                    description: description.to_string(),
                },
            )
        })
        .collect()
}

/// Cost-based choice between offloading an operation and running it inline.
pub struct SmartRouter {
    operations: RwLock<BTreeMap<String, OperationConfig>>,
    stats: RwLock<Option<RouterStats>>,
}

impl Default for SmartRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl SmartRouter {
    pub fn new() -> Self {
        Self::with_operations(default_operations())
    }

    pub fn with_operations(operations: BTreeMap<String, OperationConfig>) -> Self {
        Self {
            operations: RwLock::new(operations),
            stats: RwLock::new(None),
        }
    }

    fn resolve(&self, operation: &str, options: RouteOptions) -> (RouteDecision, Reason) {
        let native_available = options.native_available.unwrap_or(true);
        let operations = self.operations.read();
        let Some(config) = operations.get(operation) else {
            return if native_available {
                (RouteDecision::Native, Reason::Unconfigured)
            } else {
                (RouteDecision::InProcess, Reason::NativeUnavailable)
            };
        };

        if let Some(forced) = config.force_route {
            return match forced {
                RouteDecision::InProcess => (forced, Reason::Forced),
                RouteDecision::Native if native_available => (forced, Reason::Forced),
                RouteDecision::Native => (RouteDecision::InProcess, Reason::ForcedButUnavailable),
            };
        }
        if !native_available {
            return (RouteDecision::InProcess, Reason::NativeUnavailable);
        }
        if let (Some(threshold), Some(size)) = (config.threshold, options.data_size) {
            return if size >= threshold {
                (RouteDecision::Native, Reason::AboveThreshold(size, threshold))
            } else {
                (RouteDecision::InProcess, Reason::BelowThreshold(size, threshold))
            };
        }
        match config.complexity {
            Complexity::Low => (RouteDecision::InProcess, Reason::Complexity(Complexity::Low)),
            other => (RouteDecision::Native, Reason::Complexity(other)),
        }
    }

    pub fn decide(&self, operation: &str, options: RouteOptions) -> RouteDecision {
        let (decision, _) = self.resolve(operation, options);
        if self.stats_enabled() {
            self.record(operation, decision);
        }
        debug!(operation, decision = decision.as_str(), "Route decided");
        decision
    }

    fn record(&self, operation: &str, decision: RouteDecision) {
        if let Some(stats) = self.stats.write().as_mut() {
            stats.total.record(decision);
            stats
                .by_operation
                .entry(operation.to_string())
                .or_default()
                .record(decision);
        }
    }

    pub fn should_use_native(&self, operation: &str, options: RouteOptions) -> bool {
        self.decide(operation, options) == RouteDecision::Native
    }

    pub fn should_run_in_process(&self, operation: &str, options: RouteOptions) -> bool {
        self.decide(operation, options) == RouteDecision::InProcess
    }

    pub fn decide_batch(&self, operations: &[&str], options: RouteOptions) -> BTreeMap<String, RouteDecision> {
        operations
            .iter()
            .map(|op| (op.to_string(), self.decide(op, options)))
            .collect()
    }

    /// Human-readable rationale. Does not touch the statistics.
    pub fn explain_decision(&self, operation: &str, options: RouteOptions) -> String {
        let (decision, reason) = self.resolve(operation, options);
        let why = match reason {
            Reason::Forced => "route is forced by configuration".to_string(),
            Reason::ForcedButUnavailable => {
                "native route is forced but native execution is unavailable".to_string()
            }
            Reason::NativeUnavailable => "native execution is unavailable".to_string(),
            Reason::AboveThreshold(size, threshold) => {
                format!("data size {size} reaches threshold {threshold}")
            }
            Reason::BelowThreshold(size, threshold) => {
                format!("data size {size} is below threshold {threshold}")
            }
            Reason::Complexity(c) => format!("operation complexity is {c:?}").to_lowercase(),
            Reason::Unconfigured => "operation is not configured, native is the default".to_string(),
        };
        format!("{operation}: {} ({why})", decision.as_str())
    }

    pub fn register_operation(&self, name: impl Into<String>, config: OperationConfig) {
        self.operations.write().insert(name.into(), config);
    }

    pub fn register_operations(&self, configs: impl IntoIterator<Item = (String, OperationConfig)>) {
        self.operations.write().extend(configs);
    }

    pub fn unregister_operation(&self, name: &str) -> bool {
        self.operations.write().remove(name).is_some()
    }

    pub fn operation(&self, name: &str) -> Option<OperationConfig> {
        self.operations.read().get(name).cloned()
    }

    pub fn reset_to_defaults(&self) {
        *self.operations.write() = default_operations();
    }

    pub fn enable_stats(&self, enabled: bool) {
        let mut stats = self.stats.write();
        match (enabled, stats.is_some()) {
            (true, false) => *stats = Some(RouterStats::default()),
            (false, _) => *stats = None,
            _ => {}
        }
    }

    pub fn stats_enabled(&self) -> bool {
        self.stats.read().is_some()
    }

    /// `None` when statistics are disabled.
    pub fn get_stats(&self) -> Option<RouterStats> {
        self.stats.read().clone()
    }

    pub fn reset_stats(&self) {
        if let Some(stats) = self.stats.write().as_mut() {
            *stats = RouterStats::default();
        }
    }

    pub fn export_config(&self) -> BTreeMap<String, OperationConfig> {
        self.operations.read().clone()
    }

    /// With `merge`, entries are added or overwritten; otherwise the registry
    /// is replaced wholesale.
    pub fn import_config(&self, configs: BTreeMap<String, OperationConfig>, merge: bool) {
        let mut operations = self.operations.write();
        if merge {
            operations.extend(configs);
        } else {
            *operations = configs;
        }
    }

    pub fn import_config_json(&self, value: &serde_json::Value, merge: bool) -> Result<usize, ConfigError> {
        let configs: BTreeMap<String, OperationConfig> = serde_json::from_value(value.clone())?;
        let count = configs.len();
        self.import_config(configs, merge);
        Ok(count)
    }
}
