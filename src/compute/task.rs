use serde::{Deserialize, Serialize};

use crate::amas::config::BayesianOptimizerConfig;
use crate::amas::optimization::bayesian::BayesianOptimizerState;
use crate::compute::linucb::{BanditModel, LinUCBSelection};

pub const LINUCB_SELECT: &str = "linucb_select";
pub const LINUCB_UPDATE: &str = "linucb_update";
pub const BAYESIAN_SUGGEST: &str = "bayesian_suggest";
pub const CHOLESKY_DECOMPOSE: &str = "cholesky_decompose";
pub const CHOLESKY_RANK1_UPDATE: &str = "cholesky_rank1_update";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinUCBSelectPayload {
    pub model: BanditModel,
    pub candidates: Vec<Vec<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinUCBUpdatePayload {
    pub model: BanditModel,
    pub feature: Vec<f64>,
    pub reward: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BayesianSuggestPayload {
    pub config: BayesianOptimizerConfig,
    #[serde(default)]
    pub state: Option<BayesianOptimizerState>,
    /// Number of points to propose; zero is treated as one.
    #[serde(default = "default_suggest_count")]
    pub count: usize,
}

fn default_suggest_count() -> usize {
    1
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CholeskyDecomposePayload {
    pub matrix: Vec<f64>,
    pub dim: usize,
    pub lambda: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CholeskyRank1UpdatePayload {
    pub l: Vec<f64>,
    pub x: Vec<f64>,
    pub dim: usize,
    pub min_diag: f64,
}

/// Closed set of offloadable numeric jobs. Payloads own all their data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ComputeTask {
    #[serde(rename = "linucb_select")]
    LinUCBSelect(LinUCBSelectPayload),
    #[serde(rename = "linucb_update")]
    LinUCBUpdate(LinUCBUpdatePayload),
    BayesianSuggest(BayesianSuggestPayload),
    CholeskyDecompose(CholeskyDecomposePayload),
    #[serde(rename = "cholesky_rank1_update")]
    CholeskyRank1Update(CholeskyRank1UpdatePayload),
}

impl ComputeTask {
    /// Operation name, also the key the router uses.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LinUCBSelect(_) => LINUCB_SELECT,
            Self::LinUCBUpdate(_) => LINUCB_UPDATE,
            Self::BayesianSuggest(_) => BAYESIAN_SUGGEST,
            Self::CholeskyDecompose(_) => CHOLESKY_DECOMPOSE,
            Self::CholeskyRank1Update(_) => CHOLESKY_RANK1_UPDATE,
        }
    }

    /// Rough work size fed to the router's thresholds.
    pub fn data_size(&self) -> usize {
        match self {
            Self::LinUCBSelect(p) => p.model.d * p.model.d * p.candidates.len().max(1),
            Self::LinUCBUpdate(p) => p.model.d * p.model.d,
            Self::BayesianSuggest(p) => {
                let n = p.state.as_ref().map_or(0, |s| s.observations.len());
                n * n * p.config.param_space.len().max(1)
            }
            Self::CholeskyDecompose(p) => p.dim * p.dim,
            Self::CholeskyRank1Update(p) => p.dim * p.dim,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rank1UpdateOutput {
    pub l: Vec<f64>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "result", rename_all = "snake_case")]
pub enum ComputeResult {
    #[serde(rename = "linucb_select")]
    LinUCBSelect(LinUCBSelection),
    #[serde(rename = "linucb_update")]
    LinUCBUpdate(BanditModel),
    BayesianSuggest(Vec<Vec<f64>>),
    CholeskyDecompose(Vec<f64>),
    #[serde(rename = "cholesky_rank1_update")]
    CholeskyRank1Update(Rank1UpdateOutput),
}

impl ComputeResult {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::LinUCBSelect(_) => LINUCB_SELECT,
            Self::LinUCBUpdate(_) => LINUCB_UPDATE,
            Self::BayesianSuggest(_) => BAYESIAN_SUGGEST,
            Self::CholeskyDecompose(_) => CHOLESKY_DECOMPOSE,
            Self::CholeskyRank1Update(_) => CHOLESKY_RANK1_UPDATE,
        }
    }
}
