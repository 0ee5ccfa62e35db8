use std::collections::BTreeMap;
use std::f64::consts::{PI, SQRT_2};

use chrono::Utc;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::amas::config::{AcquisitionKind, BayesianOptimizerConfig, ConfigError};
use crate::amas::params::{
    ALPHA_BOUNDS, FATIGUE_K_BOUNDS, MOTIVATION_RHO_BOUNDS, OPTIMAL_DIFFICULTY_BOUNDS,
};
use crate::compute::matrix::{cholesky_decompose, dot, solve_cholesky, solve_triangular_lower};

pub const OPTIMIZER_STATE_VERSION: u32 = 1;

const MIN_VARIANCE: f64 = 1e-12;
const JITTER: f64 = 1e-8;
/// Share of candidates drawn around the incumbent instead of uniformly.
const LOCAL_CANDIDATE_SHARE: f64 = 0.3;
const LOCAL_RADIUS: f64 = 0.1;

#[derive(Debug, Error, PartialEq)]
pub enum OptimizerError {
    #[error("parameter vector has {actual} dimensions, search space has {expected}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("evaluation contains non-finite values")]
    NonFinite,
}

/// One dimension of a search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamBound {
    pub name: String,
    pub min: f64,
    pub max: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<f64>,
}

impl ParamBound {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            step: None,
        }
        .normalized()
    }

    pub fn with_step(name: impl Into<String>, min: f64, max: f64, step: f64) -> Self {
        Self {
            name: name.into(),
            min,
            max,
            step: Some(step),
        }
        .normalized()
    }

    /// Orders the bounds, replaces non-finite ends and drops unusable steps.
    pub fn normalized(mut self) -> Self {
        if !self.min.is_finite() {
            self.min = 0.0;
        }
        if !self.max.is_finite() {
            self.max = self.min;
        }
        if self.min > self.max {
            std::mem::swap(&mut self.min, &mut self.max);
        }
        self.step = self.step.filter(|s| s.is_finite() && *s > 0.0);
        self
    }

    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn midpoint(&self) -> f64 {
        self.snap((self.min + self.max) / 2.0)
    }

    /// Clamps into the bound and, when a step is set, moves to the nearest
    /// grid value `min + k * step` that still lies inside the bound.
    pub fn snap(&self, value: f64) -> f64 {
        let value = if value.is_finite() {
            value.clamp(self.min, self.max)
        } else {
            self.min
        };
        let Some(step) = self.step else {
            return value;
        };
        let max_k = ((self.width() / step) + 1e-9).floor();
        let k = ((value - self.min) / step).round().clamp(0.0, max_k);
        (self.min + k * step).clamp(self.min, self.max)
    }

    fn to_unit(&self, value: f64) -> f64 {
        let width = self.width();
        if width > 0.0 {
            (value - self.min) / width
        } else {
            0.0
        }
    }
}

/// Search space over the four adaptive user hyperparameters.
pub fn default_user_param_space() -> Vec<ParamBound> {
    vec![
        ParamBound::with_step("alpha", ALPHA_BOUNDS.0, ALPHA_BOUNDS.1, 0.1),
        ParamBound::with_step("fatigueK", FATIGUE_K_BOUNDS.0, FATIGUE_K_BOUNDS.1, 0.01),
        ParamBound::with_step(
            "motivationRho",
            MOTIVATION_RHO_BOUNDS.0,
            MOTIVATION_RHO_BOUNDS.1,
            0.05,
        ),
        ParamBound::with_step(
            "optimalDifficulty",
            OPTIMAL_DIFFICULTY_BOUNDS.0,
            OPTIMAL_DIFFICULTY_BOUNDS.1,
            0.05,
        ),
    ]
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub params: Vec<f64>,
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestPoint {
    pub params: Vec<f64>,
    pub value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BayesianOptimizerState {
    pub version: u32,
    #[serde(default)]
    pub observations: Vec<Observation>,
    #[serde(default)]
    pub best: Option<BestPoint>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Posterior {
    pub mean: f64,
    pub variance: f64,
    pub std: f64,
}

/// Cached factorisation of the kernel matrix over the current observations.
#[derive(Debug, Clone, Default)]
struct GpFit {
    inputs: Vec<Vec<f64>>,
    chol: Vec<f64>,
    weights: Vec<f64>,
}

/// Gaussian-process Bayesian optimizer over a bounded box.
///
/// The surrogate uses a squared-exponential kernel with one length scale per
/// dimension, evaluated on coordinates rescaled to [0, 1] per dimension. The
/// prior mean is zero, so objective values are taken as-is.
#[derive(Debug, Clone)]
pub struct BayesianOptimizer {
    config: BayesianOptimizerConfig,
    observations: Vec<Observation>,
    best: Option<BestPoint>,
    fit: GpFit,
    rng: ChaCha8Rng,
}

impl Default for BayesianOptimizer {
    fn default() -> Self {
        Self::new(BayesianOptimizerConfig::default())
    }
}

impl BayesianOptimizer {
    pub fn new(config: BayesianOptimizerConfig) -> Self {
        let config = config.validated();
        let rng = config
            .seed
            .map(ChaCha8Rng::seed_from_u64)
            .unwrap_or_else(ChaCha8Rng::from_entropy);
        Self {
            config,
            observations: Vec::new(),
            best: None,
            fit: GpFit::default(),
            rng,
        }
    }

    /// Like `new`, but refuses an empty or ambiguous parameter space.
    pub fn try_new(config: BayesianOptimizerConfig) -> Result<Self, ConfigError> {
        config.check_space()?;
        Ok(Self::new(config))
    }

    pub fn config(&self) -> &BayesianOptimizerConfig {
        &self.config
    }

    pub fn param_space(&self) -> &[ParamBound] {
        &self.config.param_space
    }

    pub fn dimensions(&self) -> usize {
        self.config.param_space.len()
    }

    pub fn observations(&self) -> &[Observation] {
        &self.observations
    }

    pub fn best(&self) -> Option<&BestPoint> {
        self.best.as_ref()
    }

    pub fn evaluation_count(&self) -> usize {
        self.observations.len()
    }

    pub fn should_stop(&self) -> bool {
        self.observations.len() >= self.config.max_evaluations
    }

    pub fn reset(&mut self) {
        self.observations.clear();
        self.best = None;
        self.fit = GpFit::default();
    }

    pub fn suggest_next(&mut self) -> Vec<f64> {
        if self.observations.len() < self.config.initial_samples {
            return self.random_point();
        }

        let candidates = self.candidates();
        let scores: Vec<f64> = candidates
            .par_iter()
            .map(|c| self.acquisition(c))
            .collect();

        let mut best_idx = 0;
        for (idx, score) in scores.iter().enumerate() {
            if *score > scores[best_idx] {
                best_idx = idx;
            }
        }
        debug!(
            evaluations = self.observations.len(),
            acquisition = scores.get(best_idx).copied().unwrap_or(0.0),
            "Bayesian optimizer suggestion"
        );
        candidates.into_iter().nth(best_idx).unwrap_or_else(|| self.random_point())
    }

    /// Suggests `k` points at once by conditioning a scratch copy on its own
    /// posterior means. Recorded observations are left untouched.
    pub fn suggest_batch(&mut self, k: usize) -> Vec<Vec<f64>> {
        let mut scratch = self.clone();
        scratch.rng = ChaCha8Rng::seed_from_u64(self.rng.gen());

        let mut batch = Vec::with_capacity(k);
        for _ in 0..k {
            let point = scratch.suggest_next();
            let believed = scratch.posterior(&point).mean;
            scratch.push_observation(point.clone(), believed);
            batch.push(point);
        }
        batch
    }

    pub fn record_evaluation(&mut self, params: &[f64], value: f64) -> Result<(), OptimizerError> {
        let expected = self.dimensions();
        if params.len() != expected {
            return Err(OptimizerError::DimensionMismatch {
                expected,
                actual: params.len(),
            });
        }
        if !value.is_finite() || params.iter().any(|p| !p.is_finite()) {
            return Err(OptimizerError::NonFinite);
        }
        self.push_observation(params.to_vec(), value);
        Ok(())
    }

    fn push_observation(&mut self, params: Vec<f64>, value: f64) {
        let replaces_best = self.best.as_ref().map_or(true, |b| value > b.value);
        if replaces_best {
            self.best = Some(BestPoint {
                params: params.clone(),
                value,
            });
        }
        self.observations.push(Observation {
            params,
            value,
            timestamp: Utc::now().timestamp_millis(),
        });
        self.refit();
    }

    pub fn posterior(&self, point: &[f64]) -> Posterior {
        let prior = Posterior {
            mean: 0.0,
            variance: self.config.output_variance,
            std: self.config.output_variance.sqrt(),
        };
        if self.fit.inputs.is_empty() || point.len() != self.dimensions() {
            return prior;
        }

        let x = self.to_unit(point);
        let k_star: Vec<f64> = self.fit.inputs.iter().map(|xi| self.kernel(xi, &x)).collect();
        let mean = dot(&k_star, &self.fit.weights);
        let v = solve_triangular_lower(&self.fit.chol, &k_star, k_star.len());
        let variance = (self.config.output_variance - dot(&v, &v)).max(MIN_VARIANCE);

        if !mean.is_finite() || !variance.is_finite() {
            return prior;
        }
        Posterior {
            mean,
            variance,
            std: variance.sqrt(),
        }
    }

    pub fn compute_ucb(&self, point: &[f64]) -> f64 {
        if self.observations.is_empty() {
            return 1.0;
        }
        let post = self.posterior(point);
        finite_or_zero(post.mean + self.config.beta * post.std)
    }

    pub fn compute_ei(&self, point: &[f64]) -> f64 {
        if self.observations.is_empty() {
            return 1.0;
        }
        let best = self.best.as_ref().map_or(0.0, |b| b.value);
        let post = self.posterior(point);
        let improvement = post.mean - best - self.config.xi;
        if post.std < MIN_VARIANCE.sqrt() {
            return finite_or_zero(improvement.max(0.0));
        }
        let z = improvement / post.std;
        let ei = improvement * normal_cdf(z) + post.std * normal_pdf(z);
        finite_or_zero(ei.max(0.0))
    }

    fn acquisition(&self, point: &[f64]) -> f64 {
        match self.config.acquisition {
            AcquisitionKind::Ucb => self.compute_ucb(point),
            AcquisitionKind::Ei => self.compute_ei(point),
        }
    }

    pub fn state(&self) -> BayesianOptimizerState {
        BayesianOptimizerState {
            version: OPTIMIZER_STATE_VERSION,
            observations: self.observations.clone(),
            best: self.best.clone(),
        }
    }

    /// Restores exported state. Anything unusable (missing, other version,
    /// wrong dimensionality) leaves the optimizer empty rather than failing.
    pub fn set_state(&mut self, state: Option<BayesianOptimizerState>) {
        self.reset();
        let Some(state) = state else {
            return;
        };
        if state.version != OPTIMIZER_STATE_VERSION {
            warn!(
                version = state.version,
                expected = OPTIMIZER_STATE_VERSION,
                "Optimizer state version mismatch, starting empty"
            );
            return;
        }

        let dims = self.dimensions();
        let usable = |params: &[f64], value: f64| {
            params.len() == dims && value.is_finite() && params.iter().all(|p| p.is_finite())
        };

        let total = state.observations.len();
        self.observations = state
            .observations
            .into_iter()
            .filter(|o| usable(&o.params, o.value))
            .collect();
        if self.observations.len() != total {
            warn!(
                dropped = total - self.observations.len(),
                "Dropped unusable observations from optimizer state"
            );
        }

        self.best = match state.best {
            Some(best) if usable(&best.params, best.value) => Some(best),
            _ => self.scan_best(),
        };
        self.refit();
    }

    pub fn restore_from_json(&mut self, value: &serde_json::Value) {
        if value.is_null() {
            self.set_state(None);
            return;
        }
        match serde_json::from_value::<BayesianOptimizerState>(value.clone()) {
            Ok(state) => self.set_state(Some(state)),
            Err(err) => {
                warn!(error = %err, "Malformed optimizer state, starting empty");
                self.set_state(None);
            }
        }
    }

    pub fn params_to_object(&self, params: &[f64]) -> BTreeMap<String, f64> {
        self.config
            .param_space
            .iter()
            .zip(params.iter())
            .map(|(bound, &v)| (bound.name.clone(), v))
            .collect()
    }

    pub fn object_to_params(&self, values: &BTreeMap<String, f64>) -> Vec<f64> {
        self.config
            .param_space
            .iter()
            .map(|bound| match values.get(&bound.name) {
                Some(v) if v.is_finite() => *v,
                _ => (bound.min + bound.max) / 2.0,
            })
            .collect()
    }

    fn scan_best(&self) -> Option<BestPoint> {
        let mut best: Option<&Observation> = None;
        for obs in &self.observations {
            if best.map_or(true, |b| obs.value > b.value) {
                best = Some(obs);
            }
        }
        best.map(|o| BestPoint {
            params: o.params.clone(),
            value: o.value,
        })
    }

    fn random_point(&mut self) -> Vec<f64> {
        let rng = &mut self.rng;
        self.config
            .param_space
            .iter()
            .map(|bound| bound.snap(bound.min + rng.gen::<f64>() * bound.width()))
            .collect()
    }

    fn candidates(&mut self) -> Vec<Vec<f64>> {
        let total = self.config.candidate_count;
        let local = match &self.best {
            Some(_) => ((total as f64) * LOCAL_CANDIDATE_SHARE) as usize,
            None => 0,
        };
        let incumbent = self.best.as_ref().map(|b| b.params.clone());

        let mut out = Vec::with_capacity(total);
        for _ in 0..total.saturating_sub(local) {
            out.push(self.random_point());
        }
        if let Some(center) = incumbent {
            let rng = &mut self.rng;
            for _ in 0..local {
                let point = self
                    .config
                    .param_space
                    .iter()
                    .zip(center.iter())
                    .map(|(bound, &c)| {
                        let offset = (rng.gen::<f64>() * 2.0 - 1.0) * LOCAL_RADIUS * bound.width();
                        bound.snap(c + offset)
                    })
                    .collect();
                out.push(point);
            }
        }
        out
    }

    fn to_unit(&self, point: &[f64]) -> Vec<f64> {
        self.config
            .param_space
            .iter()
            .zip(point.iter())
            .map(|(bound, &v)| bound.to_unit(v))
            .collect()
    }

    fn kernel(&self, a: &[f64], b: &[f64]) -> f64 {
        let sq: f64 = a
            .iter()
            .zip(b.iter())
            .zip(self.config.length_scales.iter())
            .map(|((x, y), l)| ((x - y) / l).powi(2))
            .sum();
        self.config.output_variance * (-0.5 * sq).exp()
    }

    fn refit(&mut self) {
        let inputs: Vec<Vec<f64>> = self.observations.iter().map(|o| self.to_unit(&o.params)).collect();
        let n = inputs.len();
        if n == 0 {
            self.fit = GpFit::default();
            return;
        }

        let noise = self.config.noise_variance + JITTER * self.config.output_variance;
        let mut k = vec![0.0; n * n];
        for i in 0..n {
            for j in 0..=i {
                let v = self.kernel(&inputs[i], &inputs[j]);
                k[i * n + j] = v;
                k[j * n + i] = v;
            }
            k[i * n + i] += noise;
        }

        let chol = cholesky_decompose(&k, n, noise);
        let targets: Vec<f64> = self.observations.iter().map(|o| o.value).collect();
        let weights = solve_cholesky(&chol, &targets, n);
        self.fit = GpFit {
            inputs,
            chol,
            weights,
        };
    }
}

fn finite_or_zero(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * PI).sqrt()
}

fn normal_cdf(x: f64) -> f64 {
    0.5 * (1.0 + erf(x / SQRT_2))
}

fn erf(x: f64) -> f64 {
    let a1 = 0.254829592;
    let a2 = -0.284496736;
    let a3 = 1.421413741;
    let a4 = -1.453152027;
    let a5 = 1.061405429;
    let p = 0.3275911;

    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + p * x);
    let y = 1.0 - (((((a5 * t + a4) * t) + a3) * t + a2) * t + a1) * t * (-x * x).exp();
    sign * y
}
