use serde::{Deserialize, Serialize};

use crate::compute::matrix::{
    add_scaled, cholesky_decompose, cholesky_rank1_update, dot, has_invalid_values,
    identity_scaled, needs_full_recompute, quadratic_form, rank1_update_matrix,
    sanitize_covariance, sanitize_feature_vector, solve_cholesky, MIN_LAMBDA, MIN_RANK1_DIAG,
};
use crate::compute::ComputeError;

/// Self-contained LinUCB arm model. Matrices are row-major `d * d`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BanditModel {
    /// `A = X^T X + lambda I`
    #[serde(rename = "A")]
    pub a_matrix: Vec<f64>,
    /// `b = X^T y`
    pub b: Vec<f64>,
    /// Lower Cholesky factor of `A`.
    #[serde(rename = "L")]
    pub l_matrix: Vec<f64>,
    pub lambda: f64,
    pub alpha: f64,
    pub d: usize,
    pub update_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UcbScore {
    pub exploitation: f64,
    pub confidence: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinUCBSelection {
    pub best_index: usize,
    pub scores: Vec<UcbScore>,
    pub theta: Vec<f64>,
}

impl BanditModel {
    pub fn new(d: usize, alpha: f64, lambda: f64) -> Self {
        let lambda = if lambda.is_finite() { lambda.max(MIN_LAMBDA) } else { 1.0 };
        Self {
            a_matrix: identity_scaled(d, lambda),
            b: vec![0.0; d],
            l_matrix: identity_scaled(d, lambda.sqrt()),
            lambda,
            alpha: if alpha.is_finite() { alpha.max(0.0) } else { 0.3 },
            d,
            update_count: 0,
        }
    }

    pub fn validate(&self) -> Result<(), ComputeError> {
        let dd = self.d * self.d;
        if self.d == 0 {
            return Err(ComputeError::InvalidPayload("bandit model has zero dimensions".into()));
        }
        if self.a_matrix.len() != dd || self.l_matrix.len() != dd || self.b.len() != self.d {
            return Err(ComputeError::InvalidPayload(format!(
                "bandit model buffers do not match d={}",
                self.d
            )));
        }
        Ok(())
    }

    pub fn theta(&self) -> Vec<f64> {
        solve_cholesky(&self.l_matrix, &self.b, self.d)
    }

    fn score_with(&self, theta: &[f64], x: &[f64]) -> UcbScore {
        let mut x = x.to_vec();
        sanitize_feature_vector(&mut x);
        let exploitation = dot(theta, &x);
        let confidence = quadratic_form(&self.l_matrix, &x, self.d).max(0.0).sqrt();
        let score = exploitation + self.alpha * confidence;
        if score.is_finite() {
            UcbScore {
                exploitation,
                confidence,
                score,
            }
        } else {
            UcbScore {
                exploitation: 0.0,
                confidence: 0.0,
                score: f64::NEG_INFINITY,
            }
        }
    }

    /// Scores every candidate feature vector and picks the highest UCB.
    /// Ties keep the earliest candidate.
    pub fn select(&self, candidates: &[Vec<f64>]) -> Result<LinUCBSelection, ComputeError> {
        self.validate()?;
        if candidates.is_empty() {
            return Err(ComputeError::InvalidPayload("no candidates to score".into()));
        }
        if let Some(bad) = candidates.iter().find(|c| c.len() != self.d) {
            return Err(ComputeError::InvalidPayload(format!(
                "candidate has {} features, model expects {}",
                bad.len(),
                self.d
            )));
        }

        let mut theta = self.theta();
        if has_invalid_values(&theta) {
            theta = vec![0.0; self.d];
        }
        let scores: Vec<UcbScore> = candidates.iter().map(|x| self.score_with(&theta, x)).collect();
        let best_index = scores
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |(bi, bs), (i, s)| {
                if s.score > bs {
                    (i, s.score)
                } else {
                    (bi, bs)
                }
            })
            .0;

        Ok(LinUCBSelection {
            best_index,
            scores,
            theta,
        })
    }

    /// `A += x x^T`, `b += r x`, refreshing the factor incrementally and
    /// falling back to a full refactor when the factor degrades.
    pub fn update(&mut self, feature: &[f64], reward: f64) -> Result<(), ComputeError> {
        self.validate()?;
        if feature.len() != self.d {
            return Err(ComputeError::InvalidPayload(format!(
                "feature has {} entries, model expects {}",
                feature.len(),
                self.d
            )));
        }
        if !reward.is_finite() {
            return Err(ComputeError::InvalidPayload("reward is not finite".into()));
        }

        let mut x = feature.to_vec();
        sanitize_feature_vector(&mut x);
        let full = needs_full_recompute(self.update_count, &self.l_matrix, self.d);

        rank1_update_matrix(&mut self.a_matrix, &x, self.d);
        add_scaled(&mut self.b, &x, reward);

        if full || !cholesky_rank1_update(&mut self.l_matrix, &x, self.d, MIN_RANK1_DIAG) {
            sanitize_covariance(&mut self.a_matrix, self.d, self.lambda);
            self.l_matrix = cholesky_decompose(&self.a_matrix, self.d, self.lambda);
        }

        self.update_count += 1;
        Ok(())
    }
}
