//! Dense row-major linear algebra shared by the bandit kernels and the
//! Gaussian-process surrogate. Matrices are `d * d` slices indexed `i * d + j`.

pub const MIN_LAMBDA: f64 = 1e-3;
pub const MIN_RANK1_DIAG: f64 = 1e-6;
pub const MAX_COVARIANCE: f64 = 1e9;
pub const MAX_FEATURE_ABS: f64 = 50.0;
pub const EPSILON: f64 = 1e-10;

pub fn identity_scaled(d: usize, scale: f64) -> Vec<f64> {
    let mut m = vec![0.0; d * d];
    for i in 0..d {
        m[i * d + i] = scale;
    }
    m
}

/// Cholesky factor `L` with `A = L * L^T`.
///
/// A tiny `lambda`-proportional ridge is added to the diagonal, and pivots that
/// come out non-positive are replaced with `sqrt(lambda)`, so the result is
/// always a usable lower-triangular factor even for semi-definite input.
pub fn cholesky_decompose(a: &[f64], d: usize, lambda: f64) -> Vec<f64> {
    let safe_lambda = lambda.max(MIN_LAMBDA);
    let mut l = vec![0.0; d * d];

    let mut work = a.to_vec();
    for i in 0..d {
        work[i * d + i] += safe_lambda * EPSILON;
    }

    for i in 0..d {
        for j in 0..=i {
            let mut sum = work[i * d + j];
            for k in 0..j {
                sum -= l[i * d + k] * l[j * d + k];
            }

            if i == j {
                l[i * d + i] = if sum > 0.0 && sum.is_finite() {
                    sum.sqrt()
                } else {
                    safe_lambda.sqrt()
                };
            } else {
                let diag = l[j * d + j];
                l[i * d + j] = if diag.abs() > EPSILON && sum.is_finite() {
                    sum / diag
                } else {
                    0.0
                };
            }
        }
    }

    l
}

/// In-place rank-1 update via Givens rotations: `L' L'^T = L L^T + x x^T`.
///
/// Returns `false` when a rotation would produce a diagonal below `min_diag`;
/// `l` is then partially rotated and the caller must refactor from scratch.
pub fn cholesky_rank1_update(l: &mut [f64], x: &[f64], d: usize, min_diag: f64) -> bool {
    let safe_min_diag = min_diag.max(MIN_RANK1_DIAG);
    let mut x_work = x.to_vec();

    for k in 0..d {
        let l_kk = l[k * d + k];
        let x_k = x_work[k];
        let r = (l_kk * l_kk + x_k * x_k).sqrt();

        if r.is_nan() || r < safe_min_diag {
            return false;
        }

        let c = l_kk / r;
        let s = x_k / r;
        l[k * d + k] = r;

        for i in (k + 1)..d {
            let l_ik = l[i * d + k];
            let x_i = x_work[i];
            l[i * d + k] = c * l_ik + s * x_i;
            x_work[i] = -s * l_ik + c * x_i;
        }
    }

    (0..d).all(|i| {
        let diag = l[i * d + i];
        diag.is_finite() && diag >= safe_min_diag
    })
}

/// Solves `A x = b` given the factor of `A`.
pub fn solve_cholesky(l: &[f64], b: &[f64], d: usize) -> Vec<f64> {
    let y = solve_triangular_lower(l, b, d);
    solve_triangular_upper_transpose(l, &y, d)
}

/// Forward substitution for `L x = b`.
pub fn solve_triangular_lower(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];
    for i in 0..n {
        let mut sum = b[i];
        for j in 0..i {
            sum -= l[i * n + j] * x[j];
        }
        let diag = l[i * n + i];
        x[i] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
    }
    x
}

/// Back substitution for `L^T x = b`.
fn solve_triangular_upper_transpose(l: &[f64], b: &[f64], n: usize) -> Vec<f64> {
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in (i + 1)..n {
            sum -= l[j * n + i] * x[j];
        }
        let diag = l[i * n + i];
        x[i] = if diag.abs() > EPSILON { sum / diag } else { 0.0 };
    }
    x
}

/// `x^T A^{-1} x = ||L^{-1} x||^2`.
pub fn quadratic_form(l: &[f64], x: &[f64], d: usize) -> f64 {
    solve_triangular_lower(l, x, d).iter().map(|v| v * v).sum()
}

pub fn mat_vec_mul(a: &[f64], x: &[f64], d: usize) -> Vec<f64> {
    (0..d)
        .map(|i| (0..d).map(|j| a[i * d + j] * x[j]).sum())
        .collect()
}

pub fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(&x, &y)| x * y).sum()
}

/// `A += x x^T`
pub fn rank1_update_matrix(a: &mut [f64], x: &[f64], d: usize) {
    for i in 0..d {
        for j in 0..d {
            a[i * d + j] += x[i] * x[j];
        }
    }
}

/// `a += scale * b`
pub fn add_scaled(a: &mut [f64], b: &[f64], scale: f64) {
    for (ai, &bi) in a.iter_mut().zip(b.iter()) {
        *ai += scale * bi;
    }
}

pub fn has_invalid_values(values: &[f64]) -> bool {
    values.iter().any(|v| !v.is_finite())
}

/// Zeroes non-finite entries and clips the rest to `±MAX_FEATURE_ABS`.
pub fn sanitize_feature_vector(x: &mut [f64]) {
    for val in x.iter_mut() {
        *val = if val.is_finite() {
            val.clamp(-MAX_FEATURE_ABS, MAX_FEATURE_ABS)
        } else {
            0.0
        };
    }
}

/// Forces a covariance matrix back to symmetric, bounded, diagonally dominant
/// enough to factor.
pub fn sanitize_covariance(a: &mut [f64], d: usize, lambda: f64) {
    let safe_lambda = lambda.max(MIN_LAMBDA);

    for i in 0..d {
        for j in 0..d {
            let idx = i * d + j;
            let val = a[idx];
            if !val.is_finite() {
                a[idx] = if i == j { safe_lambda } else { 0.0 };
            } else if val.abs() > MAX_COVARIANCE {
                a[idx] = val.signum() * MAX_COVARIANCE;
            }
        }
        let diag_idx = i * d + i;
        if a[diag_idx] < safe_lambda {
            a[diag_idx] = safe_lambda;
        }
    }

    for i in 0..d {
        for j in (i + 1)..d {
            let avg = (a[i * d + j] + a[j * d + i]) / 2.0;
            a[i * d + j] = avg;
            a[j * d + i] = avg;
        }
    }
}

/// Periodic or health-triggered full refactorisation for incremental factors.
pub fn needs_full_recompute(update_count: u64, l: &[f64], d: usize) -> bool {
    if update_count % 100 == 0 {
        return true;
    }

    let mut min_diag = f64::MAX;
    let mut max_diag = 0.0_f64;
    for i in 0..d {
        let diag = l[i * d + i];
        if !diag.is_finite() || diag < MIN_RANK1_DIAG {
            return true;
        }
        min_diag = min_diag.min(diag);
        max_diag = max_diag.max(diag);
    }

    d > 0 && max_diag / min_diag > 1e8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cholesky_of_identity_is_identity() {
        let a = identity_scaled(3, 1.0);
        let l = cholesky_decompose(&a, 3, 1.0);
        for i in 0..3 {
            assert!((l[i * 3 + i] - 1.0).abs() < 1e-6);
        }
    }

    #[test]
    fn solve_recovers_rhs() {
        let a = vec![2.0, 1.0, 1.0, 2.0];
        let b = vec![1.0, 2.0];
        let l = cholesky_decompose(&a, 2, 0.0);
        let x = solve_cholesky(&l, &b, 2);
        let ax = mat_vec_mul(&a, &x, 2);
        for i in 0..2 {
            assert!((ax[i] - b[i]).abs() < 1e-6);
        }
    }

    #[test]
    fn rank1_update_matches_refactor() {
        let mut l = identity_scaled(2, 1.0);
        let x = vec![0.5, 0.5];
        assert!(cholesky_rank1_update(&mut l, &x, 2, MIN_RANK1_DIAG));

        let mut a = identity_scaled(2, 1.0);
        rank1_update_matrix(&mut a, &x, 2);
        let fresh = cholesky_decompose(&a, 2, MIN_LAMBDA);
        for (u, f) in l.iter().zip(fresh.iter()) {
            assert!((u - f).abs() < 1e-6);
        }
    }

    #[test]
    fn rank1_update_rejects_degenerate_factor() {
        let mut l = vec![0.0; 4];
        assert!(!cholesky_rank1_update(&mut l, &[0.0, 0.0], 2, MIN_RANK1_DIAG));
    }

    #[test]
    fn quadratic_form_with_identity_is_norm() {
        let l = identity_scaled(2, 1.0);
        assert!((quadratic_form(&l, &[3.0, 4.0], 2) - 25.0).abs() < 1e-10);
    }

    #[test]
    fn sanitize_feature_vector_clips_and_zeroes() {
        let mut x = vec![1.0, f64::NAN, 100.0, -100.0];
        sanitize_feature_vector(&mut x);
        assert_eq!(x, vec![1.0, 0.0, MAX_FEATURE_ABS, -MAX_FEATURE_ABS]);
    }

    #[test]
    fn sanitize_covariance_symmetrises() {
        let mut a = vec![1.0, f64::INFINITY, 0.0, 1.0];
        sanitize_covariance(&mut a, 2, 1.0);
        assert_eq!(a[1], a[2]);
        assert!(!has_invalid_values(&a));
    }
}
