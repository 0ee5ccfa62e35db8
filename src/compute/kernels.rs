//! In-process execution of every `ComputeTask`. Pool workers call the same
//! entry point, so both routes produce identical results.

use crate::amas::optimization::bayesian::BayesianOptimizer;
use crate::compute::matrix::{cholesky_decompose, cholesky_rank1_update, has_invalid_values};
use crate::compute::task::{
    BayesianSuggestPayload, CholeskyDecomposePayload, CholeskyRank1UpdatePayload, ComputeResult,
    ComputeTask, LinUCBSelectPayload, LinUCBUpdatePayload, Rank1UpdateOutput,
};
use crate::compute::ComputeError;

pub fn execute(task: ComputeTask) -> Result<ComputeResult, ComputeError> {
    match task {
        ComputeTask::LinUCBSelect(payload) => linucb_select(payload),
        ComputeTask::LinUCBUpdate(payload) => linucb_update(payload),
        ComputeTask::BayesianSuggest(payload) => bayesian_suggest(payload),
        ComputeTask::CholeskyDecompose(payload) => decompose(payload),
        ComputeTask::CholeskyRank1Update(payload) => rank1_update(payload),
    }
}

fn linucb_select(payload: LinUCBSelectPayload) -> Result<ComputeResult, ComputeError> {
    payload
        .model
        .select(&payload.candidates)
        .map(ComputeResult::LinUCBSelect)
}

fn linucb_update(payload: LinUCBUpdatePayload) -> Result<ComputeResult, ComputeError> {
    let mut model = payload.model;
    model.update(&payload.feature, payload.reward)?;
    Ok(ComputeResult::LinUCBUpdate(model))
}

fn bayesian_suggest(payload: BayesianSuggestPayload) -> Result<ComputeResult, ComputeError> {
    let mut optimizer = BayesianOptimizer::try_new(payload.config)
        .map_err(|err| ComputeError::InvalidPayload(err.to_string()))?;
    optimizer.set_state(payload.state);
    let count = payload.count.max(1);
    let points = if count == 1 {
        vec![optimizer.suggest_next()]
    } else {
        optimizer.suggest_batch(count)
    };
    Ok(ComputeResult::BayesianSuggest(points))
}

fn check_square(len: usize, dim: usize, name: &str) -> Result<(), ComputeError> {
    if dim == 0 || len != dim * dim {
        return Err(ComputeError::InvalidPayload(format!(
            "{name} has {len} entries, expected {dim}x{dim}"
        )));
    }
    Ok(())
}

fn decompose(payload: CholeskyDecomposePayload) -> Result<ComputeResult, ComputeError> {
    check_square(payload.matrix.len(), payload.dim, "matrix")?;
    if has_invalid_values(&payload.matrix) {
        return Err(ComputeError::InvalidPayload("matrix contains non-finite values".into()));
    }
    Ok(ComputeResult::CholeskyDecompose(cholesky_decompose(
        &payload.matrix,
        payload.dim,
        payload.lambda,
    )))
}

fn rank1_update(payload: CholeskyRank1UpdatePayload) -> Result<ComputeResult, ComputeError> {
    check_square(payload.l.len(), payload.dim, "factor")?;
    if payload.x.len() != payload.dim {
        return Err(ComputeError::InvalidPayload(format!(
            "update vector has {} entries, expected {}",
            payload.x.len(),
            payload.dim
        )));
    }
    let mut l = payload.l;
    let success = cholesky_rank1_update(&mut l, &payload.x, payload.dim, payload.min_diag);
    Ok(ComputeResult::CholeskyRank1Update(Rank1UpdateOutput { l, success }))
}
