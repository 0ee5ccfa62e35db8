pub mod kernels;
pub mod linucb;
pub mod matrix;
pub mod pool;
pub mod router;
pub mod task;

pub use linucb::{BanditModel, LinUCBSelection, UcbScore};
pub use pool::{AbortSignal, ComputePool, ComputePoolManager, PoolStats};
pub use router::{Complexity, OperationConfig, RouteDecision, RouteOptions, RouterStats, SmartRouter};
pub use task::{ComputeResult, ComputeTask};

use thiserror::Error;
use tracing::debug;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ComputeError {
    #[error("compute task timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("compute task aborted")]
    Aborted,
    #[error("compute pool is shut down")]
    Shutdown,
    #[error("compute queue is full ({capacity} pending)")]
    QueueFull { capacity: usize },
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("worker panicked while running {task_type}")]
    WorkerPanic { task_type: String },
    #[error("expected {expected} result, got {actual}")]
    UnexpectedResult {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("failed to spawn compute worker: {0}")]
    Spawn(String),
}

/// Asks `router` where `task` should run and runs it there. A pool that is
/// missing or shut down counts as native being unavailable. Pool failures are
/// returned as-is; falling back to in-process execution is up to the caller.
pub async fn execute_routed(
    router: &SmartRouter,
    pool: Option<&ComputePool>,
    task: ComputeTask,
) -> Result<ComputeResult, ComputeError> {
    let live_pool = pool.filter(|p| p.is_running());
    let options = RouteOptions {
        data_size: Some(task.data_size()),
        native_available: Some(live_pool.is_some()),
    };
    let operation = task.kind();

    match (router.decide(operation, options), live_pool) {
        (RouteDecision::Native, Some(pool)) => pool.run(task).await,
        _ => {
            debug!(operation, "Running compute task in process");
            kernels::execute(task)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compute::task::{CholeskyDecomposePayload, CHOLESKY_DECOMPOSE};

    #[tokio::test]
    async fn routed_without_pool_runs_inline() {
        let router = SmartRouter::new();
        let task = ComputeTask::CholeskyDecompose(CholeskyDecomposePayload {
            matrix: vec![4.0],
            dim: 1,
            lambda: 1e-3,
        });
        let result = execute_routed(&router, None, task).await.unwrap();
        assert_eq!(result.kind(), CHOLESKY_DECOMPOSE);
    }
}
