use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info, warn};

use crate::amas::config::{BayesianOptimizerConfig, ComputePoolConfig};
use crate::amas::optimization::bayesian::BayesianOptimizerState;
use crate::compute::kernels;
use crate::compute::linucb::{BanditModel, LinUCBSelection};
use crate::compute::task::{
    BayesianSuggestPayload, CholeskyDecomposePayload, CholeskyRank1UpdatePayload, ComputeResult,
    ComputeTask, LinUCBSelectPayload, LinUCBUpdatePayload, Rank1UpdateOutput,
};
use crate::compute::ComputeError;

/// Cancellation handle shared between a caller and its pending task.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    inner: Arc<AbortInner>,
}

#[derive(Debug, Default)]
struct AbortInner {
    aborted: AtomicBool,
    notify: Notify,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn abort(&self) {
        self.inner.aborted.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    pub fn is_aborted(&self) -> bool {
        self.inner.aborted.load(Ordering::SeqCst)
    }

    pub async fn aborted(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_aborted() {
                return;
            }
            notified.await;
        }
    }
}

async fn wait_for_abort(signal: Option<&AbortSignal>) {
    match signal {
        Some(signal) => signal.aborted().await,
        None => std::future::pending::<()>().await,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub completed: u64,
    pub failed: u64,
    pub pending: usize,
    pub running: usize,
    /// Mean queue wait per executed task.
    pub wait_time_ms: f64,
    /// Mean execution time per executed task.
    pub run_time_ms: f64,
    pub threads: usize,
}

type Reply = oneshot::Sender<Result<ComputeResult, ComputeError>>;

struct Job {
    task: ComputeTask,
    reply: Reply,
    cancelled: Arc<AtomicBool>,
    enqueued_at: Instant,
}

struct Shared {
    config: ComputePoolConfig,
    queue: Mutex<VecDeque<Job>>,
    available: Condvar,
    shutdown: AtomicBool,
    threads: AtomicUsize,
    idle: AtomicUsize,
    running: AtomicUsize,
    completed: AtomicU64,
    failed: AtomicU64,
    executed: AtomicU64,
    wait_total_us: AtomicU64,
    run_total_us: AtomicU64,
    next_worker_id: AtomicUsize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    /// Claims a worker slot if the pool is below `max_threads`.
    fn reserve_thread(&self) -> bool {
        let max = self.config.max_threads;
        self.threads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n < max).then_some(n + 1))
            .is_ok()
    }

    /// Releases a worker slot if the pool stays at or above `min_threads`.
    fn retire_thread(&self) -> bool {
        let min = self.config.min_threads;
        self.threads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| (n > min).then(|| n - 1))
            .is_ok()
    }
}

/// Expects a slot already claimed with `reserve_thread`; the slot is released
/// when no thread is started.
fn spawn_worker(shared: &Arc<Shared>) -> Result<(), ComputeError> {
    // Held across the spawn so `shutdown` cannot drain the handles in between.
    let mut handles = shared.handles.lock();
    if shared.shutdown.load(Ordering::SeqCst) {
        shared.threads.fetch_sub(1, Ordering::SeqCst);
        return Err(ComputeError::Shutdown);
    }

    let id = shared.next_worker_id.fetch_add(1, Ordering::Relaxed);
    let worker_shared = Arc::clone(shared);
    let handle = std::thread::Builder::new()
        .name(format!("amas-compute-{id}"))
        .spawn(move || worker_loop(worker_shared, id))
        .map_err(|err| {
            shared.threads.fetch_sub(1, Ordering::SeqCst);
            ComputeError::Spawn(err.to_string())
        })?;

    handles.retain(|h| !h.is_finished());
    handles.push(handle);
    debug!(worker_id = id, "Compute worker spawned");
    Ok(())
}

fn worker_loop(shared: Arc<Shared>, id: usize) {
    let idle_timeout = Duration::from_millis(shared.config.idle_timeout_ms);

    loop {
        let job = {
            let mut queue = shared.queue.lock();
            loop {
                if shared.shutdown.load(Ordering::SeqCst) {
                    break None;
                }
                if let Some(job) = queue.pop_front() {
                    break Some(job);
                }
                shared.idle.fetch_add(1, Ordering::SeqCst);
                let timed_out = shared.available.wait_for(&mut queue, idle_timeout).timed_out();
                shared.idle.fetch_sub(1, Ordering::SeqCst);
                if timed_out && queue.is_empty() && shared.retire_thread() {
                    debug!(worker_id = id, "Idle compute worker retired");
                    return;
                }
            }
        };

        let Some(job) = job else {
            break;
        };
        if job.cancelled.load(Ordering::SeqCst) || job.reply.is_closed() {
            continue;
        }

        let task_type = job.task.kind();
        let waited = job.enqueued_at.elapsed();
        shared.running.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let task = job.task;
        let outcome = catch_unwind(AssertUnwindSafe(move || kernels::execute(task))).unwrap_or_else(|_| {
            Err(ComputeError::WorkerPanic {
                task_type: task_type.to_string(),
            })
        });

        let ran = started.elapsed();
        shared.running.fetch_sub(1, Ordering::SeqCst);
        shared.executed.fetch_add(1, Ordering::Relaxed);
        shared
            .wait_total_us
            .fetch_add(waited.as_micros() as u64, Ordering::Relaxed);
        shared.run_total_us.fetch_add(ran.as_micros() as u64, Ordering::Relaxed);
        if outcome.is_ok() {
            shared.completed.fetch_add(1, Ordering::Relaxed);
        } else {
            shared.failed.fetch_add(1, Ordering::Relaxed);
        }

        let _ = job.reply.send(outcome);
    }

    shared.threads.fetch_sub(1, Ordering::SeqCst);
    debug!(worker_id = id, "Compute worker stopped");
}

/// Elastic pool of OS threads running `ComputeTask`s off the async runtime.
pub struct ComputePool {
    shared: Arc<Shared>,
}

impl ComputePool {
    pub fn new(config: ComputePoolConfig) -> Result<Self, ComputeError> {
        let config = config.validated();
        let shared = Arc::new(Shared {
            queue: Mutex::new(VecDeque::with_capacity(config.max_queue_size.min(1024))),
            available: Condvar::new(),
            shutdown: AtomicBool::new(false),
            threads: AtomicUsize::new(0),
            idle: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            executed: AtomicU64::new(0),
            wait_total_us: AtomicU64::new(0),
            run_total_us: AtomicU64::new(0),
            next_worker_id: AtomicUsize::new(0),
            handles: Mutex::new(Vec::new()),
            config,
        });

        let pool = Self { shared };
        for _ in 0..pool.shared.config.min_threads {
            if pool.shared.reserve_thread() {
                spawn_worker(&pool.shared)?;
            }
        }
        info!(
            min_threads = pool.shared.config.min_threads,
            max_threads = pool.shared.config.max_threads,
            "Compute pool started"
        );
        Ok(pool)
    }

    pub fn config(&self) -> &ComputePoolConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        !self.shared.shutdown.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        let executed = shared.executed.load(Ordering::Relaxed);
        let mean_ms = |total_us: u64| {
            if executed == 0 {
                0.0
            } else {
                total_us as f64 / executed as f64 / 1000.0
            }
        };
        PoolStats {
            completed: shared.completed.load(Ordering::Relaxed),
            failed: shared.failed.load(Ordering::Relaxed),
            pending: shared.queue.lock().len(),
            running: shared.running.load(Ordering::SeqCst),
            wait_time_ms: mean_ms(shared.wait_total_us.load(Ordering::Relaxed)),
            run_time_ms: mean_ms(shared.run_total_us.load(Ordering::Relaxed)),
            threads: shared.threads.load(Ordering::SeqCst),
        }
    }

    pub async fn run(&self, task: ComputeTask) -> Result<ComputeResult, ComputeError> {
        self.run_with_signal(task, None).await
    }

    /// Submits a task and waits for it, the pool timeout, or `signal`.
    /// Failures are logged with the task type and returned unchanged.
    pub async fn run_with_signal(
        &self,
        task: ComputeTask,
        signal: Option<&AbortSignal>,
    ) -> Result<ComputeResult, ComputeError> {
        let task_type = task.kind();
        let result = self.submit(task, signal).await;
        if let Err(err) = &result {
            error!(task_type, error = %err, "Compute task failed");
        }
        result
    }

    async fn submit(
        &self,
        task: ComputeTask,
        signal: Option<&AbortSignal>,
    ) -> Result<ComputeResult, ComputeError> {
        if !self.is_running() {
            return Err(ComputeError::Shutdown);
        }
        if signal.is_some_and(AbortSignal::is_aborted) {
            return Err(ComputeError::Aborted);
        }

        let (reply, receiver) = oneshot::channel();
        let cancelled = Arc::new(AtomicBool::new(false));
        let grow = {
            let mut queue = self.shared.queue.lock();
            // `shutdown` flips the flag before draining under this lock.
            if self.shared.shutdown.load(Ordering::SeqCst) {
                return Err(ComputeError::Shutdown);
            }
            if queue.len() >= self.shared.config.max_queue_size {
                return Err(ComputeError::QueueFull {
                    capacity: self.shared.config.max_queue_size,
                });
            }
            queue.push_back(Job {
                task,
                reply,
                cancelled: Arc::clone(&cancelled),
                enqueued_at: Instant::now(),
            });
            queue.len() > self.shared.idle.load(Ordering::SeqCst)
        };

        if grow && self.shared.reserve_thread() {
            match spawn_worker(&self.shared) {
                Ok(()) | Err(ComputeError::Shutdown) => {}
                Err(err) => warn!(error = %err, "Could not grow compute pool"),
            }
        }
        self.shared.available.notify_one();

        let timeout_ms = self.shared.config.task_timeout_ms;
        let outcome = tokio::select! {
            received = receiver => match received {
                Ok(result) => result,
                Err(_) => Err(ComputeError::Shutdown),
            },
            _ = tokio::time::sleep(Duration::from_millis(timeout_ms)) => {
                Err(ComputeError::Timeout { timeout_ms })
            }
            _ = wait_for_abort(signal) => Err(ComputeError::Aborted),
        };

        if outcome.is_err() {
            cancelled.store(true, Ordering::SeqCst);
        }
        outcome
    }

    /// Stops accepting work, fails queued tasks with `Shutdown` and joins every
    /// worker. Tasks already running finish first. Idempotent.
    pub fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::SeqCst) {
            return;
        }

        let drained: Vec<Job> = {
            let mut queue = self.shared.queue.lock();
            queue.drain(..).collect()
        };
        self.shared.available.notify_all();
        for job in drained {
            let _ = job.reply.send(Err(ComputeError::Shutdown));
        }

        let handles: Vec<JoinHandle<()>> = self.shared.handles.lock().drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                warn!("Compute worker exited abnormally");
            }
        }
        info!("Compute pool shut down");
    }

    fn expect_result<T>(
        result: ComputeResult,
        expected: &'static str,
        pick: impl FnOnce(ComputeResult) -> Option<T>,
    ) -> Result<T, ComputeError> {
        let actual = result.kind();
        pick(result).ok_or(ComputeError::UnexpectedResult { expected, actual })
    }

    pub async fn run_linucb_select(
        &self,
        model: BanditModel,
        candidates: Vec<Vec<f64>>,
    ) -> Result<LinUCBSelection, ComputeError> {
        let task = ComputeTask::LinUCBSelect(LinUCBSelectPayload { model, candidates });
        let expected = task.kind();
        let result = self.run(task).await?;
        Self::expect_result(result, expected, |r| match r {
            ComputeResult::LinUCBSelect(selection) => Some(selection),
            _ => None,
        })
    }

    pub async fn run_linucb_update(
        &self,
        model: BanditModel,
        feature: Vec<f64>,
        reward: f64,
    ) -> Result<BanditModel, ComputeError> {
        let task = ComputeTask::LinUCBUpdate(LinUCBUpdatePayload {
            model,
            feature,
            reward,
        });
        let expected = task.kind();
        let result = self.run(task).await?;
        Self::expect_result(result, expected, |r| match r {
            ComputeResult::LinUCBUpdate(model) => Some(model),
            _ => None,
        })
    }

    pub async fn run_bayesian_suggest(
        &self,
        config: BayesianOptimizerConfig,
        state: Option<BayesianOptimizerState>,
        count: usize,
    ) -> Result<Vec<Vec<f64>>, ComputeError> {
        let task = ComputeTask::BayesianSuggest(BayesianSuggestPayload {
            config,
            state,
            count,
        });
        let expected = task.kind();
        let result = self.run(task).await?;
        Self::expect_result(result, expected, |r| match r {
            ComputeResult::BayesianSuggest(points) => Some(points),
            _ => None,
        })
    }

    pub async fn run_cholesky_decompose(
        &self,
        matrix: Vec<f64>,
        dim: usize,
        lambda: f64,
    ) -> Result<Vec<f64>, ComputeError> {
        let task = ComputeTask::CholeskyDecompose(CholeskyDecomposePayload { matrix, dim, lambda });
        let expected = task.kind();
        let result = self.run(task).await?;
        Self::expect_result(result, expected, |r| match r {
            ComputeResult::CholeskyDecompose(l) => Some(l),
            _ => None,
        })
    }

    pub async fn run_cholesky_rank1_update(
        &self,
        l: Vec<f64>,
        x: Vec<f64>,
        dim: usize,
        min_diag: f64,
    ) -> Result<Rank1UpdateOutput, ComputeError> {
        let task = ComputeTask::CholeskyRank1Update(CholeskyRank1UpdatePayload { l, x, dim, min_diag });
        let expected = task.kind();
        let result = self.run(task).await?;
        Self::expect_result(result, expected, |r| match r {
            ComputeResult::CholeskyRank1Update(output) => Some(output),
            _ => None,
        })
    }
}

impl Drop for ComputePool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Owns the application's single compute pool. Configuration applies only on
/// the call that creates the pool.
#[derive(Default)]
pub struct ComputePoolManager {
    pool: Mutex<Option<Arc<ComputePool>>>,
}

impl ComputePoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_init(&self, config: Option<ComputePoolConfig>) -> Result<Arc<ComputePool>, ComputeError> {
        let mut slot = self.pool.lock();
        if let Some(pool) = slot.as_ref() {
            if config.is_some() {
                debug!("Compute pool already initialized, ignoring new config");
            }
            return Ok(Arc::clone(pool));
        }
        let pool = Arc::new(ComputePool::new(config.unwrap_or_default())?);
        *slot = Some(Arc::clone(&pool));
        Ok(pool)
    }

    pub fn is_initialized(&self) -> bool {
        self.pool.lock().is_some()
    }

    /// Tears the pool down. Returns `false` when there was nothing to destroy.
    pub fn destroy(&self) -> bool {
        let pool = self.pool.lock().take();
        match pool {
            Some(pool) => {
                pool.shutdown();
                true
            }
            None => false,
        }
    }

    pub fn stats(&self) -> PoolStats {
        self.pool
            .lock()
            .as_ref()
            .map(|pool| pool.stats())
            .unwrap_or_default()
    }
}
