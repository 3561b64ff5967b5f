//! Bounded task execution pool with one pending handle per unit of work

use crate::errors::{JanuscopeError, Result};
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{Instant, sleep, timeout};
use tracing::{debug, info, warn};

/// Fixed-capacity pool. Work is spawned immediately but only runs while
/// holding one of `size` permits.
#[derive(Debug)]
pub struct WorkerPool {
    name: String,
    size: usize,
    permits: Arc<Semaphore>,
    counters: Arc<PoolCounters>,
    handles: Mutex<Vec<AbortHandle>>,
    shut_down: AtomicBool,
}

#[derive(Debug, Default)]
struct PoolCounters {
    queued: AtomicUsize,
    active: AtomicUsize,
    completed: AtomicU64,
    rejected: AtomicU64,
}

/// Decrements the active count even when the task is aborted mid-flight
struct ActiveGuard(Arc<PoolCounters>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
        self.0.completed.fetch_add(1, Ordering::SeqCst);
    }
}

struct QueuedGuard(Arc<PoolCounters>);

impl Drop for QueuedGuard {
    fn drop(&mut self) {
        self.0.queued.fetch_sub(1, Ordering::SeqCst);
    }
}

impl WorkerPool {
    /// Create a pool; a zero size cannot run anything and is rejected
    pub fn new(name: impl Into<String>, size: usize) -> Result<Self> {
        let name = name.into();
        if size == 0 {
            return Err(JanuscopeError::Pool(format!(
                "pool '{}' must have at least one worker",
                name
            )));
        }

        debug!("Created worker pool {} with {} workers", name, size);

        Ok(Self {
            name,
            size,
            permits: Arc::new(Semaphore::new(size)),
            counters: Arc::new(PoolCounters::default()),
            handles: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Submit one unit of work
    pub fn submit<F, T>(&self, work: F) -> Result<PendingResult<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.shut_down.load(Ordering::SeqCst) {
            self.counters.rejected.fetch_add(1, Ordering::SeqCst);
            return Err(JanuscopeError::Pool(format!("pool '{}' is shut down", self.name)));
        }

        let permits = Arc::clone(&self.permits);
        let counters = Arc::clone(&self.counters);
        counters.queued.fetch_add(1, Ordering::SeqCst);
        let queued = QueuedGuard(Arc::clone(&counters));

        let handle = tokio::spawn(async move {
            let permit = permits.acquire_owned().await;
            drop(queued);

            let Ok(_permit) = permit else {
                counters.rejected.fetch_add(1, Ordering::SeqCst);
                return None;
            };

            counters.active.fetch_add(1, Ordering::SeqCst);
            let _active = ActiveGuard(Arc::clone(&counters));
            Some(work.await)
        });

        if let Ok(mut handles) = self.handles.lock() {
            handles.retain(|h| !h.is_finished());
            handles.push(handle.abort_handle());
        }

        Ok(PendingResult { handle })
    }

    /// Stop accepting work, give in-flight tasks `grace` to finish, then abort the rest
    pub async fn shutdown(&self, grace: Duration) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        // Queued tasks waiting for a permit are released as rejected
        self.permits.close();

        let deadline = Instant::now() + grace;
        while self.counters.active.load(Ordering::SeqCst) > 0 && Instant::now() < deadline {
            sleep(Duration::from_millis(25)).await;
        }

        let stragglers = self.counters.active.load(Ordering::SeqCst);
        if stragglers > 0 {
            warn!(
                "Worker pool {} still has {} active tasks after {:?}, aborting",
                self.name, stragglers, grace
            );
        }

        if let Ok(mut handles) = self.handles.lock() {
            for handle in handles.drain(..) {
                handle.abort();
            }
        }

        info!("Worker pool {} shut down", self.name);
    }

    /// Accepting work and not shut down
    pub fn is_healthy(&self) -> bool {
        !self.shut_down.load(Ordering::SeqCst) && !self.permits.is_closed()
    }

    /// Snapshot of the pool counters
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            name: self.name.clone(),
            pool_size: self.size,
            active: self.counters.active.load(Ordering::SeqCst),
            queued: self.counters.queued.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            rejected: self.counters.rejected.load(Ordering::SeqCst),
            available: self.permits.available_permits(),
        }
    }
}

/// Handle to one submitted unit of work
#[derive(Debug)]
pub struct PendingResult<T> {
    handle: JoinHandle<Option<T>>,
}

impl<T> PendingResult<T> {
    /// Wait for the result, giving up (and aborting the task) after `ceiling`
    pub async fn wait(mut self, ceiling: Duration) -> std::result::Result<T, WaitError> {
        match timeout(ceiling, &mut self.handle).await {
            Ok(joined) => Self::unpack(joined),
            Err(_) => {
                self.handle.abort();
                Err(WaitError::TimedOut(ceiling))
            }
        }
    }

    /// Wait without a ceiling
    pub async fn join(self) -> std::result::Result<T, WaitError> {
        Self::unpack(self.handle.await)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    fn unpack(
        joined: std::result::Result<Option<T>, tokio::task::JoinError>,
    ) -> std::result::Result<T, WaitError> {
        match joined {
            Ok(Some(value)) => Ok(value),
            Ok(None) => Err(WaitError::Rejected),
            Err(e) if e.is_cancelled() => Err(WaitError::Cancelled),
            Err(e) => Err(WaitError::Failed(e.to_string())),
        }
    }
}

/// Why a pending result produced no value
#[derive(Debug, Clone, PartialEq)]
pub enum WaitError {
    TimedOut(Duration),
    Rejected,
    Cancelled,
    Failed(String),
}

impl std::fmt::Display for WaitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WaitError::TimedOut(ceiling) => write!(f, "no result within {}s", ceiling.as_secs_f64()),
            WaitError::Rejected => write!(f, "pool shut down before the task ran"),
            WaitError::Cancelled => write!(f, "task was cancelled"),
            WaitError::Failed(msg) => write!(f, "task failed: {}", msg),
        }
    }
}

/// Pool telemetry for health/status reporting
#[derive(Debug, Clone, Serialize)]
pub struct PoolStats {
    pub name: String,
    pub pool_size: usize,
    pub active: usize,
    pub queued: usize,
    pub completed: u64,
    pub rejected: u64,
    pub available: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_sized_pool_is_rejected() {
        assert!(WorkerPool::new("probe", 0).is_err());
    }

    #[tokio::test]
    async fn test_submit_and_wait() {
        let pool = WorkerPool::new("probe", 2).unwrap();
        let pending = pool.submit(async { 21 * 2 }).unwrap();

        assert_eq!(pending.wait(Duration::from_secs(1)).await, Ok(42));
        assert_eq!(pool.stats().completed, 1);
        assert_eq!(pool.stats().active, 0);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = WorkerPool::new("probe", 2).unwrap();
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut pending = Vec::new();
        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pending.push(
                pool.submit(async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                })
                .unwrap(),
            );
        }

        for p in pending {
            p.wait(Duration::from_secs(5)).await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.stats().completed, 8);
    }

    #[tokio::test]
    async fn test_wait_times_out_and_aborts() {
        let pool = WorkerPool::new("probe", 1).unwrap();
        let pending = pool
            .submit(async {
                sleep(Duration::from_secs(60)).await;
            })
            .unwrap();

        let result = pending.wait(Duration::from_millis(50)).await;
        assert_eq!(result, Err(WaitError::TimedOut(Duration::from_millis(50))));

        // The aborted task releases its worker
        sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.stats().active, 0);
        assert_eq!(pool.stats().available, 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_work() {
        let pool = WorkerPool::new("alerts", 1).unwrap();
        assert!(pool.is_healthy());

        pool.shutdown(Duration::from_millis(100)).await;

        assert!(!pool.is_healthy());
        assert!(pool.submit(async {}).is_err());
        assert_eq!(pool.stats().rejected, 1);
    }

    #[tokio::test]
    async fn test_shutdown_force_terminates_stragglers() {
        let pool = WorkerPool::new("probe", 1).unwrap();
        let pending = pool
            .submit(async {
                sleep(Duration::from_secs(60)).await;
                1
            })
            .unwrap();
        sleep(Duration::from_millis(10)).await;

        pool.shutdown(Duration::from_millis(50)).await;

        assert_eq!(pending.join().await, Err(WaitError::Cancelled));
    }
}
