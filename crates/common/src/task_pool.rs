//! Bounded pool for supervised background tasks.
//!
//! Owns the short-lived sub-work the federation core spawns off the
//! request path (Accept delivery after an inbound Follow, DM publishing).
//! Concurrency is bounded by a semaphore and shutdown drains in-flight
//! tasks up to a grace period, so nothing outlives the supervisor.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Notify, Semaphore};
use tracing::{debug, warn};

/// Bounded background task pool.
#[derive(Clone)]
pub struct TaskPool {
    inner: Arc<Inner>,
}

struct Inner {
    semaphore: Arc<Semaphore>,
    active: AtomicUsize,
    drained: Notify,
    shutting_down: AtomicBool,
}

impl TaskPool {
    /// Create a pool running at most `capacity` tasks concurrently.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                semaphore: Arc::new(Semaphore::new(capacity.max(1))),
                active: AtomicUsize::new(0),
                drained: Notify::new(),
                shutting_down: AtomicBool::new(false),
            }),
        }
    }

    /// Spawn a named task onto the pool.
    ///
    /// Returns `false` (and drops the future) once shutdown has begun.
    /// Tasks beyond the concurrency bound queue on the semaphore.
    pub fn spawn<F>(&self, name: &'static str, future: F) -> bool
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        if self.inner.shutting_down.load(Ordering::SeqCst) {
            warn!(task = name, "Task pool is shutting down, task dropped");
            return false;
        }

        self.inner.active.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::clone(&self.inner);

        tokio::spawn(async move {
            // Closed semaphore means shutdown finished while we queued.
            if let Ok(_permit) = inner.semaphore.clone().acquire_owned().await {
                debug!(task = name, "Background task started");
                future.await;
                debug!(task = name, "Background task finished");
            }
            if inner.active.fetch_sub(1, Ordering::SeqCst) == 1 {
                inner.drained.notify_waiters();
            }
        });

        true
    }

    /// Number of tasks currently queued or running.
    #[must_use]
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Stop accepting tasks and wait for in-flight ones, up to `grace`.
    ///
    /// Returns `true` if the pool drained fully within the grace period.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.inner.shutting_down.store(true, Ordering::SeqCst);

        let drained = tokio::time::timeout(grace, async {
            while self.inner.active.load(Ordering::SeqCst) > 0 {
                self.inner.drained.notified().await;
            }
        })
        .await
        .is_ok();

        // Reject anything still queued on the semaphore.
        self.inner.semaphore.close();

        if !drained {
            warn!(
                remaining = self.active(),
                "Task pool shutdown grace expired with tasks in flight"
            );
        }
        drained
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spawn_runs_task() {
        let pool = TaskPool::new(4);
        let (tx, rx) = tokio::sync::oneshot::channel();

        assert!(pool.spawn("test", async move {
            tx.send(42).ok();
        }));

        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test]
    async fn test_concurrency_is_bounded() {
        let pool = TaskPool::new(1);
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        for _ in 0..8 {
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            pool.spawn("bounded", async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                running.fetch_sub(1, Ordering::SeqCst);
            });
        }

        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_shutdown_rejects_new_tasks() {
        let pool = TaskPool::new(4);
        assert!(pool.shutdown(Duration::from_millis(100)).await);
        assert!(!pool.spawn("late", async {}));
    }

    #[tokio::test]
    async fn test_shutdown_waits_for_in_flight() {
        let pool = TaskPool::new(4);
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);

        pool.spawn("slow", async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            flag.store(true, Ordering::SeqCst);
        });

        assert!(pool.shutdown(Duration::from_secs(5)).await);
        assert!(done.load(Ordering::SeqCst));
    }
}
