//! The two-pool scheduling model (§5): a bounded computation pool for
//! CPU-bound work (compilation, graph walking) and an unbounded I/O pool
//! for blocking operations (directory copies, deletions, dedup replay,
//! awaiting a shared task). Deduplicated subscribers must wait on the I/O
//! pool so the computation pool cannot deadlock.

use crate::config::SchedulerConfig;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, SemaphorePermit};

/// The bounded computation pool. Acquiring a permit is the suspension
/// point callers pay at every `gather` over child results and every
/// `compile` invocation (§5).
#[derive(Clone)]
pub struct ComputationPool {
    semaphore: Arc<Semaphore>,
}

impl ComputationPool {
    pub fn new(config: &SchedulerConfig) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(config.computation_parallelism.max(1))),
        }
    }

    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        self.semaphore
            .acquire()
            .await
            .expect("computation pool semaphore is never closed")
    }

    /// Run `f` after acquiring a permit.
    pub async fn run<F, T>(&self, f: F) -> T
    where
        F: Future<Output = T>,
    {
        let _permit = self.acquire().await;
        f.await
    }
}

/// The unbounded I/O pool. No cap is applied: directory copies, deletions,
/// dedup replay, and awaiting a shared compile task all go here so a burst
/// of deduplicated clients can never starve the computation pool.
pub struct IoPool;

impl IoPool {
    /// Spawn async I/O-bound work (directory copies, replay, awaiting a
    /// shared task).
    pub fn spawn<F>(future: F) -> tokio::task::JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        tokio::spawn(future)
    }

    /// Spawn genuinely blocking filesystem work (a synchronous delete or
    /// copy) on tokio's blocking thread pool.
    pub fn spawn_blocking<F, T>(f: F) -> tokio::task::JoinHandle<T>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        tokio::task::spawn_blocking(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn computation_pool_caps_concurrency() {
        let config = SchedulerConfig {
            computation_parallelism: 1,
        };
        let pool = ComputationPool::new(&config);

        let in_flight = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let max_seen = Arc::new(std::sync::atomic::AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let pool = pool.clone();
            let in_flight = in_flight.clone();
            let max_seen = max_seen.clone();
            tasks.push(tokio::spawn(async move {
                pool.run(async {
                    let now = in_flight.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
                    max_seen.fetch_max(now, std::sync::atomic::Ordering::SeqCst);
                    tokio::time::sleep(tokio::time::Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, std::sync::atomic::Ordering::SeqCst);
                })
                .await;
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(max_seen.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
