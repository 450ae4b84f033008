//! Bounded-concurrency executor for value-producing tasks.
//!
//! The pool caps how many admitted tasks run at once and serialises
//! admission, so a burst of bootstrap work (joining hundreds of groups,
//! re-posting hundreds of subscriptions) never floods the platform.

use crate::logging::Logger;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Concurrency level above which a warning is logged at construction.
const CONCURRENCY_WARN_THRESHOLD: usize = 10;

/// Bounded-concurrency executor.
///
/// `run` admits the future once a slot frees up, drives it to completion,
/// and returns its value. Slots are released when the future finishes or
/// is cancelled.
pub struct WorkerPool {
    semaphore: Arc<Semaphore>,
    limit: usize,
}

impl WorkerPool {
    /// Creates a pool with the given concurrency bound.
    ///
    /// Warns when the bound exceeds the recommended threshold, since the
    /// platform rate-limits aggressively.
    pub fn new(limit: usize, log: &Logger) -> Self {
        if limit > CONCURRENCY_WARN_THRESHOLD {
            log.warn(format!(
                "Worker concurrency {limit} exceeds the recommended maximum of \
                 {CONCURRENCY_WARN_THRESHOLD}"
            ));
        }
        Self {
            semaphore: Arc::new(Semaphore::new(limit.max(1))),
            limit: limit.max(1),
        }
    }

    /// Runs a future once a concurrency slot is available.
    pub async fn run<F, T>(&self, future: F) -> T
    where
        F: Future<Output = T>,
    {
        // acquire() only fails when the semaphore is closed, which never
        // happens for a pool's lifetime
        let _permit = self
            .semaphore
            .acquire()
            .await
            .expect("worker pool semaphore closed");
        future.await
    }

    /// The configured concurrency bound.
    pub fn limit(&self) -> usize {
        self.limit
    }
}
