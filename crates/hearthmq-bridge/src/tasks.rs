//! Tracked outbound tasks
//!
//! Property handlers run detached from the node that triggered them, but
//! never untracked: every invocation lives in a [`JoinSet`] until it
//! finishes, so a router can report, await, or abort what is in flight.
//!
//! - at most `max_concurrent` handlers run at once; the rest wait for a permit
//! - at most `max_pending` handlers are queued or running; extra changes are dropped
//! - failures and panics are logged per task

use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use crate::Result;

/// Default number of property handlers allowed to run at once
pub const DEFAULT_MAX_CONCURRENT: usize = 16;

/// Default number of property handlers allowed to be queued or running
pub const DEFAULT_MAX_PENDING: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Completed,
    Failed,
    Panicked,
}

/// Result of draining a task set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Tasks that returned `Ok`
    pub completed: usize,
    /// Tasks that returned `Err` or panicked
    pub failed: usize,
    /// Tasks still running at the deadline
    pub aborted: usize,
}

impl DrainReport {
    fn record(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Completed => self.completed += 1,
            Outcome::Failed | Outcome::Panicked => self.failed += 1,
        }
    }

    /// Combine two reports
    pub fn merge(self, other: DrainReport) -> DrainReport {
        DrainReport {
            completed: self.completed + other.completed,
            failed: self.failed + other.failed,
            aborted: self.aborted + other.aborted,
        }
    }
}

/// Lifetime counters of a task set
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TaskStats {
    pub spawned: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

#[derive(Default)]
struct Counters {
    spawned: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// A bounded, observable set of detached handler invocations
pub struct OutboundTasks {
    set: Mutex<JoinSet<Outcome>>,
    permits: Arc<Semaphore>,
    max_pending: usize,
    runtime: RwLock<Option<Handle>>,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

impl OutboundTasks {
    pub fn new(max_concurrent: usize, max_pending: usize) -> Self {
        Self {
            set: Mutex::new(JoinSet::new()),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            max_pending: max_pending.max(1),
            runtime: RwLock::new(Handle::try_current().ok()),
            closed: AtomicBool::new(false),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Use `handle` for tasks spawned from outside a runtime context
    pub fn bind(&self, handle: Handle) {
        *self.runtime.write() = Some(handle);
    }

    /// Schedule a handler invocation. Returns false if it was dropped.
    ///
    /// Never blocks, so it is safe to call from a node observer.
    pub fn spawn<F>(&self, label: &str, fut: F) -> bool
    where
        F: Future<Output = Result<()>> + Send + 'static,
    {
        let Some(handle) = Handle::try_current()
            .ok()
            .or_else(|| self.runtime.read().clone())
        else {
            warn!(task = label, "no runtime available, dropping change");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        };

        // `closed` is only written under the set lock, so a task admitted
        // here is always in the set a later `drain` takes
        let mut set = self.set.lock();
        if self.closed.load(Ordering::Acquire) {
            warn!(task = label, "outbound tasks closed, dropping change");
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        Self::reap(&mut set);
        if set.len() >= self.max_pending {
            warn!(
                task = label,
                pending = set.len(),
                max_pending = self.max_pending,
                "too many outbound tasks, dropping change"
            );
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        let permits = self.permits.clone();
        let counters = self.counters.clone();
        let label = label.to_string();
        set.spawn_on(
            async move {
                // The semaphore is never closed, so acquiring only waits
                let _permit = permits.acquire_owned().await.ok();
                let outcome = match AssertUnwindSafe(fut).catch_unwind().await {
                    Ok(Ok(())) => {
                        debug!(task = %label, "outbound task completed");
                        Outcome::Completed
                    }
                    Ok(Err(e)) => {
                        warn!(task = %label, error = %e, "outbound task failed");
                        Outcome::Failed
                    }
                    Err(panic) => {
                        let panic = panic_message(&*panic);
                        error!(task = %label, panic = %panic, "outbound task panicked");
                        Outcome::Panicked
                    }
                };
                match outcome {
                    Outcome::Completed => counters.completed.fetch_add(1, Ordering::Relaxed),
                    Outcome::Failed | Outcome::Panicked => {
                        counters.failed.fetch_add(1, Ordering::Relaxed)
                    }
                };
                outcome
            },
            &handle,
        );
        self.counters.spawned.fetch_add(1, Ordering::Relaxed);
        true
    }

    fn reap(set: &mut JoinSet<Outcome>) {
        while set.try_join_next().is_some() {}
    }

    /// Number of tasks queued or running
    pub fn in_flight(&self) -> usize {
        let mut set = self.set.lock();
        Self::reap(&mut set);
        set.len()
    }

    pub fn stats(&self) -> TaskStats {
        TaskStats {
            spawned: self.counters.spawned.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }

    /// Refuse new tasks from now on
    pub fn close(&self) {
        let _set = self.set.lock();
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Abort every queued or running task without waiting
    pub fn abort_all(&self) {
        self.set.lock().abort_all();
    }

    /// Await outstanding tasks until `timeout`, then abort what is left
    pub async fn drain(&self, timeout: Duration) -> DrainReport {
        let mut set = std::mem::take(&mut *self.set.lock());
        let mut report = DrainReport::default();
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            match tokio::time::timeout_at(deadline, set.join_next()).await {
                Ok(Some(Ok(outcome))) => report.record(outcome),
                Ok(Some(Err(e))) if e.is_cancelled() => report.aborted += 1,
                Ok(Some(Err(_))) => report.failed += 1,
                Ok(None) => break,
                Err(_) => {
                    report.aborted += set.len();
                    set.abort_all();
                    while set.join_next().await.is_some() {}
                    break;
                }
            }
        }

        debug!(
            completed = report.completed,
            failed = report.failed,
            aborted = report.aborted,
            "outbound tasks drained"
        );
        report
    }
}

impl Default for OutboundTasks {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENT, DEFAULT_MAX_PENDING)
    }
}

/// Best-effort text of a panic payload
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
