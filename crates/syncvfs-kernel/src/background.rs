//! Detached background tasks on the helper context.
//!
//! Symlink persistence and detached writes are submitted here and never
//! awaited by the caller. A failure is logged and swallowed; the optional
//! completion hook sees every outcome. `wait_idle` blocks until every
//! submitted task has finished, which is how tests observe completion.

use std::fmt;
use std::future::Future;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use tokio::runtime::Handle;
use tokio_util::task::TaskTracker;

use syncvfs_types::VfsError;

/// Outcome of one background task, as seen by the completion hook.
#[derive(Debug, Clone)]
pub struct TaskReport {
    pub id: u64,
    pub label: String,
    pub outcome: Result<(), VfsError>,
}

impl TaskReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Called on the helper context after each background task.
pub type CompletionHook = Arc<dyn Fn(&TaskReport) + Send + Sync>;

#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Counts one task from submission until it finishes or is dropped.
struct InFlightGuard(Arc<InFlight>);

impl InFlightGuard {
    fn new(in_flight: Arc<InFlight>) -> Self {
        *in_flight.count.lock().unwrap_or_else(PoisonError::into_inner) += 1;
        Self(in_flight)
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut count = self.0.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// Submit-and-detach executor.
pub struct Background {
    runtime: Handle,
    tracker: TaskTracker,
    hook: Option<CompletionHook>,
    next_id: AtomicU64,
    in_flight: Arc<InFlight>,
}

impl Background {
    pub fn new(runtime: Handle, tracker: TaskTracker) -> Self {
        Self {
            runtime,
            tracker,
            hook: None,
            next_id: AtomicU64::new(1),
            in_flight: Arc::new(InFlight::default()),
        }
    }

    /// Install (or clear) the completion hook for tasks submitted from now on.
    pub fn set_hook(&mut self, hook: Option<CompletionHook>) {
        self.hook = hook;
    }

    /// Submit `task` and return immediately.
    pub fn submit<F>(&self, label: impl Into<String>, task: F) -> u64
    where
        F: Future<Output = io::Result<()>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let label = label.into();
        let hook = self.hook.clone();
        let guard = InFlightGuard::new(Arc::clone(&self.in_flight));

        tracing::trace!(task = id, label = %label, "background task submitted");
        self.tracker.spawn_on(
            async move {
                let _guard = guard;
                let outcome = task.await.map_err(VfsError::from);
                if let Err(e) = &outcome {
                    tracing::warn!(task = id, label = %label, error = %e, "background task failed");
                }
                if let Some(hook) = hook {
                    hook(&TaskReport { id, label, outcome });
                }
            },
            &self.runtime,
        );
        id
    }

    /// Tasks submitted but not yet finished.
    pub fn pending(&self) -> usize {
        *self.in_flight.count.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Block until every submitted task has finished.
    ///
    /// Must not be called from the helper context.
    pub fn wait_idle(&self) {
        let mut count = self.in_flight.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count > 0 {
            count = self
                .in_flight
                .idle
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }
}

impl fmt::Debug for Background {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Background")
            .field("pending", &self.pending())
            .field("hook", &self.hook.is_some())
            .finish()
    }
}
