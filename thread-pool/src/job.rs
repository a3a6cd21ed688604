//! Units of work accepted by the pool

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::time::Instant;

use serde::Serialize;

/// Identifier handed out when a job is queued
///
/// Ids increase monotonically per pool and are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct JobId(pub(crate) u64);

impl JobId {
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduling priority of a job
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum JobPriority {
    Low,
    #[default]
    Med,
    High,
}

impl JobPriority {
    /// Queue index, High first
    pub(crate) fn queue_index(self) -> usize {
        match self {
            JobPriority::High => 0,
            JobPriority::Med => 1,
            JobPriority::Low => 2,
        }
    }
}

type Action = Box<dyn FnOnce() + Send + 'static>;

/// A boxed action plus an optional cleanup hook
///
/// The cleanup hook runs exactly once, when the job is dropped. That covers
/// normal completion, a drained queue at shutdown, and a job handed back by
/// [`ThreadPool::remove`](crate::ThreadPool::remove) that the caller then
/// discards.
pub struct Job {
    action: Option<Action>,
    cleanup: Option<Action>,
    priority: Option<JobPriority>,
    pub(crate) id: Option<JobId>,
    pub(crate) queued_at: Option<Instant>,
}

impl Job {
    pub fn new<F>(action: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            action: Some(Box::new(action)),
            cleanup: None,
            priority: None,
            id: None,
            queued_at: None,
        }
    }

    /// Set an explicit priority; otherwise the pool default applies
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Attach a hook that runs once when the job is released
    pub fn with_cleanup<F>(mut self, cleanup: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.cleanup = Some(Box::new(cleanup));
        self
    }

    pub fn priority(&self) -> Option<JobPriority> {
        self.priority
    }

    /// Id assigned by the pool, `None` until the job is queued
    pub fn id(&self) -> Option<JobId> {
        self.id
    }

    pub(crate) fn resolve_priority(&mut self, default: JobPriority) -> JobPriority {
        *self.priority.get_or_insert(default)
    }

    pub(crate) fn set_priority(&mut self, priority: JobPriority) {
        self.priority = Some(priority);
    }

    /// Run the action on the current thread
    ///
    /// A panic inside the action is caught and reported as `false`. The
    /// action runs at most once; later calls return `true` without doing
    /// anything.
    pub fn run(&mut self) -> bool {
        match self.action.take() {
            Some(action) => panic::catch_unwind(AssertUnwindSafe(action)).is_ok(),
            None => true,
        }
    }

    /// Release the job without running its cleanup hook
    pub fn forget_cleanup(mut self) {
        self.cleanup = None;
    }
}

impl Drop for Job {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            if panic::catch_unwind(AssertUnwindSafe(cleanup)).is_err() {
                tracing::error!("Job cleanup hook panicked (job id {:?})", self.id);
            }
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("priority", &self.priority)
            .field("has_run", &self.action.is_none())
            .field("has_cleanup", &self.cleanup.is_some())
            .finish()
    }
}
