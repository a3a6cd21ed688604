use thiserror::Error;

use crate::job::JobId;

/// Errors reported by [`ThreadPool`](crate::ThreadPool) operations
#[derive(Error, Debug)]
pub enum PoolError {
    /// An attribute value was rejected; the previous value is kept
    #[error("Invalid pool attribute: {0}")]
    InvalidAttribute(String),

    /// The queues already hold `max_jobs_total` jobs
    #[error("Job queue is full ({queued} queued, limit {max})")]
    QueueFull { queued: usize, max: usize },

    /// No further worker may be created, or too few workers would remain
    /// for regular jobs
    #[error("Worker limit reached (max {max} threads)")]
    MaxThreads { max: usize },

    /// The operating system refused to start a worker thread
    #[error("Failed to spawn worker thread: {0}")]
    ThreadSpawn(#[source] std::io::Error),

    /// No queued job carries this id
    #[error("No queued job with id {0}")]
    InvalidJobId(JobId),

    /// The pool no longer accepts work
    #[error("Thread pool is shutting down")]
    ShuttingDown,

    /// The scheduling policy is not supported by the platform
    #[error("Scheduling policy {0:?} is not supported on this platform")]
    InvalidPolicy(crate::SchedulingPolicy),
}

/// Result type for thread pool operations
pub type Result<T> = std::result::Result<T, PoolError>;
