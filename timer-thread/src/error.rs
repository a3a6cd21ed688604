use thiserror::Error;

use crate::event::EventId;

/// Errors reported by the [`TimerThread`](crate::TimerThread)
#[derive(Error, Debug)]
pub enum TimerError {
    /// The worker pool refused the timer loop or a due job
    #[error("Worker pool error: {0}")]
    Pool(#[from] thread_pool::PoolError),

    /// The event already fired, was cancelled, or never existed
    #[error("No pending timer event with id {0}")]
    InvalidEventId(EventId),

    /// The timer no longer accepts events
    #[error("Timer thread is shutting down")]
    ShuttingDown,
}

/// Result type for timer operations
pub type Result<T> = std::result::Result<T, TimerError>;
