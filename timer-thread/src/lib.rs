//! Deferred job scheduling on top of the worker pool
//!
//! A [`TimerThread`] borrows one persistent worker from a
//! [`ThreadPool`](thread_pool::ThreadPool) and submits jobs back to that
//! pool when they become due.

pub mod error;
pub mod event;
mod timer;

pub use error::{Result, TimerError};
pub use event::{EventId, Persistence, Timeout};
pub use timer::TimerThread;
