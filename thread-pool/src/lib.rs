//! Priority worker pool for the UPnP runtime
//!
//! A bounded set of OS threads serving three priority queues (High, Med,
//! Low) plus one persistent slot for long-lived loops such as the timer
//! thread and the miniserver.
//!
//! # Example
//!
//! ```rust,no_run
//! use thread_pool::{Job, JobPriority, PoolAttributes, ThreadPool};
//!
//! let pool = ThreadPool::new(PoolAttributes::default())?;
//! let id = pool.submit(Job::new(|| println!("hello")).with_priority(JobPriority::High))?;
//! println!("queued job {}", id);
//! pool.shutdown()?;
//! # Ok::<(), thread_pool::PoolError>(())
//! ```

pub mod attributes;
pub mod error;
pub mod job;
pub mod pool;
mod queue;
mod sched;
pub mod stats;

pub use attributes::{PoolAttributes, SchedulingPolicy};
pub use error::{PoolError, Result};
pub use job::{Job, JobId, JobPriority};
pub use pool::{PoolState, ThreadPool};
pub use stats::PoolStats;
