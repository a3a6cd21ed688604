//! Tunable pool attributes
//!
//! Mirrors the layout of the other configuration types in the workspace:
//! a plain struct with documented defaults, `with_*` builders for fluent
//! construction and a `validate()` pass. The `set_*` methods are the
//! fallible in-place setters; a rejected value leaves the previous one
//! untouched.

use std::time::Duration;

use serde::Serialize;

use crate::error::{PoolError, Result};
use crate::job::JobPriority;

/// Operating system scheduling policy applied to worker threads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub enum SchedulingPolicy {
    /// The platform default time-sharing policy
    #[default]
    Other,
    /// First-in first-out real time scheduling
    Fifo,
    /// Round-robin real time scheduling
    RoundRobin,
}

/// Attributes controlling pool sizing, starvation and queue limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolAttributes {
    /// Workers kept alive even when idle
    /// Default: 1
    pub min_threads: usize,

    /// Hard upper bound on live workers
    /// Default: 10
    pub max_threads: usize,

    /// Stack size for new workers, 0 for the platform default
    /// Default: 0
    pub stack_size: usize,

    /// Idle time after which a surplus worker exits; also the wait after
    /// which a Low job is promoted to Med
    /// Default: 10 seconds
    pub max_idle_time: Duration,

    /// Queued jobs per worker before another worker is started
    /// Default: 10
    pub jobs_per_thread: usize,

    /// Upper bound on queued jobs across all priorities
    /// Default: 100
    pub max_jobs_total: usize,

    /// Wait after which a Med job is promoted to High
    /// Default: 500 milliseconds
    pub starvation_time: Duration,

    /// Scheduling policy for worker threads
    /// Default: `SchedulingPolicy::Other`
    pub sched_policy: SchedulingPolicy,

    /// Priority given to jobs submitted without an explicit one
    /// Default: `JobPriority::Med`
    pub default_priority: JobPriority,
}

impl Default for PoolAttributes {
    fn default() -> Self {
        Self {
            min_threads: 1,
            max_threads: 10,
            stack_size: 0,
            max_idle_time: Duration::from_millis(10_000),
            jobs_per_thread: 10,
            max_jobs_total: 100,
            starvation_time: Duration::from_millis(500),
            sched_policy: SchedulingPolicy::Other,
            default_priority: JobPriority::Med,
        }
    }
}

impl PoolAttributes {
    /// Create attributes with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Attributes for a pool that serves a single long-lived loop plus a
    /// trickle of short jobs
    pub fn single_loop() -> Self {
        Self {
            min_threads: 2,
            max_threads: 4,
            ..Default::default()
        }
    }

    /// Attributes sized for bursts of short request handlers
    pub fn high_throughput() -> Self {
        Self {
            min_threads: 2,
            max_threads: 32,
            jobs_per_thread: 4,
            max_jobs_total: 1000,
            ..Default::default()
        }
    }

    /// Check the attribute set as a whole
    pub fn validate(&self) -> Result<()> {
        if self.max_threads == 0 {
            return Err(PoolError::InvalidAttribute(
                "max_threads must be greater than 0".to_string(),
            ));
        }

        if self.min_threads > self.max_threads {
            return Err(PoolError::InvalidAttribute(format!(
                "min_threads ({}) must not exceed max_threads ({})",
                self.min_threads, self.max_threads
            )));
        }

        if self.jobs_per_thread == 0 {
            return Err(PoolError::InvalidAttribute(
                "jobs_per_thread must be greater than 0".to_string(),
            ));
        }

        if self.max_jobs_total == 0 {
            return Err(PoolError::InvalidAttribute(
                "max_jobs_total must be greater than 0".to_string(),
            ));
        }

        if self.max_idle_time.is_zero() {
            return Err(PoolError::InvalidAttribute(
                "max_idle_time must be greater than 0".to_string(),
            ));
        }

        crate::sched::validate_policy(self.sched_policy)
    }

    pub fn set_min_threads(&mut self, min_threads: usize) -> Result<()> {
        if min_threads > self.max_threads {
            return Err(PoolError::InvalidAttribute(format!(
                "min_threads ({}) must not exceed max_threads ({})",
                min_threads, self.max_threads
            )));
        }
        self.min_threads = min_threads;
        Ok(())
    }

    pub fn set_max_threads(&mut self, max_threads: usize) -> Result<()> {
        if max_threads == 0 || max_threads < self.min_threads {
            return Err(PoolError::InvalidAttribute(format!(
                "max_threads ({}) must be at least 1 and not below min_threads ({})",
                max_threads, self.min_threads
            )));
        }
        self.max_threads = max_threads;
        Ok(())
    }

    pub fn set_stack_size(&mut self, stack_size: usize) {
        self.stack_size = stack_size;
    }

    pub fn set_max_idle_time(&mut self, max_idle_time: Duration) -> Result<()> {
        if max_idle_time.is_zero() {
            return Err(PoolError::InvalidAttribute(
                "max_idle_time must be greater than 0".to_string(),
            ));
        }
        self.max_idle_time = max_idle_time;
        Ok(())
    }

    pub fn set_jobs_per_thread(&mut self, jobs_per_thread: usize) -> Result<()> {
        if jobs_per_thread == 0 {
            return Err(PoolError::InvalidAttribute(
                "jobs_per_thread must be greater than 0".to_string(),
            ));
        }
        self.jobs_per_thread = jobs_per_thread;
        Ok(())
    }

    pub fn set_max_jobs_total(&mut self, max_jobs_total: usize) -> Result<()> {
        if max_jobs_total == 0 {
            return Err(PoolError::InvalidAttribute(
                "max_jobs_total must be greater than 0".to_string(),
            ));
        }
        self.max_jobs_total = max_jobs_total;
        Ok(())
    }

    pub fn set_starvation_time(&mut self, starvation_time: Duration) {
        self.starvation_time = starvation_time;
    }

    /// Change the scheduling policy; unsupported policies are rejected
    pub fn set_sched_policy(&mut self, policy: SchedulingPolicy) -> Result<()> {
        crate::sched::validate_policy(policy)?;
        self.sched_policy = policy;
        Ok(())
    }

    pub fn set_default_priority(&mut self, priority: JobPriority) {
        self.default_priority = priority;
    }

    /// Builder pattern methods for fluent configuration

    pub fn with_threads(mut self, min: usize, max: usize) -> Self {
        self.min_threads = min;
        self.max_threads = max;
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = stack_size;
        self
    }

    pub fn with_max_idle_time(mut self, max_idle_time: Duration) -> Self {
        self.max_idle_time = max_idle_time;
        self
    }

    pub fn with_jobs_per_thread(mut self, jobs_per_thread: usize) -> Self {
        self.jobs_per_thread = jobs_per_thread;
        self
    }

    pub fn with_max_jobs_total(mut self, max_jobs_total: usize) -> Self {
        self.max_jobs_total = max_jobs_total;
        self
    }

    pub fn with_starvation_time(mut self, starvation_time: Duration) -> Self {
        self.starvation_time = starvation_time;
        self
    }

    pub fn with_sched_policy(mut self, policy: SchedulingPolicy) -> Self {
        self.sched_policy = policy;
        self
    }

    pub fn with_default_priority(mut self, priority: JobPriority) -> Self {
        self.default_priority = priority;
        self
    }
}
