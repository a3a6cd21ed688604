//! Per-thread OS scheduling priority
//!
//! The only place the pool touches platform scheduling APIs. Failures to
//! change a thread's priority are not fatal; the job still runs.

use crate::attributes::SchedulingPolicy;
use crate::error::{PoolError, Result};
use crate::job::JobPriority;

#[cfg(unix)]
fn raw_policy(policy: SchedulingPolicy) -> libc::c_int {
    match policy {
        SchedulingPolicy::Other => libc::SCHED_OTHER,
        SchedulingPolicy::Fifo => libc::SCHED_FIFO,
        SchedulingPolicy::RoundRobin => libc::SCHED_RR,
    }
}

/// Reject policies the platform does not know
#[cfg(unix)]
pub(crate) fn validate_policy(policy: SchedulingPolicy) -> Result<()> {
    let raw = raw_policy(policy);
    // SAFETY: plain queries without pointer arguments
    let (min, max) = unsafe { (libc::sched_get_priority_min(raw), libc::sched_get_priority_max(raw)) };
    if min == -1 || max == -1 {
        return Err(PoolError::InvalidPolicy(policy));
    }
    Ok(())
}

#[cfg(not(unix))]
pub(crate) fn validate_policy(policy: SchedulingPolicy) -> Result<()> {
    match policy {
        SchedulingPolicy::Other => Ok(()),
        _ => Err(PoolError::InvalidPolicy(policy)),
    }
}

/// Map a job priority into the policy's priority range
#[cfg(unix)]
pub(crate) fn set_current_thread_priority(policy: SchedulingPolicy, priority: JobPriority) {
    let raw = raw_policy(policy);
    // SAFETY: plain queries without pointer arguments
    let (min, max) = unsafe { (libc::sched_get_priority_min(raw), libc::sched_get_priority_max(raw)) };
    if min == -1 || max == -1 {
        return;
    }
    let value = match priority {
        JobPriority::Low => min,
        JobPriority::Med => min + (max - min) / 2,
        JobPriority::High => max,
    };

    // SAFETY: sched_param is plain old data; zeroed is a valid value on
    // every unix target and the priority field is set explicitly.
    let mut param: libc::sched_param = unsafe { std::mem::zeroed() };
    param.sched_priority = value;
    // SAFETY: pthread_self is always valid for the calling thread and param
    // outlives the call.
    let rc = unsafe { libc::pthread_setschedparam(libc::pthread_self(), raw, &param) };
    if rc != 0 {
        tracing::debug!(
            "Could not set thread priority {:?} ({}) under {:?}: errno {}",
            priority,
            value,
            policy,
            rc
        );
    }
}

#[cfg(not(unix))]
pub(crate) fn set_current_thread_priority(_policy: SchedulingPolicy, _priority: JobPriority) {}
