//! The timer loop and its handle

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use thread_pool::{Job, JobPriority, ThreadPool};
use tracing::{debug, info, warn};

use crate::error::{Result, TimerError};
use crate::event::{EventId, EventQueue, Persistence, TimerEvent, Timeout};

struct TimerState {
    queue: EventQueue,
    next_event_id: u64,
    shutdown: bool,
    exited: bool,
}

struct TimerShared {
    state: Mutex<TimerState>,
    condition: Condvar,
}

/// Deferred job scheduler
///
/// Runs one loop on a persistent worker of the given pool. Due jobs are
/// submitted back to the same pool, so the timer itself never executes
/// user code.
pub struct TimerThread {
    shared: Arc<TimerShared>,
    pool: Arc<ThreadPool>,
}

impl TimerThread {
    /// Start the timer loop as a High priority persistent job on `pool`
    pub fn new(pool: Arc<ThreadPool>) -> Result<Self> {
        let shared = Arc::new(TimerShared {
            state: Mutex::new(TimerState {
                queue: EventQueue::default(),
                next_event_id: 0,
                shutdown: false,
                exited: false,
            }),
            condition: Condvar::new(),
        });

        let loop_shared = Arc::clone(&shared);
        let loop_pool = Arc::clone(&pool);
        pool.submit_persistent(
            Job::new(move || run_timer_loop(&loop_shared, &loop_pool))
                .with_priority(JobPriority::High),
        )?;

        debug!("Timer thread started");
        Ok(Self { shared, pool })
    }

    /// Queue `job` to be submitted to the pool once `timeout` elapses
    ///
    /// Events with equal due times fire in the order they were scheduled.
    pub fn schedule(&self, job: Job, timeout: Timeout, persistence: Persistence) -> Result<EventId> {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            drop(state);
            drop(job);
            return Err(TimerError::ShuttingDown);
        }

        let id = EventId(state.next_event_id);
        state.next_event_id += 1;
        state.queue.insert(TimerEvent {
            id,
            due: timeout.due_at(Instant::now()),
            persistence,
            job,
        });
        self.shared.condition.notify_all();

        debug!("Scheduled timer event {} ({:?}, {:?})", id, timeout, persistence);
        Ok(id)
    }

    /// Withdraw an event that has not fired yet and hand its job back
    pub fn cancel(&self, id: EventId) -> Result<Job> {
        let mut state = self.shared.state.lock();
        let event = state
            .queue
            .remove(id)
            .ok_or(TimerError::InvalidEventId(id))?;
        self.shared.condition.notify_all();
        Ok(event.job)
    }

    /// Number of events waiting to fire
    pub fn pending(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    pub fn pool(&self) -> &Arc<ThreadPool> {
        &self.pool
    }

    /// Drop every pending event, running its cleanup, and wait for the loop
    /// to return its worker to the pool
    pub fn shutdown(&self) -> Result<()> {
        let drained = {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return Err(TimerError::ShuttingDown);
            }
            state.shutdown = true;
            let drained = state.queue.drain();
            self.shared.condition.notify_all();
            drained
        };

        let drained_count = drained.len();
        drop(drained);

        let mut state = self.shared.state.lock();
        while !state.exited {
            self.shared.condition.wait(&mut state);
        }

        info!("Timer thread shut down ({} pending events dropped)", drained_count);
        Ok(())
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        let already_stopped = self.shared.state.lock().shutdown;
        if !already_stopped {
            if let Err(e) = self.shutdown() {
                warn!("Timer shutdown on drop failed: {}", e);
            }
        }
    }
}

impl fmt::Debug for TimerThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.shared.state.lock();
        f.debug_struct("TimerThread")
            .field("pending", &state.queue.len())
            .field("shutdown", &state.shutdown)
            .finish()
    }
}

fn run_timer_loop(shared: &TimerShared, pool: &ThreadPool) {
    let mut state = shared.state.lock();
    while !state.shutdown {
        if let Some(event) = state.queue.pop_due(Instant::now()) {
            MutexGuard::unlocked(&mut state, || dispatch(pool, event));
            continue;
        }

        match state.queue.next_due() {
            Some(due) => {
                shared.condition.wait_until(&mut state, due);
            }
            None => shared.condition.wait(&mut state),
        }
    }

    state.exited = true;
    shared.condition.notify_all();
    debug!("Timer loop exited");
}

/// Hand a due event to the pool; a rejected job is dropped by the pool,
/// which runs its cleanup
fn dispatch(pool: &ThreadPool, event: TimerEvent) {
    let TimerEvent {
        id,
        persistence,
        job,
        ..
    } = event;

    let submitted = match persistence {
        Persistence::ShortTerm => pool.submit(job),
        Persistence::Persistent => pool.submit_persistent(job),
    };

    match submitted {
        Ok(job_id) => debug!("Timer event {} submitted as job {}", id, job_id),
        Err(e) => warn!("Timer event {} could not be submitted: {}", id, e),
    }
}
