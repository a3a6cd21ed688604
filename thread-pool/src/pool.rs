//! The worker pool
//!
//! One mutex guards the queues, the persistent slot and every counter. Idle
//! workers wait on `condition`; thread start-up, persistent pick-up and
//! worker exit are announced on `start_and_shutdown`.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, error, info, warn};

use crate::attributes::PoolAttributes;
use crate::error::{PoolError, Result};
use crate::job::{Job, JobId, JobPriority};
use crate::queue::JobQueues;
use crate::sched;
use crate::stats::{PoolStats, StatsAccumulator};

/// Observable pool lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// No job is executing
    Idle,
    /// At least one worker is executing a job
    Running,
    /// `shutdown` was called; terminal
    ShuttingDown,
}

/// What a worker is currently doing, for bookkeeping on its next pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assignment {
    None,
    Regular,
    Persistent,
}

struct Inner {
    attributes: PoolAttributes,
    queues: JobQueues,
    persistent_job: Option<Job>,
    drained_persistent: Option<JobId>,
    next_job_id: u64,
    shutdown: bool,
    total_threads: usize,
    busy_threads: usize,
    pending_worker_start: bool,
    stats: StatsAccumulator,
}

impl Inner {
    fn allocate_id(&mut self) -> JobId {
        let id = JobId(self.next_job_id);
        self.next_job_id += 1;
        id
    }

    fn non_persistent_threads(&self) -> usize {
        self.total_threads.saturating_sub(self.stats.persistent_threads)
    }
}

struct Shared {
    state: Mutex<Inner>,
    condition: Condvar,
    start_and_shutdown: Condvar,
    worker_seq: AtomicUsize,
}

/// Bounded pool of worker threads fed from three priority queues
///
/// Jobs are taken High first, then Med, then Low, FIFO within a priority.
/// Queue heads that wait too long are promoted (see
/// [`PoolAttributes::starvation_time`] and [`PoolAttributes::max_idle_time`]).
/// One persistent slot hands a long-lived job to a dedicated worker.
///
/// The pool must be stopped with [`ThreadPool::shutdown`]; dropping the
/// handle does not stop the workers.
pub struct ThreadPool {
    shared: Arc<Shared>,
}

impl ThreadPool {
    /// Create a pool and start `min_threads` workers
    ///
    /// If any of the initial workers cannot be started, the ones already
    /// running are shut down and the spawn error is returned.
    pub fn new(attributes: PoolAttributes) -> Result<Self> {
        attributes.validate()?;

        let pool = ThreadPool {
            shared: Arc::new(Shared {
                state: Mutex::new(Inner {
                    attributes,
                    queues: JobQueues::new(),
                    persistent_job: None,
                    drained_persistent: None,
                    next_job_id: 0,
                    shutdown: false,
                    total_threads: 0,
                    busy_threads: 0,
                    pending_worker_start: false,
                    stats: StatsAccumulator::default(),
                }),
                condition: Condvar::new(),
                start_and_shutdown: Condvar::new(),
                worker_seq: AtomicUsize::new(0),
            }),
        };

        let started = {
            let mut inner = pool.shared.state.lock();
            let mut started = Ok(());
            while inner.total_threads < inner.attributes.min_threads {
                if let Err(e) = create_worker(&pool.shared, &mut inner) {
                    started = Err(e);
                    break;
                }
            }
            started
        };

        if let Err(e) = started {
            error!("Failed to start minimum worker set: {}", e);
            if let Err(shutdown_err) = pool.shutdown() {
                warn!("Unwinding partially started pool failed: {}", shutdown_err);
            }
            return Err(e);
        }

        debug!("Thread pool created with {:?}", pool.attributes());
        Ok(pool)
    }

    /// Create a pool with [`PoolAttributes::default`]
    pub fn with_defaults() -> Result<Self> {
        Self::new(PoolAttributes::default())
    }

    /// Queue a job and return its id
    ///
    /// Fails with [`PoolError::QueueFull`] once `max_jobs_total` jobs are
    /// queued. A rejected job is dropped, which runs its cleanup hook.
    /// If the pool cannot grow, the job still stays queued.
    pub fn submit(&self, mut job: Job) -> Result<JobId> {
        let mut inner = self.shared.state.lock();

        let rejection = if inner.shutdown {
            Some(PoolError::ShuttingDown)
        } else if inner.queues.len() >= inner.attributes.max_jobs_total {
            Some(PoolError::QueueFull {
                queued: inner.queues.len(),
                max: inner.attributes.max_jobs_total,
            })
        } else {
            None
        };
        if let Some(e) = rejection {
            drop(inner);
            debug!("Rejected job: {}", e);
            drop(job);
            return Err(e);
        }

        let default_priority = inner.attributes.default_priority;
        let priority = job.resolve_priority(default_priority);
        let id = inner.allocate_id();
        inner.queues.push(id, priority, job, Instant::now());

        add_workers(&self.shared, &mut inner);
        self.shared.condition.notify_one();

        debug!("Queued job {} at {:?} priority", id, priority);
        Ok(id)
    }

    /// Hand a long-lived job to a dedicated worker
    ///
    /// Starts a new worker if the pool is below `max_threads`; otherwise at
    /// least two non-persistent workers must exist so regular jobs keep a
    /// worker. Blocks until a worker has picked the job up, not until it
    /// finishes.
    pub fn submit_persistent(&self, mut job: Job) -> Result<JobId> {
        let mut inner = self.shared.state.lock();

        if let Err(e) = reserve_persistent_worker(&self.shared, &mut inner) {
            drop(inner);
            debug!("Rejected persistent job: {}", e);
            drop(job);
            return Err(e);
        }

        let default_priority = inner.attributes.default_priority;
        job.resolve_priority(default_priority);
        let id = inner.allocate_id();
        job.id = Some(id);
        job.queued_at = Some(Instant::now());
        inner.persistent_job = Some(job);
        self.shared.condition.notify_one();

        while inner
            .persistent_job
            .as_ref()
            .is_some_and(|pending| pending.id == Some(id))
        {
            self.shared.start_and_shutdown.wait(&mut inner);
        }

        if inner.drained_persistent == Some(id) {
            return Err(PoolError::ShuttingDown);
        }

        debug!("Persistent job {} picked up", id);
        Ok(id)
    }

    /// Take a still-queued job out of the pool
    ///
    /// The job is returned with its cleanup hook intact; dropping it runs
    /// the hook. Running or unknown jobs yield [`PoolError::InvalidJobId`].
    pub fn remove(&self, id: JobId) -> Result<Job> {
        let mut inner = self.shared.state.lock();
        inner.queues.remove(id).ok_or(PoolError::InvalidJobId(id))
    }

    /// Replace the pool attributes
    ///
    /// Invalid attributes are rejected and the current set is kept. Workers
    /// are started until `min_threads` are alive; surplus workers exit the
    /// next time they go idle.
    pub fn set_attributes(&self, attributes: PoolAttributes) -> Result<()> {
        attributes.validate()?;

        let mut inner = self.shared.state.lock();
        if inner.shutdown {
            return Err(PoolError::ShuttingDown);
        }
        inner.attributes = attributes;

        let mut result = Ok(());
        while inner.total_threads < inner.attributes.min_threads {
            if let Err(e) = create_worker(&self.shared, &mut inner) {
                warn!("Could not reach new minimum thread count: {}", e);
                result = Err(e);
                break;
            }
        }
        self.shared.condition.notify_all();
        result
    }

    pub fn attributes(&self) -> PoolAttributes {
        self.shared.state.lock().attributes.clone()
    }

    pub fn state(&self) -> PoolState {
        let inner = self.shared.state.lock();
        if inner.shutdown {
            PoolState::ShuttingDown
        } else if inner.busy_threads > 0 {
            PoolState::Running
        } else {
            PoolState::Idle
        }
    }

    pub fn stats(&self) -> PoolStats {
        let inner = self.shared.state.lock();
        let pending = [
            inner.queues.len_of(JobPriority::High),
            inner.queues.len_of(JobPriority::Med),
            inner.queues.len_of(JobPriority::Low),
        ];
        inner
            .stats
            .snapshot(pending, inner.busy_threads, inner.total_threads)
    }

    /// Stop the pool
    ///
    /// Drains the queues and the persistent slot, running each job's
    /// cleanup hook, then waits for every worker to exit. Running jobs are
    /// not interrupted, so long-lived persistent jobs must be told to return
    /// first. Calling it again yields [`PoolError::ShuttingDown`].
    pub fn shutdown(&self) -> Result<()> {
        let drained = {
            let mut inner = self.shared.state.lock();
            if inner.shutdown {
                return Err(PoolError::ShuttingDown);
            }
            inner.shutdown = true;

            let mut drained = inner.queues.drain();
            if let Some(job) = inner.persistent_job.take() {
                inner.drained_persistent = job.id;
                drained.push(job);
            }
            self.shared.condition.notify_all();
            self.shared.start_and_shutdown.notify_all();
            drained
        };

        let drained_count = drained.len();
        drop(drained);

        let mut inner = self.shared.state.lock();
        while inner.total_threads > 0 || inner.pending_worker_start {
            self.shared.start_and_shutdown.wait(&mut inner);
        }

        info!(
            "Thread pool shut down ({} queued jobs drained)",
            drained_count
        );
        Ok(())
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.shared.state.lock();
        f.debug_struct("ThreadPool")
            .field("total_threads", &inner.total_threads)
            .field("busy_threads", &inner.busy_threads)
            .field("queued", &inner.queues.len())
            .field("shutdown", &inner.shutdown)
            .finish()
    }
}

/// Make room for a persistent job; called with the lock held
///
/// Returns with the slot empty and the lock held. Starting a worker releases
/// the lock, so the slot is checked again afterwards.
fn reserve_persistent_worker(shared: &Arc<Shared>, inner: &mut MutexGuard<'_, Inner>) -> Result<()> {
    loop {
        if inner.shutdown {
            return Err(PoolError::ShuttingDown);
        }

        // Another persistent hand-off is in progress
        if inner.persistent_job.is_some() {
            shared.start_and_shutdown.wait(inner);
            continue;
        }

        if inner.total_threads < inner.attributes.max_threads {
            match create_worker(shared, inner) {
                Ok(()) => {}
                // the pool filled up while this call waited for a start
                Err(PoolError::MaxThreads { .. }) => continue,
                Err(e) => return Err(e),
            }
            if inner.persistent_job.is_some() || inner.shutdown {
                continue;
            }
            return Ok(());
        }

        if inner.non_persistent_threads() < 2 {
            return Err(PoolError::MaxThreads {
                max: inner.attributes.max_threads,
            });
        }
        return Ok(());
    }
}

/// Grow the pool while the load heuristic asks for it
///
/// Stops quietly at the first failure, usually the thread limit.
fn add_workers(shared: &Arc<Shared>, inner: &mut MutexGuard<'_, Inner>) {
    loop {
        let jobs = inner.queues.len();
        let threads = inner.non_persistent_threads();
        let needs_worker = threads == 0
            || jobs / threads >= inner.attributes.jobs_per_thread
            || inner.total_threads == inner.busy_threads;
        if !needs_worker {
            break;
        }
        if let Err(e) = create_worker(shared, inner) {
            debug!("Not growing pool: {}", e);
            break;
        }
    }
}

/// Start one worker and wait until it has registered itself
fn create_worker(shared: &Arc<Shared>, inner: &mut MutexGuard<'_, Inner>) -> Result<()> {
    while inner.pending_worker_start {
        shared.start_and_shutdown.wait(inner);
    }
    if inner.shutdown {
        return Err(PoolError::ShuttingDown);
    }
    if inner.total_threads >= inner.attributes.max_threads {
        return Err(PoolError::MaxThreads {
            max: inner.attributes.max_threads,
        });
    }

    let seq = shared.worker_seq.fetch_add(1, Ordering::Relaxed);
    let mut builder = thread::Builder::new().name(format!("upnp-worker-{}", seq));
    if inner.attributes.stack_size > 0 {
        builder = builder.stack_size(inner.attributes.stack_size);
    }

    let worker_shared = Arc::clone(shared);
    builder
        .spawn(move || worker_main(worker_shared))
        .map_err(PoolError::ThreadSpawn)?;

    inner.pending_worker_start = true;
    while inner.pending_worker_start {
        shared.start_and_shutdown.wait(inner);
    }
    Ok(())
}

/// Remove the calling worker from the counts; lock held
fn retire(shared: &Shared, inner: &mut MutexGuard<'_, Inner>) {
    inner.total_threads -= 1;
    shared.start_and_shutdown.notify_all();
}

fn worker_main(shared: Arc<Shared>) {
    {
        let mut inner = shared.state.lock();
        inner.total_threads += 1;
        inner.pending_worker_start = false;
        let total = inner.total_threads;
        inner.stats.note_thread_count(total);
        shared.start_and_shutdown.notify_all();
    }
    debug!("Worker started");

    let mut assignment = Assignment::None;
    let mut finished: Option<Job> = None;
    let mut mark = Instant::now();

    loop {
        // The cleanup hook of the previous job runs outside the lock
        drop(finished.take());

        let mut inner = shared.state.lock();
        match assignment {
            Assignment::None => {}
            Assignment::Regular => {
                inner.busy_threads -= 1;
                inner.stats.worker_threads -= 1;
            }
            Assignment::Persistent => {
                inner.busy_threads -= 1;
                inner.stats.persistent_threads -= 1;
            }
        }
        if assignment != Assignment::None {
            inner.stats.work_time += mark.elapsed();
            mark = Instant::now();
        }
        assignment = Assignment::None;
        inner.stats.idle_threads += 1;

        let mut timed_out = false;
        while inner.queues.is_empty() && inner.persistent_job.is_none() && !inner.shutdown {
            let surplus = inner.total_threads > inner.attributes.max_threads
                || (timed_out && inner.total_threads > inner.attributes.min_threads);
            if surplus {
                inner.stats.idle_threads -= 1;
                inner.stats.idle_time += mark.elapsed();
                retire(&shared, &mut inner);
                debug!("Idle worker exiting");
                return;
            }
            let idle_limit = inner.attributes.max_idle_time;
            timed_out = shared.condition.wait_for(&mut inner, idle_limit).timed_out();
        }

        inner.stats.idle_threads -= 1;
        inner.stats.idle_time += mark.elapsed();
        mark = Instant::now();

        let starvation_time = inner.attributes.starvation_time;
        let max_idle_time = inner.attributes.max_idle_time;
        for bumped in inner.queues.bump(mark, starvation_time, max_idle_time) {
            inner.stats.account_wait(bumped.from, bumped.waited);
        }

        if inner.shutdown {
            retire(&shared, &mut inner);
            debug!("Worker exiting for shutdown");
            return;
        }

        let (mut job, assigned) = if let Some(job) = inner.persistent_job.take() {
            inner.stats.persistent_threads += 1;
            shared.start_and_shutdown.notify_all();
            (job, Assignment::Persistent)
        } else if let Some((priority, job)) = inner.queues.pop_next() {
            let waited = job
                .queued_at
                .map(|queued_at| mark.saturating_duration_since(queued_at))
                .unwrap_or_default();
            inner.stats.account_wait(priority, waited);
            inner.stats.worker_threads += 1;
            (job, Assignment::Regular)
        } else {
            continue;
        };

        inner.busy_threads += 1;
        let policy = inner.attributes.sched_policy;
        drop(inner);

        let priority = job.priority().unwrap_or_default();
        sched::set_current_thread_priority(policy, priority);
        if !job.run() {
            error!("Job {:?} panicked; worker continues", job.id());
        }
        sched::set_current_thread_priority(policy, JobPriority::Med);

        finished = Some(job);
        assignment = assigned;
    }
}
