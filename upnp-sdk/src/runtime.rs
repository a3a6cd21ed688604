//! The runtime handle owning pools, timer and miniserver

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use miniserver::{
    CallbackRole, HostVerdict, ListenSet, MiniServer, MiniServerError, RequestHandler, ServerState,
    SsdpHandler,
};
use thread_pool::{Job, JobId, PoolError, ThreadPool};
use timer_thread::{EventId, Persistence, Timeout, TimerError, TimerThread};
use tracing::{debug, info, warn};

use crate::config::RuntimeConfig;
use crate::error::{Result, UpnpError};

/// One embedded UPnP runtime instance
///
/// Owns the send, receive and miniserver pools, the timer thread running on
/// the send pool, and a miniserver bound to the miniserver pool. The
/// miniserver is created stopped; start it with
/// [`start_miniserver`](Self::start_miniserver) once its sockets are bound.
pub struct UpnpRuntime {
    config: RuntimeConfig,
    send_pool: Arc<ThreadPool>,
    recv_pool: Arc<ThreadPool>,
    miniserver_pool: Arc<ThreadPool>,
    timer: TimerThread,
    miniserver: MiniServer,
    finished: AtomicBool,
}

impl UpnpRuntime {
    /// Create the pools, start the timer and prepare the miniserver
    ///
    /// Anything already started is shut down again when a later step fails.
    pub fn init(config: RuntimeConfig) -> Result<Self> {
        config.validate()?;

        let send_pool = Arc::new(ThreadPool::new(config.send_pool.clone())?);
        let recv_pool = match ThreadPool::new(config.recv_pool.clone()) {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                shutdown_pools(&[&send_pool]);
                return Err(e.into());
            }
        };
        let miniserver_pool = match ThreadPool::new(config.miniserver_pool.clone()) {
            Ok(pool) => Arc::new(pool),
            Err(e) => {
                shutdown_pools(&[&send_pool, &recv_pool]);
                return Err(e.into());
            }
        };

        let started = TimerThread::new(Arc::clone(&send_pool)).map_err(UpnpError::from).and_then(|timer| {
            match MiniServer::new(Arc::clone(&miniserver_pool), config.miniserver.clone()) {
                Ok(miniserver) => Ok((timer, miniserver)),
                Err(e) => {
                    if let Err(shutdown_error) = timer.shutdown() {
                        warn!("Timer shutdown during unwind failed: {}", shutdown_error);
                    }
                    Err(e.into())
                }
            }
        });
        let (timer, miniserver) = match started {
            Ok(parts) => parts,
            Err(e) => {
                shutdown_pools(&[&send_pool, &recv_pool, &miniserver_pool]);
                return Err(e);
            }
        };

        info!("UPnP runtime initialized");
        Ok(Self {
            config,
            send_pool,
            recv_pool,
            miniserver_pool,
            timer,
            miniserver,
            finished: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn send_pool(&self) -> &Arc<ThreadPool> {
        &self.send_pool
    }

    pub fn recv_pool(&self) -> &Arc<ThreadPool> {
        &self.recv_pool
    }

    pub fn miniserver_pool(&self) -> &Arc<ThreadPool> {
        &self.miniserver_pool
    }

    pub fn timer(&self) -> &TimerThread {
        &self.timer
    }

    pub fn miniserver(&self) -> &MiniServer {
        &self.miniserver
    }

    /// Install the protocol callback for one request role
    pub fn register_callback<H>(&self, role: CallbackRole, handler: H)
    where
        H: RequestHandler + 'static,
    {
        self.miniserver.register_handler(role, handler);
    }

    pub fn register_ssdp_handler<H>(&self, handler: H)
    where
        H: SsdpHandler + 'static,
    {
        self.miniserver.register_ssdp_handler(handler);
    }

    pub fn set_web_host_validator<F>(&self, validator: F)
    where
        F: Fn(&str) -> HostVerdict + Send + Sync + 'static,
    {
        self.miniserver.set_web_host_validator(validator);
    }

    /// Start serving `listen_set`
    ///
    /// Stream listeners are usually bound with [`MiniServer::bind_http`] so
    /// the configured port range applies.
    pub fn start_miniserver(&self, listen_set: ListenSet) -> Result<()> {
        self.ensure_active()?;
        Ok(self.miniserver.start(listen_set)?)
    }

    pub fn stop_miniserver(&self) -> Result<()> {
        Ok(self.miniserver.stop()?)
    }

    /// Submit `job` to the send pool once `timeout` elapses
    pub fn schedule(&self, job: Job, timeout: Timeout, persistence: Persistence) -> Result<EventId> {
        self.ensure_active()?;
        Ok(self.timer.schedule(job, timeout, persistence)?)
    }

    /// Take a scheduled job back before it is due
    pub fn cancel(&self, id: EventId) -> Result<Job> {
        Ok(self.timer.cancel(id)?)
    }

    /// Queue `job` on the send pool
    pub fn submit(&self, job: Job) -> Result<JobId> {
        self.ensure_active()?;
        Ok(self.send_pool.submit(job)?)
    }

    /// Stop the miniserver, then the timer, then every pool
    ///
    /// Every step runs even when an earlier one fails; the first failure is
    /// returned. A second call returns [`UpnpError::Finished`].
    pub fn finish(&self) -> Result<()> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(UpnpError::Finished);
        }

        let mut first_error: Option<UpnpError> = None;
        let mut record = |result: Result<()>| {
            if let Err(e) = result {
                warn!("Runtime shutdown step failed: {}", e);
                first_error.get_or_insert(e);
            }
        };

        if self.miniserver.state() != ServerState::Idle {
            record(match self.miniserver.stop() {
                Err(MiniServerError::NotRunning) => Ok(()),
                other => other.map_err(UpnpError::from),
            });
        }

        record(match self.timer.shutdown() {
            Err(TimerError::ShuttingDown) => Ok(()),
            other => other.map_err(UpnpError::from),
        });

        for (name, pool) in [
            ("send", &self.send_pool),
            ("receive", &self.recv_pool),
            ("miniserver", &self.miniserver_pool),
        ] {
            debug!("Shutting down {} pool", name);
            record(match pool.shutdown() {
                Err(PoolError::ShuttingDown) => Ok(()),
                other => other.map_err(UpnpError::from),
            });
        }

        info!("UPnP runtime finished");
        first_error.map_or(Ok(()), Err)
    }

    pub fn is_finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_finished() {
            return Err(UpnpError::Finished);
        }
        Ok(())
    }
}

fn shutdown_pools(pools: &[&Arc<ThreadPool>]) {
    for pool in pools {
        if let Err(e) = pool.shutdown() {
            warn!("Pool shutdown during unwind failed: {}", e);
        }
    }
}

impl Drop for UpnpRuntime {
    fn drop(&mut self) {
        if !self.is_finished() {
            if let Err(e) = self.finish() {
                warn!("Runtime finish on drop failed: {}", e);
            }
        }
    }
}

impl fmt::Debug for UpnpRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpnpRuntime")
            .field("miniserver", &self.miniserver.state())
            .field("pending_events", &self.timer.pending())
            .field("finished", &self.is_finished())
            .finish()
    }
}
