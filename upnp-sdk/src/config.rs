//! Runtime configuration

use std::time::Duration;

use miniserver::MiniServerConfig;
use thread_pool::{PoolAttributes, PoolError};

use crate::error::Result;

/// Attributes for the runtime's three worker pools and its miniserver
///
/// The send pool also hosts the timer loop and the receive pool is left to
/// the embedding application. The miniserver pool hosts the dispatch loop
/// and serves every accepted connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Default: 2..12 threads, 5 s idle time, 10 jobs per thread, 100 queued jobs
    pub send_pool: PoolAttributes,

    /// Default: same as `send_pool`
    pub recv_pool: PoolAttributes,

    /// Default: same as `send_pool`
    pub miniserver_pool: PoolAttributes,

    pub miniserver: MiniServerConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            send_pool: Self::default_pool(),
            recv_pool: Self::default_pool(),
            miniserver_pool: Self::default_pool(),
            miniserver: MiniServerConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Default pools with the miniserver on OS-assigned ports
    pub fn ephemeral() -> Self {
        Self {
            miniserver: MiniServerConfig::ephemeral(),
            ..Self::default()
        }
    }

    fn default_pool() -> PoolAttributes {
        PoolAttributes::new()
            .with_threads(2, 12)
            .with_max_idle_time(Duration::from_millis(5000))
            .with_jobs_per_thread(10)
            .with_max_jobs_total(100)
    }

    /// Validate every part of the configuration
    ///
    /// The send and miniserver pools each lend one worker to a persistent
    /// loop, so they need room for at least one more.
    pub fn validate(&self) -> Result<()> {
        self.send_pool.validate()?;
        self.recv_pool.validate()?;
        self.miniserver_pool.validate()?;
        self.miniserver.validate()?;

        for (name, attributes) in [("send", &self.send_pool), ("miniserver", &self.miniserver_pool)] {
            if attributes.max_threads < 2 {
                return Err(PoolError::InvalidAttribute(format!(
                    "{} pool max_threads must be at least 2, got {}",
                    name, attributes.max_threads
                ))
                .into());
            }
        }

        Ok(())
    }

    /// Builder pattern methods for fluent configuration
    pub fn with_send_pool(mut self, attributes: PoolAttributes) -> Self {
        self.send_pool = attributes;
        self
    }

    pub fn with_recv_pool(mut self, attributes: PoolAttributes) -> Self {
        self.recv_pool = attributes;
        self
    }

    pub fn with_miniserver_pool(mut self, attributes: PoolAttributes) -> Self {
        self.miniserver_pool = attributes;
        self
    }

    pub fn with_miniserver(mut self, config: MiniServerConfig) -> Self {
        self.miniserver = config;
        self
    }
}
