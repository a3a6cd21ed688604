use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

/// Errors reported by the miniserver and its socket helpers
#[derive(Error, Debug)]
pub enum MiniServerError {
    /// A socket operation other than bind failed
    #[error("Socket error while {context}: {source}")]
    Socket {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Binding a listener or datagram socket failed
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("MiniServer is already running")]
    AlreadyRunning,

    #[error("MiniServer is not running")]
    NotRunning,

    /// The dispatch loop did not report Running in time
    #[error("MiniServer did not start within {0:?}")]
    StartupTimeout(Duration),

    /// The worker pool refused the dispatch loop
    #[error("Worker pool error: {0}")]
    Pool(#[from] thread_pool::PoolError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MiniServerError {
    pub(crate) fn socket(context: impl Into<String>, source: std::io::Error) -> Self {
        MiniServerError::Socket {
            context: context.into(),
            source,
        }
    }
}

/// Result type for miniserver operations
pub type Result<T> = std::result::Result<T, MiniServerError>;

/// Failures while reading a request head on a connection job
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("I/O error reading request: {0}")]
    Io(#[from] std::io::Error),

    #[error("Request head exceeds {limit} bytes")]
    HeaderTooLarge { limit: usize },

    #[error("Malformed request: {0}")]
    Malformed(String),
}
