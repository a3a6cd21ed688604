use miniserver::MiniServerError;
use thiserror::Error;
use thread_pool::PoolError;
use timer_thread::TimerError;

use crate::logging::LoggingError;

#[derive(Error, Debug)]
pub enum UpnpError {
    #[error("Worker pool error: {0}")]
    Pool(#[from] PoolError),

    #[error("Timer error: {0}")]
    Timer(#[from] TimerError),

    #[error("Miniserver error: {0}")]
    MiniServer(#[from] MiniServerError),

    #[error("Logging error: {0}")]
    Logging(#[from] LoggingError),

    #[error("Runtime already finished")]
    Finished,
}

pub type Result<T> = std::result::Result<T, UpnpError>;

/// Coarse error classes reported to embedding applications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Success,
    InvalidParam,
    /// Queue or thread resources exhausted
    OutOfMemory,
    SocketError,
    MaxThreads,
    InvalidJobId,
    Timeout,
    InternalError,
}

impl ErrorKind {
    /// Classify the outcome of any runtime call
    pub fn of<T>(result: &Result<T>) -> Self {
        match result {
            Ok(_) => ErrorKind::Success,
            Err(e) => e.kind(),
        }
    }

    fn of_pool(error: &PoolError) -> Self {
        match error {
            PoolError::InvalidAttribute(_) | PoolError::InvalidPolicy(_) => ErrorKind::InvalidParam,
            PoolError::QueueFull { .. } | PoolError::ThreadSpawn(_) => ErrorKind::OutOfMemory,
            PoolError::MaxThreads { .. } => ErrorKind::MaxThreads,
            PoolError::InvalidJobId(_) => ErrorKind::InvalidJobId,
            PoolError::ShuttingDown => ErrorKind::InternalError,
        }
    }
}

impl UpnpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpnpError::Pool(e) => ErrorKind::of_pool(e),
            UpnpError::Timer(TimerError::Pool(e)) => ErrorKind::of_pool(e),
            UpnpError::Timer(TimerError::InvalidEventId(_)) => ErrorKind::InvalidJobId,
            UpnpError::Timer(TimerError::ShuttingDown) => ErrorKind::InternalError,
            UpnpError::MiniServer(e) => match e {
                MiniServerError::Socket { .. } | MiniServerError::Bind { .. } => ErrorKind::SocketError,
                MiniServerError::StartupTimeout(_) => ErrorKind::Timeout,
                MiniServerError::Pool(e) => ErrorKind::of_pool(e),
                MiniServerError::Config(_) => ErrorKind::InvalidParam,
                MiniServerError::AlreadyRunning | MiniServerError::NotRunning => ErrorKind::InternalError,
            },
            UpnpError::Logging(_) | UpnpError::Finished => ErrorKind::InternalError,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::io;
    use std::time::Duration;

    #[rstest]
    #[case(PoolError::InvalidAttribute("min > max".into()).into(), ErrorKind::InvalidParam)]
    #[case(PoolError::QueueFull { queued: 100, max: 100 }.into(), ErrorKind::OutOfMemory)]
    #[case(PoolError::MaxThreads { max: 2 }.into(), ErrorKind::MaxThreads)]
    #[case(TimerError::Pool(PoolError::MaxThreads { max: 1 }).into(), ErrorKind::MaxThreads)]
    #[case(TimerError::ShuttingDown.into(), ErrorKind::InternalError)]
    #[case(MiniServerError::StartupTimeout(Duration::from_secs(10)).into(), ErrorKind::Timeout)]
    #[case(
        MiniServerError::Socket { context: "poll".into(), source: io::Error::from(io::ErrorKind::Other) }.into(),
        ErrorKind::SocketError
    )]
    #[case(MiniServerError::Config("empty port range".into()).into(), ErrorKind::InvalidParam)]
    #[case(UpnpError::Finished, ErrorKind::InternalError)]
    fn test_error_kinds(#[case] error: UpnpError, #[case] expected: ErrorKind) {
        assert_eq!(error.kind(), expected);
    }

    #[test]
    fn test_success_kind() {
        let ok: Result<u32> = Ok(7);
        assert_eq!(ErrorKind::of(&ok), ErrorKind::Success);

        let failed: Result<u32> = Err(UpnpError::Finished);
        assert_eq!(ErrorKind::of(&failed), ErrorKind::InternalError);
    }
}
