//! Error types for the connection pool.
//!
//! Errors fall into four groups:
//! - **setup**: the factory could not produce a connection ([`PoolError::Connect`])
//! - **hygiene**: leftover bytes could not be drained ([`PoolError::Drain`])
//! - **work**: whatever the caller's work unit returned ([`PoolError::Work`])
//! - **cancellation**: the caller's context ended first ([`PoolError::Cancelled`])
//!
//! Only work errors influence connection disposition, and only through
//! [`WorkError::is_connection_fatal`].

use std::io;

use thiserror::Error;

/// Failure of a single I/O operation on a [`Conn`](crate::Conn).
#[derive(Debug, Error)]
pub enum ConnError {
    #[error("i/o deadline exceeded")]
    Timeout,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl ConnError {
    /// Whether the operation ran out of time.
    pub fn is_timeout(&self) -> bool {
        match self {
            ConnError::Timeout => true,
            ConnError::Io(err) => io_is_timeout(err),
        }
    }

    /// Whether retrying the same operation on the same connection could succeed.
    pub fn is_temporary(&self) -> bool {
        match self {
            ConnError::Timeout => false,
            ConnError::Io(err) => io_is_temporary(err),
        }
    }
}

fn io_is_timeout(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::TimedOut
}

fn io_is_temporary(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::Interrupted | io::ErrorKind::WouldBlock
    )
}

/// Draining the inbound buffer failed part way through.
///
/// Carries whatever was recovered before the failure so it can be logged.
#[derive(Debug, Error)]
#[error("unable to empty read buffer after {} bytes: {source}", .drained.len())]
pub struct DrainError {
    pub drained: Vec<u8>,
    #[source]
    pub source: ConnError,
}

/// Error returned by a caller-supplied work unit.
///
/// Network failures keep their [`ConnError`] so the pool can decide whether
/// the connection is still trustworthy. Application errors are searched
/// through their cause chain, so an I/O failure wrapped with
/// `anyhow::Context` still counts as a network failure.
#[derive(Debug, Error)]
pub enum WorkError {
    #[error(transparent)]
    Net(#[from] ConnError),

    #[error(transparent)]
    Application(#[from] anyhow::Error),
}

impl WorkError {
    /// Wrap an application-level failure.
    pub fn app<E>(err: E) -> Self
    where
        E: Into<anyhow::Error>,
    {
        WorkError::Application(err.into())
    }

    pub fn is_network(&self) -> bool {
        self.network_cause().is_some()
    }

    pub fn is_timeout(&self) -> bool {
        self.network_cause().is_some_and(NetCause::is_timeout)
    }

    pub fn is_temporary(&self) -> bool {
        self.network_cause().is_some_and(NetCause::is_temporary)
    }

    /// A timeout or non-temporary network failure leaves the connection in an
    /// unknown state (partial write, half-read frame); it must not be reused.
    pub fn is_connection_fatal(&self) -> bool {
        self.network_cause()
            .is_some_and(|cause| cause.is_timeout() || !cause.is_temporary())
    }

    /// The first network failure in this error or its causes.
    fn network_cause(&self) -> Option<NetCause<'_>> {
        match self {
            WorkError::Net(err) => Some(NetCause::Conn(err)),
            WorkError::Application(err) => err.chain().find_map(|cause| {
                if let Some(err) = cause.downcast_ref::<ConnError>() {
                    Some(NetCause::Conn(err))
                } else if let Some(err) = cause.downcast_ref::<WorkError>() {
                    err.network_cause()
                } else {
                    cause.downcast_ref::<io::Error>().map(NetCause::Io)
                }
            }),
        }
    }
}

#[derive(Clone, Copy)]
enum NetCause<'a> {
    Conn(&'a ConnError),
    Io(&'a io::Error),
}

impl NetCause<'_> {
    fn is_timeout(self) -> bool {
        match self {
            NetCause::Conn(err) => err.is_timeout(),
            NetCause::Io(err) => io_is_timeout(err),
        }
    }

    fn is_temporary(self) -> bool {
        match self {
            NetCause::Conn(err) => err.is_temporary(),
            NetCause::Io(err) => io_is_temporary(err),
        }
    }
}

impl From<io::Error> for WorkError {
    fn from(err: io::Error) -> Self {
        WorkError::Net(ConnError::Io(err))
    }
}

/// Why a [`Context`](crate::Context) is no longer live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

impl From<ContextError> for io::Error {
    fn from(err: ContextError) -> Self {
        let kind = match err {
            ContextError::Cancelled => io::ErrorKind::Interrupted,
            ContextError::DeadlineExceeded => io::ErrorKind::TimedOut,
        };
        io::Error::new(kind, err)
    }
}

/// Errors returned by [`Pool::run`](crate::Pool::run).
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("failed to open new connection: {0}")]
    Connect(#[source] io::Error),

    #[error("failed to empty buffer: {0}")]
    Drain(#[source] DrainError),

    /// The work unit's own error, unaltered.
    #[error(transparent)]
    Work(#[from] WorkError),

    #[error("unable to do request: {0}")]
    Cancelled(#[from] ContextError),

    #[error("connection pool is closed")]
    Closed,

    /// The work unit ended without a result, for example by panicking.
    #[error("request aborted before the work unit returned")]
    Aborted,
}

impl PoolError {
    /// The work unit's error, if that is what this is.
    pub fn work_error(&self) -> Option<&WorkError> {
        match self {
            PoolError::Work(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PoolError::Cancelled(_))
    }
}

/// Errors loading a [`PoolConfig`](crate::PoolConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid duration for `{field}`: {value:?}")]
    Duration { field: &'static str, value: String },

    #[error("ttl must be greater than zero")]
    ZeroTtl,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_is_fatal() {
        let err = WorkError::from(ConnError::Timeout);
        assert!(err.is_timeout());
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn io_timed_out_counts_as_timeout() {
        let err = WorkError::from(io::Error::from(io::ErrorKind::TimedOut));
        assert!(err.is_timeout());
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn broken_pipe_is_fatal() {
        let err = WorkError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        assert!(!err.is_temporary());
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn interrupted_is_temporary_and_not_fatal() {
        let err = WorkError::from(io::Error::from(io::ErrorKind::Interrupted));
        assert!(err.is_network());
        assert!(err.is_temporary());
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn application_error_is_never_fatal() {
        let err = WorkError::app(anyhow::anyhow!("unexpected reply"));
        assert!(!err.is_network());
        assert!(!err.is_connection_fatal());
        assert_eq!(err.to_string(), "unexpected reply");
    }

    #[test]
    fn wrapped_timeout_is_fatal() {
        let err = WorkError::app(anyhow::Error::new(ConnError::Timeout).context("reading reply"));
        assert_eq!(err.to_string(), "reading reply");
        assert!(err.is_network());
        assert!(err.is_timeout());
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn wrapped_io_errors_keep_their_kind() {
        let reset = anyhow::Error::new(io::Error::from(io::ErrorKind::ConnectionReset))
            .context("sending request");
        assert!(WorkError::from(reset).is_connection_fatal());

        let interrupted = anyhow::Error::new(io::Error::from(io::ErrorKind::Interrupted))
            .context("sending request");
        let err = WorkError::from(interrupted);
        assert!(err.is_temporary());
        assert!(!err.is_connection_fatal());
    }

    #[test]
    fn nested_work_error_is_searched() {
        let inner = WorkError::from(io::Error::from(io::ErrorKind::BrokenPipe));
        let err = WorkError::app(anyhow::Error::new(inner).context("flushing batch"));
        assert!(err.is_connection_fatal());
    }

    #[test]
    fn pool_errors_carry_context_prefixes() {
        let err = PoolError::Connect(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(err.to_string().starts_with("failed to open new connection: "));

        let err = PoolError::Drain(DrainError {
            drained: vec![1, 2],
            source: ConnError::Timeout,
        });
        assert_eq!(
            err.to_string(),
            "failed to empty buffer: unable to empty read buffer after 2 bytes: i/o deadline exceeded"
        );

        let err = PoolError::from(ContextError::DeadlineExceeded);
        assert_eq!(err.to_string(), "unable to do request: context deadline exceeded");
        assert!(err.is_cancelled());
    }

    #[test]
    fn work_errors_pass_through_verbatim() {
        let err = PoolError::from(WorkError::app(anyhow::anyhow!("bad status")));
        assert_eq!(err.to_string(), "bad status");
        assert!(err.work_error().is_some());
    }

    #[test]
    fn context_error_maps_to_io_kind() {
        let err: io::Error = ContextError::DeadlineExceeded.into();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        let err: io::Error = ContextError::Cancelled.into();
        assert_eq!(err.kind(), io::ErrorKind::Interrupted);
    }
}
