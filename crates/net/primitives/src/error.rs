//! Result codes surfaced by the network orchestrator.

use std::{io, sync::Arc};

use thiserror::Error;

/// Network result alias.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Failure codes. Success is `Ok`.
///
/// Errors are `Clone` so a single outcome can be multicast to every subscriber.
#[derive(Debug, Clone, Error)]
pub enum Error {
    /// The operation is not valid in the current state (e.g. starting twice).
    #[error("operation failed")]
    OperationFailed,

    /// The service is stopped or stopping.
    #[error("service stopped")]
    ServiceStopped,

    /// The address (or nonce) is already registered.
    #[error("address already in use")]
    AddressInUse,

    /// The connection limit has been reached.
    #[error("connection limit reached")]
    ConnectionLimit,

    #[error("object does not exist")]
    NotFound,

    /// The address is blacklisted or is our own.
    #[error("address blocked by policy")]
    AddressBlocked,

    /// The peer answered with one of our own handshake nonces.
    #[error("connection to self aborted")]
    SelfConnection,

    #[error("channel stopped")]
    ChannelStopped,

    #[error("channel timed out")]
    ChannelTimeout,

    /// The peer sent an unexpected admission frame.
    #[error("bad data stream")]
    BadStream,

    #[error("failed to resolve {0}")]
    ResolveFailed(String),

    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Whether this is the shutdown code.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::ServiceStopped)
    }
}

impl From<io::Error> for Error {
    fn from(error: io::Error) -> Self {
        Self::Io(Arc::new(error))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_converts_and_clones() {
        let error = Error::from(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        let copy = error.clone();
        assert!(matches!(copy, Error::Io(ref inner) if inner.kind() == io::ErrorKind::ConnectionRefused));
        assert_eq!(error.to_string(), "IO error: refused");
    }

    #[test]
    fn test_is_stopped() {
        assert!(Error::ServiceStopped.is_stopped());
        assert!(!Error::OperationFailed.is_stopped());
    }
}
