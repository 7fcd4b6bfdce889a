//! Transport error types.

use std::io;

use thiserror::Error;

/// General transport failure.
#[derive(Debug, Error)]
pub enum TransportError {
    /// An operation was attempted before `init` succeeded or after `close`.
    #[error("transport is not connected")]
    NotConnected,

    /// The configured address cannot be parsed or resolved.
    #[error("invalid address: {0}")]
    Address(String),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Outcome classification for a failed `init`.
///
/// The connection loop retries `Unreachable` after the reconnect period and
/// gives up immediately on `Fatal`.
#[derive(Debug, Error)]
pub enum InitError {
    /// The remote end cannot be reached right now; worth retrying.
    #[error("remote unreachable: {0}")]
    Unreachable(io::Error),

    /// The transport is misconfigured or the local setup failed.
    #[error("transport setup failed: {0}")]
    Fatal(io::Error),
}

impl InitError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, InitError::Unreachable(_))
    }

    /// Classify a connect failure the way the reconnect policy expects:
    /// refused/unreachable/timed out/reset peers are transient, everything
    /// else is a setup problem.
    pub fn from_connect_error(err: io::Error) -> Self {
        use io::ErrorKind::*;
        match err.kind() {
            ConnectionRefused | ConnectionReset | TimedOut | HostUnreachable
            | NetworkUnreachable | NetworkDown | NotFound => InitError::Unreachable(err),
            _ => InitError::Fatal(err),
        }
    }
}
