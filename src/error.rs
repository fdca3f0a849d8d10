//! Error types for framed connections.

use std::io;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported to validation and message continuations.
///
/// Cloneable so that a single stream failure can be handed to every request
/// drained from a queue.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// IO failure on the underlying stream (disconnect, reset, teardown).
    #[error("stream error: {0}")]
    Stream(#[source] Arc<io::Error>),

    /// `validate` was called on a connection that already passed the handshake.
    #[error("connection already validated")]
    AlreadyValidated,

    /// `validate` was called while a handshake was still running.
    #[error("validation handshake already in progress")]
    HandshakeInProgress,

    /// The peer sent an identifier that does not match ours.
    #[error("protocol violation: peer identifier does not match ({expected_len} bytes expected)")]
    ProtocolViolation {
        /// Length of the identifier this side expected.
        expected_len: usize,
    },

    /// A frame body is larger than the header or the configured limit allows.
    #[error("frame of {len} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced or requested body length.
        len: u64,
        /// Limit in force.
        max: u32,
    },
}

impl LinkError {
    /// Error delivered to every pending operation when the connection is torn down.
    pub fn aborted() -> Self {
        Self::Stream(Arc::new(io::Error::new(
            io::ErrorKind::ConnectionAborted,
            "connection dropped",
        )))
    }

    /// The IO error kind, for stream errors.
    pub fn io_kind(&self) -> Option<io::ErrorKind> {
        match self {
            Self::Stream(e) => Some(e.kind()),
            _ => None,
        }
    }

    /// Whether this error came from tearing the connection down.
    pub fn is_aborted(&self) -> bool {
        self.io_kind() == Some(io::ErrorKind::ConnectionAborted)
    }

    /// Whether this error is a transport failure rather than a protocol one.
    pub fn is_stream_error(&self) -> bool {
        matches!(self, Self::Stream(_))
    }
}

impl From<io::Error> for LinkError {
    fn from(err: io::Error) -> Self {
        Self::Stream(Arc::new(err))
    }
}

/// Result type for connection operations.
pub type LinkResult<T> = std::result::Result<T, LinkError>;

/// Errors raised while loading a [`LinkConfig`](crate::LinkConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set.
    #[error("missing environment variable {0}")]
    Missing(&'static str),

    /// An environment variable holds a value that cannot be parsed.
    #[error("invalid value {value:?} for {var}")]
    Invalid {
        /// Variable name.
        var: &'static str,
        /// Offending value.
        value: String,
    },
}
