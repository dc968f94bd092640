//! Error types for peerlock.
//!
//! Every failure in the lock and messaging layers is reported as a
//! `PeerError` value and logged at the call site. None of them abort the
//! process.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Main error type for peerlock.
#[derive(Debug, Error)]
pub enum PeerError {
    // Lock errors
    #[error("Lock file is not open: {0}")]
    LockFileNotOpen(PathBuf),

    #[error("Too many concurrent readers on {path} (limit {limit})")]
    TooManyReaders { path: PathBuf, limit: usize },

    #[error("{operation} failed on {name}: {message}")]
    Primitive {
        operation: &'static str,
        name: String,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Endpoint errors
    #[error("Failed to listen on {endpoint}: {message}")]
    Bind { endpoint: String, message: String },

    #[error("Could not connect to {endpoint} after {attempts} attempts")]
    ConnectFailed { endpoint: String, attempts: u32 },

    // Protocol errors
    #[error("Timed out after {0:?} while {1}")]
    Timeout(Duration, &'static str),

    #[error("Unexpected acknowledgement: {0:?}")]
    AckMismatch(Vec<u8>),

    #[error("Protocol error: {message}")]
    Protocol { message: String },

    #[error("This instance is the server and cannot send to itself")]
    SelfDelivery,

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for peerlock operations.
pub type Result<T> = std::result::Result<T, PeerError>;

/// Coarse classification of a `PeerError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// The lock file is not open, or bounded reader capacity is exhausted.
    ResourceUnavailable,
    /// Creating, opening or waiting on an OS object failed.
    PrimitiveFailure,
    /// A bounded wait expired, or the server could not be reached.
    ProtocolTimeout,
    /// Wrong acknowledgement or a malformed frame.
    ProtocolViolation,
    /// The caller used the API in a way it does not support.
    Usage,
}

impl From<std::io::Error> for PeerError {
    fn from(err: std::io::Error) -> Self {
        PeerError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl PeerError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        PeerError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create a primitive failure from an OS error.
    pub fn primitive(operation: &'static str, name: impl Into<String>, err: std::io::Error) -> Self {
        PeerError::Primitive {
            operation,
            name: name.into(),
            message: err.to_string(),
            source: Some(err),
        }
    }

    /// Map the error onto its class.
    pub fn class(&self) -> ErrorClass {
        match self {
            PeerError::LockFileNotOpen(_) | PeerError::TooManyReaders { .. } => {
                ErrorClass::ResourceUnavailable
            }

            PeerError::Primitive { .. } | PeerError::Io { .. } | PeerError::Bind { .. } => {
                ErrorClass::PrimitiveFailure
            }

            PeerError::Timeout(..) | PeerError::ConnectFailed { .. } => {
                ErrorClass::ProtocolTimeout
            }

            PeerError::AckMismatch(_) | PeerError::Protocol { .. } => {
                ErrorClass::ProtocolViolation
            }

            PeerError::SelfDelivery | PeerError::Config { .. } => ErrorClass::Usage,
        }
    }

    /// Check if a caller may reasonably retry the failed operation.
    ///
    /// Reader exhaustion is fatal and never retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PeerError::Timeout(..) | PeerError::ConnectFailed { .. }
        )
    }
}
