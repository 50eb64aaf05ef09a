//! Error types for Lanshare.
//!
//! This module provides a unified error type for all Lanshare operations,
//! with specific error variants for the failure modes of discovery, direct
//! transfer and staging.

use std::io;
use std::net::SocketAddr;
use std::path::Path;

use thiserror::Error;

/// A specialized `Result` type for Lanshare operations.
pub type Result<T> = std::result::Result<T, Error>;

/// The main error type for Lanshare.
#[derive(Error, Debug)]
pub enum Error {
    /// Network operation failed (E001)
    #[error("network error: {0}")]
    Network(String),

    /// Could not connect to a peer (E002)
    #[error("failed to connect to {addr}: {reason}")]
    ConnectFailed {
        /// Peer address
        addr: SocketAddr,
        /// Reason for failure
        reason: String,
    },

    /// Invalid protocol message (E003)
    #[error("invalid protocol message: {0}")]
    Protocol(String),

    /// Transfer header does not fit in one frame
    #[error("transfer header is {0} bytes, exceeding the {max} byte frame", max = crate::HEADER_FRAME_SIZE)]
    HeaderTooLarge(usize),

    /// Connection closed before the declared size arrived (E004)
    #[error("partial transfer: expected {expected} bytes, received {received}")]
    PartialTransfer {
        /// Bytes declared by the header
        expected: u64,
        /// Bytes actually received
        received: u64,
    },

    /// Transfer rejected by receiver
    #[error("transfer rejected by receiver")]
    TransferRejected,

    /// Unknown pending file id (E005)
    #[error("not found: {0}")]
    NotFound(String),

    /// File not found (E006)
    #[error("file not found: {0}")]
    FileNotFound(String),

    /// File name that cannot be stored
    #[error("invalid file name: {0:?}")]
    InvalidFileName(String),

    /// Permission denied (E007)
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// Other file system failure, e.g. disk full (E008)
    #[error("file system error: {0}")]
    FileSystem(String),

    /// Operation timeout
    #[error("operation timed out after {0} seconds")]
    Timeout(u64),

    /// Configuration file error
    #[error("configuration error: {0}")]
    ConfigError(String),

    /// Invalid configuration value
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfig {
        /// Configuration key
        key: String,
        /// Reason for invalidity
        reason: String,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal error (should not happen)
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Classify a file system I/O error for the given path.
    pub fn from_fs(err: &io::Error, path: &Path) -> Self {
        let shown = path.display().to_string();
        match err.kind() {
            io::ErrorKind::NotFound => Self::FileNotFound(shown),
            io::ErrorKind::PermissionDenied => Self::PermissionDenied(shown),
            _ => Self::FileSystem(format!("{shown}: {err}")),
        }
    }

    /// Returns the error code associated with this error, if any.
    ///
    /// Error codes follow the pattern EXXX where XXX is a 3-digit number.
    #[must_use]
    pub const fn code(&self) -> Option<&'static str> {
        match self {
            Self::Network(_) | Self::Timeout(_) => Some("E001"),
            Self::ConnectFailed { .. } => Some("E002"),
            Self::Protocol(_) | Self::HeaderTooLarge(_) => Some("E003"),
            Self::PartialTransfer { .. } => Some("E004"),
            Self::NotFound(_) => Some("E005"),
            Self::FileNotFound(_) => Some("E006"),
            Self::PermissionDenied(_) => Some("E007"),
            Self::FileSystem(_) => Some("E008"),
            _ => None,
        }
    }

    /// Returns whether this error is recoverable (can be retried).
    ///
    /// A retried send always restarts from the first byte.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Network(_)
                | Self::ConnectFailed { .. }
                | Self::PartialTransfer { .. }
                | Self::Timeout(_)
        )
    }
}
