//! Error types for the node harness.
//!
//! Construction and launch failures are surfaced to the caller. Teardown
//! failures never reach this type: `Node::stop` absorbs them into the log.

use crate::cancel::CancelledError;
use crate::ipc::IpcError;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the node harness.
#[derive(Debug, Error)]
pub enum HarnessError {
    // File system and OS errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Launch errors
    #[error("Unable to exec daemon binary {path}: {source}")]
    Exec {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Node {0} is already running")]
    AlreadyRunning(u32),

    #[error("Node {0} is not running")]
    NotRunning(u32),

    // Address discovery errors
    #[error("Context done while waiting for addrs: {0}")]
    AddressDiscovery(#[from] CancelledError),

    #[error("Daemon closed its IPC stream before reporting bound addresses")]
    IpcStreamClosed,

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    // Certificate errors
    #[error("Certificate generation failed: {message}")]
    Certificate { message: String },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },
}

/// Result type alias for harness operations.
pub type Result<T> = std::result::Result<T, HarnessError>;

impl From<std::io::Error> for HarnessError {
    fn from(err: std::io::Error) -> Self {
        HarnessError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<rcgen::Error> for HarnessError {
    fn from(err: rcgen::Error) -> Self {
        HarnessError::Certificate {
            message: err.to_string(),
        }
    }
}

impl HarnessError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        HarnessError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Create an IO error with a description of the failed operation.
    pub fn io_context(message: impl Into<String>, err: std::io::Error) -> Self {
        HarnessError::Io {
            message: message.into(),
            path: None,
            source: Some(err),
        }
    }

    /// Whether this error came from the OS refusing to run the daemon binary.
    pub fn is_exec_failure(&self) -> bool {
        matches!(self, HarnessError::Exec { .. })
    }

    /// Whether `start` gave up because its cancellation token fired.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, HarnessError::AddressDiscovery(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = HarnessError::NotRunning(7);
        assert_eq!(err.to_string(), "Node 7 is not running");
    }

    #[test]
    fn test_exec_error_wraps_source() {
        let err = HarnessError::Exec {
            path: PathBuf::from("/nonexistent/dcrd"),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        };
        assert!(err.is_exec_failure());
        assert!(err.to_string().starts_with("Unable to exec daemon binary"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_cancellation_conversion() {
        let err: HarnessError = CancelledError::DeadlineExceeded.into();
        assert!(err.is_cancellation());
        assert_eq!(
            err.to_string(),
            "Context done while waiting for addrs: deadline exceeded"
        );
    }
}
