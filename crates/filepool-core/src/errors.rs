//! File pool error types.
//!
//! These errors are designed to be serializable and not depend on external
//! error types like `std::io::Error`. For I/O errors, we capture the kind
//! and message as strings.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for file pool operations.
///
/// Designed to be serializable across process boundaries without depending
/// on non-serializable types. The queue uses [`FilepoolError::is_recoverable`]
/// to decide whether a failed entry stays queued or is dropped.
#[derive(Clone, Debug, Error, Serialize, Deserialize, PartialEq, Eq)]
pub enum FilepoolError {
    /// The device has no usable network connection.
    ///
    /// Recoverable: the queue pauses and the entry stays queued until
    /// connectivity returns.
    #[error("Network unavailable")]
    NetworkUnavailable,

    /// The remote file does not exist (typically an HTTP 404).
    #[error("Not found: {message}")]
    NotFound {
        /// What was not found.
        message: String,
    },

    /// The URL is malformed or cannot be downloaded from.
    #[error("Invalid URL: {url}")]
    InvalidUrl {
        /// The offending URL.
        url: String,
    },

    /// The request failed outright or the server answered with an error
    /// status. Treated as permanent: retrying the same URL is expected to
    /// fail the same way.
    #[error("Connection error: {message}")]
    Connection {
        /// Detailed error message.
        message: String,
        /// HTTP status code if available.
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
    },

    /// The server reports the local copy is already current (HTTP 304).
    #[error("Remote content not modified")]
    NotModified,

    /// The transfer was interrupted mid-flight, e.g. the connection
    /// dropped while streaming the body.
    ///
    /// Recoverable: the queue keeps the entry and retries later.
    #[error("Transfer aborted: {message}")]
    Aborted {
        /// Detailed error message.
        message: String,
    },

    /// Writing the file would exceed the device storage quota.
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    /// The file cannot be downloaded at all, e.g. a plugin strategy vetoed
    /// it.
    #[error("Not downloadable: {reason}")]
    NotDownloadable {
        /// Why the file is not downloadable.
        reason: String,
    },

    /// The metadata store failed.
    #[error("Storage error: {message}")]
    Storage {
        /// Detailed error message.
        message: String,
    },

    /// I/O error during file operations.
    #[error("Filesystem error ({kind}): {message}")]
    Filesystem {
        /// The kind of I/O error (e.g., "NotFound", "PermissionDenied").
        kind: String,
        /// Detailed error message.
        message: String,
    },

    /// The pool was used before `initialize` completed.
    #[error("File pool not initialized")]
    Uninitialized,

    /// General/uncategorized error.
    #[error("{message}")]
    Other {
        /// Error message.
        message: String,
    },
}

impl FilepoolError {
    /// Create a not found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an invalid URL error.
    pub fn invalid_url(url: impl Into<String>) -> Self {
        Self::InvalidUrl { url: url.into() }
    }

    /// Create a connection error without a status code.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            status_code: None,
        }
    }

    /// Create a connection error carrying the HTTP status code.
    pub fn connection_with_status(message: impl Into<String>, status_code: u16) -> Self {
        Self::Connection {
            message: message.into(),
            status_code: Some(status_code),
        }
    }

    /// Create an aborted-transfer error.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted {
            message: message.into(),
        }
    }

    /// Create a not downloadable error.
    pub fn not_downloadable(reason: impl Into<String>) -> Self {
        Self::NotDownloadable {
            reason: reason.into(),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a filesystem error from kind and message strings.
    pub fn filesystem(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Filesystem {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Create an error from a `std::io::Error`.
    ///
    /// Quota errors get their own variant so the queue can surface an
    /// actionable message; everything else captures the kind name and
    /// message for serialization.
    #[must_use]
    pub fn from_io_error(err: &std::io::Error) -> Self {
        let kind = err.kind();
        if matches!(
            kind,
            std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded
        ) {
            return Self::QuotaExceeded;
        }

        Self::Filesystem {
            kind: format!("{kind:?}"),
            message: err.to_string(),
        }
    }

    /// Create a generic error.
    pub fn other(message: impl Into<String>) -> Self {
        Self::Other {
            message: message.into(),
        }
    }

    /// Whether a failed queue entry should stay in the queue.
    ///
    /// Only an interrupted transfer or a missing network connection are
    /// worth retrying; every other failure is expected to repeat and would
    /// lock down the queue.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::NetworkUnavailable | Self::Aborted { .. })
    }

    /// Convert to a user-friendly message.
    #[must_use]
    pub fn user_message(&self) -> String {
        match self {
            Self::NetworkUnavailable => "No network connection available.".to_string(),
            Self::NotFound { .. } => "The file was not found on the server.".to_string(),
            Self::InvalidUrl { url } => format!("The URL '{url}' cannot be downloaded."),
            Self::Connection {
                status_code: Some(code),
                ..
            } => format!("Download failed (HTTP {code})."),
            Self::Connection { message, .. } => format!("Download failed: {message}"),
            Self::NotModified => "The local copy is already up to date.".to_string(),
            Self::Aborted { .. } => "The download was interrupted.".to_string(),
            Self::QuotaExceeded => {
                "There is not enough storage available on this device.".to_string()
            }
            Self::NotDownloadable { reason } => {
                format!("This file cannot be downloaded: {reason}")
            }
            Self::Storage { .. } => "Could not access the local database.".to_string(),
            Self::Filesystem { message, .. } => format!("File operation failed: {message}"),
            Self::Uninitialized => "The file pool is not ready yet.".to_string(),
            Self::Other { message } => message.clone(),
        }
    }
}

/// Convenience result type for file pool operations.
pub type FilepoolResult<T> = Result<T, FilepoolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filesystem_error_from_std() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err = FilepoolError::from_io_error(&io_err);

        match err {
            FilepoolError::Filesystem { kind, message } => {
                assert_eq!(kind, "NotFound");
                assert!(message.contains("file not found"));
            }
            _ => panic!("Expected Filesystem variant"),
        }
    }

    #[test]
    fn test_quota_kinds_map_to_quota_exceeded() {
        let io_err = std::io::Error::new(std::io::ErrorKind::StorageFull, "disk full");
        assert_eq!(
            FilepoolError::from_io_error(&io_err),
            FilepoolError::QuotaExceeded
        );
    }

    #[test]
    fn test_error_serialization() {
        let err = FilepoolError::connection_with_status("server error", 503);
        let json = serde_json::to_string(&err).unwrap();
        assert!(json.contains("503"));
        assert!(json.contains("server error"));

        let parsed: FilepoolError = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, err);
    }

    #[test]
    fn test_is_recoverable() {
        assert!(FilepoolError::NetworkUnavailable.is_recoverable());
        assert!(FilepoolError::aborted("connection reset").is_recoverable());
        assert!(!FilepoolError::not_found("404").is_recoverable());
        assert!(!FilepoolError::connection("refused").is_recoverable());
        assert!(!FilepoolError::NotModified.is_recoverable());
        assert!(!FilepoolError::QuotaExceeded.is_recoverable());
    }

    #[test]
    fn test_user_messages() {
        assert!(
            FilepoolError::QuotaExceeded
                .user_message()
                .contains("storage")
        );
        assert!(
            FilepoolError::connection_with_status("boom", 500)
                .user_message()
                .contains("500")
        );
    }
}
