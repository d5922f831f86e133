//! Error types for the subscription multiplexer.

use crate::types::CollectionKey;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Main error type for multiplexer operations.
#[derive(Debug, Error)]
pub enum MuxError {
    #[error("Multiplexer not initialized")]
    NotInitialized,

    #[error("Remote store not ready after {0:?}")]
    ReadinessTimeout(Duration),

    #[error("Invalid collection key: {0:?}")]
    InvalidCollection(String),

    #[error("Authorization denied for collection {0}")]
    AuthorizationDenied(CollectionKey),

    #[error("Fetch failed for collection {collection}: {source}")]
    Fetch {
        collection: CollectionKey,
        source: RemoteError,
    },

    #[error("Wait cancelled")]
    Cancelled,

    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl From<serde_json::Error> for MuxError {
    fn from(e: serde_json::Error) -> Self {
        MuxError::Config(e.to_string())
    }
}

/// Result type for multiplexer operations.
pub type Result<T> = std::result::Result<T, MuxError>;

/// Classification of failures reported by the remote store.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteErrorKind {
    PermissionDenied,
    Unauthenticated,
    Unavailable,
    NotFound,
    Internal,
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RemoteErrorKind::PermissionDenied => "permission-denied",
            RemoteErrorKind::Unauthenticated => "unauthenticated",
            RemoteErrorKind::Unavailable => "unavailable",
            RemoteErrorKind::NotFound => "not-found",
            RemoteErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// An error from a live watch or one-shot fetch.
///
/// Cloned into every callback registered for the failing collection.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::PermissionDenied, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Unavailable, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorKind::Internal, message)
    }

    /// Authorization failures are logged at warning level, everything else as an error.
    pub fn is_permission_denied(&self) -> bool {
        matches!(
            self.kind,
            RemoteErrorKind::PermissionDenied | RemoteErrorKind::Unauthenticated
        )
    }
}

/// Failure of an authorization claim lookup.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("Authorization check failed: {0}")]
pub struct AuthError(pub String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_permission_classification() {
        assert!(RemoteError::permission_denied("nope").is_permission_denied());
        assert!(RemoteError::new(RemoteErrorKind::Unauthenticated, "x").is_permission_denied());
        assert!(!RemoteError::unavailable("offline").is_permission_denied());
        assert!(!RemoteError::internal("boom").is_permission_denied());
    }

    #[test]
    fn test_remote_error_display() {
        let err = RemoteError::permission_denied("missing role");
        assert_eq!(err.to_string(), "permission-denied: missing role");
    }

    #[test]
    fn test_config_error_from_json() {
        let err: MuxError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(err, MuxError::Config(_)));
    }
}
