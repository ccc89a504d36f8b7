//! Error model shared by every layer of the control plane

use serde::Serialize;
use thiserror::Error;

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, DashError>;

/// Errors surfaced by the control plane core and its providers
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DashError {
    /// Malformed identifier, empty required field, out-of-range value
    #[error("{0}")]
    InvalidArgument(String),

    #[error("{0}")]
    NotFound(String),

    /// Permission gate rejection, or provider-side authorization failure
    #[error("{0}")]
    PermissionDenied(String),

    /// Operation is illegal for the resource's current state
    #[error("{0}")]
    PreconditionFailed(String),

    #[error("{0}")]
    Conflict(String),

    /// Network failure or throttling; never retried by the core
    #[error("{0}")]
    Transient(String),

    #[error("{0}")]
    Fatal(String),

    #[error("operation cancelled")]
    Cancelled,
}

/// Discriminant of [`DashError`], used for metrics labels and status mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    NotFound,
    PermissionDenied,
    PreconditionFailed,
    Conflict,
    Transient,
    Fatal,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transient => "transient",
            ErrorKind::Fatal => "fatal",
            ErrorKind::Cancelled => "cancelled",
        }
    }

    /// True for errors the caller can fix by changing the request
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidArgument
                | ErrorKind::NotFound
                | ErrorKind::PermissionDenied
                | ErrorKind::PreconditionFailed
                | ErrorKind::Conflict
        )
    }
}

impl DashError {
    pub fn invalid(message: impl Into<String>) -> Self {
        DashError::InvalidArgument(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        DashError::NotFound(message.into())
    }

    pub fn denied(message: impl Into<String>) -> Self {
        DashError::PermissionDenied(message.into())
    }

    pub fn precondition(message: impl Into<String>) -> Self {
        DashError::PreconditionFailed(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        DashError::Conflict(message.into())
    }

    pub fn transient(message: impl Into<String>) -> Self {
        DashError::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        DashError::Fatal(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            DashError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            DashError::NotFound(_) => ErrorKind::NotFound,
            DashError::PermissionDenied(_) => ErrorKind::PermissionDenied,
            DashError::PreconditionFailed(_) => ErrorKind::PreconditionFailed,
            DashError::Conflict(_) => ErrorKind::Conflict,
            DashError::Transient(_) => ErrorKind::Transient,
            DashError::Fatal(_) => ErrorKind::Fatal,
            DashError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Prefix the message with the failed operation, keeping the kind
    pub fn context(self, operation: impl std::fmt::Display) -> Self {
        let wrap = |message: String| format!("{}: {}", operation, message);
        match self {
            DashError::InvalidArgument(m) => DashError::InvalidArgument(wrap(m)),
            DashError::NotFound(m) => DashError::NotFound(wrap(m)),
            DashError::PermissionDenied(m) => DashError::PermissionDenied(wrap(m)),
            DashError::PreconditionFailed(m) => DashError::PreconditionFailed(wrap(m)),
            DashError::Conflict(m) => DashError::Conflict(wrap(m)),
            DashError::Transient(m) => DashError::Transient(wrap(m)),
            DashError::Fatal(m) => DashError::Fatal(wrap(m)),
            DashError::Cancelled => DashError::Cancelled,
        }
    }
}

/// Extension for attaching operation context to a [`Result`]
pub trait ResultExt<T> {
    fn context_op<F, D>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> D,
        D: std::fmt::Display;
}

impl<T> ResultExt<T> for Result<T> {
    fn context_op<F, D>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> D,
        D: std::fmt::Display,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_preserves_kind() {
        let err = DashError::not_found("instance i-12345678 not found")
            .context("describe instance i-12345678");
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(
            err.to_string(),
            "describe instance i-12345678: instance i-12345678 not found"
        );
    }

    #[test]
    fn test_cancelled_ignores_context() {
        let err = DashError::Cancelled.context("list nodes");
        assert_eq!(err, DashError::Cancelled);
    }

    #[test]
    fn test_client_error_classification() {
        assert!(ErrorKind::PreconditionFailed.is_client_error());
        assert!(ErrorKind::Conflict.is_client_error());
        assert!(!ErrorKind::Transient.is_client_error());
        assert!(!ErrorKind::Fatal.is_client_error());
    }
}
