//! Resource layer error types
//!
//! Errors raised by resource drivers and by the resource registry.
//! We use `thiserror` for ergonomic error definition and better error messages

use thiserror::Error;

use crate::resource::types::{DriverOp, ResourceHandle, ResourceKey};

/// the error type a resource driver reports
#[derive(Debug, Error)]
pub enum DriverError {
    /// the driver gave up waiting on the underlying resource
    #[error("{op} timed out after {elapsed_secs}s")]
    Timeout { op: DriverOp, elapsed_secs: u64 },

    /// no resource could be obtained (pool exhausted, server down)
    #[error("resource unavailable: {0}")]
    Unavailable(String),

    /// the handle is unknown to the driver or already released
    #[error("unknown resource handle: {0}")]
    UnknownHandle(ResourceHandle),

    /// the driver does not implement the requested capability
    #[error("{0} is not supported by this driver")]
    Unsupported(DriverOp),

    /// the operation reached the resource and failed there
    #[error("{op} failed: {message}")]
    Failed { op: DriverOp, message: String },
}

impl DriverError {
    pub fn failed(op: DriverOp, message: impl Into<String>) -> Self {
        Self::Failed {
            op,
            message: message.into(),
        }
    }

    /// check if this error is recoverable by retry
    pub fn is_retryable(&self) -> bool {
        matches!(self, DriverError::Timeout { .. } | DriverError::Unavailable(_))
    }
}

/// result type alias for driver operations
pub type DriverResult<T> = Result<T, DriverError>;

/// illegal state of the resource registry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// a value is already bound for the key
    #[error("resource already bound for key {0}")]
    AlreadyBound(ResourceKey),

    /// no value is bound for the key
    #[error("no resource bound for key {0}")]
    NotBound(ResourceKey),
}

/// result type alias for registry operations
pub type RegistryResult<T> = Result<T, RegistryError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let timeout = DriverError::Timeout {
            op: DriverOp::Acquire,
            elapsed_secs: 30,
        };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.to_string(), "acquire timed out after 30s");

        let failed = DriverError::failed(DriverOp::Commit, "disk full");
        assert!(!failed.is_retryable());
        assert_eq!(failed.to_string(), "commit failed: disk full");
    }
}
