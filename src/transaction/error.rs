//! Transaction error types.

use thiserror::Error;

use crate::resource::{DriverError, RegistryError};
use crate::transaction::synchronization::SynchronizationError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// The propagation rule cannot be honored in the current context, or the
    /// scope is used after completion.
    #[error("illegal transaction state: {0}")]
    IllegalTransactionState(String),

    /// A savepoint was needed but the resource cannot provide one.
    #[error("nested transaction not supported: {0}")]
    NestedTransactionNotSupported(String),

    /// Commit was requested but the shared transaction had been doomed by another scope.
    #[error("unexpected rollback: {0}")]
    UnexpectedRollback(String),

    /// Infrastructure failure from the driver or from a synchronization callback.
    #[error("transaction system failure: {message}")]
    System {
        message: String,
        #[source]
        cause: SystemCause,
    },

    /// The context's resource bindings are not in the expected state.
    #[error("resource registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// What went wrong underneath a [`TransactionError::System`].
#[derive(Debug, Error)]
pub enum SystemCause {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Synchronization(#[from] SynchronizationError),
}

impl TransactionError {
    pub(crate) fn illegal_state(message: impl Into<String>) -> Self {
        Self::IllegalTransactionState(message.into())
    }

    pub(crate) fn driver(message: impl Into<String>, cause: DriverError) -> Self {
        Self::System {
            message: message.into(),
            cause: SystemCause::Driver(cause),
        }
    }

    pub(crate) fn synchronization(message: impl Into<String>, cause: SynchronizationError) -> Self {
        Self::System {
            message: message.into(),
            cause: SystemCause::Synchronization(cause),
        }
    }

    /// Check if this error comes from the infrastructure rather than from
    /// how the coordinator was used.
    pub fn is_system_failure(&self) -> bool {
        matches!(self, TransactionError::System { .. })
    }

    /// Check if the failure may go away on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::System {
                cause: SystemCause::Driver(err),
                ..
            } => err.is_retryable(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::DriverOp;

    #[test]
    fn test_error_classification() {
        let timeout = TransactionError::driver(
            "could not open resource",
            DriverError::Timeout {
                op: DriverOp::Acquire,
                elapsed_secs: 3,
            },
        );
        assert!(timeout.is_system_failure());
        assert!(timeout.is_retryable());

        let state = TransactionError::illegal_state("no transaction");
        assert!(!state.is_system_failure());
        assert!(!state.is_retryable());
    }

    #[test]
    fn test_source_chain() {
        use std::error::Error as _;

        let err = TransactionError::driver(
            "commit failed",
            DriverError::failed(DriverOp::Commit, "connection reset"),
        );
        assert_eq!(err.to_string(), "transaction system failure: commit failed");
        assert_eq!(
            err.source().map(|s| s.to_string()),
            Some("commit failed: connection reset".to_string())
        );
    }
}
