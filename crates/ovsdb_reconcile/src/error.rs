//! Error types for reconciliation.

use ovsdb_idl::{IdlError, Outcome};
use thiserror::Error;

/// Result type for reconciliation.
pub type ReconcileResult<T> = Result<T, ReconcileError>;

/// Errors that can occur while reconciling an entity.
#[derive(Error, Debug)]
pub enum ReconcileError {
    /// Session or transaction-building failure.
    #[error(transparent)]
    Idl(#[from] IdlError),

    /// A parameter is missing or malformed.
    #[error("{0}")]
    InvalidArgument(String),

    /// The database is in a state the requested change cannot start from.
    #[error("{0}")]
    Precondition(String),

    /// The commit did not succeed.
    #[error("{message}: {outcome}")]
    TransactionFailed {
        /// Entity-specific failure message.
        message: String,
        /// Outcome of the last attempt.
        outcome: Outcome,
        /// Number of commits sent.
        attempts: u32,
    },
}

impl ReconcileError {
    /// Creates an invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        ReconcileError::InvalidArgument(message.into())
    }

    /// Creates a precondition error.
    pub fn precondition(message: impl Into<String>) -> Self {
        ReconcileError::Precondition(message.into())
    }

    /// Returns true if every attempt lost to a concurrent writer.
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            ReconcileError::TransactionFailed {
                outcome: Outcome::TryAgain,
                ..
            }
        )
    }

    /// Returns true if the caller's parameters were at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ReconcileError::InvalidArgument(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ovsdb_idl::CommitError;

    #[test]
    fn transaction_failure_display() {
        let err = ReconcileError::TransactionFailed {
            message: "Failed to create logical switch sw0".into(),
            outcome: Outcome::TryAgain,
            attempts: 3,
        };
        assert_eq!(err.to_string(), "Failed to create logical switch sw0: try again");
        assert!(err.is_conflict());

        let err = ReconcileError::TransactionFailed {
            message: "Failed to create connection ptcp:6642".into(),
            outcome: Outcome::Error(CommitError {
                error: "constraint violation".into(),
                details: None,
            }),
            attempts: 1,
        };
        assert!(!err.is_conflict());
        assert!(err.to_string().starts_with("Failed to create connection ptcp:6642: error"));
    }

    #[test]
    fn idl_errors_pass_through() {
        let err: ReconcileError = IdlError::Closed.into();
        assert_eq!(err.to_string(), IdlError::Closed.to_string());
        assert!(ReconcileError::invalid_argument("remote is required").is_client_error());
    }
}
