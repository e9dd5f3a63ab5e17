//! Error types for the replica cache and commit path.

use ovsdb_protocol::{errors, ProtocolError};
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Result type for IDL operations.
pub type IdlResult<T> = Result<T, IdlError>;

/// Why the server rejected a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// A strong reference pointed at a row that does not exist.
    ReferentialIntegrity,
    /// A value violated a column's type or mutability constraints.
    ConstraintViolation,
    /// The transaction was aborted.
    Aborted,
    /// Any other server-reported error.
    Other,
}

impl RejectReason {
    /// Classifies a server error string.
    pub fn from_error(error: &str) -> Self {
        match error {
            errors::REFERENTIAL_INTEGRITY => RejectReason::ReferentialIntegrity,
            errors::CONSTRAINT => RejectReason::ConstraintViolation,
            errors::ABORTED => RejectReason::Aborted,
            _ => RejectReason::Other,
        }
    }
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectReason::ReferentialIntegrity => "referential integrity violation",
            RejectReason::ConstraintViolation => "constraint violation",
            RejectReason::Aborted => "aborted",
            RejectReason::Other => "rejected",
        };
        f.write_str(s)
    }
}

/// Errors raised by the replica cache, transaction builder and commit path.
#[derive(Error, Debug)]
pub enum IdlError {
    /// The server could not be reached, or the connection broke.
    #[error("connection error: {message}")]
    Connection {
        /// Error message.
        message: String,
        /// Underlying I/O error, if any.
        #[source]
        source: Option<std::io::Error>,
    },

    /// The requested tables or columns do not exist, or the server's schema
    /// disagrees with the local one.
    #[error("schema error: {0}")]
    Schema(String),

    /// A blocking wait ran out of time.
    #[error("{operation} timed out after {elapsed:?}")]
    Timeout {
        /// What was being waited for.
        operation: &'static str,
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// Commits kept conflicting with concurrent changes.
    #[error("transaction conflicted {attempts} times")]
    TransactionConflict {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The server rejected a transaction.
    #[error("transaction rejected ({reason}): {detail}")]
    TransactionRejected {
        /// Classified reason.
        reason: RejectReason,
        /// Server-provided detail.
        detail: String,
    },

    /// Malformed or unexpected message.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// The server answered a request with an error.
    #[error("server error: {0}")]
    Server(String),

    /// The session was closed.
    #[error("session closed")]
    Closed,

    /// A transaction or query was built incorrectly.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// The table is not part of the replicated view.
    #[error("table {0} is not replicated")]
    TableNotReplicated(String),

    /// The column is not part of the replicated view.
    #[error("column {column} of table {table} is not replicated")]
    ColumnNotReplicated {
        /// Table name.
        table: String,
        /// Column name.
        column: String,
    },

    /// A singleton table did not hold exactly one row.
    #[error("table {table} holds {count} rows, expected exactly one")]
    SingletonViolation {
        /// Table name.
        table: String,
        /// Number of rows found.
        count: usize,
    },
}

impl IdlError {
    /// Creates a connection error without an I/O source.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a connection error wrapping an I/O error.
    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Connection {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Creates a rejection from a server error string and its details.
    pub fn rejected(error: &str, details: Option<&str>) -> Self {
        Self::TransactionRejected {
            reason: RejectReason::from_error(error),
            detail: details.unwrap_or(error).to_string(),
        }
    }

    /// Returns true if retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            IdlError::TransactionConflict { .. } | IdlError::Timeout { .. }
        )
    }

    /// Returns true if the session can no longer be used.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            IdlError::Connection { .. } | IdlError::Closed | IdlError::Protocol(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_reject_reasons() {
        assert_eq!(
            RejectReason::from_error(errors::REFERENTIAL_INTEGRITY),
            RejectReason::ReferentialIntegrity
        );
        assert_eq!(
            RejectReason::from_error(errors::CONSTRAINT),
            RejectReason::ConstraintViolation
        );
        assert_eq!(RejectReason::from_error("bogus"), RejectReason::Other);
    }

    #[test]
    fn rejected_prefers_details() {
        let err = IdlError::rejected(errors::REFERENTIAL_INTEGRITY, Some("row 1 missing"));
        assert!(matches!(
            err,
            IdlError::TransactionRejected {
                reason: RejectReason::ReferentialIntegrity,
                ref detail,
            } if detail == "row 1 missing"
        ));
    }

    #[test]
    fn retryable_and_fatal() {
        assert!(IdlError::TransactionConflict { attempts: 3 }.is_retryable());
        assert!(!IdlError::Schema("x".into()).is_retryable());
        assert!(IdlError::Closed.is_fatal());
        assert!(IdlError::connection("reset").is_fatal());
        assert!(!IdlError::InvalidOperation("x".into()).is_fatal());
    }

    #[test]
    fn error_display() {
        let err = IdlError::Timeout {
            operation: "initial sync",
            elapsed: Duration::from_secs(10),
        };
        assert_eq!(err.to_string(), "initial sync timed out after 10s");

        let err = IdlError::SingletonViolation {
            table: "SB_Global".into(),
            count: 0,
        };
        assert!(err.to_string().contains("SB_Global"));
    }
}
