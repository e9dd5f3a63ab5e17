//! Error types for the protocol crate.

use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors raised while encoding, decoding or manipulating protocol values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// A message could not be serialized.
    #[error("encode error: {0}")]
    Encode(String),

    /// A message could not be deserialized.
    #[error("decode error: {0}")]
    Decode(String),

    /// A frame header announced a payload above the configured limit.
    #[error("frame of {size} bytes exceeds limit of {max} bytes")]
    FrameTooLarge {
        /// Announced payload size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A datum does not have the shape or atom types a column requires.
    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch {
        /// What the column type requires.
        expected: String,
        /// What was supplied.
        found: String,
    },

    /// A mutation cannot be applied to the target datum.
    #[error("invalid mutation: {0}")]
    InvalidMutation(String),
}

impl ProtocolError {
    /// Creates a type mismatch error.
    pub fn type_mismatch(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::TypeMismatch {
            expected: expected.into(),
            found: found.into(),
        }
    }

    /// Creates an invalid mutation error.
    pub fn invalid_mutation(message: impl Into<String>) -> Self {
        Self::InvalidMutation(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ProtocolError::FrameTooLarge { size: 10, max: 4 };
        assert_eq!(err.to_string(), "frame of 10 bytes exceeds limit of 4 bytes");

        let err = ProtocolError::type_mismatch("string", "integer");
        assert!(err.to_string().contains("expected string"));
    }
}
