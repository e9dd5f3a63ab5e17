//! Error types for the reference server.

use ovsdb_protocol::ProtocolError;
use thiserror::Error;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the reference server.
#[derive(Error, Debug)]
pub enum ServerError {
    /// Malformed or oversized request.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The request named a database this server does not serve.
    #[error("unknown database: {0}")]
    UnknownDatabase(String),

    /// The session id is not registered.
    #[error("unknown session: {0}")]
    UnknownSession(u64),

    /// Framing or encoding failure.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),

    /// I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    /// Returns true if the client caused the error.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ServerError::InvalidRequest(_)
                | ServerError::UnknownDatabase(_)
                | ServerError::Protocol(_)
        )
    }

    /// Returns true if the server caused the error.
    pub fn is_server_error(&self) -> bool {
        matches!(self, ServerError::Internal(_) | ServerError::Io(_))
    }
}
