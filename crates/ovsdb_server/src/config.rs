//! Server configuration.

use ovsdb_protocol::DEFAULT_MAX_FRAME_SIZE;
use std::time::Duration;

/// Configuration for the reference server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest accepted request frame.
    pub max_frame_size: usize,
    /// Largest number of operations in one transaction.
    pub max_operations: usize,
    /// Maximum concurrent sessions.
    pub max_sessions: usize,
    /// How often socket listeners check for shutdown.
    pub accept_poll_interval: Duration,
}

impl ServerConfig {
    /// Creates a configuration with default limits.
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_operations: 1000,
            max_sessions: 256,
            accept_poll_interval: Duration::from_millis(10),
        }
    }

    /// Sets the maximum frame size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }

    /// Sets the maximum number of operations per transaction.
    pub fn with_max_operations(mut self, max: usize) -> Self {
        self.max_operations = max;
        self
    }

    /// Sets the maximum number of concurrent sessions.
    pub fn with_max_sessions(mut self, max: usize) -> Self {
        self.max_sessions = max;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.max_operations, 1000);
        assert_eq!(config.max_frame_size, DEFAULT_MAX_FRAME_SIZE);
    }

    #[test]
    fn config_builder() {
        let config = ServerConfig::new()
            .with_max_operations(5)
            .with_max_sessions(2)
            .with_max_frame_size(4096);
        assert_eq!(config.max_operations, 5);
        assert_eq!(config.max_sessions, 2);
        assert_eq!(config.max_frame_size, 4096);
    }
}
