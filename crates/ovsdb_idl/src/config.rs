//! Configuration for IDL sessions.

use ovsdb_protocol::DEFAULT_MAX_FRAME_SIZE;
use std::time::Duration;

/// Configuration for an [`Idl`](crate::Idl) session.
#[derive(Debug, Clone)]
pub struct IdlConfig {
    /// Bound on the schema handshake and the initial snapshot.
    pub sync_timeout: Duration,
    /// Bound on waiting for a commit reply.
    pub commit_timeout: Duration,
    /// Longest single wait inside blocking loops.
    pub poll_interval: Duration,
    /// Largest frame accepted from stream transports.
    pub max_frame_size: usize,
}

impl IdlConfig {
    /// Creates a configuration with default timeouts.
    pub fn new() -> Self {
        Self {
            sync_timeout: Duration::from_secs(10),
            commit_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Sets the initial sync timeout.
    pub fn with_sync_timeout(mut self, timeout: Duration) -> Self {
        self.sync_timeout = timeout;
        self
    }

    /// Sets the commit timeout.
    pub fn with_commit_timeout(mut self, timeout: Duration) -> Self {
        self.commit_timeout = timeout;
        self
    }

    /// Sets the poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the maximum frame size.
    pub fn with_max_frame_size(mut self, size: usize) -> Self {
        self.max_frame_size = size;
        self
    }
}

impl Default for IdlConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = IdlConfig::default();
        assert_eq!(config.sync_timeout, Duration::from_secs(10));
        assert_eq!(config.commit_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
    }

    #[test]
    fn builder() {
        let config = IdlConfig::new()
            .with_sync_timeout(Duration::from_millis(250))
            .with_poll_interval(Duration::from_millis(5))
            .with_max_frame_size(1024);
        assert_eq!(config.sync_timeout, Duration::from_millis(250));
        assert_eq!(config.poll_interval, Duration::from_millis(5));
        assert_eq!(config.max_frame_size, 1024);
    }
}
