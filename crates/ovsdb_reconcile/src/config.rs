//! Reconciliation configuration.

use ovsdb_idl::IdlConfig;

/// Default number of commits sent before giving up on conflicts.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Retry policy for conflicting commits.
///
/// Only [`ovsdb_idl::Outcome::TryAgain`] is retried, immediately and with a
/// freshly prepared transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryConfig {
    /// Maximum number of commits sent, including the first.
    pub max_attempts: u32,
}

impl RetryConfig {
    /// Creates the default policy.
    pub fn new() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Sets the maximum number of attempts. Zero is treated as one.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of a [`crate::Reconciler`].
#[derive(Debug, Clone, Default)]
pub struct ReconcileConfig {
    /// Session configuration.
    pub idl: IdlConfig,
    /// Retry policy.
    pub retry: RetryConfig,
    /// Report what would change without committing.
    pub check_mode: bool,
}

impl ReconcileConfig {
    /// Creates a configuration with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the session configuration.
    pub fn with_idl(mut self, idl: IdlConfig) -> Self {
        self.idl = idl;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Enables or disables check mode.
    pub fn with_check_mode(mut self, check_mode: bool) -> Self {
        self.check_mode = check_mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn defaults() {
        let config = ReconcileConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert!(!config.check_mode);
        assert_eq!(config.idl.sync_timeout, Duration::from_secs(10));
    }

    #[test]
    fn builder() {
        let config = ReconcileConfig::new()
            .with_retry(RetryConfig::new().with_max_attempts(0))
            .with_check_mode(true);
        assert_eq!(config.retry.max_attempts, 1);
        assert!(config.check_mode);
    }
}
