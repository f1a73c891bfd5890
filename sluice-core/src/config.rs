use crate::{ErrorKind, IsolationLevel, Result};
use std::time::Duration;

/// What to do when a batch reads back fewer generated keys than it submitted rows.
///
/// Some drivers return fewer keys than rows for certain statement shapes, so the mismatch is
/// tolerated by default.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCountPolicy {
    /// Log a warning and return the keys that were read.
    #[default]
    Warn,
    /// Fail the batch (after it was committed, the error only reports the mismatch).
    Fail,
}

/// Configuration of a [`crate::SqlExecutor`].
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Parameter sets submitted per chunk by the batch operations.
    pub batch_size: usize,
    /// Isolation used when `IsolationLevel::Default` is requested.
    pub default_isolation: IsolationLevel,
    /// Applied to the connection before every statement.
    pub query_timeout: Option<Duration>,
    /// Reject every write before touching the database.
    pub read_only: bool,
    pub key_count_policy: KeyCountPolicy,
    /// Maximum number of parsed statements kept, 0 disables the cache.
    pub sql_cache_capacity: usize,
}

pub const DEFAULT_BATCH_SIZE: usize = 200;

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            default_isolation: IsolationLevel::Default,
            query_timeout: None,
            read_only: false,
            key_count_policy: KeyCountPolicy::Warn,
            sql_cache_capacity: 1024,
        }
    }
}

impl ExecutorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    pub fn with_default_isolation(mut self, level: IsolationLevel) -> Self {
        self.default_isolation = level;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }

    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_key_count_policy(mut self, policy: KeyCountPolicy) -> Self {
        self.key_count_policy = policy;
        self
    }

    pub fn with_sql_cache_capacity(mut self, capacity: usize) -> Self {
        self.sql_cache_capacity = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(ErrorKind::invalid_argument("batch_size must be greater than 0"));
        }
        if self.query_timeout == Some(Duration::ZERO) {
            return Err(ErrorKind::invalid_argument(
                "query_timeout must be greater than 0, use None to disable it",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_kind;

    #[test]
    fn builder() {
        let config = ExecutorConfig::new()
            .with_batch_size(10)
            .with_default_isolation(IsolationLevel::ReadCommitted)
            .with_query_timeout(Duration::from_secs(3))
            .with_read_only(true)
            .with_key_count_policy(KeyCountPolicy::Fail);
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.default_isolation, IsolationLevel::ReadCommitted);
        assert_eq!(config.query_timeout, Some(Duration::from_secs(3)));
        assert!(config.read_only);
        assert_eq!(config.key_count_policy, KeyCountPolicy::Fail);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn invalid_batch_size() {
        let error = ExecutorConfig::new().with_batch_size(0).validate().unwrap_err();
        assert!(matches!(
            error_kind(&error),
            Some(ErrorKind::InvalidArgument(..))
        ));
    }
}
