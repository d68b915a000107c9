//! Configuration for the batch queue.

use std::str::FromStr;
use std::time::Duration;

use crate::error::ConfigError;

/// Configuration for a [`super::BatchQueue`]
///
/// Fixed for the lifetime of a queue instance.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchConfig {
    /// Maximum number of requests handed to the handler at once
    pub max_batch_size: usize,

    /// Maximum time a batch stays open, measured from its first request
    pub batch_wait_timeout: Duration,

    /// Maximum number of queued (not yet batched) requests; `None` is unbounded
    pub max_queue_size: Option<usize>,

    /// Maximum time a caller waits for its result; `None` waits indefinitely
    pub submit_timeout: Option<Duration>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 16,
            batch_wait_timeout: Duration::from_secs(1),
            max_queue_size: None,
            submit_timeout: None,
        }
    }
}

impl BatchConfig {
    /// Create a config with the given size cap and wait timeout
    pub fn new(max_batch_size: usize, batch_wait_timeout: Duration) -> Self {
        Self { max_batch_size, batch_wait_timeout, ..Self::default() }
    }

    /// Create config optimized for low latency (small batches, short waits)
    pub fn low_latency() -> Self {
        Self {
            max_batch_size: 4,
            batch_wait_timeout: Duration::from_millis(5),
            max_queue_size: Some(64),
            submit_timeout: Some(Duration::from_secs(30)),
        }
    }

    /// Create config optimized for high throughput (large batches, longer waits)
    pub fn high_throughput() -> Self {
        Self {
            max_batch_size: 64,
            batch_wait_timeout: Duration::from_millis(100),
            max_queue_size: Some(4096),
            submit_timeout: Some(Duration::from_secs(300)),
        }
    }

    /// Bound the intake buffer
    pub fn with_max_queue_size(mut self, max: usize) -> Self {
        self.max_queue_size = Some(max);
        self
    }

    /// Bound how long a caller waits for its result
    pub fn with_submit_timeout(mut self, timeout: Duration) -> Self {
        self.submit_timeout = Some(timeout);
        self
    }

    /// Check the invariants a queue relies on
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_queue_size == Some(0) {
            return Err(ConfigError::ZeroQueueSize);
        }
        Ok(())
    }

    /// Create config from environment variables
    ///
    /// - `MLSERVE_MAX_BATCH_SIZE`
    /// - `MLSERVE_BATCH_WAIT_MS`
    /// - `MLSERVE_MAX_QUEUE`
    /// - `MLSERVE_SUBMIT_TIMEOUT_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup, starting from the defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(n) = parse_var::<usize, _>(&lookup, "MLSERVE_MAX_BATCH_SIZE")? {
            config.max_batch_size = n;
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "MLSERVE_BATCH_WAIT_MS")? {
            config.batch_wait_timeout = Duration::from_millis(ms);
        }

        if let Some(n) = parse_var::<usize, _>(&lookup, "MLSERVE_MAX_QUEUE")? {
            config.max_queue_size = Some(n);
        }

        if let Some(ms) = parse_var::<u64, _>(&lookup, "MLSERVE_SUBMIT_TIMEOUT_MS")? {
            config.submit_timeout = Some(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::invalid_env(key, raw)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = BatchConfig::default();
        assert_eq!(config.max_batch_size, 16);
        assert_eq!(config.batch_wait_timeout, Duration::from_secs(1));
        assert!(config.max_queue_size.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(BatchConfig::low_latency().validate().is_ok());
        assert!(BatchConfig::high_throughput().validate().is_ok());
        assert!(BatchConfig::low_latency().max_batch_size < BatchConfig::high_throughput().max_batch_size);
    }

    #[test]
    fn test_validate_rejects_zero_sizes() {
        let config = BatchConfig::new(0, Duration::ZERO);
        assert_eq!(config.validate(), Err(ConfigError::ZeroBatchSize));

        let config = BatchConfig::new(1, Duration::ZERO).with_max_queue_size(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroQueueSize));
    }

    #[test]
    fn test_zero_wait_timeout_is_valid() {
        assert!(BatchConfig::new(8, Duration::ZERO).validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = BatchConfig::from_lookup(lookup(&[
            ("MLSERVE_MAX_BATCH_SIZE", "8"),
            ("MLSERVE_BATCH_WAIT_MS", "50"),
            ("MLSERVE_MAX_QUEUE", " 100 "),
            ("MLSERVE_SUBMIT_TIMEOUT_MS", "2000"),
        ]))
        .unwrap();

        assert_eq!(config.max_batch_size, 8);
        assert_eq!(config.batch_wait_timeout, Duration::from_millis(50));
        assert_eq!(config.max_queue_size, Some(100));
        assert_eq!(config.submit_timeout, Some(Duration::from_secs(2)));
    }

    #[test]
    fn test_from_lookup_empty_uses_defaults() {
        let config = BatchConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, BatchConfig::default());
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = BatchConfig::from_lookup(lookup(&[("MLSERVE_BATCH_WAIT_MS", "soon")])).unwrap_err();
        assert_eq!(err, ConfigError::invalid_env("MLSERVE_BATCH_WAIT_MS", "soon"));

        let err = BatchConfig::from_lookup(lookup(&[("MLSERVE_MAX_BATCH_SIZE", "0")])).unwrap_err();
        assert_eq!(err, ConfigError::ZeroBatchSize);
    }
}
