//! Application state for the MLServe server.

use std::sync::Arc;
use std::time::Duration;

use mlserve_core::{BatchConfig, BatchQueue, ConfigError};

use crate::model::{TextModel, TransformKind};

/// Batch queue serving text inference requests
pub type InferenceQueue = BatchQueue<String, String>;

/// Application state shared across all handlers
pub struct AppState {
    /// Batch queue in front of the model
    pub queue: Arc<InferenceQueue>,

    /// Configuration
    pub config: ServerConfig,
}

impl AppState {
    /// Build the model and its batch queue; the queue still has to be started
    pub fn new(config: ServerConfig, batch_config: BatchConfig) -> Result<Self, ConfigError> {
        let model = TextModel::new(config.transform, config.model_latency);
        let queue = BatchQueue::new(batch_config, model)?;

        Ok(Self { queue: Arc::new(queue), config })
    }

    pub fn batch_config(&self) -> &BatchConfig {
        self.queue.config()
    }
}

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to bind
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Transform the stand-in model applies
    pub transform: TransformKind,

    /// Simulated per-batch model latency
    pub model_latency: Duration,

    /// Whether to print the banner on startup
    pub print_banner: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            transform: TransformKind::default(),
            model_latency: Duration::ZERO,
            print_banner: true,
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            host: std::env::var("MLSERVE_HOST").unwrap_or(defaults.host),
            port: std::env::var("MLSERVE_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.port),
            transform: std::env::var("MLSERVE_TRANSFORM")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.transform),
            model_latency: std::env::var("MLSERVE_MODEL_LATENCY_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.model_latency),
            print_banner: std::env::var("MLSERVE_QUIET")
                .map(|v| !(v == "1" || v.to_lowercase() == "true"))
                .unwrap_or(defaults.print_banner),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.bind_addr(), "0.0.0.0:8080");
        assert_eq!(config.transform, TransformKind::Uppercase);
    }

    #[test]
    fn test_state_rejects_invalid_batch_config() {
        let result = AppState::new(ServerConfig::default(), BatchConfig::new(0, Duration::ZERO));
        assert!(matches!(result, Err(ConfigError::ZeroBatchSize)));
    }

    #[test]
    fn test_state_exposes_batch_config() {
        let batch_config = BatchConfig::new(4, Duration::from_millis(20));
        let state = AppState::new(ServerConfig::default(), batch_config.clone()).unwrap();

        assert_eq!(state.batch_config(), &batch_config);
        assert!(!state.queue.is_running());
    }
}
