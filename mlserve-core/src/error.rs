//! Error types for the MLServe batching engine
//!
//! # Error Hierarchy
//!
//! ```text
//! BatchError   - returned to each submitting caller
//! ├── Handler        - the batch handler failed for the whole batch
//! ├── ShapeMismatch  - the handler returned the wrong number of results
//! ├── QueueFull      - intake bound reached
//! ├── Timeout        - submit-side wait exceeded
//! └── lifecycle      - NotStarted, AlreadyStarted, Shutdown
//!
//! ConfigError  - invalid batch configuration
//! ```
//!
//! Every caller in a failed batch receives a clone of the same `BatchError`.
//! Handler failures keep the original `anyhow::Error` behind an `Arc`, so
//! callers can still downcast to the handler's own error type.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Errors surfaced to a caller of [`crate::BatchQueue::submit`]
#[derive(Error, Debug, Clone)]
pub enum BatchError {
    /// The batch handler failed for the batch this request was part of
    #[error("Batch handler failed: {0}")]
    Handler(Arc<anyhow::Error>),

    /// The handler returned a result count that does not match the batch size
    #[error("Batch handler returned {actual} results for a batch of {expected}")]
    ShapeMismatch { expected: usize, actual: usize },

    /// Intake buffer is at capacity
    #[error("Queue is full (max: {max})")]
    QueueFull { max: usize },

    /// The caller gave up waiting for its result
    #[error("Request timed out after {elapsed:?} waiting for its batch")]
    Timeout { elapsed: Duration },

    /// `submit` was called before the formation loop was started
    #[error("Batch queue has not been started")]
    NotStarted,

    /// `start` was called on a queue whose formation loop already runs
    #[error("Batch queue already started")]
    AlreadyStarted,

    /// The queue stopped accepting requests or dropped this one unresolved
    #[error("Batch queue shutdown")]
    Shutdown,
}

impl BatchError {
    /// Wrap a handler failure so it can be fanned out to every caller
    pub fn handler(err: impl Into<anyhow::Error>) -> Self {
        Self::Handler(Arc::new(err.into()))
    }

    /// Whether this error came out of handler execution (as opposed to admission)
    pub fn is_batch_failure(&self) -> bool {
        matches!(self, Self::Handler(_) | Self::ShapeMismatch { .. })
    }
}

/// Errors that can occur while building a [`crate::BatchConfig`]
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    /// A batch must hold at least one request
    #[error("max_batch_size must be at least 1")]
    ZeroBatchSize,

    /// A bounded intake must admit at least one request
    #[error("max_queue_size must be at least 1 when set")]
    ZeroQueueSize,

    /// An environment variable held a value that could not be parsed
    #[error("Invalid value for {var}: '{value}'")]
    InvalidEnv { var: String, value: String },
}

impl ConfigError {
    /// Create an invalid environment value error
    pub fn invalid_env(var: impl Into<String>, value: impl Into<String>) -> Self {
        Self::InvalidEnv { var: var.into(), value: value.into() }
    }
}
