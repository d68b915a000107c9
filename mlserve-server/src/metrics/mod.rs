//! Metrics module for the MLServe server
//!
//! Provides Prometheus metrics for monitoring and observability.

pub mod prometheus;

// Re-export commonly used items
pub use prometheus::{
    encode_metrics, record_batch_size, record_handler_duration, register_metrics, sync_batcher,
    RequestTimer,
};
