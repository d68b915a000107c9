// MLServe Core Library
//
// Batching admission engine: groups individually submitted requests into
// bounded batches for a batch-friendly handler and routes results back.

pub mod batcher;
pub mod error;

pub use batcher::{handler_fn, BatchConfig, BatchHandler, BatchQueue, BatcherMetrics, MetricsSnapshot};
pub use error::{BatchError, ConfigError};
