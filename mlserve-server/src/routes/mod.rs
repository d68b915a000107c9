//! HTTP route handlers for the MLServe server.
//!
//! This module organizes all route handlers:
//! - `health`: Health check and metrics endpoints
//! - `inference`: The batched inference endpoint

pub mod health;
pub mod inference;

// Re-export handlers for convenience
pub use health::{health, live, metrics, metrics_prometheus, ready};
pub use inference::endpoint;
