//! Request batching engine.
//!
//! Callers submit single requests; the queue groups them into bounded
//! batches and calls one handler per batch, then hands every caller its own
//! result.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │     submit(payload)  submit(payload)  ...    │
//! └──────────────────────┬───────────────────────┘
//!                        │ envelope = payload + completion cell
//!               ┌────────▼────────┐
//!               │  Intake channel │ ← unbounded, optional depth cap
//!               └────────┬────────┘
//!                        │
//!               ┌────────▼────────┐
//!               │ Formation loop  │ ← closes a batch when it is full
//!               │  (one per queue)│   or batch_wait_timeout elapsed
//!               └────────┬────────┘   since its first request
//!                        │ Vec<In>, submission order
//!               ┌────────▼────────┐
//!               │  BatchHandler   │ ← one call at a time
//!               └────────┬────────┘
//!                        │ Vec<Out>, same order (or one error)
//!               ┌────────▼────────┐
//!               │ Completion cells│ ← result i resolves caller i
//!               └─────────────────┘
//! ```
//!
//! # Guarantees
//!
//! - **Bounded latency**: a request is dispatched at most
//!   `batch_wait_timeout` after the first request of its batch arrived
//! - **Order**: batches preserve submission order, outputs map back by position
//! - **Failure fan-out**: a failed handler call fails every request of that
//!   batch and no other; the loop keeps running
//! - **Cancellation**: a caller that stops waiting before its request is
//!   batched is dropped from the queue

mod cell;
mod config;
mod handler;
mod metrics;
mod queue;

pub use cell::{completion_cell, Completer, Pending, Resolution};
pub use config::BatchConfig;
pub use handler::{handler_fn, BatchHandler, HandlerFn};
pub use metrics::{BatcherMetrics, DispatchTrigger, MetricsSnapshot, RequestTimer};
pub use queue::BatchQueue;
