//! Health check and metrics endpoints.

use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;
use std::sync::Arc;

use crate::metrics;
use crate::state::AppState;

/// Health check endpoint
///
/// GET /health
pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.queue.is_running() {
        (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "batcher": "running",
                "queue_depth": state.queue.queue_depth(),
                "version": env!("CARGO_PKG_VERSION")
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({
                "status": "unhealthy",
                "batcher": "stopped",
                "version": env!("CARGO_PKG_VERSION")
            })),
        )
    }
}

/// Metrics endpoint with batcher configuration and statistics
///
/// GET /metrics
pub async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.batch_config();
    let snapshot = state.queue.metrics().snapshot();

    Json(json!({
        "batcher": {
            "config": {
                "max_batch_size": config.max_batch_size,
                "batch_wait_timeout_ms": config.batch_wait_timeout.as_millis() as u64,
                "max_queue_size": config.max_queue_size,
                "submit_timeout_ms": config.submit_timeout.map(|d| d.as_millis() as u64)
            },
            "current": {
                "queue_depth": state.queue.queue_depth(),
                "running": state.queue.is_running()
            },
            "totals": snapshot
        },
        "model": {
            "transform": state.config.transform,
            "latency_ms": state.config.model_latency.as_millis() as u64
        }
    }))
}

/// Prometheus metrics endpoint
///
/// GET /metrics/prometheus
pub async fn metrics_prometheus(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    metrics::sync_batcher(&state.queue.metrics().snapshot(), state.queue.queue_depth());

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        metrics::encode_metrics(),
    )
}

/// Ready check (for Kubernetes)
///
/// GET /ready
pub async fn ready(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.queue.is_running() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Live check (for Kubernetes)
///
/// GET /live
pub async fn live() -> impl IntoResponse {
    StatusCode::OK
}
