//! MLServe Server Library
//!
//! HTTP front end for the MLServe batching engine.
//!
//! Every `POST /endpoint` request is submitted individually to a
//! [`mlserve_core::BatchQueue`]; the queue groups concurrent requests into
//! batches for the model and hands each request its own result.

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{info, warn};

use mlserve_core::BatchConfig;

pub mod error;
pub mod metrics;
pub mod model;
pub mod routes;
pub mod state;

pub use state::{AppState, ServerConfig};

/// Initialize Prometheus metrics registry.
/// Should be called once before starting the server.
pub fn init_metrics() {
    if let Err(e) = metrics::register_metrics() {
        warn!("Failed to register Prometheus metrics: {}", e);
    }
}

/// Build the HTTP router over shared application state
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health endpoints
        .route("/health", get(routes::health))
        .route("/ready", get(routes::ready))
        .route("/live", get(routes::live))
        .route("/metrics", get(routes::metrics))
        .route("/metrics/prometheus", get(routes::metrics_prometheus))
        // Inference
        .route("/endpoint", post(routes::endpoint))
        // Middleware
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the MLServe server.
///
/// Starts the batch queue and the HTTP server, and blocks until Ctrl-C.
/// On shutdown the HTTP listener stops first, then every request still
/// queued is flushed through the model.
///
/// # Example
/// ```no_run
/// use mlserve_core::BatchConfig;
/// use mlserve_server::{run_server, ServerConfig};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ServerConfig { port: 9000, ..Default::default() };
///     run_server(config, BatchConfig::default()).await
/// }
/// ```
pub async fn run_server(config: ServerConfig, batch_config: BatchConfig) -> anyhow::Result<()> {
    init_metrics();

    info!(
        addr = %config.bind_addr(),
        transform = %config.transform,
        "Starting MLServe v{}",
        env!("CARGO_PKG_VERSION")
    );

    let state = Arc::new(AppState::new(config.clone(), batch_config)?);
    state.queue.start(&tokio::runtime::Handle::current())?;

    let app = build_router(state.clone());

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    info!("MLServe listening on http://{}", addr);
    info!("Inference: http://{}/endpoint", addr);
    info!("Health:    http://{}/health", addr);

    if config.print_banner {
        print_banner(&config, &state);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("HTTP server stopped, draining batch queue");
    state.queue.shutdown().await;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Print the startup banner
fn print_banner(config: &ServerConfig, state: &Arc<AppState>) {
    let batch = state.batch_config();

    println!();
    println!("==================================================");
    println!("  MLServe v{}", env!("CARGO_PKG_VERSION"));
    println!("==================================================");
    println!("  Listening on: http://{}", config.bind_addr());
    println!();
    println!("  Batcher configuration:");
    println!("    Max batch size: {}", batch.max_batch_size);
    println!("    Batch wait timeout: {}ms", batch.batch_wait_timeout.as_millis());
    match batch.max_queue_size {
        Some(max) => println!("    Max queue: {}", max),
        None => println!("    Max queue: unbounded"),
    }
    match batch.submit_timeout {
        Some(timeout) => println!("    Submit timeout: {}ms", timeout.as_millis()),
        None => println!("    Submit timeout: none"),
    }
    println!();
    println!("  Model:");
    println!("    Transform: {}", config.transform);
    println!("    Simulated latency: {}ms", config.model_latency.as_millis());
    println!();
    println!("  Endpoints:");
    println!("    Inference: POST /endpoint");
    println!("    Health: GET  /health, /ready, /live, /metrics");
    println!("    Prometheus: GET /metrics/prometheus");
    println!("==================================================");
    println!();
}
