//! MLServe - batching inference server.
//!
//! Accepts individual inference requests over HTTP and feeds them to the
//! model in batches.
//!
//! ## Quick Start
//!
//! ```bash
//! # Start with defaults (port 8080, batches of up to 16, 1s wait)
//! mlserve-server
//!
//! # Custom configuration
//! MLSERVE_PORT=9000 MLSERVE_MAX_BATCH_SIZE=32 MLSERVE_BATCH_WAIT_MS=20 mlserve-server
//! ```
//!
//! ## Usage
//!
//! ```bash
//! curl -X POST http://localhost:8080/endpoint \
//!     -H 'content-type: application/json' \
//!     -d '{"input": "hello"}'
//! ```

use anyhow::Context;
use mlserve_core::BatchConfig;
use mlserve_server::{run_server, ServerConfig};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("mlserve_server=info,mlserve_core=info,tower_http=info")
    });

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false))
        .with(filter)
        .init();

    // Load configuration
    let config = ServerConfig::from_env();
    let batch_config = BatchConfig::from_env().context("Invalid batch configuration")?;

    run_server(config, batch_config).await
}
