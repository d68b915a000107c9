//! Batched inference endpoint.
//!
//! Each HTTP request becomes one submission to the batch queue; the caller
//! never sees the batch it was grouped into.

use axum::{extract::State, Json};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

use crate::error::ServerError;
use crate::metrics::RequestTimer;
use crate::state::AppState;

/// Request body for POST /endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub input: String,
}

/// Response body for POST /endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResponse {
    pub output: String,
}

/// Run one input through the batched model
///
/// POST /endpoint
pub async fn endpoint(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InferenceRequest>,
) -> Result<Json<InferenceResponse>, ServerError> {
    if request.input.trim().is_empty() {
        return Err(ServerError::InvalidRequest("input must not be empty".to_string()));
    }

    debug!(input_len = request.input.len(), "Handling POST /endpoint");
    let timer = RequestTimer::new();

    match state.queue.submit(request.input).await {
        Ok(output) => {
            timer.record_success();
            Ok(Json(InferenceResponse { output }))
        }
        Err(e) => {
            let err = ServerError::from(e);
            timer.record_failure(err.kind());
            Err(err)
        }
    }
}
