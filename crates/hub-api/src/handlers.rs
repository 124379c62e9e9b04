use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use hub_store::StateStore;
use prometheus::{Encoder, TextEncoder};

use crate::error::ApiError;
use crate::state::AppState;

// The orchestrator takes no commands over HTTP; work arrives through the
// queue. These three endpoints are its entire surface.

pub async fn health() -> StatusCode {
    StatusCode::OK
}

/// Readiness = the store answers.
pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.store.list_instances().await?;
    Ok(StatusCode::OK)
}

pub async fn metrics() -> Result<impl IntoResponse, ApiError> {
    let encoder = TextEncoder::new();
    let families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&families, &mut buffer)
        .map_err(|e| ApiError::internal(e.to_string()))?;
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, encoder.format_type().to_string())],
        buffer,
    ))
}
