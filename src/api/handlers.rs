use axum::{
    body::Bytes,
    extract::State,
    http::{StatusCode, Uri},
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::agent::Agent;
use crate::trace::TraceMessage;

/// Application state shared across handlers
pub struct AppState {
    pub agent: Arc<Agent>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Tracing
// ============================================================================

/// Decode a trace message, logging instead of failing the request
fn decode_trace(state: &AppState, body: &[u8]) -> Option<TraceMessage> {
    if state.agent.config().verbose {
        tracing::debug!(body = %String::from_utf8_lossy(body), "trace body");
    }

    match serde_json::from_slice::<TraceMessage>(body) {
        Ok(trace) => {
            tracing::info!(
                span_id = %trace.span_id,
                parent_span_id = %trace.parent_span_id,
                operation = %trace.operation,
                "trace request"
            );
            Some(trace)
        }
        Err(e) => {
            tracing::warn!("failed to read trace message: {}", e);
            None
        }
    }
}

pub async fn trace(State(state): State<Arc<AppState>>, body: Bytes) -> StatusCode {
    tracing::info!("got trace request");

    if let Some(trace) = decode_trace(&state, &body) {
        state.agent.trace(&trace);
    }

    StatusCode::OK
}

pub async fn close(State(state): State<Arc<AppState>>, body: Bytes) -> StatusCode {
    tracing::info!("got trace finish request");

    if let Some(trace) = decode_trace(&state, &body) {
        state.agent.close(&trace);
    }

    StatusCode::OK
}

// ============================================================================
// Ingest
// ============================================================================

pub async fn meter(State(state): State<Arc<AppState>>, body: Bytes) -> StatusCode {
    let outcome = state.agent.meter(&body).await;
    tracing::debug!(?outcome, "meter request handled");
    StatusCode::OK
}

pub async fn log(State(state): State<Arc<AppState>>, body: Bytes) -> StatusCode {
    let outcome = state.agent.log(&body).await;
    tracing::debug!(?outcome, "log request handled");
    StatusCode::OK
}

pub async fn not_found(uri: Uri) -> StatusCode {
    tracing::info!(%uri, "request not found");
    StatusCode::NOT_FOUND
}
