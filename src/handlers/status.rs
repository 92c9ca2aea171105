use axum::{extract::State, http::header, http::StatusCode, response::IntoResponse};

use crate::AppState;

/// GET /health
pub async fn health() -> &'static str {
    "ok"
}

/// GET /metrics: Prometheus text exposition of the hub counters.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match state.hub.metrics().encode_text() {
        Ok(body) => Ok((
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )),
        Err(e) => {
            tracing::error!("encode metrics: {:?}", e);
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics"))
        }
    }
}
