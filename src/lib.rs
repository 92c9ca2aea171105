pub mod auth;
pub mod config;
pub mod connection;
pub mod handlers;
pub mod metrics;
pub mod notify;
pub mod ws_registry;

use axum::http::{header, HeaderValue, Method};
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::auth::TokenVerifier;
use crate::ws_registry::Hub;

#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub verifier: Arc<dyn TokenVerifier>,
    /// Outbound buffer size for each new WebSocket session.
    pub mailbox_capacity: usize,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::status::health))
        .route("/metrics", get(handlers::status::metrics))
        .route("/ws", get(handlers::ws::ws_handler))
        .with_state(state)
}

/// CORS for the browser frontend. Origins that are not valid header values are skipped.
pub fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_credentials(true)
        .allow_headers([
            header::ORIGIN,
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::AUTHORIZATION,
            header::COOKIE,
        ])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
}
