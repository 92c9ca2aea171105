use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use verses_backend::auth::JwtVerifier;
use verses_backend::config::Config;
use verses_backend::ws_registry::Hub;
use verses_backend::{build_router, cors_layer, AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("verses_backend=info,tower_http=info")),
        )
        .init();

    let (hub, dispatcher) = Hub::new(config.intake_capacity)?;
    tokio::spawn(dispatcher.run());

    let state = AppState {
        hub,
        verifier: Arc::new(JwtVerifier::new(config.jwt_secret.as_bytes())),
        mailbox_capacity: config.mailbox_capacity,
    };

    let app = build_router(state)
        .layer(cors_layer(&config.cors_origins))
        .layer(TraceLayer::new_for_http());

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}
