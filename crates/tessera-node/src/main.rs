//! # Tessera Node
//!
//! Reference host: policy check and plan execution over HTTP.

use std::net::SocketAddr;

use axum::{
    routing::{delete, get, post},
    Router,
};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod state;

use config::TesseraConfig;
use state::AppState;

/// Run the Tessera node server.
pub async fn run_server(config: TesseraConfig) -> anyhow::Result<()> {
    let addr: SocketAddr = config.server.bind.parse()?;
    let state = AppState::from_config(&config)?;
    let app = create_router(state);

    info!("Tessera node listening on http://{}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the API router.
fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(api::health::health_check))
        .route("/api/v1/plans/check", post(api::plans::check_plan))
        .route("/api/v1/plans/execute", post(api::plans::execute_plan))
        .route(
            "/api/v1/plans/:id/state",
            get(api::plans::get_state).delete(api::plans::clear_state),
        )
        .route("/api/v1/targets/:target", delete(api::plans::release_target))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        )
        .with_state(state)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Tessera node starting...");

    let config = TesseraConfig::from_env()?;
    run_server(config).await
}
