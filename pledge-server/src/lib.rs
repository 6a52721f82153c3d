//! PLEDGE Server - HTTP API for classroom runs
//!
//! This crate provides the web backend:
//! - REST API for runs, queues, moves and group views
//! - Polled event inboxes standing in for a push transport
//! - In-memory store and per-run dashboard metrics
//! - Presence tracking with a background sweeper
//! - Static file serving for the student and instructor pages

mod dashboard;
mod error;
mod inbox;
mod presence;
mod routes;
mod runs;
mod state;
mod store;

use axum::{
    routing::{get, post},
    Router,
};
use pledge_engine::Timing;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

pub use dashboard::{Dashboard, GroupTotal, RunMetrics};
pub use error::ApiError;
pub use inbox::Inbox;
pub use presence::{spawn_sweeper, sweep, Presence, SweepReport};
pub use runs::{Run, Runs};
pub use state::ServerState;
pub use store::MemoryStore;

/// Server configuration
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub static_dir: String,
    pub timing: Timing,
    /// How often presence and queue staleness are swept
    pub sweep_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8002,
            static_dir: "web".to_string(),
            timing: Timing::default(),
            sweep_interval: Duration::from_secs(5),
        }
    }
}

/// Create the router with all routes
pub fn create_router(config: &ServerConfig, state: Arc<ServerState>) -> Router {
    let static_service = ServeDir::new(&config.static_dir);

    Router::new()
        // Status endpoint
        .route("/api/status", get(routes::status::status_handler))
        // Variant catalogue
        .route("/api/variants", get(routes::variants::list_variants))
        // Runs
        .route("/api/run", post(routes::runs::create_run))
        // Queues
        .route("/api/queue/join", post(routes::queue::join_queue))
        .route("/api/queue/leave", post(routes::queue::leave_queue))
        // Play
        .route("/api/move", post(routes::game::submit_move))
        .route("/api/group/{id}", get(routes::game::get_group))
        .route("/api/inbox/{participant}", get(routes::inbox::poll_inbox))
        // Instructor
        .route("/api/dashboard/{run}", get(routes::dashboard::get_dashboard))
        // Shared state
        .with_state(state)
        .layer(CorsLayer::permissive())
        // Static file serving (must be last)
        .fallback_service(static_service)
}

/// Start the HTTP server
pub async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    let state = Arc::new(ServerState::new(config.timing.clone()));
    serve(config, state).await
}

/// Start the HTTP server over prepared state
pub async fn serve(config: ServerConfig, state: Arc<ServerState>) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let router = create_router(&config, state.clone());
    let sweeper = spawn_sweeper(state, config.sweep_interval);

    tracing::info!("PLEDGE Server starting on http://0.0.0.0:{}", config.port);
    tracing::info!("Static files served from: {}", config.static_dir);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let served = axum::serve(listener, router).await;
    sweeper.abort();
    served?;

    Ok(())
}
