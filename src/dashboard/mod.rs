//! Read-only Axum JSON API over the oracle's outputs.
//!
//! CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, Method},
    routing::get,
    Router,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info, warn};

use crate::engine::RoundEvent;
pub use routes::{AppState, DashboardState};

/// Bind the dashboard port and serve in a background task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Dashboard server starting on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    }))
}

/// Copy broadcast events into the dashboard's bounded buffer.
pub fn spawn_event_recorder(
    state: AppState,
    mut rx: broadcast::Receiver<RoundEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => state.record_event(event).await,
                Err(RecvError::Lagged(missed)) => {
                    warn!(missed, "Dashboard fell behind the event stream");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/price", get(routes::get_price))
        .route("/api/round", get(routes::get_round))
        .route("/api/leaderboard", get(routes::get_leaderboard))
        .route("/api/agents/:id/predictions", get(routes::get_agent_predictions))
        .route("/api/events", get(routes::get_events))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
