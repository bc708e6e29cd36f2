//! Dashboard: read-only Axum server for monitoring a running session.
//!
//! Serves JSON only. CORS enabled for local development.

pub mod routes;

use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

use crate::notify::Notification;
use routes::AppState;

/// Start the dashboard web server and the notification pump.
///
/// Spawns background tasks and returns immediately. Bind or serve failures
/// are logged; they never stop the engine.
pub fn spawn_dashboard(state: AppState, port: u16, events: mpsc::UnboundedReceiver<Notification>) {
    tokio::spawn(routes::pump_events(state.clone(), events));

    let app = build_router(state);
    tokio::spawn(async move {
        let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
        info!(port, "Dashboard server starting on http://localhost:{port}");

        let listener = match tokio::net::TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(port, error = %e, "Failed to bind dashboard port");
                return;
            }
        };

        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    });
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/instruments", get(routes::get_instruments))
        .route("/api/events", get(routes::get_events))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
