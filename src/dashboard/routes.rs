//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::debug;

use crate::engine::status::{EngineStatus, InstrumentStatus};
use crate::notify::Notification;
use crate::strategy::risk::RiskSnapshot;
use crate::types::{EngineExit, StopReason};
use crate::venue::session::SessionState;
use rust_decimal::Decimal;

/// Notifications kept for `/api/events`.
pub const EVENT_CAPACITY: usize = 200;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub status: watch::Receiver<EngineStatus>,
    pub events: RwLock<VecDeque<EventEntry>>,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(status: watch::Receiver<EngineStatus>) -> Self {
        Self {
            status,
            events: RwLock::new(VecDeque::with_capacity(EVENT_CAPACITY)),
            started_at: Utc::now(),
        }
    }

    /// Append a notification, dropping the oldest beyond capacity.
    pub async fn push_event(&self, event: Notification) {
        let mut events = self.events.write().await;
        if events.len() == EVENT_CAPACITY {
            events.pop_front();
        }
        events.push_back(EventEntry {
            timestamp: Utc::now().to_rfc3339(),
            message: event.to_string(),
            event,
        });
    }
}

pub type AppState = Arc<DashboardState>;

/// Copy notifications into the event buffer until the sender side is gone.
pub async fn pump_events(state: AppState, mut rx: mpsc::UnboundedReceiver<Notification>) {
    while let Some(event) = rx.recv().await {
        state.push_event(event).await;
    }
    debug!("Notification channel closed, event pump stopping");
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct EventEntry {
    pub timestamp: String,
    pub message: String,
    pub event: Notification,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub session: SessionState,
    pub pnl: Decimal,
    pub stopped: Option<StopReason>,
    pub exit: Option<EngineExit>,
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: Option<f64>,
    pub session_consecutive_losses: u32,
    pub suspended: usize,
    pub updated_at: String,
    pub uptime_secs: i64,
}

impl StatusResponse {
    fn from_status(status: &EngineStatus, started_at: DateTime<Utc>) -> Self {
        let RiskSnapshot {
            pnl,
            session_consecutive_losses,
            suspended,
            stopped,
        } = &status.risk;
        Self {
            session: status.session.clone(),
            pnl: *pnl,
            stopped: *stopped,
            exit: status.exit,
            trades: status.trades,
            wins: status.wins,
            losses: status.losses,
            win_rate: status.win_rate,
            session_consecutive_losses: *session_consecutive_losses,
            suspended: suspended.len(),
            updated_at: status.updated_at.to_rfc3339(),
            uptime_secs: (Utc::now() - started_at).num_seconds(),
        }
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let status = state.status.borrow();
    Json(StatusResponse::from_status(&status, state.started_at))
}

/// GET /api/instruments
pub async fn get_instruments(State(state): State<AppState>) -> Json<Vec<InstrumentStatus>> {
    Json(state.status.borrow().instruments.clone())
}

/// GET /api/events
pub async fn get_events(State(state): State<AppState>) -> Json<Vec<EventEntry>> {
    let events = state.events.read().await;
    Json(events.iter().cloned().collect())
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
