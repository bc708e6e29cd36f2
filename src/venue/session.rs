//! Connection state machine.
//!
//! `Disconnected → Connecting → Authenticating → Ready → Disconnected`.
//! The session owns the live connection handle, hands out request ids, and
//! remembers what every outstanding request was for. Timers (reconnect,
//! heartbeat) live in the engine's scheduler; the session only computes the
//! delays.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::protocol::{Account, Request};
use super::{ConnId, Connection, Connector};
use crate::config::SessionConfig;
use crate::error::EngineError;
use crate::types::InstrumentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
}

/// Public view of the session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionState {
    pub phase: Phase,
    pub connected: bool,
    pub authenticated: bool,
    pub reconnect_attempts: u32,
    pub last_heartbeat_ack: Option<DateTime<Utc>>,
    pub balance: Option<Decimal>,
    pub currency: Option<String>,
    pub login_id: Option<String>,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            phase: Phase::Disconnected,
            connected: false,
            authenticated: false,
            reconnect_attempts: 0,
            last_heartbeat_ack: None,
            balance: None,
            currency: None,
            login_id: None,
        }
    }
}

/// What an outstanding request was for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pending {
    Authorize,
    History(InstrumentId),
    Ticks(InstrumentId),
    Proposal(InstrumentId),
    Buy(InstrumentId),
    Contract(InstrumentId),
    Forget,
    Ping,
}

/// What to do after the connection went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseAction {
    /// Event from a superseded connection.
    Ignored,
    /// Shutting down; do not reconnect.
    Stay,
    Reconnect { attempt: u32, delay: Duration },
    /// Reconnect budget exhausted.
    Exhausted,
}

pub struct SessionManager {
    config: SessionConfig,
    token: SecretString,
    connector: Box<dyn Connector>,
    connection: Option<Box<dyn Connection>>,
    state: SessionState,
    generation: ConnId,
    next_req_id: u64,
    pending: HashMap<u64, Pending>,
    tick_subscriptions: HashMap<InstrumentId, String>,
    shutting_down: bool,
}

impl SessionManager {
    pub fn new(config: SessionConfig, token: SecretString, connector: Box<dyn Connector>) -> Self {
        Self {
            config,
            token,
            connector,
            connection: None,
            state: SessionState::default(),
            generation: 0,
            next_req_id: 1,
            pending: HashMap::new(),
            tick_subscriptions: HashMap::new(),
            shutting_down: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn phase(&self) -> Phase {
        self.state.phase
    }

    pub fn is_ready(&self) -> bool {
        self.state.phase == Phase::Ready
    }

    pub fn generation(&self) -> ConnId {
        self.generation
    }

    pub fn is_current(&self, conn: ConnId) -> bool {
        conn == self.generation && self.connection.is_some()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Reconnect delay for attempt `n` (1-based):
    /// `min(initial × multiplier^(n−1), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(63) as i32;
        let ms = self.config.initial_backoff_ms as f64 * self.config.backoff_multiplier.powi(exp);
        let capped = ms.min(self.config.max_backoff_ms as f64);
        Duration::from_millis(capped as u64)
    }

    /// Start a new connection attempt. Any previous connection is dropped.
    pub fn connect(&mut self) -> Result<ConnId, EngineError> {
        if let Some(mut old) = self.connection.take() {
            old.close();
        }
        self.generation += 1;
        self.reset_connection_state();
        self.state.phase = Phase::Connecting;
        info!(
            conn = self.generation,
            attempt = self.state.reconnect_attempts,
            "Connecting to venue"
        );
        let connection = self.connector.connect(self.generation)?;
        self.connection = Some(connection);
        Ok(self.generation)
    }

    /// Transport is up: authenticate. Returns false for stale events.
    pub fn on_opened(&mut self, conn: ConnId) -> Result<bool, EngineError> {
        if !self.is_current(conn) {
            debug!(conn, current = self.generation, "Ignoring open from stale connection");
            return Ok(false);
        }
        self.state.phase = Phase::Authenticating;
        self.state.connected = true;
        let token = SecretString::new(self.token.expose_secret().clone());
        self.send(Pending::Authorize, Request::Authorize(token))?;
        Ok(true)
    }

    /// Authorization accepted.
    pub fn on_authorized(&mut self, account: &Account) {
        self.state.phase = Phase::Ready;
        self.state.authenticated = true;
        self.state.reconnect_attempts = 0;
        self.state.balance = Some(account.balance);
        self.state.currency = Some(account.currency.clone());
        self.state.login_id = Some(account.login_id.clone());
        info!(
            login_id = %account.login_id,
            balance = %account.balance,
            currency = %account.currency,
            "Session ready"
        );
    }

    pub fn set_balance(&mut self, balance: Decimal) {
        self.state.balance = Some(balance);
    }

    /// Any inbound message counts as a heartbeat ack.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.state.last_heartbeat_ack = Some(now);
    }

    /// Connection went away (socket closed, heartbeat timeout, ...).
    pub fn on_closed(&mut self, conn: ConnId, reason: &str) -> CloseAction {
        if conn != self.generation {
            debug!(conn, current = self.generation, "Ignoring close from stale connection");
            return CloseAction::Ignored;
        }
        let Some(mut connection) = self.connection.take() else {
            // Already handled (we dropped it ourselves, or shut down).
            return if self.shutting_down {
                CloseAction::Stay
            } else {
                CloseAction::Ignored
            };
        };
        connection.close();
        if self.shutting_down {
            self.reset_connection_state();
            info!(reason, "Connection closed during shutdown");
            return CloseAction::Stay;
        }
        self.after_close(reason)
    }

    /// The connector could not even start an attempt.
    pub fn connect_failed(&mut self, reason: &str) -> CloseAction {
        self.connection = None;
        self.after_close(reason)
    }

    fn after_close(&mut self, reason: &str) -> CloseAction {
        let was_ready = self.state.phase == Phase::Ready;
        self.reset_connection_state();

        self.state.reconnect_attempts += 1;
        let attempt = self.state.reconnect_attempts;
        if attempt > self.config.max_reconnect_attempts {
            warn!(attempts = attempt - 1, reason, "Reconnect attempts exhausted");
            return CloseAction::Exhausted;
        }
        let delay = self.backoff_delay(attempt);
        warn!(
            reason,
            was_ready,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Connection lost, reconnect scheduled"
        );
        CloseAction::Reconnect { attempt, delay }
    }

    /// Drop the current connection ourselves (heartbeat timeout).
    pub fn drop_connection(&mut self, reason: &str) -> CloseAction {
        let conn = self.generation;
        self.on_closed(conn, reason)
    }

    /// Intentional shutdown: close and never reconnect.
    pub fn shutdown(&mut self) {
        self.shutting_down = true;
        if let Some(mut connection) = self.connection.take() {
            connection.close();
        }
        self.reset_connection_state();
    }

    fn reset_connection_state(&mut self) {
        self.state.phase = Phase::Disconnected;
        self.state.connected = false;
        self.state.authenticated = false;
        self.pending.clear();
        self.tick_subscriptions.clear();
    }

    /// Write a request on the live connection and remember its purpose.
    pub fn send(&mut self, purpose: Pending, request: Request) -> Result<u64, EngineError> {
        let connection = self.connection.as_mut().ok_or(EngineError::NotConnected)?;
        let req_id = self.next_req_id;
        self.next_req_id += 1;
        connection.send(req_id, &request)?;
        debug!(req_id, request = request.name(), "Request sent");
        self.pending.insert(req_id, purpose);
        Ok(req_id)
    }

    /// Resolve a response to the request it answers.
    pub fn take_pending(&mut self, req_id: u64) -> Option<Pending> {
        self.pending.remove(&req_id)
    }

    /// Look without consuming (stream messages keep their request alive).
    pub fn pending(&self, req_id: u64) -> Option<&Pending> {
        self.pending.get(&req_id)
    }

    pub fn record_tick_subscription(&mut self, instrument: InstrumentId, subscription_id: String) {
        self.tick_subscriptions.insert(instrument, subscription_id);
    }

    pub fn tick_subscription(&self, instrument: &InstrumentId) -> Option<&str> {
        self.tick_subscriptions.get(instrument).map(String::as_str)
    }

    /// Whether a request sent for `purpose` is still unanswered.
    pub fn awaiting(&self, purpose: &Pending) -> bool {
        self.pending.values().any(|p| p == purpose)
    }

    /// Backfill and live ticks for one instrument.
    pub fn subscribe_instrument(&mut self, instrument: &InstrumentId) -> Result<(), EngineError> {
        self.request_history(instrument)?;
        self.subscribe_ticks(instrument)?;
        Ok(())
    }

    pub fn request_history(&mut self, instrument: &InstrumentId) -> Result<u64, EngineError> {
        self.send(
            Pending::History(instrument.clone()),
            Request::TicksHistory {
                instrument: instrument.clone(),
                count: self.config.history_count,
            },
        )
    }

    pub fn subscribe_ticks(&mut self, instrument: &InstrumentId) -> Result<u64, EngineError> {
        self.send(
            Pending::Ticks(instrument.clone()),
            Request::SubscribeTicks(instrument.clone()),
        )
    }

    pub fn ping(&mut self) -> Result<u64, EngineError> {
        self.send(Pending::Ping, Request::Ping)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
