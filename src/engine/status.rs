//! Read-only status published by the engine on every loop turn.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::lifecycle::LifecycleState;
use crate::strategy::risk::RiskSnapshot;
use crate::types::{Digit, EngineExit, InstrumentId};
use crate::venue::session::SessionState;

#[derive(Debug, Clone, Serialize)]
pub struct InstrumentStatus {
    pub instrument: InstrumentId,
    pub stake: Decimal,
    pub tier: u8,
    pub losses_at_tier: u32,
    pub consecutive_losses: u32,
    pub suspended: bool,
    pub trade_in_progress: bool,
    pub lifecycle: LifecycleState,
    pub observed: u64,
    pub last_digit: Option<Digit>,
    pub last_epoch: Option<i64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub session: SessionState,
    pub risk: RiskSnapshot,
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: Option<f64>,
    pub exit: Option<EngineExit>,
    pub instruments: Vec<InstrumentStatus>,
    pub updated_at: DateTime<Utc>,
}

impl Default for EngineStatus {
    fn default() -> Self {
        Self {
            session: SessionState::default(),
            risk: RiskSnapshot {
                pnl: Decimal::ZERO,
                session_consecutive_losses: 0,
                suspended: Vec::new(),
                stopped: None,
            },
            trades: 0,
            wins: 0,
            losses: 0,
            win_rate: None,
            exit: None,
            instruments: Vec::new(),
            updated_at: Utc::now(),
        }
    }
}

impl EngineStatus {
    pub fn instrument(&self, id: &InstrumentId) -> Option<&InstrumentStatus> {
        self.instruments.iter().find(|s| &s.instrument == id)
    }

    pub fn is_finished(&self) -> bool {
        self.exit.is_some()
    }
}
