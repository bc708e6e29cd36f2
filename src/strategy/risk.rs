//! Risk governor.
//!
//! Tracks aggregate P/L and loss streaks, suspends instruments that keep
//! losing, and decides when the whole session must stop. A stop is terminal.

use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::RiskConfig;
use crate::types::{InstrumentId, Outcome, StopReason};

/// A suspended instrument. `until: None` means suspended until released.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suspension {
    pub instrument: InstrumentId,
    pub until: Option<Instant>,
}

/// Everything one settled outcome changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RiskDecision {
    pub stop: Option<StopReason>,
    pub suspended: Option<Suspension>,
    pub reactivated: Vec<InstrumentId>,
}

/// Serializable view for the status API.
#[derive(Debug, Clone, Serialize)]
pub struct RiskSnapshot {
    pub pnl: Decimal,
    pub session_consecutive_losses: u32,
    pub suspended: Vec<InstrumentId>,
    pub stopped: Option<StopReason>,
}

pub struct RiskGovernor {
    config: RiskConfig,
    pnl: Decimal,
    consecutive: HashMap<InstrumentId, u32>,
    session_consecutive_losses: u32,
    /// Oldest first.
    suspended: VecDeque<Suspension>,
    stopped: Option<StopReason>,
}

impl RiskGovernor {
    pub fn new(config: RiskConfig) -> Self {
        Self {
            config,
            pnl: Decimal::ZERO,
            consecutive: HashMap::new(),
            session_consecutive_losses: 0,
            suspended: VecDeque::new(),
            stopped: None,
        }
    }

    pub fn pnl(&self) -> Decimal {
        self.pnl
    }

    pub fn stopped(&self) -> Option<StopReason> {
        self.stopped
    }

    pub fn consecutive_losses(&self, instrument: &InstrumentId) -> u32 {
        self.consecutive.get(instrument).copied().unwrap_or(0)
    }

    pub fn is_suspended(&self, instrument: &InstrumentId) -> bool {
        self.position(instrument).is_some()
    }

    pub fn suspension(&self, instrument: &InstrumentId) -> Option<&Suspension> {
        self.suspended.iter().find(|s| &s.instrument == instrument)
    }

    pub fn suspended(&self) -> impl Iterator<Item = &InstrumentId> {
        self.suspended.iter().map(|s| &s.instrument)
    }

    fn position(&self, instrument: &InstrumentId) -> Option<usize> {
        self.suspended.iter().position(|s| &s.instrument == instrument)
    }

    pub fn snapshot(&self) -> RiskSnapshot {
        RiskSnapshot {
            pnl: self.pnl,
            session_consecutive_losses: self.session_consecutive_losses,
            suspended: self.suspended().cloned().collect(),
            stopped: self.stopped,
        }
    }

    /// Whether `instrument` may take a new trade. Expired cooldowns are
    /// released here.
    pub fn is_tradable(&mut self, instrument: &InstrumentId, now: Instant) -> bool {
        if self.stopped.is_some() {
            return false;
        }
        match self.position(instrument) {
            None => true,
            Some(i) => match self.suspended[i].until {
                Some(until) if now >= until => {
                    self.suspended.remove(i);
                    info!(%instrument, "Cooldown expired, instrument reactivated");
                    true
                }
                _ => false,
            },
        }
    }

    /// Timer path for cooldown expiry. True if the instrument was released.
    pub fn on_cooldown_expired(&mut self, instrument: &InstrumentId, now: Instant) -> bool {
        self.is_suspended(instrument) && self.is_tradable(instrument, now)
    }

    /// Release a suspended instrument immediately.
    pub fn reactivate(&mut self, instrument: &InstrumentId) -> bool {
        match self.position(instrument) {
            Some(i) => {
                self.suspended.remove(i);
                true
            }
            None => false,
        }
    }

    /// Halt the session. The first reason sticks.
    pub fn stop(&mut self, reason: StopReason) -> StopReason {
        *self.stopped.get_or_insert(reason)
    }

    /// Fold one settled trade into the governor.
    ///
    /// `stake_exhausted` is the instrument's stop-loss-stake flag after the
    /// stake controller processed the same outcome.
    ///
    /// Only a win on the instrument itself clears its loss streak. Leaving
    /// the suspension list does not touch the streak, so a released
    /// instrument that loses once more is suspended again straight away.
    pub fn on_outcome(
        &mut self,
        instrument: &InstrumentId,
        outcome: Outcome,
        profit: Decimal,
        stake_exhausted: bool,
        now: Instant,
    ) -> RiskDecision {
        let mut decision = RiskDecision::default();
        self.pnl += profit;

        let streak = self.consecutive.entry(instrument.clone()).or_insert(0);
        match outcome {
            Outcome::Won => {
                *streak = 0;
                self.session_consecutive_losses = 0;
            }
            Outcome::Lost => {
                *streak += 1;
                self.session_consecutive_losses += 1;
            }
        }
        let streak = *streak;

        if self.stopped.is_none() {
            match outcome {
                Outcome::Lost if streak >= self.config.max_consecutive_losses => {
                    self.suspend(instrument, now, &mut decision);
                }
                Outcome::Won if self.config.release_on_win => {
                    if let Some(i) = self.suspended.iter().position(|s| &s.instrument != instrument) {
                        if let Some(released) = self.suspended.remove(i) {
                            info!(
                                instrument = %released.instrument,
                                winner = %instrument,
                                "Released by win elsewhere"
                            );
                            decision.reactivated.push(released.instrument);
                        }
                    }
                }
                _ => {}
            }
        }

        decision.stop = self.check_stop(stake_exhausted);
        decision
    }

    fn suspend(&mut self, instrument: &InstrumentId, now: Instant, decision: &mut RiskDecision) {
        if self.is_suspended(instrument) {
            return;
        }
        let until = self.config.cooldown_secs.map(|s| now + Duration::from_secs(s));
        let suspension = Suspension {
            instrument: instrument.clone(),
            until,
        };
        self.suspended.push_back(suspension.clone());
        warn!(
            %instrument,
            losses = self.consecutive_losses(instrument),
            cooldown_secs = ?self.config.cooldown_secs,
            "Instrument suspended"
        );
        while self.suspended.len() > self.config.suspension_capacity {
            if let Some(oldest) = self.suspended.pop_front() {
                info!(instrument = %oldest.instrument, "Suspension list full, oldest reactivated");
                decision.reactivated.push(oldest.instrument);
            }
        }
        decision.suspended = Some(suspension);
    }

    fn check_stop(&mut self, stake_exhausted: bool) -> Option<StopReason> {
        if let Some(reason) = self.stopped {
            return Some(reason);
        }
        let reason = if self.pnl <= -self.config.stop_loss {
            Some(StopReason::StopLoss)
        } else if self.pnl >= self.config.take_profit {
            Some(StopReason::TakeProfit)
        } else if self
            .config
            .max_session_consecutive_losses
            .is_some_and(|max| self.session_consecutive_losses >= max)
        {
            Some(StopReason::ConsecutiveLosses)
        } else if stake_exhausted {
            Some(StopReason::StakeScheduleExhausted)
        } else {
            None
        };
        if let Some(reason) = reason {
            warn!(pnl = %self.pnl, %reason, "Risk stop");
            self.stopped = Some(reason);
        }
        reason
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
