//! Session trade statistics and the final report.
//!
//! Records every settled trade, rejection, and abandoned contract. Purely
//! observational: nothing here feeds back into stake or risk decisions.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use tracing::info;

use crate::types::{EngineExit, InstrumentId, Outcome, SettledTrade};

/// Settled trades kept for the status API.
const RECENT_TRADES: usize = 50;

// ---------------------------------------------------------------------------
// Per-instrument tally
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstrumentTally {
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub rejected: u64,
    pub abandoned: u64,
    pub staked: Decimal,
    pub pnl: Decimal,
}

impl InstrumentTally {
    pub fn win_rate(&self) -> Option<f64> {
        win_rate(self.wins, self.trades)
    }
}

fn win_rate(wins: u64, trades: u64) -> Option<f64> {
    (trades > 0).then(|| wins as f64 / trades as f64)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// End-of-session summary.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub exit: EngineExit,
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: Option<f64>,
    pub staked: Decimal,
    pub pnl: Decimal,
    pub longest_losing_streak: u32,
    pub instruments: BTreeMap<InstrumentId, InstrumentTally>,
}

impl fmt::Display for SessionReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let minutes = (self.finished_at - self.started_at).num_minutes();
        writeln!(f, "Session report ({minutes} min)")?;
        writeln!(f, "  exit:        {}", self.exit)?;
        writeln!(f, "  trades:      {} ({}W / {}L)", self.trades, self.wins, self.losses)?;
        if let Some(rate) = self.win_rate {
            writeln!(f, "  win rate:    {:.1}%", rate * 100.0)?;
        }
        writeln!(f, "  staked:      {}", self.staked)?;
        writeln!(f, "  P/L:         {}", self.pnl)?;
        write!(f, "  worst run:   {} losses", self.longest_losing_streak)?;
        for (instrument, tally) in &self.instruments {
            write!(
                f,
                "\n  {instrument:<10} {:>4} trades  P/L {}  rejected {}  abandoned {}",
                tally.trades, tally.pnl, tally.rejected, tally.abandoned
            )?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Ledger {
    started_at: DateTime<Utc>,
    trades: u64,
    wins: u64,
    losses: u64,
    staked: Decimal,
    pnl: Decimal,
    losing_streak: u32,
    longest_losing_streak: u32,
    instruments: BTreeMap<InstrumentId, InstrumentTally>,
    recent: VecDeque<SettledTrade>,
}

impl Ledger {
    pub fn new(instruments: impl IntoIterator<Item = InstrumentId>) -> Self {
        Self {
            started_at: Utc::now(),
            trades: 0,
            wins: 0,
            losses: 0,
            staked: Decimal::ZERO,
            pnl: Decimal::ZERO,
            losing_streak: 0,
            longest_losing_streak: 0,
            instruments: instruments
                .into_iter()
                .map(|id| (id, InstrumentTally::default()))
                .collect(),
            recent: VecDeque::with_capacity(RECENT_TRADES),
        }
    }

    pub fn trades(&self) -> u64 {
        self.trades
    }

    pub fn wins(&self) -> u64 {
        self.wins
    }

    pub fn losses(&self) -> u64 {
        self.losses
    }

    pub fn pnl(&self) -> Decimal {
        self.pnl
    }

    pub fn win_rate(&self) -> Option<f64> {
        win_rate(self.wins, self.trades)
    }

    pub fn tally(&self, instrument: &InstrumentId) -> Option<&InstrumentTally> {
        self.instruments.get(instrument)
    }

    /// Most recent first.
    pub fn recent(&self) -> impl Iterator<Item = &SettledTrade> {
        self.recent.iter().rev()
    }

    fn tally_mut(&mut self, instrument: &InstrumentId) -> &mut InstrumentTally {
        self.instruments.entry(instrument.clone()).or_default()
    }

    pub fn record(&mut self, trade: &SettledTrade) {
        self.trades += 1;
        self.staked += trade.contract.stake;
        self.pnl += trade.profit;
        match trade.outcome {
            Outcome::Won => {
                self.wins += 1;
                self.losing_streak = 0;
            }
            Outcome::Lost => {
                self.losses += 1;
                self.losing_streak += 1;
                self.longest_losing_streak = self.longest_losing_streak.max(self.losing_streak);
            }
        }

        let tally = self.tally_mut(&trade.contract.instrument);
        tally.trades += 1;
        tally.staked += trade.contract.stake;
        tally.pnl += trade.profit;
        if trade.outcome.is_win() {
            tally.wins += 1;
        } else {
            tally.losses += 1;
        }

        if self.recent.len() == RECENT_TRADES {
            self.recent.pop_front();
        }
        self.recent.push_back(trade.clone());
    }

    pub fn record_rejection(&mut self, instrument: &InstrumentId) {
        self.tally_mut(instrument).rejected += 1;
    }

    pub fn record_abandoned(&mut self, instrument: &InstrumentId) {
        self.tally_mut(instrument).abandoned += 1;
    }

    pub fn report(&self, exit: EngineExit) -> SessionReport {
        let report = SessionReport {
            started_at: self.started_at,
            finished_at: Utc::now(),
            exit,
            trades: self.trades,
            wins: self.wins,
            losses: self.losses,
            win_rate: self.win_rate(),
            staked: self.staked,
            pnl: self.pnl,
            longest_losing_streak: self.longest_losing_streak,
            instruments: self.instruments.clone(),
        };
        info!(
            trades = report.trades,
            wins = report.wins,
            losses = report.losses,
            pnl = %report.pnl,
            exit = %report.exit,
            "Session summary"
        );
        report
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
