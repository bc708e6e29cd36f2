//! Shared types for the DIFFER engine.
//!
//! These types form the data model used across all modules.
//! They are kept free of behaviour that depends on other modules so that
//! the model, strategy, engine, and venue layers can all depend on them
//! without circular references.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Venue symbol of a tradable instrument (e.g. `R_100`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    pub fn new(symbol: impl Into<String>) -> Self {
        Self(symbol.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for InstrumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A single decimal digit, 0–9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Digit(u8);

impl Digit {
    /// All ten digits in ascending order.
    pub const ALL: [Digit; 10] = [
        Digit(0),
        Digit(1),
        Digit(2),
        Digit(3),
        Digit(4),
        Digit(5),
        Digit(6),
        Digit(7),
        Digit(8),
        Digit(9),
    ];

    pub fn new(value: u8) -> Option<Self> {
        (value <= 9).then_some(Self(value))
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl TryFrom<u8> for Digit {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Digit::new(value).ok_or_else(|| format!("digit out of range: {value}"))
    }
}

impl From<Digit> for u8 {
    fn from(d: Digit) -> u8 {
        d.0
    }
}

impl fmt::Display for Digit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Tick
// ---------------------------------------------------------------------------

/// One timestamped price update for an instrument.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    pub instrument: InstrumentId,
    pub price: f64,
    /// Venue epoch, in seconds.
    pub epoch: i64,
    /// Number of decimals the venue quotes this instrument with, when known.
    pub pip_size: Option<u32>,
}

impl Tick {
    /// Extract the least-significant digit of the price rendered with
    /// `decimals` fractional digits. The venue pip size wins when present.
    pub fn last_digit(&self, decimals: u32) -> Option<Digit> {
        last_digit(self.price, self.pip_size.unwrap_or(decimals))
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.epoch, 0)
    }
}

/// Render `price` with a fixed number of decimals and return the last digit.
///
/// Formatting (rather than scaling and truncating) keeps values like
/// `1234.56` from turning into `123455.999…` on the way through `f64`.
pub fn last_digit(price: f64, decimals: u32) -> Option<Digit> {
    if !price.is_finite() {
        return None;
    }
    let rendered = format!("{:.*}", decimals as usize, price);
    let c = rendered.chars().last()?;
    c.to_digit(10).and_then(|d| Digit::new(d as u8))
}

// ---------------------------------------------------------------------------
// Signals and contracts
// ---------------------------------------------------------------------------

/// A trade the signal layer would like to place.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Intent {
    pub instrument: InstrumentId,
    /// Barrier digit: the bet is that the next digit will NOT be this one.
    pub target_digit: Digit,
    /// Strategy-specific confidence in [0, 1].
    pub confidence: f64,
    /// Name of the strategy that produced the intent.
    pub strategy: &'static str,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] differ from {} (conf={:.1}%, via {})",
            self.instrument,
            self.target_digit,
            self.confidence * 100.0,
            self.strategy,
        )
    }
}

/// Settlement state of a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractStatus {
    Pending,
    Settled,
}

/// A purchased contract awaiting (or past) settlement.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contract {
    pub id: u64,
    pub instrument: InstrumentId,
    pub target_digit: Digit,
    pub stake: Decimal,
    pub submitted_at: DateTime<Utc>,
    pub status: ContractStatus,
}

impl fmt::Display for Contract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} [{}] differ {} stake={} ({:?})",
            self.id, self.instrument, self.target_digit, self.stake, self.status,
        )
    }
}

/// Result of a settled contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Won,
    Lost,
}

impl Outcome {
    pub fn is_win(self) -> bool {
        matches!(self, Outcome::Won)
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Won => write!(f, "WON"),
            Outcome::Lost => write!(f, "LOST"),
        }
    }
}

/// A contract together with its final result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettledTrade {
    pub contract: Contract,
    pub outcome: Outcome,
    pub profit: Decimal,
    pub exit_value: Option<f64>,
    pub settled_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Termination
// ---------------------------------------------------------------------------

/// Why the risk layer ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    StopLoss,
    TakeProfit,
    ConsecutiveLosses,
    StakeScheduleExhausted,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::StopLoss => write!(f, "stop-loss reached"),
            StopReason::TakeProfit => write!(f, "take-profit reached"),
            StopReason::ConsecutiveLosses => write!(f, "session consecutive-loss limit reached"),
            StopReason::StakeScheduleExhausted => write!(f, "stake schedule exhausted"),
        }
    }
}

/// How the engine finished. Fatal exits are kept apart from intentional ones
/// so a supervisor can tell a completed session from a crash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EngineExit {
    /// Risk-managed session completed (stop-loss, take-profit, ...).
    RiskStop(StopReason),
    /// Operator interrupt.
    Interrupted,
    /// The venue rejected the credentials.
    AuthFailed,
    /// Reconnect attempts exhausted.
    ConnectionExhausted,
}

impl EngineExit {
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineExit::AuthFailed | EngineExit::ConnectionExhausted)
    }

    /// Process exit code for this outcome.
    pub fn exit_code(&self) -> i32 {
        match self {
            EngineExit::RiskStop(_) | EngineExit::Interrupted => 0,
            EngineExit::AuthFailed => 2,
            EngineExit::ConnectionExhausted => 3,
        }
    }
}

impl fmt::Display for EngineExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineExit::RiskStop(reason) => write!(f, "risk stop: {reason}"),
            EngineExit::Interrupted => write!(f, "interrupted"),
            EngineExit::AuthFailed => write!(f, "authentication failed"),
            EngineExit::ConnectionExhausted => write!(f, "reconnect attempts exhausted"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
