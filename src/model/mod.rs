//! Rolling per-instrument digit statistics.
//!
//! Every read the signal layer does is O(1) or O(10): counts, row totals,
//! repetition flags, and dispersion sums are all maintained incrementally on
//! ingest rather than recomputed from the history.

pub mod history;
pub mod rolling;
pub mod transition;

use serde::Serialize;

use crate::config::ModelConfig;
use crate::types::{Digit, InstrumentId};
use history::RingHistory;
use rolling::RollingStat;
use transition::TransitionModel;

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time view of one instrument's model, handed to the evaluator.
#[derive(Debug, Clone, Serialize)]
pub struct ModelSnapshot {
    pub instrument: InstrumentId,
    /// Digits ingested since startup (not bounded by history capacity).
    pub observed: u64,
    /// Digits currently held in the history.
    pub history_len: usize,
    /// Encoded last-k-digit context. `None` until k digits were seen.
    pub context: Option<usize>,
    /// Next-digit counts for the current context.
    pub row_counts: [u64; 10],
    pub row_total: u64,
    /// Per-digit frequencies over the history window.
    pub digit_counts: [u64; 10],
    pub last_digit: Option<Digit>,
    /// Fraction of consecutive equal digits over the last W transitions.
    pub repetition_rate: Option<f64>,
    /// Current repetition rate standardized against past window rates.
    pub repetition_z: Option<f64>,
    /// Stddev of the most recent digits.
    pub digit_stddev: Option<f64>,
    /// Stddev of the most recent prices as a percentage of their mean.
    pub price_dispersion_pct: Option<f64>,
}

impl ModelSnapshot {
    /// P(next = digit | current context). Zero when the row is empty.
    pub fn probability(&self, digit: Digit) -> f64 {
        if self.row_total == 0 {
            return 0.0;
        }
        self.row_counts[digit.index()] as f64 / self.row_total as f64
    }

    pub fn probabilities(&self) -> [f64; 10] {
        Digit::ALL.map(|d| self.probability(d))
    }

    /// Share of `digit` in the history window.
    pub fn frequency(&self, digit: Digit) -> f64 {
        if self.history_len == 0 {
            return 0.0;
        }
        self.digit_counts[digit.index()] as f64 / self.history_len as f64
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Digit history, order-k transition counts, and repetition statistics for
/// a single instrument.
#[derive(Debug, Clone)]
pub struct DigitSequenceModel {
    instrument: InstrumentId,
    history: RingHistory<Digit>,
    digit_counts: [u64; 10],
    transitions: TransitionModel,
    /// Rolling encoding of the last `order` digits.
    context: usize,
    observed: u64,
    repeats: RingHistory<bool>,
    repeat_count: usize,
    repetition_window: usize,
    since_sample: usize,
    repetition_rates: RollingStat,
    recent_digits: RollingStat,
    recent_prices: RollingStat,
}

impl DigitSequenceModel {
    pub fn new(instrument: InstrumentId, config: &ModelConfig) -> Self {
        Self {
            instrument,
            history: RingHistory::new(config.history_capacity),
            digit_counts: [0; 10],
            transitions: TransitionModel::new(config.order),
            context: 0,
            observed: 0,
            repeats: RingHistory::new(config.repetition_window),
            repeat_count: 0,
            repetition_window: config.repetition_window.max(1),
            since_sample: 0,
            repetition_rates: RollingStat::new(config.rolling_capacity),
            recent_digits: RollingStat::new(config.dispersion_window),
            recent_prices: RollingStat::new(config.dispersion_window),
        }
    }

    pub fn instrument(&self) -> &InstrumentId {
        &self.instrument
    }

    pub fn order(&self) -> u32 {
        self.transitions.order()
    }

    pub fn observed(&self) -> u64 {
        self.observed
    }

    pub fn history(&self) -> &RingHistory<Digit> {
        &self.history
    }

    pub fn transitions(&self) -> &TransitionModel {
        &self.transitions
    }

    fn context_ready(&self) -> bool {
        self.observed >= u64::from(self.transitions.order())
    }

    /// Append one digit (and the price it came from).
    pub fn ingest(&mut self, digit: Digit, price: f64) {
        if self.context_ready() {
            self.transitions.record(self.context, digit);
        }

        if let Some(prev) = self.history.last() {
            let repeated = prev == digit;
            if let Some(old) = self.repeats.push(repeated) {
                if old {
                    self.repeat_count -= 1;
                }
            }
            if repeated {
                self.repeat_count += 1;
            }
            self.since_sample += 1;
            if self.since_sample >= self.repetition_window {
                if let Some(rate) = self.repetition_rate() {
                    self.repetition_rates.push(rate);
                }
                self.since_sample = 0;
            }
        }

        if let Some(evicted) = self.history.push(digit) {
            self.digit_counts[evicted.index()] -= 1;
        }
        self.digit_counts[digit.index()] += 1;

        let rows = TransitionModel::context_count(self.transitions.order());
        self.context = (self.context * 10 + digit.index()) % rows;
        self.observed += 1;

        self.recent_digits.push(f64::from(digit.value()));
        if price.is_finite() {
            self.recent_prices.push(price);
        }
    }

    /// Fraction of repeated digits over the last W transitions.
    pub fn repetition_rate(&self) -> Option<f64> {
        let n = self.repeats.len();
        (n > 0).then(|| self.repeat_count as f64 / n as f64)
    }

    pub fn snapshot(&self) -> ModelSnapshot {
        let context = self.context_ready().then_some(self.context);
        let (row_counts, row_total) = match context {
            Some(ctx) => (self.transitions.row(ctx), self.transitions.row_total(ctx)),
            None => ([0; 10], 0),
        };
        let repetition_rate = self.repetition_rate();
        let repetition_z = repetition_rate.and_then(|r| self.repetition_rates.zscore(r));
        let price_dispersion_pct = match (self.recent_prices.stddev(), self.recent_prices.mean()) {
            (Some(sd), Some(mean)) if mean.abs() > f64::EPSILON => Some(sd / mean.abs() * 100.0),
            _ => None,
        };

        ModelSnapshot {
            instrument: self.instrument.clone(),
            observed: self.observed,
            history_len: self.history.len(),
            context,
            row_counts,
            row_total,
            digit_counts: self.digit_counts,
            last_digit: self.history.last(),
            repetition_rate,
            repetition_z,
            digit_stddev: self.recent_digits.stddev(),
            price_dispersion_pct,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
