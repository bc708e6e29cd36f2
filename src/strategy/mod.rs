//! Signal evaluation, stake sizing, and risk governance.
//!
//! The evaluator turns a model snapshot into a trade-or-skip decision; the
//! stake controller and risk governor turn settled outcomes into the next
//! stake and into suspend/stop decisions.

pub mod frequency;
pub mod markov;
pub mod repetition;
pub mod risk;
pub mod stake;

use std::collections::HashMap;

use tracing::debug;

use crate::config::{AppConfig, CombineMode, SignalConfig, StrategyKind};
use crate::model::ModelSnapshot;
use crate::types::{Digit, InstrumentId, Intent};
use frequency::FrequencyDeviation;
use markov::MarkovProbability;
use repetition::RepetitionZScore;

// ---------------------------------------------------------------------------
// Strategy seam
// ---------------------------------------------------------------------------

/// A digit one strategy would bet against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub digit: Digit,
    /// In [0, 1].
    pub confidence: f64,
}

/// One statistical test over a model snapshot.
pub trait SignalStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Target digit when the test fires.
    fn evaluate(&self, snapshot: &ModelSnapshot) -> Option<Candidate>;
}

/// Instantiate a registered strategy.
pub fn build_strategy(kind: StrategyKind, config: &SignalConfig) -> Box<dyn SignalStrategy> {
    match kind {
        StrategyKind::Markov => Box::new(MarkovProbability::new(
            config.probability_threshold,
            config.exclude_unseen,
        )),
        StrategyKind::Frequency => Box::new(FrequencyDeviation::new(
            config.frequency_deviation,
            config.min_samples,
        )),
        StrategyKind::Repetition => Box::new(RepetitionZScore::new(config.z_threshold)),
    }
}

// ---------------------------------------------------------------------------
// Decision record
// ---------------------------------------------------------------------------

/// Outcome of one evaluation, including why nothing was emitted.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Trade(Intent),
    /// Current context row has too little evidence.
    Insufficient { row_total: u64, required: u64 },
    /// Regime gate tripped.
    Regime { measure: &'static str, value: f64, limit: f64 },
    /// Gates passed but no strategy fired.
    NoSignal,
}

impl Decision {
    pub fn into_intent(self) -> Option<Intent> {
        match self {
            Decision::Trade(intent) => Some(intent),
            _ => None,
        }
    }
}

/// Per-instrument regime ceilings.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RegimeLimits {
    pub max_digit_stddev: Option<f64>,
    pub max_price_dispersion_pct: Option<f64>,
}

impl RegimeLimits {
    fn check(&self, snapshot: &ModelSnapshot) -> Option<Decision> {
        if let (Some(limit), Some(value)) = (self.max_digit_stddev, snapshot.digit_stddev) {
            if value > limit {
                return Some(Decision::Regime { measure: "digit_stddev", value, limit });
            }
        }
        if let (Some(limit), Some(value)) =
            (self.max_price_dispersion_pct, snapshot.price_dispersion_pct)
        {
            if value > limit {
                return Some(Decision::Regime { measure: "price_dispersion_pct", value, limit });
            }
        }
        None
    }
}

// ---------------------------------------------------------------------------
// Evaluator
// ---------------------------------------------------------------------------

/// Sufficiency gate → regime gate → registered strategies.
///
/// In-flight and suspension checks belong to the caller.
pub struct SignalEvaluator {
    strategies: Vec<Box<dyn SignalStrategy>>,
    combine: CombineMode,
    min_samples: u64,
    regimes: HashMap<InstrumentId, RegimeLimits>,
}

impl SignalEvaluator {
    pub fn new(strategies: Vec<Box<dyn SignalStrategy>>, combine: CombineMode, min_samples: u64) -> Self {
        Self {
            strategies,
            combine,
            min_samples,
            regimes: HashMap::new(),
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        let strategies = config
            .signal
            .strategies
            .iter()
            .map(|&kind| build_strategy(kind, &config.signal))
            .collect();
        let mut evaluator = Self::new(strategies, config.signal.combine, config.signal.min_samples);
        for inst in &config.instruments {
            evaluator.set_regime(
                inst.id(),
                RegimeLimits {
                    max_digit_stddev: inst.max_digit_stddev,
                    max_price_dispersion_pct: inst.max_price_dispersion_pct,
                },
            );
        }
        evaluator
    }

    pub fn set_regime(&mut self, instrument: InstrumentId, limits: RegimeLimits) {
        self.regimes.insert(instrument, limits);
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    /// Trade intent for this snapshot, if any.
    pub fn evaluate(&self, snapshot: &ModelSnapshot) -> Option<Intent> {
        self.assess(snapshot).into_intent()
    }

    /// Full decision, including the reason for a skip.
    pub fn assess(&self, snapshot: &ModelSnapshot) -> Decision {
        if snapshot.context.is_none() || snapshot.row_total < self.min_samples {
            return Decision::Insufficient {
                row_total: snapshot.row_total,
                required: self.min_samples,
            };
        }

        if let Some(limits) = self.regimes.get(&snapshot.instrument) {
            if let Some(skip) = limits.check(snapshot) {
                debug!(instrument = %snapshot.instrument, ?skip, "Regime gate closed");
                return skip;
            }
        }

        let fired = match self.combine {
            CombineMode::Any => self.first_firing(snapshot),
            CombineMode::All => self.consensus(snapshot),
        };

        match fired {
            Some((candidate, strategy)) => Decision::Trade(Intent {
                instrument: snapshot.instrument.clone(),
                target_digit: candidate.digit,
                confidence: candidate.confidence,
                strategy,
            }),
            None => Decision::NoSignal,
        }
    }

    fn first_firing(&self, snapshot: &ModelSnapshot) -> Option<(Candidate, &'static str)> {
        self.strategies
            .iter()
            .find_map(|s| s.evaluate(snapshot).map(|c| (c, s.name())))
    }

    fn consensus(&self, snapshot: &ModelSnapshot) -> Option<(Candidate, &'static str)> {
        let mut agreed: Option<Candidate> = None;
        for strategy in &self.strategies {
            let candidate = strategy.evaluate(snapshot)?;
            agreed = match agreed {
                None => Some(candidate),
                Some(prev) if prev.digit == candidate.digit => Some(Candidate {
                    digit: prev.digit,
                    confidence: prev.confidence.min(candidate.confidence),
                }),
                Some(_) => return None,
            };
        }
        agreed.map(|c| (c, "consensus"))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
