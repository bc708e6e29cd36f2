//! Frequency-deviation test: bet against a digit that is under-represented
//! in the recent history.

use super::{Candidate, SignalStrategy};
use crate::model::ModelSnapshot;
use crate::types::Digit;

const UNIFORM: f64 = 0.1;

pub struct FrequencyDeviation {
    /// Relative shortfall below uniform, e.g. 0.5 flags digits at <= 5%.
    deviation: f64,
    min_history: u64,
}

impl FrequencyDeviation {
    pub fn new(deviation: f64, min_history: u64) -> Self {
        Self {
            deviation,
            min_history,
        }
    }

    pub fn ceiling(&self) -> f64 {
        UNIFORM * (1.0 - self.deviation)
    }
}

impl SignalStrategy for FrequencyDeviation {
    fn name(&self) -> &'static str {
        "frequency"
    }

    fn evaluate(&self, snapshot: &ModelSnapshot) -> Option<Candidate> {
        if snapshot.history_len == 0 || (snapshot.history_len as u64) < self.min_history {
            return None;
        }
        // min_by keeps the first of equal elements, so ties go low.
        let (digit, freq) = Digit::ALL
            .iter()
            .map(|&d| (d, snapshot.frequency(d)))
            .min_by(|a, b| a.1.total_cmp(&b.1))?;
        (freq <= self.ceiling()).then_some(Candidate {
            digit,
            confidence: 1.0 - freq,
        })
    }
}
