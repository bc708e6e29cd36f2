//! Markov-probability test: bet against the least likely next digit.

use super::{Candidate, SignalStrategy};
use crate::model::ModelSnapshot;
use crate::types::Digit;

pub struct MarkovProbability {
    threshold: f64,
    /// Only digits seen at least once in the row are candidates.
    exclude_unseen: bool,
}

impl MarkovProbability {
    pub fn new(threshold: f64, exclude_unseen: bool) -> Self {
        Self {
            threshold,
            exclude_unseen,
        }
    }

    /// Argmin of the current row's probabilities. Ties go to the lowest digit.
    pub fn least_likely(&self, snapshot: &ModelSnapshot) -> Option<(Digit, f64)> {
        if snapshot.row_total == 0 {
            return None;
        }
        let mut best: Option<(Digit, f64)> = None;
        for digit in Digit::ALL {
            if self.exclude_unseen && snapshot.row_counts[digit.index()] == 0 {
                continue;
            }
            let p = snapshot.probability(digit);
            if best.map_or(true, |(_, min)| p < min) {
                best = Some((digit, p));
            }
        }
        best
    }
}

impl SignalStrategy for MarkovProbability {
    fn name(&self) -> &'static str {
        "markov"
    }

    fn evaluate(&self, snapshot: &ModelSnapshot) -> Option<Candidate> {
        let (digit, p) = self.least_likely(snapshot)?;
        (p <= self.threshold).then_some(Candidate {
            digit,
            confidence: 1.0 - p,
        })
    }
}
