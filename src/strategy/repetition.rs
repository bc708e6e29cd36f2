//! Repetition z-score test: when the windowed repetition rate is anomalous,
//! bet that the last digit does not repeat.

use super::{Candidate, SignalStrategy};
use crate::model::ModelSnapshot;

pub struct RepetitionZScore {
    z_threshold: f64,
}

impl RepetitionZScore {
    pub fn new(z_threshold: f64) -> Self {
        Self { z_threshold }
    }
}

impl SignalStrategy for RepetitionZScore {
    fn name(&self) -> &'static str {
        "repetition"
    }

    fn evaluate(&self, snapshot: &ModelSnapshot) -> Option<Candidate> {
        let z = snapshot.repetition_z?;
        if z.abs() <= self.z_threshold {
            return None;
        }
        let digit = snapshot.last_digit?;
        let rate = snapshot.repetition_rate.unwrap_or(0.0);
        Some(Candidate {
            digit,
            confidence: (1.0 - rate).clamp(0.0, 1.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::tests::{d, snapshot_with_row};

    fn with_z(z: Option<f64>) -> ModelSnapshot {
        let mut snap = snapshot_with_row([1; 10]);
        snap.repetition_z = z;
        snap.repetition_rate = Some(0.2);
        snap.last_digit = Some(d(5));
        snap
    }

    #[test]
    fn test_fires_on_either_tail() {
        let s = RepetitionZScore::new(2.0);
        let c = s.evaluate(&with_z(Some(2.5))).unwrap();
        assert_eq!(c.digit, d(5));
        assert!((c.confidence - 0.8).abs() < 1e-12);
        assert!(s.evaluate(&with_z(Some(-3.1))).is_some());
    }

    #[test]
    fn test_strictly_greater_than_threshold() {
        let s = RepetitionZScore::new(2.0);
        assert!(s.evaluate(&with_z(Some(2.0))).is_none());
        assert!(s.evaluate(&with_z(Some(0.4))).is_none());
    }

    #[test]
    fn test_no_z_no_signal() {
        let s = RepetitionZScore::new(2.0);
        assert!(s.evaluate(&with_z(None)).is_none());
    }
}
