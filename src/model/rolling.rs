//! O(1) rolling mean / standard deviation over a bounded window.

use super::history::RingHistory;

/// Bounded list of recent scalar samples with running sum and sum of
/// squares, so mean, stddev and z-scores never walk the window.
#[derive(Debug, Clone)]
pub struct RollingStat {
    samples: RingHistory<f64>,
    sum: f64,
    sumsq: f64,
}

impl RollingStat {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: RingHistory::new(capacity),
            sum: 0.0,
            sumsq: 0.0,
        }
    }

    pub fn push(&mut self, x: f64) {
        self.sum += x;
        self.sumsq += x * x;
        if let Some(old) = self.samples.push(x) {
            self.sum -= old;
            self.sumsq -= old * old;
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn mean(&self) -> Option<f64> {
        let n = self.samples.len();
        (n > 0).then(|| self.sum / n as f64)
    }

    /// Sample variance (n - 1 denominator). `None` below two samples.
    pub fn variance(&self) -> Option<f64> {
        let n = self.samples.len();
        if n < 2 {
            return None;
        }
        let nf = n as f64;
        // Running sums drift slightly below zero on constant input.
        let num = (self.sumsq - self.sum * self.sum / nf).max(0.0);
        Some(num / (nf - 1.0))
    }

    pub fn stddev(&self) -> Option<f64> {
        self.variance().map(f64::sqrt)
    }

    /// Standard score of `x` against the window. `None` when the window is
    /// too short or has no spread.
    pub fn zscore(&self, x: f64) -> Option<f64> {
        let mean = self.mean()?;
        let sd = self.stddev()?;
        if sd < 1e-12 {
            return None;
        }
        Some((x - mean) / sd)
    }
}
