//! Order-k digit transition counts.

use crate::types::Digit;

/// Square-ish count matrix: one row per k-digit context (10^k rows), one
/// column per next digit. Row totals are kept alongside so reading a row's
/// evidence is O(1).
#[derive(Debug, Clone)]
pub struct TransitionModel {
    order: u32,
    counts: Vec<[u64; 10]>,
    row_totals: Vec<u64>,
}

impl TransitionModel {
    pub fn new(order: u32) -> Self {
        let rows = Self::context_count(order);
        Self {
            order,
            counts: vec![[0; 10]; rows],
            row_totals: vec![0; rows],
        }
    }

    /// Number of distinct contexts for order `k`.
    pub fn context_count(order: u32) -> usize {
        10usize.pow(order)
    }

    pub fn order(&self) -> u32 {
        self.order
    }

    /// Encode digits (oldest first) as a context index. Only the last
    /// `order` digits count.
    pub fn encode(&self, digits: &[Digit]) -> usize {
        let rows = self.counts.len();
        digits.iter().fold(0usize, |ctx, d| (ctx * 10 + d.index()) % rows)
    }

    /// Count one observation of `next` following `context`.
    pub fn record(&mut self, context: usize, next: Digit) {
        let Some(row) = self.counts.get_mut(context) else {
            return;
        };
        row[next.index()] += 1;
        self.row_totals[context] += 1;
    }

    pub fn row(&self, context: usize) -> [u64; 10] {
        self.counts.get(context).copied().unwrap_or([0; 10])
    }

    pub fn row_total(&self, context: usize) -> u64 {
        self.row_totals.get(context).copied().unwrap_or(0)
    }

    /// Total transitions recorded across all contexts.
    pub fn total(&self) -> u64 {
        self.row_totals.iter().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(v: u8) -> Digit {
        Digit::new(v).unwrap()
    }

    #[test]
    fn test_context_count() {
        assert_eq!(TransitionModel::context_count(1), 10);
        assert_eq!(TransitionModel::context_count(2), 100);
        assert_eq!(TransitionModel::context_count(3), 1000);
    }

    #[test]
    fn test_encode_order_two() {
        let m = TransitionModel::new(2);
        assert_eq!(m.encode(&[d(4), d(7)]), 47);
        // Older digits fall off the front.
        assert_eq!(m.encode(&[d(1), d(4), d(7)]), 47);
        assert_eq!(m.encode(&[d(0), d(3)]), 3);
    }

    #[test]
    fn test_record_keeps_row_total_in_sync() {
        let mut m = TransitionModel::new(2);
        m.record(47, d(3));
        m.record(47, d(3));
        m.record(47, d(9));
        let row = m.row(47);
        assert_eq!(row[3], 2);
        assert_eq!(row[9], 1);
        assert_eq!(m.row_total(47), row.iter().sum::<u64>());
        assert_eq!(m.total(), 3);
    }

    #[test]
    fn test_out_of_range_context_ignored() {
        let mut m = TransitionModel::new(1);
        m.record(10, d(1));
        assert_eq!(m.total(), 0);
        assert_eq!(m.row_total(10), 0);
        assert_eq!(m.row(10), [0; 10]);
    }
}
