use super::running::{ensure_total, RunningSum};
use super::trait_::{ensure_finite, Aggregator};
use crate::error::AggregationResult;
use crate::window::{Delta, WindowEntry};

use serde::{Deserialize, Serialize};

/// Population variance over the window
///
/// Keeps running `Σx` and `Σx²`; the variance `(Σx² - (Σx)²/n) / n` is
/// recomputed from them on read. Both totals are compensated. Rounding can
/// push the difference slightly below zero, which is reported as 0. Values
/// whose square or running totals overflow are rejected.
///
/// # Examples
///
/// ```
/// use streamaggr::aggregation::{Aggregator, VarianceAggregator};
/// use streamaggr::window::WindowEntry;
///
/// let mut agg = VarianceAggregator::new();
/// for (ts, value) in [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0].into_iter().enumerate() {
///     agg.update(&WindowEntry::new(ts as i64, value)).unwrap();
/// }
/// assert_eq!(agg.finalize(), 4.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VarianceAggregator {
    count: u64,
    sum: RunningSum,
    sum_sq: RunningSum,
}

impl VarianceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mean of the window, 0 when empty
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum.value() / self.count as f64
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.finalize().sqrt()
    }
}

impl Aggregator for VarianceAggregator {
    type Input = f64;
    type Output = f64;

    fn update(&mut self, entry: &WindowEntry<f64>) -> AggregationResult<()> {
        self.count += 1;
        self.sum.add(entry.value);
        self.sum_sq.add(entry.value * entry.value);
        Ok(())
    }

    fn retract(&mut self, entry: &WindowEntry<f64>) -> AggregationResult<()> {
        self.count = self.count.saturating_sub(1);
        if self.count == 0 {
            self.sum.clear();
            self.sum_sq.clear();
        } else {
            self.sum.sub(entry.value);
            self.sum_sq.sub(entry.value * entry.value);
        }
        Ok(())
    }

    fn check(&self, delta: &Delta<f64>) -> AggregationResult<()> {
        delta
            .entered
            .iter()
            .try_for_each(|entry| ensure_finite(entry.value, "variance"))?;
        let entered = || delta.entered.iter().map(|entry| entry.value);
        let evicted = || delta.evicted.iter().map(|entry| entry.value);
        ensure_total(self.sum.preview(entered(), evicted()), "variance")?;
        ensure_total(
            self.sum_sq
                .preview(entered().map(|x| x * x), evicted().map(|x| x * x)),
            "variance square",
        )
    }

    fn finalize(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        let sum = self.sum.value();
        let variance = (self.sum_sq.value() - sum * sum / n) / n;
        // clamp rounding only; NaN passes through
        if variance < 0.0 {
            0.0
        } else {
            variance
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn count(&self) -> u64 {
        self.count
    }
}
