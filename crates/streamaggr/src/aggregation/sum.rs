use super::running::{ensure_total, RunningSum};
use super::trait_::{ensure_finite, Aggregator};
use crate::error::AggregationResult;
use crate::window::{Delta, WindowEntry};

use serde::{Deserialize, Serialize};

/// Sum aggregator - running total of the window
///
/// `total += Σ entered - Σ evicted`, compensated so small values survive a
/// large one passing through the window. A step that would overflow the total
/// is rejected.
///
/// # Examples
///
/// ```
/// use streamaggr::aggregation::{Aggregator, SumAggregator};
/// use streamaggr::window::WindowBuffer;
///
/// let mut buffer = WindowBuffer::new(10);
/// let mut sum = SumAggregator::new();
/// sum.apply(buffer.update(0, 1.0).unwrap()).unwrap();
/// sum.apply(buffer.update(5, 2.0).unwrap()).unwrap();
/// sum.apply(buffer.update(12, 3.0).unwrap()).unwrap();
///
/// assert_eq!(sum.finalize(), 5.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SumAggregator {
    sum: RunningSum,
    count: u64,
}

impl SumAggregator {
    /// Create a new sum aggregator
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregator for SumAggregator {
    type Input = f64;
    type Output = f64;

    fn update(&mut self, entry: &WindowEntry<f64>) -> AggregationResult<()> {
        self.sum.add(entry.value);
        self.count += 1;
        Ok(())
    }

    fn retract(&mut self, entry: &WindowEntry<f64>) -> AggregationResult<()> {
        self.sum.sub(entry.value);
        self.count = self.count.saturating_sub(1);
        if self.count == 0 {
            self.sum.clear();
        }
        Ok(())
    }

    fn check(&self, delta: &Delta<f64>) -> AggregationResult<()> {
        delta
            .entered
            .iter()
            .try_for_each(|entry| ensure_finite(entry.value, "sum"))?;
        ensure_total(
            self.sum.preview(
                delta.entered.iter().map(|entry| entry.value),
                delta.evicted.iter().map(|entry| entry.value),
            ),
            "sum",
        )
    }

    fn finalize(&self) -> f64 {
        self.sum.value()
    }

    fn reset(&mut self) {
        self.sum.clear();
        self.count = 0;
    }

    fn count(&self) -> u64 {
        self.count
    }
}
