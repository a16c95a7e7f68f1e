use super::sum::SumAggregator;
use super::trait_::Aggregator;
use crate::error::AggregationResult;
use crate::window::{Delta, WindowEntry};

use serde::{Deserialize, Serialize};

/// Moving average over the window
///
/// Reports `Σ / n`, and 0 for an empty window.
///
/// # Examples
///
/// ```
/// use streamaggr::aggregation::{Aggregator, MovingAverage};
/// use streamaggr::window::WindowEntry;
///
/// let mut ma = MovingAverage::new();
/// ma.update(&WindowEntry::new(1, 10.0)).unwrap();
/// ma.update(&WindowEntry::new(2, 20.0)).unwrap();
/// assert_eq!(ma.finalize(), 15.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MovingAverage {
    sum: SumAggregator,
}

impl MovingAverage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregator for MovingAverage {
    type Input = f64;
    type Output = f64;

    fn update(&mut self, entry: &WindowEntry<f64>) -> AggregationResult<()> {
        self.sum.update(entry)
    }

    fn retract(&mut self, entry: &WindowEntry<f64>) -> AggregationResult<()> {
        self.sum.retract(entry)
    }

    fn check(&self, delta: &Delta<f64>) -> AggregationResult<()> {
        self.sum.check(delta)
    }

    fn finalize(&self) -> f64 {
        match self.sum.count() {
            0 => 0.0,
            n => self.sum.finalize() / n as f64,
        }
    }

    fn reset(&mut self) {
        self.sum.reset();
    }

    fn count(&self) -> u64 {
        self.sum.count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_moving_average_empty() {
        assert_eq!(MovingAverage::new().finalize(), 0.0);
    }

    #[test]
    fn test_moving_average_after_eviction() {
        let mut ma = MovingAverage::new();
        ma.update(&WindowEntry::new(1, 10.0)).unwrap();
        ma.update(&WindowEntry::new(2, 20.0)).unwrap();
        ma.update(&WindowEntry::new(3, 60.0)).unwrap();
        ma.retract(&WindowEntry::new(1, 10.0)).unwrap();
        assert_eq!(ma.finalize(), 40.0);
    }
}
