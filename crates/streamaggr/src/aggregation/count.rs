use super::trait_::Aggregator;
use crate::error::AggregationResult;
use crate::window::WindowEntry;

use serde::{Deserialize, Serialize};

/// Count aggregator - current window population
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CountAggregator {
    count: u64,
}

impl CountAggregator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Aggregator for CountAggregator {
    type Input = f64;
    type Output = u64;

    fn update(&mut self, _entry: &WindowEntry<f64>) -> AggregationResult<()> {
        self.count += 1;
        Ok(())
    }

    fn retract(&mut self, _entry: &WindowEntry<f64>) -> AggregationResult<()> {
        self.count = self.count.saturating_sub(1);
        Ok(())
    }

    fn finalize(&self) -> u64 {
        self.count
    }

    fn reset(&mut self) {
        self.count = 0;
    }

    fn count(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_enter_and_evict() {
        let mut agg = CountAggregator::new();
        agg.update(&WindowEntry::new(1, 10.0)).unwrap();
        agg.update(&WindowEntry::new(2, 20.0)).unwrap();
        agg.retract(&WindowEntry::new(1, 10.0)).unwrap();
        assert_eq!(agg.finalize(), 1);
    }
}
