use super::trait_::{ensure_finite, Aggregator};
use crate::error::AggregationResult;
use crate::window::{Delta, WindowEntry};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Which extreme a [`MonotonicDeque`] tracks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Extreme {
    Min,
    Max,
}

impl Extreme {
    /// Whether `candidate` makes `existing` irrelevant
    fn dominates(self, candidate: f64, existing: f64) -> bool {
        match self {
            Extreme::Min => candidate <= existing,
            Extreme::Max => candidate >= existing,
        }
    }
}

/// Double-ended queue of not-yet-dominated window candidates
///
/// Every entered value gets a sequence number. Evictions always remove the
/// oldest entries of the window, so counting them is enough to know which
/// candidates have left. Both operations are amortized O(1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonotonicDeque {
    extreme: Extreme,
    candidates: VecDeque<(u64, i64, f64)>,
    entered: u64,
    evicted: u64,
}

impl MonotonicDeque {
    pub fn new(extreme: Extreme) -> Self {
        Self {
            extreme,
            candidates: VecDeque::new(),
            entered: 0,
            evicted: 0,
        }
    }

    pub fn push(&mut self, timestamp: i64, value: f64) {
        while self
            .candidates
            .back()
            .is_some_and(|&(_, _, existing)| self.extreme.dominates(value, existing))
        {
            self.candidates.pop_back();
        }
        self.candidates.push_back((self.entered, timestamp, value));
        self.entered += 1;
    }

    pub fn pop_oldest(&mut self) {
        if self.evicted < self.entered {
            self.evicted += 1;
        }
        while self
            .candidates
            .front()
            .is_some_and(|&(seq, _, _)| seq < self.evicted)
        {
            self.candidates.pop_front();
        }
    }

    /// Current extreme and its timestamp
    pub fn peek(&self) -> Option<(i64, f64)> {
        self.candidates.front().map(|&(_, ts, value)| (ts, value))
    }

    pub fn len(&self) -> u64 {
        self.entered - self.evicted
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn reset(&mut self) {
        self.candidates.clear();
        self.entered = 0;
        self.evicted = 0;
    }
}

macro_rules! extreme_aggregator {
    ($name:ident, $extreme:expr, $label:literal) => {
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            deque: MonotonicDeque,
        }

        impl $name {
            pub fn new() -> Self {
                Self {
                    deque: MonotonicDeque::new($extreme),
                }
            }

            /// Timestamp of the entry holding the current extreme
            pub fn extreme_timestamp(&self) -> Option<i64> {
                self.deque.peek().map(|(ts, _)| ts)
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl Aggregator for $name {
            type Input = f64;
            type Output = Option<f64>;

            fn update(&mut self, entry: &WindowEntry<f64>) -> AggregationResult<()> {
                self.deque.push(entry.timestamp, entry.value);
                Ok(())
            }

            fn retract(&mut self, _entry: &WindowEntry<f64>) -> AggregationResult<()> {
                self.deque.pop_oldest();
                Ok(())
            }

            fn check(&self, delta: &Delta<f64>) -> AggregationResult<()> {
                delta
                    .entered
                    .iter()
                    .try_for_each(|entry| ensure_finite(entry.value, $label))
            }

            fn finalize(&self) -> Option<f64> {
                self.deque.peek().map(|(_, value)| value)
            }

            fn reset(&mut self) {
                self.deque.reset();
            }

            fn count(&self) -> u64 {
                self.deque.len()
            }
        }
    };
}

extreme_aggregator!(MinAggregator, Extreme::Min, "min");
extreme_aggregator!(MaxAggregator, Extreme::Max, "max");

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowBuffer;

    fn run<A: Aggregator<Input = f64>>(agg: &mut A, winsize: u64, values: &[f64]) {
        let mut buffer = WindowBuffer::new(winsize);
        for (ts, value) in values.iter().enumerate() {
            agg.apply(buffer.update(ts as i64, *value).unwrap()).unwrap();
        }
    }

    #[test]
    fn test_min_basic() {
        let mut agg = MinAggregator::new();
        assert_eq!(agg.finalize(), None);
        run(&mut agg, 100, &[30.0, 10.0, 20.0]);
        assert_eq!(agg.finalize(), Some(10.0));
        assert_eq!(agg.extreme_timestamp(), Some(1));
    }

    #[test]
    fn test_max_survives_eviction_of_extreme() {
        let mut agg = MaxAggregator::new();
        // 9 leaves at t = 2, the window ends up holding [2, 3]
        run(&mut agg, 2, &[9.0, 1.0, 2.0, 3.0]);
        assert_eq!(agg.finalize(), Some(3.0));
        assert_eq!(agg.count(), 2);
    }

    #[test]
    fn test_min_matches_rescan() {
        let values: Vec<f64> = (0..200).map(|i| ((i * 37) % 23) as f64 - 11.0).collect();
        let mut buffer = WindowBuffer::new(9);
        let mut agg = MinAggregator::new();
        for (ts, value) in values.iter().enumerate() {
            agg.apply(buffer.update(ts as i64, *value).unwrap()).unwrap();
            let expected = buffer
                .entries()
                .map(|entry| entry.value)
                .fold(f64::INFINITY, f64::min);
            assert_eq!(agg.finalize(), Some(expected));
        }
    }

    #[test]
    fn test_max_with_duplicates_and_equal_timestamps() {
        let mut buffer = WindowBuffer::new(0);
        let mut agg = MaxAggregator::new();
        agg.apply(buffer.update(1, 5.0).unwrap()).unwrap();
        agg.apply(buffer.update(1, 5.0).unwrap()).unwrap();
        agg.apply(buffer.update(1, 2.0).unwrap()).unwrap();
        assert_eq!(agg.finalize(), Some(2.0));
    }

    #[test]
    fn test_minmax_reset_and_serialization() {
        let mut agg = MaxAggregator::new();
        run(&mut agg, 10, &[1.0, 4.0, 2.0]);

        let json = serde_json::to_string(&agg).unwrap();
        let restored: MaxAggregator = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, agg);

        agg.reset();
        assert!(agg.is_empty());
        assert_eq!(agg.finalize(), None);
    }
}
