use super::running::{ensure_total, RunningSum};
use super::trait_::Aggregator;
use crate::core::SparseVector;
use crate::error::AggregationResult;
use crate::window::{Delta, WindowEntry};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Element-wise sum of the sparse vectors in a window
///
/// Each index tracks how many window entries contribute to it, so an index
/// disappears from the output once its last contributor is evicted. A step
/// that would overflow any index's total is rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseSumAggregator {
    weights: BTreeMap<u32, (RunningSum, u64)>,
    count: u64,
}

impl SparseSumAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of indices with at least one contributor
    pub fn support(&self) -> usize {
        self.weights.len()
    }
}

impl Aggregator for SparseSumAggregator {
    type Input = SparseVector;
    type Output = SparseVector;

    fn update(&mut self, entry: &WindowEntry<SparseVector>) -> AggregationResult<()> {
        for &(index, weight) in entry.value.iter() {
            let slot = self.weights.entry(index).or_default();
            slot.0.add(weight);
            slot.1 += 1;
        }
        self.count += 1;
        Ok(())
    }

    fn retract(&mut self, entry: &WindowEntry<SparseVector>) -> AggregationResult<()> {
        for &(index, weight) in entry.value.iter() {
            if let Some(slot) = self.weights.get_mut(&index) {
                slot.0.sub(weight);
                slot.1 = slot.1.saturating_sub(1);
                if slot.1 == 0 {
                    self.weights.remove(&index);
                }
            }
        }
        self.count = self.count.saturating_sub(1);
        Ok(())
    }

    fn check(&self, delta: &Delta<SparseVector>) -> AggregationResult<()> {
        let current = |index: u32| {
            self.weights
                .get(&index)
                .map(|(total, _)| *total)
                .unwrap_or_default()
        };
        let mut totals: BTreeMap<u32, RunningSum> = BTreeMap::new();
        for entry in &delta.entered {
            for &(index, weight) in entry.value.iter() {
                totals.entry(index).or_insert_with(|| current(index)).add(weight);
            }
        }
        for entry in &delta.evicted {
            for &(index, weight) in entry.value.iter() {
                totals.entry(index).or_insert_with(|| current(index)).sub(weight);
            }
        }
        totals
            .values()
            .try_for_each(|total| ensure_total(total.value(), "sparse sum"))
    }

    fn finalize(&self) -> SparseVector {
        self.weights
            .iter()
            .map(|(&index, (weight, _))| (index, weight.value()))
            .collect()
    }

    fn reset(&mut self) {
        self.weights.clear();
        self.count = 0;
    }

    fn count(&self) -> u64 {
        self.count
    }
}
