use crate::error::AggregationResult;
use crate::window::{Delta, WindowEntry};
use std::fmt::Debug;

/// Core trait for window aggregators
///
/// Aggregators never see the window contents. They are driven by the
/// entered/evicted sides of each [`Delta`] and keep whatever running state
/// their statistic needs, so an update costs O(entered + evicted).
pub trait Aggregator: Send + Sync + Debug {
    /// Value type of the window entries this aggregator accepts
    type Input: Clone;

    /// The type of the current aggregation result
    type Output;

    /// Account for an entry that entered the window
    fn update(&mut self, entry: &WindowEntry<Self::Input>) -> AggregationResult<()>;

    /// Account for an entry that left the window
    fn retract(&mut self, entry: &WindowEntry<Self::Input>) -> AggregationResult<()>;

    /// Reject a delta before any of it is applied
    fn check(&self, _delta: &Delta<Self::Input>) -> AggregationResult<()> {
        Ok(())
    }

    /// Apply one window step: entered first, then evicted
    fn apply(&mut self, delta: &Delta<Self::Input>) -> AggregationResult<()> {
        self.check(delta)?;
        for entry in &delta.entered {
            self.update(entry)?;
        }
        for entry in &delta.evicted {
            self.retract(entry)?;
        }
        Ok(())
    }

    /// Current aggregation result
    fn finalize(&self) -> Self::Output;

    /// Reset the aggregator to initial state
    fn reset(&mut self);

    /// Number of entries currently accounted for
    fn count(&self) -> u64;

    /// Check if the aggregator currently covers no entries
    fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

/// Reject NaN and infinite inputs
pub(crate) fn ensure_finite(value: f64, operation: &str) -> AggregationResult<()> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(crate::error::AggregationError::InvalidValue {
            value,
            reason: format!("{} requires finite values", operation),
        })
    }
}
