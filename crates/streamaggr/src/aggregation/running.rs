//! Compensated running totals shared by the sum-based aggregators

use crate::error::{AggregationError, AggregationResult};
use serde::{Deserialize, Serialize};

/// Running total with Neumaier compensation
///
/// Keeps the low-order part lost when values of very different magnitude are
/// added, so a large value that enters and later leaves the window does not
/// wipe out the small ones around it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct RunningSum {
    sum: f64,
    compensation: f64,
}

impl RunningSum {
    pub(crate) fn add(&mut self, x: f64) {
        let t = self.sum + x;
        if self.sum.abs() >= x.abs() {
            self.compensation += (self.sum - t) + x;
        } else {
            self.compensation += (x - t) + self.sum;
        }
        self.sum = t;
    }

    pub(crate) fn sub(&mut self, x: f64) {
        self.add(-x);
    }

    pub(crate) fn value(&self) -> f64 {
        self.sum + self.compensation
    }

    pub(crate) fn clear(&mut self) {
        *self = Self::default();
    }

    /// Total after adding `entered` then removing `evicted`, without mutating
    pub(crate) fn preview(
        &self,
        entered: impl IntoIterator<Item = f64>,
        evicted: impl IntoIterator<Item = f64>,
    ) -> f64 {
        let mut next = *self;
        entered.into_iter().for_each(|x| next.add(x));
        evicted.into_iter().for_each(|x| next.sub(x));
        next.value()
    }
}

/// Reject a running total that left the finite range
pub(crate) fn ensure_total(total: f64, operation: &str) -> AggregationResult<()> {
    if total.is_finite() {
        Ok(())
    } else {
        Err(AggregationError::InvalidValue {
            value: total,
            reason: format!("{} total overflows", operation),
        })
    }
}
