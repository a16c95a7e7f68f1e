//! Paired statistics over two window buffers
//!
//! Covariance consumes the deltas of two buffers fed from the same store, so
//! their entered/evicted sides line up entry for entry. Correlation keeps no
//! state of its own and is combined from a covariance and two variances on
//! read.

use super::running::{ensure_total, RunningSum};
use super::trait_::ensure_finite;
use crate::error::{AggregationError, AggregationResult};
use crate::window::{Delta, WindowEntry};
use serde::{Deserialize, Serialize};

/// Population covariance of two lockstep windows
///
/// Maintains compensated running `Σx`, `Σy`, `Σxy` and `n`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CovarianceAggregator {
    count: u64,
    sum_x: RunningSum,
    sum_y: RunningSum,
    sum_xy: RunningSum,
}

impl CovarianceAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one step of both windows
    ///
    /// Both deltas must have the same shape and matching timestamps, and no
    /// running total may overflow; otherwise nothing is applied.
    pub fn apply(&mut self, x: &Delta<f64>, y: &Delta<f64>) -> AggregationResult<()> {
        self.check(x, y)?;

        for (ex, ey) in x.entered.iter().zip(&y.entered) {
            self.count += 1;
            self.sum_x.add(ex.value);
            self.sum_y.add(ey.value);
            self.sum_xy.add(ex.value * ey.value);
        }
        for (ex, ey) in x.evicted.iter().zip(&y.evicted) {
            self.count = self.count.saturating_sub(1);
            self.sum_x.sub(ex.value);
            self.sum_y.sub(ey.value);
            self.sum_xy.sub(ex.value * ey.value);
        }
        if self.count == 0 {
            *self = Self::default();
        }
        Ok(())
    }

    fn check(&self, x: &Delta<f64>, y: &Delta<f64>) -> AggregationResult<()> {
        Self::check_paired(&x.entered, &y.entered, "entered")?;
        Self::check_paired(&x.evicted, &y.evicted, "evicted")?;
        for (ex, ey) in x.entered.iter().zip(&y.entered) {
            ensure_finite(ex.value, "covariance")?;
            ensure_finite(ey.value, "covariance")?;
        }

        let values = |delta: &Delta<f64>| -> (Vec<f64>, Vec<f64>) {
            (
                delta.entered.iter().map(|entry| entry.value).collect(),
                delta.evicted.iter().map(|entry| entry.value).collect(),
            )
        };
        let (x_in, x_out) = values(x);
        let (y_in, y_out) = values(y);
        let products = |a: &[f64], b: &[f64]| -> Vec<f64> {
            a.iter().zip(b).map(|(a, b)| a * b).collect()
        };

        ensure_total(
            self.sum_x.preview(x_in.iter().copied(), x_out.iter().copied()),
            "covariance",
        )?;
        ensure_total(
            self.sum_y.preview(y_in.iter().copied(), y_out.iter().copied()),
            "covariance",
        )?;
        ensure_total(
            self.sum_xy
                .preview(products(&x_in, &y_in), products(&x_out, &y_out)),
            "covariance product",
        )
    }

    fn check_paired(
        x: &[WindowEntry<f64>],
        y: &[WindowEntry<f64>],
        side: &str,
    ) -> AggregationResult<()> {
        if x.len() != y.len() {
            return Err(AggregationError::UnpairedInputs {
                operation: "covariance".to_string(),
                details: format!("{} {} entries vs {}", x.len(), side, y.len()),
            });
        }
        if let Some((ex, ey)) = x
            .iter()
            .zip(y)
            .find(|(ex, ey)| ex.timestamp != ey.timestamp)
        {
            return Err(AggregationError::UnpairedInputs {
                operation: "covariance".to_string(),
                details: format!(
                    "{} timestamps differ: {} vs {}",
                    side, ex.timestamp, ey.timestamp
                ),
            });
        }
        Ok(())
    }

    /// `(Σxy - ΣxΣy/n) / n`, 0 when empty
    pub fn finalize(&self) -> f64 {
        if self.count == 0 {
            return 0.0;
        }
        let n = self.count as f64;
        (self.sum_xy.value() - self.sum_x.value() * self.sum_y.value() / n) / n
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Pearson correlation from a covariance and the two variances
///
/// Returns 0 when either variance is zero.
pub fn pearson(covariance: f64, variance_x: f64, variance_y: f64) -> f64 {
    let denominator = (variance_x * variance_y).sqrt();
    if denominator > 0.0 {
        covariance / denominator
    } else {
        0.0
    }
}
