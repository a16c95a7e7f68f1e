use crate::error::{AggregationError, AggregationResult};
use serde::{Deserialize, Serialize};

/// Element-wise `x - y`
pub fn vec_diff(x: &[f64], y: &[f64]) -> AggregationResult<Vec<f64>> {
    if x.len() != y.len() {
        return Err(AggregationError::DimensionMismatch {
            operation: "vector difference".to_string(),
            left: x.len(),
            right: y.len(),
        });
    }
    Ok(x.iter().zip(y).map(|(a, b)| a - b).collect())
}

/// Difference of two vector-producing inputs, recomputed whenever either updates
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VecDiff {
    diff: Vec<f64>,
    timestamp: Option<i64>,
}

impl VecDiff {
    pub fn new() -> Self {
        Self::default()
    }

    /// Recompute from the current input vectors
    ///
    /// On a length mismatch the previous difference is kept.
    pub fn update(&mut self, timestamp: i64, x: &[f64], y: &[f64]) -> AggregationResult<()> {
        self.diff = vec_diff(x, y)?;
        self.timestamp = Some(timestamp);
        Ok(())
    }

    pub fn value(&self) -> &[f64] {
        &self.diff
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.timestamp
    }

    pub fn reset(&mut self) {
        self.diff.clear();
        self.timestamp = None;
    }
}
