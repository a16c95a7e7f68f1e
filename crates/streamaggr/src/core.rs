//! Core record structures
//!
//! This module provides the types that cross the boundary between the record
//! source and the pipeline:
//! - Record: a committed record with a timestamp and named fields
//! - FieldValue: scalar or sparse-vector field payload
//! - SparseVector: sorted index/weight pairs produced by an external feature mapper

use crate::error::{AggregationError, AggregationResult, WindowError, WindowResult};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A record delivered by the store layer
///
/// Records are immutable once observed. Timestamps are milliseconds since the
/// Unix epoch and must be non-decreasing per store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Store-assigned record identifier
    pub id: u64,
    /// Milliseconds since epoch
    pub timestamp: i64,
    /// Named field values
    pub fields: BTreeMap<String, FieldValue>,
}

impl Record {
    /// Create a record without fields
    pub fn new(id: u64, timestamp: i64) -> Self {
        Self {
            id,
            timestamp,
            fields: BTreeMap::new(),
        }
    }

    /// Create a record timestamped from a UTC date-time
    pub fn at(id: u64, time: DateTime<Utc>) -> Self {
        Self::new(id, time.timestamp_millis())
    }

    /// Add a scalar field
    pub fn with_float<S: Into<String>>(mut self, name: S, value: f64) -> Self {
        self.fields.insert(name.into(), FieldValue::Float(value));
        self
    }

    /// Add a sparse-vector field
    pub fn with_sparse<S: Into<String>>(mut self, name: S, value: SparseVector) -> Self {
        self.fields.insert(name.into(), FieldValue::Sparse(value));
        self
    }

    /// Record time as a UTC date-time
    pub fn time(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }

    /// Read a scalar field
    pub fn float(&self, field: &str) -> WindowResult<f64> {
        match self.fields.get(field) {
            Some(FieldValue::Float(value)) => Ok(*value),
            _ => Err(WindowError::MissingField {
                record_id: self.id,
                field: field.to_string(),
                expected: "float",
            }),
        }
    }

    /// Read a sparse-vector field
    pub fn sparse(&self, field: &str) -> WindowResult<&SparseVector> {
        match self.fields.get(field) {
            Some(FieldValue::Sparse(value)) => Ok(value),
            _ => Err(WindowError::MissingField {
                record_id: self.id,
                field: field.to_string(),
                expected: "sparse vector",
            }),
        }
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Record[id={}, ts={}, fields={}]", self.id, self.timestamp, self.fields.len())
    }
}

/// Field payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Scalar value
    Float(f64),
    /// Sparse feature vector
    Sparse(SparseVector),
}

/// Sparse vector of `(index, weight)` pairs sorted by index
///
/// Indices are unique and weights are finite.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    entries: Vec<(u32, f64)>,
}

impl SparseVector {
    /// Build from arbitrary pairs; sorts by index and rejects duplicates or non-finite weights
    pub fn new(mut entries: Vec<(u32, f64)>) -> AggregationResult<Self> {
        if let Some(&(_, weight)) = entries.iter().find(|(_, w)| !w.is_finite()) {
            return Err(AggregationError::InvalidValue {
                value: weight,
                reason: "sparse vector weights must be finite".to_string(),
            });
        }
        entries.sort_by_key(|(index, _)| *index);
        if let Some(pair) = entries.windows(2).find(|pair| pair[0].0 == pair[1].0) {
            return Err(AggregationError::InvalidValue {
                value: pair[0].0 as f64,
                reason: "duplicate sparse vector index".to_string(),
            });
        }
        Ok(Self { entries })
    }

    /// Empty vector
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of stored (non-implicit) entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Weight at an index, zero when absent
    pub fn get(&self, index: u32) -> f64 {
        self.entries
            .binary_search_by_key(&index, |(i, _)| *i)
            .map(|pos| self.entries[pos].1)
            .unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u32, f64)> {
        self.entries.iter()
    }

    pub fn entries(&self) -> &[(u32, f64)] {
        &self.entries
    }

    /// `a * x + b * y` over the union of indices
    pub fn lin_comb(a: f64, x: &SparseVector, b: f64, y: &SparseVector) -> SparseVector {
        let mut out = Vec::with_capacity(x.len().max(y.len()));
        let (mut i, mut j) = (0, 0);
        while i < x.entries.len() || j < y.entries.len() {
            match (x.entries.get(i), y.entries.get(j)) {
                (Some(&(xi, xv)), Some(&(yi, yv))) if xi == yi => {
                    out.push((xi, a * xv + b * yv));
                    i += 1;
                    j += 1;
                }
                (Some(&(xi, xv)), Some(&(yi, _))) if xi < yi => {
                    out.push((xi, a * xv));
                    i += 1;
                }
                (Some(&(xi, xv)), None) => {
                    out.push((xi, a * xv));
                    i += 1;
                }
                (_, Some(&(yi, yv))) => {
                    out.push((yi, b * yv));
                    j += 1;
                }
                (None, None) => break,
            }
        }
        SparseVector { entries: out }
    }

    /// Drop entries whose absolute weight is below `cutoff`
    pub fn retain_above(&mut self, cutoff: f64) {
        self.entries.retain(|(_, w)| w.abs() >= cutoff);
    }

    /// Dense rendering up to `dim` (entries beyond `dim` are ignored)
    pub fn to_dense(&self, dim: usize) -> Vec<f64> {
        let mut dense = vec![0.0; dim];
        for &(index, weight) in &self.entries {
            if let Some(slot) = dense.get_mut(index as usize) {
                *slot = weight;
            }
        }
        dense
    }
}

impl FromIterator<(u32, f64)> for SparseVector {
    /// Collects pairs that are already sorted and unique, such as map iterators
    fn from_iter<I: IntoIterator<Item = (u32, f64)>>(iter: I) -> Self {
        let mut entries: Vec<(u32, f64)> = iter.into_iter().collect();
        entries.sort_by_key(|(index, _)| *index);
        entries.dedup_by_key(|(index, _)| *index);
        SparseVector { entries }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_fields() {
        let record = Record::new(1, 1_000)
            .with_float("Value", 2.5)
            .with_sparse("Features", SparseVector::new(vec![(3, 1.0)]).unwrap());

        assert_eq!(record.float("Value").unwrap(), 2.5);
        assert_eq!(record.sparse("Features").unwrap().get(3), 1.0);
        assert!(matches!(
            record.float("Features"),
            Err(WindowError::MissingField { .. })
        ));
        assert!(record.float("Missing").is_err());
    }

    #[test]
    fn test_record_time() {
        let time = Utc.with_ymd_and_hms(2015, 6, 10, 0, 13, 30).unwrap();
        let record = Record::at(7, time);
        assert_eq!(record.time(), Some(time));
    }

    #[test]
    fn test_sparse_vector_sorted_and_validated() {
        let vec = SparseVector::new(vec![(5, 1.0), (1, 2.0)]).unwrap();
        assert_eq!(vec.entries(), &[(1, 2.0), (5, 1.0)]);
        assert_eq!(vec.get(2), 0.0);

        assert!(SparseVector::new(vec![(1, 1.0), (1, 2.0)]).is_err());
        assert!(SparseVector::new(vec![(1, f64::NAN)]).is_err());
    }

    #[test]
    fn test_sparse_lin_comb() {
        let x = SparseVector::new(vec![(0, 1.0), (2, 2.0)]).unwrap();
        let y = SparseVector::new(vec![(1, 4.0), (2, 1.0)]).unwrap();

        let z = SparseVector::lin_comb(1.0, &x, -0.5, &y);
        assert_eq!(z.entries(), &[(0, 1.0), (1, -2.0), (2, 1.5)]);
    }

    #[test]
    fn test_sparse_retain_and_dense() {
        let mut vec = SparseVector::new(vec![(0, 0.00001), (2, 3.0)]).unwrap();
        vec.retain_above(0.0001);
        assert_eq!(vec.len(), 1);
        assert_eq!(vec.to_dense(3), vec![0.0, 0.0, 3.0]);
    }

    #[test]
    fn test_record_serialization() {
        let record = Record::new(3, 42).with_float("Value", 1.5);
        let json = serde_json::to_string(&record).unwrap();
        let back: Record = serde_json::from_str(&json).unwrap();
        assert_eq!(record, back);
    }
}
