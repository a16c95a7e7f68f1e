use super::interpolator::{Interpolator, InterpolatorKind};
use crate::core::{FieldValue, Record};
use crate::error::{AggregationError, AggregationResult, Result, WindowResult};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{trace, warn};

fn default_interpolator() -> InterpolatorKind {
    InterpolatorKind::Previous
}

/// A source field resampled onto the grid
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResampledField {
    pub name: String,
    #[serde(default = "default_interpolator")]
    pub interpolator: InterpolatorKind,
}

impl ResampledField {
    pub fn new<S: Into<String>>(name: S, interpolator: InterpolatorKind) -> Self {
        Self {
            name: name.into(),
            interpolator,
        }
    }
}

/// Converts an irregular series into one sampled every `interval` milliseconds
///
/// For each input record, every grid point at or before the record that all
/// interpolators can serve is emitted as a copy of the record, re-timestamped
/// to the grid point with the resampled fields replaced. The grid is anchored at
/// `start`, or at the first record when no start is given, and is never
/// re-anchored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resampler {
    interval: i64,
    start: Option<i64>,
    fields: Vec<String>,
    interpolators: Vec<Interpolator>,
    next_grid: Option<i64>,
    updated: bool,
}

impl Resampler {
    pub fn new(
        interval: u64,
        start: Option<i64>,
        fields: &[ResampledField],
    ) -> AggregationResult<Self> {
        if interval == 0 || interval > i64::MAX as u64 {
            return Err(AggregationError::InvalidValue {
                value: interval as f64,
                reason: "resampling interval must be positive".to_string(),
            });
        }
        if fields.is_empty() {
            return Err(AggregationError::TypeMismatch {
                expected: "at least one resampled field".to_string(),
                actual: "none".to_string(),
            });
        }
        let mut seen = HashSet::new();
        if let Some(dup) = fields.iter().find(|f| !seen.insert(f.name.as_str())) {
            return Err(AggregationError::TypeMismatch {
                expected: "unique resampled fields".to_string(),
                actual: format!("'{}' listed twice", dup.name),
            });
        }

        Ok(Self {
            interval: interval as i64,
            start,
            fields: fields.iter().map(|f| f.name.clone()).collect(),
            interpolators: fields
                .iter()
                .map(|f| Interpolator::new(f.interpolator))
                .collect(),
            next_grid: None,
            updated: false,
        })
    }

    pub fn interval(&self) -> u64 {
        self.interval as u64
    }

    /// Next grid timestamp to be emitted
    pub fn next_grid(&self) -> Option<i64> {
        self.next_grid
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    /// Feed one source record and return the grid records it completes
    ///
    /// A record that is missing a field or conflicts with buffered points is
    /// rejected before any state changes.
    pub fn on_record(&mut self, record: &Record) -> Result<Vec<Record>> {
        let ts = record.timestamp;
        let values = self.values(record)?;
        for (interp, &value) in self.interpolators.iter_mut().zip(&values) {
            interp.add_point(ts, value)?;
        }

        let mut grid = match self.next_grid {
            Some(grid) => grid,
            None => {
                let anchor = self.start.unwrap_or(ts);
                self.refresh(ts);
                anchor
            }
        };

        if !self.updated && !self.ready(grid) && grid < ts {
            warn!(
                start = grid,
                first_record = ts,
                "resampler start precedes the first record; grid points before it cannot be interpolated"
            );
        }
        self.updated = true;

        let mut emitted = Vec::new();
        while grid <= ts && self.ready(grid) {
            let mut out = record.clone();
            out.timestamp = grid;
            for (field, interp) in self.fields.iter().zip(&self.interpolators) {
                out.fields
                    .insert(field.clone(), FieldValue::Float(interp.interpolate(grid)?));
            }
            emitted.push(out);
            grid += self.interval;
        }
        self.next_grid = Some(grid);
        self.refresh(ts);

        trace!(emitted = emitted.len(), next_grid = grid, "resampler updated");
        Ok(emitted)
    }

    /// Reject a record that [`on_record`](Self::on_record) would not accept
    pub fn check(&self, record: &Record) -> Result<()> {
        self.values(record).map(|_| ())
    }

    fn values(&self, record: &Record) -> Result<Vec<f64>> {
        let values = self
            .fields
            .iter()
            .map(|field| record.float(field))
            .collect::<WindowResult<Vec<f64>>>()?;
        for (interp, &value) in self.interpolators.iter().zip(&values) {
            interp.check_point(record.timestamp, value)?;
        }
        Ok(values)
    }

    fn refresh(&mut self, time: i64) {
        for interp in &mut self.interpolators {
            interp.set_next_time(time);
        }
    }

    fn ready(&mut self, time: i64) -> bool {
        self.refresh(time);
        self.interpolators.iter().all(|i| i.can_interpolate(time))
    }

    pub fn reset(&mut self) {
        self.interpolators.iter_mut().for_each(Interpolator::reset);
        self.next_grid = None;
        self.updated = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resampler(kind: InterpolatorKind, start: Option<i64>) -> Resampler {
        Resampler::new(10, start, &[ResampledField::new("value", kind)]).unwrap()
    }

    fn feed(resampler: &mut Resampler, points: &[(i64, f64)]) -> Vec<(i64, f64)> {
        let mut out = Vec::new();
        for (id, &(ts, value)) in points.iter().enumerate() {
            let record = Record::new(id as u64, ts).with_float("value", value);
            for emitted in resampler.on_record(&record).unwrap() {
                out.push((emitted.timestamp, emitted.float("value").unwrap()));
            }
        }
        out
    }

    #[test]
    fn test_resampler_linear() {
        let mut r = resampler(InterpolatorKind::Linear, None);
        let out = feed(&mut r, &[(0, 0.0), (25, 25.0), (30, 0.0)]);
        assert_eq!(out, vec![(0, 0.0), (10, 10.0), (20, 20.0), (30, 0.0)]);
        assert_eq!(r.next_grid(), Some(40));
    }

    #[test]
    fn test_resampler_previous() {
        let mut r = resampler(InterpolatorKind::Previous, None);
        let out = feed(&mut r, &[(0, 0.0), (25, 25.0), (30, 0.0)]);
        assert_eq!(out, vec![(0, 0.0), (10, 0.0), (20, 0.0), (30, 25.0)]);
    }

    #[test]
    fn test_resampler_start_after_first_record() {
        let mut r = resampler(InterpolatorKind::Linear, Some(15));
        let out = feed(&mut r, &[(0, 0.0), (10, 10.0), (20, 20.0)]);
        assert_eq!(out, vec![(15, 15.0)]);
        assert_eq!(r.next_grid(), Some(25));
    }

    #[test]
    fn test_resampler_start_before_first_record_is_stuck() {
        let mut r = resampler(InterpolatorKind::Linear, Some(-5));
        let out = feed(&mut r, &[(0, 0.0), (10, 10.0)]);
        assert!(out.is_empty());
        assert_eq!(r.next_grid(), Some(-5));
    }

    #[test]
    fn test_resampler_keeps_other_fields_and_id() {
        let mut r = resampler(InterpolatorKind::Previous, None);
        let record = Record::new(42, 0).with_float("value", 1.0).with_float("other", 7.0);
        let out = r.on_record(&record).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, 42);
        assert_eq!(out[0].float("other").unwrap(), 7.0);
    }

    #[test]
    fn test_resampler_rejects_missing_field_without_mutation() {
        let mut r = resampler(InterpolatorKind::Linear, None);
        feed(&mut r, &[(0, 0.0)]);
        let before = r.clone();

        let record = Record::new(9, 5).with_float("wrong", 1.0);
        assert!(r.on_record(&record).is_err());
        assert_eq!(r, before);
    }

    #[test]
    fn test_resampler_validation() {
        let field = [ResampledField::new("value", InterpolatorKind::Linear)];
        assert!(Resampler::new(0, None, &field).is_err());
        assert!(Resampler::new(10, None, &[]).is_err());
        let dup = [field[0].clone(), field[0].clone()];
        assert!(Resampler::new(10, None, &dup).is_err());
    }

    #[test]
    fn test_resampler_reset() {
        let mut r = resampler(InterpolatorKind::Linear, None);
        feed(&mut r, &[(100, 1.0), (120, 2.0)]);
        r.reset();
        assert_eq!(r.next_grid(), None);
        let out = feed(&mut r, &[(0, 5.0)]);
        assert_eq!(out, vec![(0, 5.0)]);
    }
}
