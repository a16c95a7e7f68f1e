use super::interpolator::{Interpolator, InterpolatorKind};
use crate::core::Record;
use crate::error::{AggregationError, AggregationResult, Result, WindowError};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, trace};

/// One merged input: `in_field` of records from `source` becomes `out_field`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MergerField {
    pub source: String,
    pub in_field: String,
    pub out_field: String,
    #[serde(default = "default_interpolation")]
    pub interpolation: InterpolatorKind,
}

fn default_interpolation() -> InterpolatorKind {
    InterpolatorKind::Linear
}

impl MergerField {
    pub fn new<S: Into<String>>(
        source: S,
        in_field: S,
        out_field: S,
        interpolation: InterpolatorKind,
    ) -> Self {
        Self {
            source: source.into(),
            in_field: in_field.into(),
            out_field: out_field.into(),
            interpolation,
        }
    }
}

/// Time-aligns several independently sampled series into one stream
///
/// Emission timestamps are the union of the timestamps of all inputs, starting
/// once every input has reported at least once. A point is emitted as soon as
/// every interpolator can serve it. Inputs must arrive in non-decreasing
/// timestamp order across all sources.
///
/// With `only_past`, a point interpolated at the newest known timestamp is
/// held back until a later timestamp is seen, since more inputs may still
/// arrive for the same instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Merger {
    fields: Vec<MergerField>,
    only_past: bool,
    interpolators: Vec<Interpolator>,
    present: Vec<bool>,
    all_present: bool,
    /// Pending emission timestamps, oldest first
    buffer: VecDeque<i64>,
    next: Option<i64>,
    prev: Option<i64>,
    pending: Option<MergedPoint>,
}

/// An interpolated point not yet turned into a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MergedPoint {
    timestamp: i64,
    source_id: u64,
    values: Vec<f64>,
}

impl Merger {
    pub fn new(fields: Vec<MergerField>, only_past: bool) -> AggregationResult<Self> {
        if fields.is_empty() {
            return Err(AggregationError::TypeMismatch {
                expected: "at least one merged field".to_string(),
                actual: "none".to_string(),
            });
        }
        let mut seen = HashSet::new();
        if let Some(dup) = fields.iter().find(|f| !seen.insert(f.out_field.as_str())) {
            return Err(AggregationError::TypeMismatch {
                expected: "unique output fields".to_string(),
                actual: format!("'{}' listed twice", dup.out_field),
            });
        }

        Ok(Self {
            interpolators: fields
                .iter()
                .map(|f| Interpolator::new(f.interpolation))
                .collect(),
            present: vec![false; fields.len()],
            fields,
            only_past,
            all_present: false,
            buffer: VecDeque::new(),
            next: None,
            prev: None,
            pending: None,
        })
    }

    pub fn fields(&self) -> &[MergerField] {
        &self.fields
    }

    /// Distinct source stores, in field order
    pub fn sources(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        self.fields
            .iter()
            .map(|f| f.source.as_str())
            .filter(|s| seen.insert(*s))
            .collect()
    }

    /// Whether every input has reported at least once
    pub fn is_ready(&self) -> bool {
        self.all_present
    }

    /// Next emission timestamp, if one is scheduled
    pub fn next_timestamp(&self) -> Option<i64> {
        self.next
    }

    /// Reject a record that [`on_record`](Self::on_record) would not accept
    pub fn check(&self, store: &str, record: &Record) -> Result<()> {
        self.inputs(store, record).map(|_| ())
    }

    fn inputs(&self, store: &str, record: &Record) -> Result<Vec<(usize, f64)>> {
        let ts = record.timestamp;
        let mut inputs = Vec::new();
        for (idx, field) in self.fields.iter().enumerate() {
            if field.source == store {
                let value = record.float(&field.in_field)?;
                self.interpolators[idx].check_point(ts, value)?;
                inputs.push((idx, value));
            }
        }
        let floor = self.next.into_iter().chain(self.buffer.back().copied()).max();
        if let Some(floor) = floor.filter(|&floor| ts < floor) {
            return Err(WindowError::InvalidTimestamp {
                timestamp: ts,
                reason: format!("merger already advanced to {}", floor),
            }
            .into());
        }
        Ok(inputs)
    }

    /// Feed a record of `store` and return the merged records it completes
    pub fn on_record(&mut self, store: &str, record: &Record) -> Result<Vec<Record>> {
        let inputs = self.inputs(store, record)?;
        let mut emitted = Vec::new();
        for (idx, value) in inputs {
            self.on_field(idx, value, record, &mut emitted)?;
        }
        trace!(emitted = emitted.len(), next = ?self.next, "merger updated");
        Ok(emitted)
    }

    fn on_field(
        &mut self,
        idx: usize,
        value: f64,
        record: &Record,
        emitted: &mut Vec<Record>,
    ) -> AggregationResult<()> {
        let ts = record.timestamp;
        if self.buffer.back().map_or(true, |&last| ts > last) {
            self.buffer.push_back(ts);
        }
        self.interpolators[idx].add_point(ts, value)?;

        if !self.initialize(idx, ts) {
            return Ok(());
        }
        self.handle_edge_cases(ts);

        while self.can_interpolate() {
            let Some(time) = self.next else { break };
            let values = self
                .interpolators
                .iter()
                .map(|interp| interp.interpolate(time))
                .collect::<AggregationResult<Vec<f64>>>()?;
            let point = MergedPoint {
                timestamp: time,
                source_id: record.id,
                values,
            };
            self.commit(point, emitted);
            self.advance();
        }
        Ok(())
    }

    fn initialize(&mut self, idx: usize, ts: i64) -> bool {
        if self.all_present {
            return true;
        }
        self.present[idx] = true;
        if !self.present.iter().all(|&p| p) {
            return false;
        }
        debug!(timestamp = ts, "all merger inputs present");
        self.all_present = true;
        self.next = Some(ts);
        self.shift_buffer();
        true
    }

    fn handle_edge_cases(&mut self, ts: i64) {
        if self.next.is_none() {
            self.next = Some(ts);
            self.update_interpolators();
        }
        // a timestamp that was already emitted
        if !self.only_past && self.next == self.prev {
            self.next = None;
            self.buffer.pop_front();
        }
    }

    fn can_interpolate(&self) -> bool {
        let Some(time) = self.next else {
            return false;
        };
        if !self.only_past && self.next == self.prev {
            return false;
        }
        self.interpolators.iter().all(|i| i.can_interpolate(time))
    }

    fn advance(&mut self) {
        self.prev = self.next;
        self.next = self.buffer.get(1).copied();
        self.shift_buffer();
    }

    fn shift_buffer(&mut self) {
        match self.next {
            Some(next) => {
                while self.buffer.front().is_some_and(|&ts| ts < next) {
                    self.buffer.pop_front();
                }
            }
            None => self.buffer.clear(),
        }
        self.update_interpolators();
    }

    fn update_interpolators(&mut self) {
        if let Some(next) = self.next {
            for interp in &mut self.interpolators {
                interp.set_next_time(next);
            }
        }
    }

    fn to_record(&self, point: MergedPoint) -> Record {
        self.fields
            .iter()
            .zip(point.values)
            .fold(Record::new(point.source_id, point.timestamp), |rec, (field, value)| {
                rec.with_float(field.out_field.clone(), value)
            })
    }

    fn commit(&mut self, point: MergedPoint, emitted: &mut Vec<Record>) {
        if !self.only_past {
            emitted.push(self.to_record(point));
            return;
        }
        // a held point is final once a different timestamp is interpolated
        if let Some(held) = self.pending.take() {
            if held.timestamp != point.timestamp {
                emitted.push(self.to_record(held));
            }
        }
        if self.buffer.len() > 1 {
            // a later timestamp is already known
            emitted.push(self.to_record(point));
        } else {
            self.pending = Some(point);
        }
    }

    pub fn reset(&mut self) {
        self.interpolators.iter_mut().for_each(Interpolator::reset);
        self.present.iter_mut().for_each(|p| *p = false);
        self.all_present = false;
        self.buffer.clear();
        self.next = None;
        self.prev = None;
        self.pending = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_sources(kind: InterpolatorKind, only_past: bool) -> Merger {
        Merger::new(
            vec![
                MergerField::new("a", "value", "x", kind),
                MergerField::new("b", "value", "y", kind),
            ],
            only_past,
        )
        .unwrap()
    }

    fn feed(merger: &mut Merger, store: &str, ts: i64, value: f64) -> Vec<(i64, f64, f64)> {
        let record = Record::new(ts as u64, ts).with_float("value", value);
        merger
            .on_record(store, &record)
            .unwrap()
            .into_iter()
            .map(|r| (r.timestamp, r.float("x").unwrap(), r.float("y").unwrap()))
            .collect()
    }

    #[test]
    fn test_merger_linear_scenario() {
        let mut merger = two_sources(InterpolatorKind::Linear, false);
        assert!(feed(&mut merger, "a", 0, 0.0).is_empty());
        assert!(feed(&mut merger, "b", 5, 100.0).is_empty());
        assert!(merger.is_ready());

        let out = feed(&mut merger, "a", 10, 10.0);
        assert_eq!(out, vec![(5, 5.0, 100.0)]);
        assert_eq!(merger.next_timestamp(), Some(10));
    }

    #[test]
    fn test_merger_not_ready_until_all_sources_report() {
        let mut merger = two_sources(InterpolatorKind::Previous, false);
        for ts in 0..5 {
            assert!(feed(&mut merger, "a", ts, 1.0).is_empty());
        }
        assert!(!merger.is_ready());
    }

    #[test]
    fn test_merger_union_of_timestamps() {
        let mut merger = two_sources(InterpolatorKind::Linear, false);
        let mut out = Vec::new();
        for (store, ts, value) in [
            ("a", 0, 0.0),
            ("b", 0, 0.0),
            ("a", 10, 10.0),
            ("b", 20, 40.0),
            ("a", 30, 30.0),
        ] {
            out.extend(feed(&mut merger, store, ts, value));
        }
        assert_eq!(
            out,
            vec![(0, 0.0, 0.0), (10, 10.0, 20.0), (20, 20.0, 40.0)]
        );
    }

    #[test]
    fn test_merger_only_past_holds_latest_point() {
        let mut merger = two_sources(InterpolatorKind::Linear, true);
        assert!(feed(&mut merger, "a", 0, 0.0).is_empty());
        // the t=0 point is held back until a later timestamp is known
        assert!(feed(&mut merger, "b", 0, 100.0).is_empty());
        assert!(feed(&mut merger, "a", 10, 10.0).is_empty());

        let out = feed(&mut merger, "b", 20, 200.0);
        assert_eq!(out, vec![(0, 0.0, 100.0), (10, 10.0, 150.0)]);
    }

    #[test]
    fn test_merger_rejects_past_record_without_mutation() {
        let mut merger = two_sources(InterpolatorKind::Linear, false);
        feed(&mut merger, "a", 0, 0.0);
        feed(&mut merger, "a", 10, 10.0);
        let before = merger.clone();

        let record = Record::new(1, 5).with_float("value", 100.0);
        let err = merger.on_record("b", &record).unwrap_err();
        assert!(err.is_data_error());
        assert_eq!(merger, before);
    }

    #[test]
    fn test_merger_ignores_other_stores() {
        let mut merger = two_sources(InterpolatorKind::Linear, false);
        let record = Record::new(1, 0).with_float("other", 1.0);
        assert!(merger.on_record("c", &record).unwrap().is_empty());
        assert_eq!(merger.sources(), vec!["a", "b"]);
    }

    #[test]
    fn test_merger_validation() {
        assert!(Merger::new(vec![], false).is_err());
        let field = MergerField::new("a", "v", "x", InterpolatorKind::Linear);
        assert!(Merger::new(vec![field.clone(), field], false).is_err());
    }

    #[test]
    fn test_merger_reset() {
        let mut merger = two_sources(InterpolatorKind::Linear, false);
        feed(&mut merger, "a", 10, 0.0);
        feed(&mut merger, "b", 10, 0.0);
        merger.reset();
        assert!(!merger.is_ready());
        assert!(feed(&mut merger, "a", 0, 0.0).is_empty());
    }
}
