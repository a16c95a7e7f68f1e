//! Windowed histograms
//!
//! [`OnlineHistogram`] keeps equal-width bin counts over `[lower, upper]`,
//! optionally flanked by open-ended underflow/overflow bins.
//!
//! Out-of-range policy: a value below `lower_bound` (above `upper_bound`) goes
//! to the underflow (overflow) bin when that bin is enabled. Otherwise it is
//! dropped and counted in [`OnlineHistogram::dropped`]. Evicting a dropped
//! value decrements that counter, so at every point
//! `Σ counts + dropped == window population`. A value equal to
//! `upper_bound` belongs to the last finite bin.
//!
//! [`SlottedHistogram`] additionally keys counts by the position of the
//! timestamp within a repeating period.

use super::trait_::Aggregator;
use crate::error::{AggregationError, AggregationResult};
use crate::window::{Delta, WindowEntry};
use serde::{Deserialize, Serialize};

/// Histogram shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistogramParams {
    pub lower_bound: f64,
    pub upper_bound: f64,
    pub bins: usize,
    pub include_neg_inf: bool,
    pub include_pos_inf: bool,
}

impl HistogramParams {
    pub fn new(lower_bound: f64, upper_bound: f64, bins: usize) -> Self {
        Self {
            lower_bound,
            upper_bound,
            bins,
            include_neg_inf: false,
            include_pos_inf: false,
        }
    }

    pub fn with_neg_inf(mut self) -> Self {
        self.include_neg_inf = true;
        self
    }

    pub fn with_pos_inf(mut self) -> Self {
        self.include_pos_inf = true;
        self
    }

    pub fn validate(&self) -> AggregationResult<()> {
        if !(self.lower_bound.is_finite() && self.upper_bound.is_finite()) {
            return Err(AggregationError::HistogramConfig {
                reason: "bounds must be finite".to_string(),
            });
        }
        if self.lower_bound >= self.upper_bound {
            return Err(AggregationError::HistogramConfig {
                reason: format!(
                    "lower bound {} must be smaller than upper bound {}",
                    self.lower_bound, self.upper_bound
                ),
            });
        }
        if self.bins == 0 {
            return Err(AggregationError::HistogramConfig {
                reason: "number of bins must be greater than 0".to_string(),
            });
        }
        Ok(())
    }

    /// Length of the output vector including enabled infinity bins
    pub fn dimension(&self) -> usize {
        self.bins + usize::from(self.include_neg_inf) + usize::from(self.include_pos_inf)
    }

    fn bin_width(&self) -> f64 {
        (self.upper_bound - self.lower_bound) / self.bins as f64
    }

    fn find_bin(&self, value: f64) -> Bin {
        if value < self.lower_bound {
            return Bin::Under;
        }
        if value > self.upper_bound {
            return Bin::Over;
        }
        let index = ((value - self.lower_bound) / self.bin_width()).floor() as usize;
        Bin::Finite(index.min(self.bins - 1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Bin {
    Under,
    Finite(usize),
    Over,
}

/// Equal-width histogram maintained from window deltas
///
/// # Examples
///
/// ```
/// use streamaggr::aggregation::{Aggregator, HistogramParams, OnlineHistogram};
/// use streamaggr::window::WindowEntry;
///
/// let mut hist = OnlineHistogram::new(HistogramParams::new(0.0, 5.0, 5)).unwrap();
/// for (ts, value) in [0.0, 0.0, 1.0, 7.0].into_iter().enumerate() {
///     hist.update(&WindowEntry::new(ts as i64, value)).unwrap();
/// }
/// assert_eq!(hist.finalize(), vec![2, 1, 0, 0, 0]);
/// assert_eq!(hist.dropped(), 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OnlineHistogram {
    params: HistogramParams,
    counts: Vec<u64>,
    neg_inf: u64,
    pos_inf: u64,
    dropped: u64,
}

impl OnlineHistogram {
    pub fn new(params: HistogramParams) -> AggregationResult<Self> {
        params.validate()?;
        Ok(Self {
            counts: vec![0; params.bins],
            params,
            neg_inf: 0,
            pos_inf: 0,
            dropped: 0,
        })
    }

    pub fn params(&self) -> &HistogramParams {
        &self.params
    }

    /// Bin edges of the finite bins (`bins + 1` values)
    pub fn bounds(&self) -> Vec<f64> {
        let width = self.params.bin_width();
        (0..=self.params.bins)
            .map(|i| self.params.lower_bound + i as f64 * width)
            .collect()
    }

    /// Finite bin counts only
    pub fn bin_counts(&self) -> &[u64] {
        &self.counts
    }

    /// Values currently in the window that fell outside every enabled bin
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Counts as floats, for vector consumers
    pub fn to_vector(&self) -> Vec<f64> {
        self.finalize().into_iter().map(|c| c as f64).collect()
    }

    fn slot_for(&mut self, value: f64) -> &mut u64 {
        match self.params.find_bin(value) {
            Bin::Under if self.params.include_neg_inf => &mut self.neg_inf,
            Bin::Over if self.params.include_pos_inf => &mut self.pos_inf,
            Bin::Finite(index) => &mut self.counts[index],
            _ => &mut self.dropped,
        }
    }
}

impl Aggregator for OnlineHistogram {
    type Input = f64;
    type Output = Vec<u64>;

    fn update(&mut self, entry: &WindowEntry<f64>) -> AggregationResult<()> {
        *self.slot_for(entry.value) += 1;
        Ok(())
    }

    fn retract(&mut self, entry: &WindowEntry<f64>) -> AggregationResult<()> {
        let slot = self.slot_for(entry.value);
        *slot = slot.saturating_sub(1);
        Ok(())
    }

    fn check(&self, delta: &Delta<f64>) -> AggregationResult<()> {
        match delta.entered.iter().find(|entry| entry.value.is_nan()) {
            Some(entry) => Err(AggregationError::InvalidValue {
                value: entry.value,
                reason: "histogram cannot bin NaN".to_string(),
            }),
            None => Ok(()),
        }
    }

    /// `[neg_inf?] counts [pos_inf?]`
    fn finalize(&self) -> Vec<u64> {
        let mut out = Vec::with_capacity(self.params.dimension());
        if self.params.include_neg_inf {
            out.push(self.neg_inf);
        }
        out.extend_from_slice(&self.counts);
        if self.params.include_pos_inf {
            out.push(self.pos_inf);
        }
        out
    }

    fn reset(&mut self) {
        self.counts.iter_mut().for_each(|c| *c = 0);
        self.neg_inf = 0;
        self.pos_inf = 0;
        self.dropped = 0;
    }

    /// Window population seen by the histogram, dropped values included
    fn count(&self) -> u64 {
        self.counts.iter().sum::<u64>() + self.neg_inf + self.pos_inf + self.dropped
    }
}

/// Slotted histogram shape
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlottedParams {
    /// Period length in milliseconds (e.g. one week)
    pub period: u64,
    /// Span before "now" aggregated on read, in milliseconds
    pub window: u64,
    /// Number of categories; values are category ids in `[0, bins)`
    pub bins: usize,
    /// Slot length in milliseconds
    pub granularity: u64,
}

impl SlottedParams {
    pub fn validate(&self) -> AggregationResult<()> {
        let reject = |reason: &str| {
            Err(AggregationError::HistogramConfig {
                reason: reason.to_string(),
            })
        };
        if self.bins == 0 {
            return reject("number of bins must be greater than 0");
        }
        if self.granularity == 0 {
            return reject("granularity must be greater than 0");
        }
        if self.period == 0 || self.period % self.granularity != 0 {
            return reject("period must be a positive multiple of granularity");
        }
        if i64::try_from(self.period).is_err() {
            return reject("period exceeds the timestamp range");
        }
        if self.window == 0 || self.window >= self.period {
            return reject("window must be positive and shorter than period");
        }
        Ok(())
    }

    pub fn slot_count(&self) -> usize {
        (self.period / self.granularity) as usize
    }

    /// `(timestamp mod period) / granularity`
    pub fn slot_of(&self, timestamp: i64) -> usize {
        (timestamp.rem_euclid(self.period as i64) as u64 / self.granularity) as usize
    }
}

/// Category counts per time-of-period slot
///
/// Reads sum the slots covering `[now - window, now]` (quantized to
/// `granularity`), so every whole period still buffered upstream contributes
/// to the same slots. Category ids outside `[0, bins)` are dropped and counted
/// like out-of-range histogram values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlottedHistogram {
    params: SlottedParams,
    slots: Vec<Vec<u64>>,
    dropped: u64,
    last_timestamp: Option<i64>,
}

impl SlottedHistogram {
    pub fn new(params: SlottedParams) -> AggregationResult<Self> {
        params.validate()?;
        Ok(Self {
            slots: vec![vec![0; params.bins]; params.slot_count()],
            params,
            dropped: 0,
            last_timestamp: None,
        })
    }

    pub fn params(&self) -> &SlottedParams {
        &self.params
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Timestamp reads are anchored at
    pub fn last_timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    /// Counts of one slot
    pub fn slot_counts(&self, slot: usize) -> Option<&[u64]> {
        self.slots.get(slot).map(Vec::as_slice)
    }

    fn category(&self, value: f64) -> Option<usize> {
        let category = value.trunc();
        (category >= 0.0 && category < self.params.bins as f64).then_some(category as usize)
    }

    fn cell_for(&mut self, timestamp: i64, value: f64) -> &mut u64 {
        let slot = self.params.slot_of(timestamp);
        match self.category(value) {
            Some(category) => &mut self.slots[slot][category],
            None => &mut self.dropped,
        }
    }

    /// Aggregated counts for the slots between `from` and `to` inclusive
    pub fn stats(&self, from: i64, to: i64) -> Vec<u64> {
        let mut out = vec![0; self.params.bins];
        if to < from {
            return out;
        }
        let gran = self.params.granularity as i64;
        let first = from.div_euclid(gran) * gran;
        let last = to.div_euclid(gran) * gran;
        let visits = (((last - first) / gran) as usize + 1).min(self.params.slot_count());
        for step in 0..visits {
            let slot = self.params.slot_of(first + step as i64 * gran);
            for (acc, count) in out.iter_mut().zip(&self.slots[slot]) {
                *acc += count;
            }
        }
        out
    }

    pub fn to_vector(&self) -> Vec<f64> {
        self.finalize().into_iter().map(|c| c as f64).collect()
    }
}

impl Aggregator for SlottedHistogram {
    type Input = f64;
    type Output = Vec<u64>;

    fn update(&mut self, entry: &WindowEntry<f64>) -> AggregationResult<()> {
        *self.cell_for(entry.timestamp, entry.value) += 1;
        self.last_timestamp = Some(entry.timestamp);
        Ok(())
    }

    fn retract(&mut self, entry: &WindowEntry<f64>) -> AggregationResult<()> {
        let cell = self.cell_for(entry.timestamp, entry.value);
        *cell = cell.saturating_sub(1);
        Ok(())
    }

    fn check(&self, delta: &Delta<f64>) -> AggregationResult<()> {
        match delta.entered.iter().find(|entry| entry.value.is_nan()) {
            Some(entry) => Err(AggregationError::InvalidValue {
                value: entry.value,
                reason: "slotted histogram cannot bin NaN".to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Counts for `[last - window, last]`
    fn finalize(&self) -> Vec<u64> {
        match self.last_timestamp {
            Some(now) => self.stats(now - self.params.window as i64, now),
            None => vec![0; self.params.bins],
        }
    }

    fn reset(&mut self) {
        self.slots
            .iter_mut()
            .for_each(|slot| slot.iter_mut().for_each(|c| *c = 0));
        self.dropped = 0;
        self.last_timestamp = None;
    }

    fn count(&self) -> u64 {
        self.slots.iter().flatten().sum::<u64>() + self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::window::WindowBuffer;

    const MINUTE: i64 = 60_000;
    const HOUR: i64 = 60 * MINUTE;

    #[test]
    fn test_histogram_params_validation() {
        assert!(OnlineHistogram::new(HistogramParams::new(1.0, 1.0, 5)).is_err());
        assert!(OnlineHistogram::new(HistogramParams::new(0.0, 1.0, 0)).is_err());
        assert!(OnlineHistogram::new(HistogramParams::new(f64::NEG_INFINITY, 1.0, 2)).is_err());
    }

    #[test]
    fn test_histogram_window_scenario() {
        let mut buffer = WindowBuffer::new((2 * HOUR) as u64);
        let mut hist = OnlineHistogram::new(HistogramParams::new(0.0, 5.0, 5)).unwrap();

        for (i, value) in [0.0, 0.0, 1.0, 0.0, 0.0, 0.0].into_iter().enumerate() {
            hist.apply(buffer.update(i as i64 * MINUTE, value).unwrap()).unwrap();
        }
        assert_eq!(hist.finalize(), vec![5, 1, 0, 0, 0]);

        for (i, value) in [0.0, 0.0, 1.0, 0.0, 2.0, 2.0].into_iter().enumerate() {
            let ts = (i as i64 + 1) * HOUR + 13 * MINUTE;
            hist.apply(buffer.update(ts, value).unwrap()).unwrap();
        }
        // cutoff is 4:13, so only the 5:13 and 6:13 entries remain
        assert_eq!(buffer.len(), 2);
        assert_eq!(hist.finalize(), vec![0, 0, 2, 0, 0]);
        assert_eq!(hist.count() as usize, buffer.len());
    }

    #[test]
    fn test_histogram_upper_bound_in_last_bin() {
        let mut hist = OnlineHistogram::new(HistogramParams::new(0.0, 10.0, 5)).unwrap();
        hist.update(&WindowEntry::new(1, 10.0)).unwrap();
        assert_eq!(hist.finalize(), vec![0, 0, 0, 0, 1]);
    }

    #[test]
    fn test_histogram_infinity_bins() {
        let params = HistogramParams::new(0.0, 10.0, 5).with_neg_inf().with_pos_inf();
        let mut hist = OnlineHistogram::new(params).unwrap();
        for (ts, value) in [-1.0, 3.0, 11.0, 11.5].into_iter().enumerate() {
            hist.update(&WindowEntry::new(ts as i64, value)).unwrap();
        }
        assert_eq!(hist.finalize(), vec![1, 0, 1, 0, 0, 0, 2]);
        assert_eq!(hist.params().dimension(), 7);
        assert_eq!(hist.dropped(), 0);

        hist.retract(&WindowEntry::new(2, 11.0)).unwrap();
        assert_eq!(hist.finalize()[6], 1);
    }

    #[test]
    fn test_histogram_drop_policy_keeps_population() {
        let mut buffer = WindowBuffer::new(3);
        let mut hist = OnlineHistogram::new(HistogramParams::new(0.0, 1.0, 4)).unwrap();
        let values = [-2.0, 0.5, 3.0, 0.9, 0.1, -0.1, 7.0, 0.25, 1.0, 0.0];
        for (ts, value) in values.into_iter().enumerate() {
            hist.apply(buffer.update(ts as i64, value).unwrap()).unwrap();
            let counted: u64 = hist.finalize().iter().sum();
            assert_eq!(counted + hist.dropped(), buffer.len() as u64);
        }
    }

    #[test]
    fn test_histogram_rejects_nan() {
        let mut hist = OnlineHistogram::new(HistogramParams::new(0.0, 1.0, 2)).unwrap();
        let delta = Delta {
            entered: vec![WindowEntry::new(1, f64::NAN)],
            evicted: vec![],
        };
        assert!(hist.apply(&delta).is_err());
        assert_eq!(hist.count(), 0);
    }

    #[test]
    fn test_histogram_bounds() {
        let hist = OnlineHistogram::new(HistogramParams::new(0.0, 10.0, 5)).unwrap();
        assert_eq!(hist.bounds(), vec![0.0, 2.0, 4.0, 6.0, 8.0, 10.0]);
    }

    #[test]
    fn test_histogram_serialization() {
        let mut hist = OnlineHistogram::new(HistogramParams::new(0.0, 10.0, 5)).unwrap();
        hist.update(&WindowEntry::new(1, 3.0)).unwrap();
        let json = serde_json::to_string(&hist).unwrap();
        let restored: OnlineHistogram = serde_json::from_str(&json).unwrap();
        assert_eq!(restored, hist);
    }

    fn weekly() -> SlottedParams {
        SlottedParams {
            period: (7 * 24 * HOUR) as u64,
            window: (2 * HOUR) as u64,
            bins: 5,
            granularity: (5 * MINUTE) as u64,
        }
    }

    #[test]
    fn test_slotted_params_validation() {
        let mut params = weekly();
        params.granularity = 7 * MINUTE as u64;
        assert!(SlottedHistogram::new(params).is_err());

        let mut params = weekly();
        params.window = params.period;
        assert!(SlottedHistogram::new(params).is_err());

        let mut params = weekly();
        params.granularity = 1 << 62;
        params.period = 1 << 63;
        assert!(SlottedHistogram::new(params).is_err());

        assert!(SlottedHistogram::new(weekly()).is_ok());
    }

    #[test]
    fn test_slotted_same_offset_accumulates_across_periods() {
        let params = weekly();
        let week = params.period as i64;
        let mut hist = SlottedHistogram::new(params).unwrap();

        hist.update(&WindowEntry::new(10 * HOUR, 3.0)).unwrap();
        hist.update(&WindowEntry::new(week + 10 * HOUR, 3.0)).unwrap();
        assert_eq!(hist.finalize(), vec![0, 0, 0, 2, 0]);

        // an hour later in the second week, both still fall within the 2h window
        hist.update(&WindowEntry::new(week + 11 * HOUR, 1.0)).unwrap();
        assert_eq!(hist.finalize(), vec![0, 1, 0, 2, 0]);
    }

    #[test]
    fn test_slotted_eviction_hits_original_slot() {
        let mut hist = SlottedHistogram::new(weekly()).unwrap();
        hist.update(&WindowEntry::new(HOUR, 2.0)).unwrap();
        hist.update(&WindowEntry::new(HOUR + MINUTE, 2.0)).unwrap();
        hist.retract(&WindowEntry::new(HOUR, 2.0)).unwrap();

        let slot = hist.params().slot_of(HOUR);
        assert_eq!(hist.slot_counts(slot).unwrap()[2], 1);
        assert_eq!(hist.count(), 1);
    }

    #[test]
    fn test_slotted_out_of_range_category_dropped() {
        let mut hist = SlottedHistogram::new(weekly()).unwrap();
        hist.update(&WindowEntry::new(HOUR, 9.0)).unwrap();
        hist.update(&WindowEntry::new(HOUR, -1.0)).unwrap();
        assert_eq!(hist.finalize(), vec![0; 5]);
        assert_eq!(hist.dropped(), 2);
    }

    #[test]
    fn test_slotted_reset() {
        let mut hist = SlottedHistogram::new(weekly()).unwrap();
        hist.update(&WindowEntry::new(HOUR, 2.0)).unwrap();
        hist.reset();
        assert_eq!(hist.count(), 0);
        assert_eq!(hist.last_timestamp(), None);
    }
}
