//! Irregularly sampled exponential moving average
//!
//! The recurrence handles arbitrary gaps between samples. With
//! `alpha = Δt / interval` and `mu = exp(-alpha)`:
//!
//! ```text
//! ema = mu * ema + (nu - mu) * last + (1 - nu) * value
//! ```
//!
//! where `nu` depends on how the signal is assumed to behave between the last
//! and the new sample: `1` for `previous` (held at the last value),
//! `(1 - mu) / alpha` for `linear`, and `mu` for `next` (jumped to the new value
//! right after the last sample, which is continuous exponential decay).
//!
//! The same state machine drives scalar and sparse-vector series through
//! [`EmaValue`].

use super::trait_::ensure_finite;
use crate::core::SparseVector;
use crate::error::{AggregationError, AggregationResult};
use serde::{Deserialize, Serialize};

/// Interpolation assumed between consecutive samples
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmaInterpolation {
    Previous,
    Linear,
    Next,
}

impl EmaInterpolation {
    fn nu(self, alpha: f64, mu: f64) -> f64 {
        match self {
            EmaInterpolation::Previous => 1.0,
            EmaInterpolation::Linear => (1.0 - mu) / alpha,
            EmaInterpolation::Next => mu,
        }
    }
}

/// EMA parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmaParams {
    /// Decay interval in milliseconds
    pub interval: f64,
    /// Warm-up span in milliseconds; 0 starts from the first sample
    pub init_window: u64,
    pub interpolation: EmaInterpolation,
    /// Sparse entries below this magnitude are dropped
    pub cutoff: f64,
}

impl EmaParams {
    pub fn new(interval: f64, interpolation: EmaInterpolation) -> Self {
        Self {
            interval,
            init_window: 0,
            interpolation,
            cutoff: DEFAULT_SPARSE_CUTOFF,
        }
    }

    pub fn with_init_window(mut self, init_window: u64) -> Self {
        self.init_window = init_window;
        self
    }

    pub fn with_cutoff(mut self, cutoff: f64) -> Self {
        self.cutoff = cutoff;
        self
    }

    pub fn validate(&self) -> AggregationResult<()> {
        if !(self.interval.is_finite() && self.interval > 0.0) {
            return Err(AggregationError::InvalidValue {
                value: self.interval,
                reason: "EMA interval must be a positive number of milliseconds".to_string(),
            });
        }
        if !(self.cutoff.is_finite() && self.cutoff >= 0.0) {
            return Err(AggregationError::InvalidValue {
                value: self.cutoff,
                reason: "EMA cutoff must be non-negative".to_string(),
            });
        }
        Ok(())
    }
}

/// Default magnitude below which sparse EMA entries are dropped
pub const DEFAULT_SPARSE_CUTOFF: f64 = 0.0001;

/// Value types the EMA recurrence can blend
pub trait EmaValue: Clone + Send + Sync + std::fmt::Debug {
    /// `a * x + b * y + c * z`
    fn blend(a: f64, x: &Self, b: f64, y: &Self, c: f64, z: &Self) -> Self;

    /// Equal-weight mean of warm-up samples
    fn mean(values: &[Self]) -> Self;

    fn validate(&self) -> AggregationResult<()>;

    /// Drop negligible components after each step
    fn prune(&mut self, _cutoff: f64) {}
}

impl EmaValue for f64 {
    fn blend(a: f64, x: &f64, b: f64, y: &f64, c: f64, z: &f64) -> f64 {
        a * x + b * y + c * z
    }

    fn mean(values: &[f64]) -> f64 {
        if values.is_empty() {
            0.0
        } else {
            values.iter().sum::<f64>() / values.len() as f64
        }
    }

    fn validate(&self) -> AggregationResult<()> {
        ensure_finite(*self, "ema")
    }
}

impl EmaValue for SparseVector {
    fn blend(a: f64, x: &Self, b: f64, y: &Self, c: f64, z: &Self) -> Self {
        let xy = SparseVector::lin_comb(a, x, b, y);
        SparseVector::lin_comb(1.0, &xy, c, z)
    }

    fn mean(values: &[Self]) -> Self {
        let weight = 1.0 / values.len().max(1) as f64;
        values.iter().fold(SparseVector::empty(), |acc, value| {
            SparseVector::lin_comb(1.0, &acc, weight, value)
        })
    }

    fn validate(&self) -> AggregationResult<()> {
        Ok(())
    }

    fn prune(&mut self, cutoff: f64) {
        self.retain_above(cutoff);
    }
}

/// Lifecycle of an EMA
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmaPhase {
    /// No sample seen
    Uninitialized,
    /// Collecting samples until `init_window` has elapsed
    Warming,
    /// Decaying on every new sample
    Steady,
}

/// Exponential moving average state machine
///
/// # Examples
///
/// ```
/// use streamaggr::aggregation::{Ema, EmaInterpolation, EmaParams};
///
/// let mut ema = Ema::<f64>::new(EmaParams::new(1_000.0, EmaInterpolation::Previous)).unwrap();
/// ema.update(0, 10.0).unwrap();
/// ema.update(1_000, 20.0).unwrap();
///
/// // previous interpolation holds 10 over the whole second
/// assert!((ema.value().unwrap() - 10.0).abs() < 1e-9);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ema<V> {
    params: EmaParams,
    ema: Option<V>,
    last_value: Option<V>,
    last_timestamp: i64,
    warmup: Vec<(i64, V)>,
}

/// Scalar EMA
pub type ScalarEma = Ema<f64>;

/// Sparse-vector EMA
pub type SparseEma = Ema<SparseVector>;

impl<V: EmaValue> Ema<V> {
    pub fn new(params: EmaParams) -> AggregationResult<Self> {
        params.validate()?;
        Ok(Self {
            params,
            ema: None,
            last_value: None,
            last_timestamp: 0,
            warmup: Vec::new(),
        })
    }

    pub fn params(&self) -> &EmaParams {
        &self.params
    }

    /// Feed one sample
    pub fn update(&mut self, timestamp: i64, value: V) -> AggregationResult<()> {
        value.validate()?;
        if self.last_value.is_some() && timestamp < self.last_timestamp {
            return Err(AggregationError::InvalidValue {
                value: timestamp as f64,
                reason: format!(
                    "EMA sample older than last sample at {}",
                    self.last_timestamp
                ),
            });
        }

        match (self.ema.take(), self.last_value.as_ref()) {
            (None, None) if self.params.init_window == 0 => {
                self.ema = Some(value.clone());
            }
            (Some(ema), Some(last)) => {
                let elapsed = if timestamp == self.last_timestamp {
                    1.0
                } else {
                    (timestamp - self.last_timestamp) as f64
                };
                let alpha = elapsed / self.params.interval;
                let mu = (-alpha).exp();
                let nu = self.params.interpolation.nu(alpha, mu);
                let mut next = V::blend(mu, &ema, nu - mu, last, 1.0 - nu, &value);
                next.prune(self.params.cutoff);
                self.ema = Some(next);
            }
            (ema, _) => {
                debug_assert!(ema.is_none());
                self.warmup.push((timestamp, value.clone()));
                let started = self.warmup[0].0;
                let elapsed = i128::from(timestamp) - i128::from(started);
                if elapsed > i128::from(self.params.init_window) {
                    let samples: Vec<V> = self.warmup.drain(..).map(|(_, v)| v).collect();
                    let mut initial = V::mean(&samples);
                    initial.prune(self.params.cutoff);
                    self.ema = Some(initial);
                }
            }
        }

        self.last_value = Some(value);
        self.last_timestamp = timestamp;
        Ok(())
    }

    /// Current average; the latest raw sample while warming up
    pub fn value(&self) -> Option<V> {
        self.ema.clone().or_else(|| self.last_value.clone())
    }

    pub fn timestamp(&self) -> Option<i64> {
        self.last_value.as_ref().map(|_| self.last_timestamp)
    }

    pub fn phase(&self) -> EmaPhase {
        match (&self.ema, &self.last_value) {
            (Some(_), _) => EmaPhase::Steady,
            (None, Some(_)) => EmaPhase::Warming,
            (None, None) => EmaPhase::Uninitialized,
        }
    }

    /// Back to [`EmaPhase::Uninitialized`]
    pub fn reset(&mut self) {
        self.ema = None;
        self.last_value = None;
        self.last_timestamp = 0;
        self.warmup.clear();
    }
}
