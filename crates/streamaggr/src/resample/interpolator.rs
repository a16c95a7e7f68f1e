//! Buffered point interpolators
//!
//! An interpolator holds the points it may still need, oldest first. Callers
//! announce the next query time with [`Interpolator::set_next_time`], which
//! drops points that can no longer matter, then ask
//! [`Interpolator::can_interpolate`] before reading.

use crate::error::{AggregationError, AggregationResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;

/// Interpolation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterpolatorKind {
    /// Value of the last point at or before the query time; needs a point at or after it
    Previous,
    /// Straight line between the points around the query time
    Linear,
    /// Value of the newest point at or before the query time
    Current,
}

impl fmt::Display for InterpolatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterpolatorKind::Previous => write!(f, "previous"),
            InterpolatorKind::Linear => write!(f, "linear"),
            InterpolatorKind::Current => write!(f, "current"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interpolator {
    kind: InterpolatorKind,
    points: VecDeque<(i64, f64)>,
}

impl Interpolator {
    pub fn new(kind: InterpolatorKind) -> Self {
        Self {
            kind,
            points: VecDeque::new(),
        }
    }

    pub fn kind(&self) -> InterpolatorKind {
        self.kind
    }

    /// Whether [`add_point`](Self::add_point) would accept the point
    ///
    /// A point may repeat the newest timestamp only with the same value.
    pub fn check_point(&self, timestamp: i64, value: f64) -> AggregationResult<()> {
        if !value.is_finite() {
            return Err(AggregationError::InvalidValue {
                value,
                reason: "interpolator points must be finite".to_string(),
            });
        }
        match self.points.back() {
            Some(&(last_ts, last_value))
                if timestamp < last_ts || (timestamp == last_ts && value != last_value) =>
            {
                Err(AggregationError::Interpolation {
                    timestamp,
                    reason: format!(
                        "point precedes or conflicts with buffered point ({}, {})",
                        last_ts, last_value
                    ),
                })
            }
            _ => Ok(()),
        }
    }

    pub fn add_point(&mut self, timestamp: i64, value: f64) -> AggregationResult<()> {
        self.check_point(timestamp, value)?;
        self.points.push_back((timestamp, value));
        Ok(())
    }

    /// Drop points that cannot contribute at or after `time`
    pub fn set_next_time(&mut self, time: i64) {
        match self.kind {
            InterpolatorKind::Previous => {
                while self.second().is_some_and(|(ts, _)| ts < time) {
                    self.points.pop_front();
                }
            }
            InterpolatorKind::Linear | InterpolatorKind::Current => {
                while self.second().is_some_and(|(ts, _)| ts <= time) {
                    self.points.pop_front();
                }
            }
        }
    }

    pub fn can_interpolate(&self, time: i64) -> bool {
        let Some(&(oldest, _)) = self.points.front() else {
            return false;
        };
        match self.kind {
            InterpolatorKind::Previous | InterpolatorKind::Linear => {
                oldest == time
                    || self
                        .second()
                        .is_some_and(|(next, _)| oldest <= time && time <= next)
            }
            InterpolatorKind::Current => oldest <= time,
        }
    }

    pub fn interpolate(&self, time: i64) -> AggregationResult<f64> {
        if !self.can_interpolate(time) {
            return Err(AggregationError::Interpolation {
                timestamp: time,
                reason: format!("{} interpolator has no bracketing points", self.kind),
            });
        }
        let Some(&(oldest_ts, oldest_value)) = self.points.front() else {
            return Err(AggregationError::Interpolation {
                timestamp: time,
                reason: "no points buffered".to_string(),
            });
        };
        match (self.kind, self.second()) {
            (InterpolatorKind::Linear, Some((next_ts, next_value))) if time != oldest_ts => {
                let ratio = (time - oldest_ts) as f64 / (next_ts - oldest_ts) as f64;
                Ok(oldest_value + ratio * (next_value - oldest_value))
            }
            _ => Ok(oldest_value),
        }
    }

    fn second(&self) -> Option<(i64, f64)> {
        self.points.get(1).copied()
    }

    /// Buffered point count
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn reset(&mut self) {
        self.points.clear();
    }
}
