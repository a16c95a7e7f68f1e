//! Single-sample tick source
//!
//! A [`Tick`] adapts raw records into a scalar `(timestamp, value)` stream and
//! holds exactly the most recent sample.

use crate::error::{WindowError, WindowResult};
use serde::{Deserialize, Serialize};

/// Most recent scalar sample of a store field
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    value: f64,
    timestamp: i64,
    initialized: bool,
}

impl Tick {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the held sample
    pub fn update(&mut self, timestamp: i64, value: f64) -> WindowResult<()> {
        self.check_monotonic(timestamp)?;
        self.value = value;
        self.timestamp = timestamp;
        self.initialized = true;
        Ok(())
    }

    /// Move the clock forward; the held value is unchanged
    pub fn advance_to(&mut self, timestamp: i64) -> WindowResult<()> {
        self.check_monotonic(timestamp)?;
        self.timestamp = timestamp;
        Ok(())
    }

    fn check_monotonic(&self, timestamp: i64) -> WindowResult<()> {
        if self.initialized && timestamp < self.timestamp {
            return Err(WindowError::InvalidTimestamp {
                timestamp,
                reason: format!("older than last tick {}", self.timestamp),
            });
        }
        Ok(())
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
