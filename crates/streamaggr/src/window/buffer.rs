//! Time-based window buffer
//!
//! [`WindowBuffer`] holds every `(timestamp, value)` pair with
//! `timestamp > latest - winsize`, in arrival order. It is generic over the
//! value type so scalar and sparse-vector series share one implementation.
//!
//! # Example
//!
//! ```rust
//! use streamaggr::window::WindowBuffer;
//!
//! let mut buffer = WindowBuffer::<f64>::new(10);
//! buffer.update(0, 1.0).unwrap();
//! buffer.update(5, 2.0).unwrap();
//! let delta = buffer.update(12, 3.0).unwrap();
//!
//! assert_eq!(delta.evicted.len(), 2);
//! assert_eq!(buffer.len(), 1);
//! ```

use super::types::{Delta, WindowEntry};
use crate::error::{WindowError, WindowResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::trace;

/// Sliding window over the trailing `winsize` milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowBuffer<V> {
    winsize: u64,
    entries: VecDeque<WindowEntry<V>>,
    last_timestamp: Option<i64>,
    #[serde(skip, default = "Delta::default")]
    last_delta: Delta<V>,
}

impl<V: Clone> WindowBuffer<V> {
    /// Create an empty buffer; `winsize = 0` keeps only the newest entry
    pub fn new(winsize: u64) -> Self {
        Self {
            winsize,
            entries: VecDeque::new(),
            last_timestamp: None,
            last_delta: Delta::default(),
        }
    }

    /// Window length in milliseconds
    pub fn winsize(&self) -> u64 {
        self.winsize
    }

    /// Append one entry and evict what fell out of the window
    pub fn update(&mut self, timestamp: i64, value: V) -> WindowResult<&Delta<V>> {
        self.update_batch(vec![WindowEntry::new(timestamp, value)])
    }

    /// Append a batch of entries (already in timestamp order)
    ///
    /// The whole batch is checked before anything is mutated; a rejected batch
    /// leaves the buffer untouched.
    pub fn update_batch(&mut self, batch: Vec<WindowEntry<V>>) -> WindowResult<&Delta<V>> {
        let mut previous = self.last_timestamp;
        for entry in &batch {
            self.check_monotonic(previous, entry.timestamp)?;
            previous = Some(entry.timestamp);
        }

        self.last_delta.clear();
        let Some(newest) = batch.last().map(|entry| entry.timestamp) else {
            return Ok(&self.last_delta);
        };

        self.entries.extend(batch.iter().cloned());
        self.last_delta.entered = batch;
        self.last_timestamp = Some(newest);
        self.evict_until(newest);

        trace!(
            entered = self.last_delta.entered.len(),
            evicted = self.last_delta.evicted.len(),
            "window buffer updated"
        );
        Ok(&self.last_delta)
    }

    /// Advance the clock without a new entry
    pub fn advance_to(&mut self, timestamp: i64) -> WindowResult<&Delta<V>> {
        self.check_monotonic(self.last_timestamp, timestamp)?;
        self.last_delta.clear();
        self.last_timestamp = Some(timestamp);
        self.evict_until(timestamp);
        Ok(&self.last_delta)
    }

    fn check_monotonic(&self, previous: Option<i64>, timestamp: i64) -> WindowResult<()> {
        match previous {
            Some(last) if timestamp < last => Err(WindowError::InvalidTimestamp {
                timestamp,
                reason: format!("older than last seen timestamp {}", last),
            }),
            _ => Ok(()),
        }
    }

    fn evict_until(&mut self, now: i64) {
        // widened so no winsize can wrap the cutoff
        let cutoff = i128::from(now) - i128::from(self.winsize);
        while self
            .entries
            .front()
            .is_some_and(|entry| i128::from(entry.timestamp) <= cutoff)
        {
            // winsize = 0 must still keep the newest entry
            if self.entries.len() == 1 && self.winsize == 0 {
                break;
            }
            if let Some(entry) = self.entries.pop_front() {
                self.last_delta.evicted.push(entry);
            }
        }
    }

    /// Undo the most recent update or clock advance
    ///
    /// `previous` is the buffer timestamp before that call. Only valid while
    /// [`last_delta`](Self::last_delta) still describes that call.
    pub(crate) fn revert(&mut self, previous: Option<i64>) {
        let delta = std::mem::take(&mut self.last_delta);
        for entry in delta.evicted.into_iter().rev() {
            self.entries.push_front(entry);
        }
        let keep = self.entries.len().saturating_sub(delta.entered.len());
        self.entries.truncate(keep);
        self.last_timestamp = previous;
    }

    /// Delta produced by the most recent update
    pub fn last_delta(&self) -> &Delta<V> {
        &self.last_delta
    }

    /// Current window contents, oldest first
    pub fn entries(&self) -> impl Iterator<Item = &WindowEntry<V>> {
        self.entries.iter()
    }

    pub fn newest(&self) -> Option<&WindowEntry<V>> {
        self.entries.back()
    }

    pub fn oldest(&self) -> Option<&WindowEntry<V>> {
        self.entries.front()
    }

    /// Timestamp of the latest update (record or clock advance)
    pub fn timestamp(&self) -> Option<i64> {
        self.last_timestamp
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Back to the post-construction state
    pub fn reset(&mut self) {
        self.entries.clear();
        self.last_timestamp = None;
        self.last_delta.clear();
    }
}
