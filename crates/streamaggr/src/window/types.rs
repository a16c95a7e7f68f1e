//! Window entry and delta types
//!
//! A window buffer never hands its raw contents downstream. Each update
//! produces a [`Delta`] naming exactly what entered and what was evicted, and
//! dependent operators maintain their statistics from that alone.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A `(timestamp, value)` pair stored inside a window buffer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowEntry<V> {
    /// Milliseconds since epoch
    pub timestamp: i64,
    /// Entry payload
    pub value: V,
}

impl<V> WindowEntry<V> {
    /// Create a new window entry
    pub fn new(timestamp: i64, value: V) -> Self {
        Self { timestamp, value }
    }
}

impl<V: fmt::Debug> fmt::Display for WindowEntry<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {:?})", self.timestamp, self.value)
    }
}

/// What entered and what left a window in one update step
///
/// Both sequences are in arrival order. An entry may appear in both when it
/// entered and was immediately evicted in the same step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta<V> {
    /// Entries appended by this step
    pub entered: Vec<WindowEntry<V>>,
    /// Entries evicted by this step
    pub evicted: Vec<WindowEntry<V>>,
}

impl<V> Default for Delta<V> {
    fn default() -> Self {
        Self {
            entered: Vec::new(),
            evicted: Vec::new(),
        }
    }
}

impl<V> Delta<V> {
    /// Empty delta
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.entered.is_empty() && self.evicted.is_empty()
    }

    /// Net change in window population
    pub fn net_change(&self) -> i64 {
        self.entered.len() as i64 - self.evicted.len() as i64
    }

    /// Clear both sides, keeping allocations
    pub fn clear(&mut self) {
        self.entered.clear();
        self.evicted.clear();
    }
}

/// Scalar delta
pub type ScalarDelta = Delta<f64>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_net_change() {
        let delta = Delta {
            entered: vec![WindowEntry::new(10, 1.0)],
            evicted: vec![WindowEntry::new(1, 2.0), WindowEntry::new(2, 3.0)],
        };
        assert_eq!(delta.net_change(), -1);
        assert!(!delta.is_empty());
    }

    #[test]
    fn test_delta_clear() {
        let mut delta: ScalarDelta = Delta::new();
        delta.entered.push(WindowEntry::new(1, 1.0));
        delta.clear();
        assert!(delta.is_empty());
    }

    #[test]
    fn test_entry_display() {
        let entry = WindowEntry::new(5, 2.5);
        assert_eq!(entry.to_string(), "(5, 2.5)");
    }
}
