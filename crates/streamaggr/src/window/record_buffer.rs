//! Count-based delay line of record identifiers

use crate::error::{WindowError, WindowResult};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Fixed-capacity FIFO of record ids, independent of time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordBuffer {
    capacity: usize,
    ids: VecDeque<u64>,
}

impl RecordBuffer {
    /// Create a buffer holding the last `capacity` ids
    pub fn new(capacity: usize) -> WindowResult<Self> {
        if capacity == 0 {
            return Err(WindowError::InvalidBufferSize { size: capacity });
        }
        Ok(Self {
            capacity,
            ids: VecDeque::with_capacity(capacity),
        })
    }

    /// Push an id; returns the id that fell out, if any
    pub fn update(&mut self, id: u64) -> Option<u64> {
        let dropped = if self.ids.len() == self.capacity {
            self.ids.pop_front()
        } else {
            None
        };
        self.ids.push_back(id);
        dropped
    }

    pub fn oldest(&self) -> Option<u64> {
        self.ids.front().copied()
    }

    pub fn newest(&self) -> Option<u64> {
        self.ids.back().copied()
    }

    /// Held ids, oldest first
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.ids.iter().copied()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.ids.len() == self.capacity
    }

    pub fn reset(&mut self) {
        self.ids.clear();
    }
}
