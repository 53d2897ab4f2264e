//! Bounded scaling history.

use std::collections::VecDeque;

use tierscale_core::ScalingRecord;

/// FIFO of applied transitions. Once full, each push evicts the oldest
/// record. Iteration order is chronological.
#[derive(Debug, Clone)]
pub struct ScalingHistory {
    records: VecDeque<ScalingRecord>,
    capacity: usize,
}

impl ScalingHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, record: ScalingRecord) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    /// The most recent `limit` records, oldest first.
    pub fn last(&self, limit: usize) -> Vec<ScalingRecord> {
        let skip = self.records.len().saturating_sub(limit);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
