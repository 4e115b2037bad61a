//! Bounded ring of recent cycle records.

use std::collections::VecDeque;

use crate::model::CycleRecord;

#[derive(Debug, Default)]
pub struct CycleHistory {
    records: VecDeque<CycleRecord>,
}

impl CycleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `record`, dropping the oldest entries beyond `limit`.
    pub fn push(&mut self, record: CycleRecord, limit: usize) {
        self.records.push_back(record);
        while self.records.len() > limit.max(1) {
            self.records.pop_front();
        }
    }

    /// The newest `n` records, oldest first.
    pub fn last(&self, n: usize) -> Vec<CycleRecord> {
        let skip = self.records.len().saturating_sub(n);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
