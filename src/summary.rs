//! Summary ring (spec §4.2, C3).
//!
//! Fixed-capacity ordered sequence of accepted-event summaries, used to back
//! `GET /store/recent`.

use serde::Serialize;
use std::collections::VecDeque;

#[derive(Debug, Clone, Serialize)]
pub struct SummaryRecord {
    pub ts_ms: i64,
    pub fingerprint: String,
    pub bytes: usize,
    pub duplicate: bool,
}

#[derive(Debug)]
pub struct SummaryRing {
    records: VecDeque<SummaryRecord>,
    capacity: usize,
}

impl SummaryRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    /// Append a record, trimming from the front to respect capacity.
    pub fn push(&mut self, record: SummaryRecord) {
        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// The last `min(k, len)` records, oldest first.
    pub fn tail(&self, k: usize) -> Vec<SummaryRecord> {
        let len = self.records.len();
        let skip = len.saturating_sub(k);
        self.records.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
