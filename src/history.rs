//! Bounded per-entity history of committed operations

use crate::types::{EntityId, TransactionRecord};
use dashmap::DashMap;
use std::collections::VecDeque;

/// Fixed-capacity ring of committed operation records per entity
#[derive(Debug)]
pub struct HistoryLog {
    capacity: usize,
    entries: DashMap<EntityId, VecDeque<TransactionRecord>>,
}

impl HistoryLog {
    /// Create log retaining `capacity` records per entity
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: DashMap::new(),
        }
    }

    /// Append a committed record, evicting the oldest when full
    pub fn append(&self, record: TransactionRecord) {
        if self.capacity == 0 {
            return;
        }

        let mut entry = self.entries.entry(record.entity.clone()).or_default();
        let log = entry.value_mut();
        if log.len() == self.capacity {
            log.pop_front();
        }
        log.push_back(record);
    }

    /// Append several records committed together
    pub fn append_all(&self, records: impl IntoIterator<Item = TransactionRecord>) {
        for record in records {
            self.append(record);
        }
    }

    /// Most recent records, newest first; `limit = None` returns all retained
    pub fn get(&self, entity: &EntityId, limit: Option<usize>) -> Vec<TransactionRecord> {
        let Some(log) = self.entries.get(entity) else {
            return Vec::new();
        };

        let take = limit.unwrap_or(log.len());
        log.iter().rev().take(take).cloned().collect()
    }

    /// Drop all records for an entity
    pub fn clear(&self, entity: &EntityId) {
        self.entries.remove(entity);
    }

    /// Configured per-entity capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
