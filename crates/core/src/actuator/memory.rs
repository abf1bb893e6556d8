use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};

use crate::types::MemoryRecord;

/// Per-sensor store of previously issued suggestions, newest last.
/// Bounded per sensor; the oldest record is evicted once full.
pub struct MemoryStore {
    inner: Mutex<HashMap<String, VecDeque<MemoryRecord>>>,
    capacity: usize,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    pub fn record(&self, sensor_id: &str, record: MemoryRecord) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let records = inner.entry(sensor_id.to_owned()).or_default();
        if records.len() == self.capacity {
            records.pop_front();
        }
        records.push_back(record);
    }

    /// All retained records for a sensor, most recent first. Empty when the
    /// sensor has never been seen.
    pub fn recall(&self, sensor_id: &str) -> Vec<MemoryRecord> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner
            .get(sensor_id)
            .map(|r| r.iter().rev().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self, sensor_id: &str) -> usize {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.get(sensor_id).map_or(0, VecDeque::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(action: &str, sequence: u64) -> MemoryRecord {
        MemoryRecord {
            action: action.into(),
            reason: "test".into(),
            alert_sequence: sequence,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn recall_unknown_sensor_is_empty() {
        let store = MemoryStore::new(10);
        assert!(store.recall("nobody").is_empty());
        assert_eq!(store.len("nobody"), 0);
    }

    #[test]
    fn records_are_per_sensor_and_ordered() {
        let store = MemoryStore::new(10);
        store.record("a", record("open window", 1));
        store.record("b", record("close vent", 2));
        store.record("a", record("start fan", 3));

        let a = store.recall("a");
        assert_eq!(a.len(), 2);
        assert_eq!(a[0].action, "start fan");
        assert_eq!(a[1].action, "open window");
        assert_eq!(store.len("b"), 1);
    }

    #[test]
    fn evicts_oldest_at_capacity() {
        let store = MemoryStore::new(3);
        for seq in 1..=5 {
            store.record("a", record("act", seq));
        }
        let records = store.recall("a");
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].alert_sequence, 5);
        assert_eq!(records[2].alert_sequence, 3);
    }
}
