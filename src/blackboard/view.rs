//! Blackboard store: the per-request shared state.
//!
//! Each field is written exactly once. Writes lock only the shard holding the
//! field, so sources writing different fields never contend on a global
//! lock. Readers get `Arc` clones of the value and never observe a
//! half-written entry.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;

use super::field::{Field, FieldValue};
use super::slot::FieldEntry;
use crate::error::StoreError;

/// Per-request blackboard.
#[derive(Debug, Default)]
pub struct BlackboardStore {
    entries: DashMap<Field, FieldEntry>,
    sequence: AtomicU64,
}

impl BlackboardStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    // --- Write operations ---

    /// Write a field. Fails if the field already holds a value.
    pub fn write(&self, field: Field, value: FieldValue, producer: &str) -> Result<(), StoreError> {
        match self.entries.entry(field) {
            Entry::Occupied(existing) => Err(StoreError::FieldAlreadyWritten {
                field: field.to_string(),
                producer: existing.get().producer.clone(),
            }),
            Entry::Vacant(slot) => {
                let sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
                slot.insert(FieldEntry::new(value, producer, sequence));
                Ok(())
            }
        }
    }

    // --- Read operations ---

    /// Read a field's value. Never blocks on writers of other fields.
    pub fn read(&self, field: Field) -> Option<Arc<FieldValue>> {
        self.entries.get(&field).map(|e| Arc::clone(&e.value))
    }

    /// Value plus producer and write time.
    pub fn entry(&self, field: Field) -> Option<FieldEntry> {
        self.entries.get(&field).map(|e| e.clone())
    }

    pub fn producer_of(&self, field: Field) -> Option<String> {
        self.entries.get(&field).map(|e| e.producer.clone())
    }

    pub fn contains(&self, field: Field) -> bool {
        self.entries.contains_key(&field)
    }

    /// Names of all populated fields.
    pub fn ready_fields(&self) -> BTreeSet<Field> {
        self.entries.iter().map(|e| *e.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Immutable copy of the current state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            entries: self.entries.iter().map(|e| (*e.key(), e.value().clone())).collect(),
        }
    }

    /// Reset all state.
    pub fn clear(&self) {
        self.entries.clear();
        self.sequence.store(0, Ordering::SeqCst);
    }

    /// A new, independent store holding every entry except `without`.
    ///
    /// Entries keep their original producer, timestamp and sequence.
    pub fn fork_without(&self, without: &[Field]) -> BlackboardStore {
        let entries: DashMap<Field, FieldEntry> = self
            .entries
            .iter()
            .filter(|e| !without.contains(e.key()))
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        BlackboardStore {
            entries,
            sequence: AtomicU64::new(self.sequence.load(Ordering::SeqCst)),
        }
    }
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Point-in-time copy of a store. Values are shared, not deep-copied.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    entries: HashMap<Field, FieldEntry>,
}

impl Snapshot {
    pub fn get(&self, field: Field) -> Option<&FieldValue> {
        self.entries.get(&field).map(|e| e.value.as_ref())
    }

    pub fn entry(&self, field: Field) -> Option<&FieldEntry> {
        self.entries.get(&field)
    }

    pub fn contains(&self, field: Field) -> bool {
        self.entries.contains_key(&field)
    }

    pub fn ready_fields(&self) -> BTreeSet<Field> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The gate's route, once decided.
    pub fn route(&self) -> Option<crate::gate::Route> {
        self.get(Field::ROUTE).and_then(FieldValue::as_route).map(|d| d.route)
    }

    /// Fields present here and absent from `earlier`, as JSON.
    pub fn fields_since(&self, earlier: &Snapshot) -> serde_json::Map<String, Value> {
        let mut added: Vec<(&Field, &FieldEntry)> = self
            .entries
            .iter()
            .filter(|(field, _)| !earlier.contains(**field))
            .collect();
        added.sort_by_key(|(_, entry)| entry.sequence);
        added
            .into_iter()
            .map(|(field, entry)| (field.to_string(), entry.value.to_json()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_once() {
        let store = BlackboardStore::new();
        store.write(Field::SUMMARY, FieldValue::Text("a".into()), "generator").unwrap();
        let err = store
            .write(Field::SUMMARY, FieldValue::Text("b".into()), "template")
            .unwrap_err();
        assert_eq!(
            err,
            StoreError::FieldAlreadyWritten {
                field: "summary".into(),
                producer: "generator".into(),
            }
        );
        assert_eq!(store.read(Field::SUMMARY).unwrap().as_text(), Some("a"));
        assert_eq!(store.producer_of(Field::SUMMARY).as_deref(), Some("generator"));
    }

    #[test]
    fn test_read_absent_and_ready_fields() {
        let store = BlackboardStore::new();
        assert!(store.read(Field::PASSAGES).is_none());
        store.write(Field::USER_INPUT, FieldValue::Text("x".into()), "s").unwrap();
        store.write(Field::PASSAGES, FieldValue::Passages(vec![]), "s").unwrap();
        let ready: Vec<_> = store.ready_fields().into_iter().collect();
        assert_eq!(ready, vec![Field::PASSAGES, Field::USER_INPUT]);
    }

    #[test]
    fn test_snapshot_is_isolated() {
        let store = BlackboardStore::new();
        store.write(Field::USER_INPUT, FieldValue::Text("x".into()), "s").unwrap();
        let snap = store.snapshot();
        store.write(Field::SUMMARY, FieldValue::Text("y".into()), "s").unwrap();
        assert!(!snap.contains(Field::SUMMARY));
        assert_eq!(snap.len(), 1);

        let later = store.snapshot();
        let added = later.fields_since(&snap);
        assert_eq!(added.len(), 1);
        assert_eq!(added["summary"], serde_json::json!("y"));
    }

    #[test]
    fn test_clear_resets() {
        let store = BlackboardStore::new();
        store.write(Field::USER_INPUT, FieldValue::Text("x".into()), "s").unwrap();
        store.clear();
        assert!(store.is_empty());
        assert!(store.write(Field::USER_INPUT, FieldValue::Text("y".into()), "s").is_ok());
        assert_eq!(store.entry(Field::USER_INPUT).unwrap().sequence, 0);
    }

    #[test]
    fn test_fork_without_is_independent() {
        let store = BlackboardStore::new();
        store.write(Field::USER_INPUT, FieldValue::Text("x".into()), "seed").unwrap();
        store.write(Field::SUMMARY, FieldValue::Text("old".into()), "template").unwrap();

        let fork = store.fork_without(&[Field::SUMMARY]);
        assert!(!fork.contains(Field::SUMMARY));
        assert_eq!(fork.producer_of(Field::USER_INPUT).as_deref(), Some("seed"));

        fork.write(Field::SUMMARY, FieldValue::Text("new".into()), "generator").unwrap();
        assert_eq!(store.read(Field::SUMMARY).unwrap().as_text(), Some("old"));
        assert_eq!(fork.entry(Field::SUMMARY).unwrap().sequence, 2);
    }

    #[tokio::test]
    async fn test_concurrent_writes_single_winner() {
        let store = Arc::new(BlackboardStore::new());
        let mut handles = Vec::new();
        for i in 0..16 {
            let store = Arc::clone(&store);
            handles.push(tokio::spawn(async move {
                store
                    .write(Field::SUMMARY, FieldValue::Text(format!("{i}")), &format!("w{i}"))
                    .is_ok()
            }));
        }
        let mut wins = 0;
        for h in handles {
            if h.await.unwrap() {
                wins += 1;
            }
        }
        assert_eq!(wins, 1);
    }
}
