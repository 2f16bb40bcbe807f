use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use serde_json::Value;

use super::{lookup, Document, DocumentStore, Filter, Guard, Record, RecordId, StoreError};

/// Process-local store. One mutex covers every collection so each call is atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

#[derive(Debug, Default)]
struct StoreState {
    collections: HashMap<String, CollectionState>,
    sequence: u64,
}

#[derive(Debug, Default)]
struct CollectionState {
    records: BTreeMap<RecordId, Document>,
    unique_fields: Vec<String>,
}

impl CollectionState {
    fn check_unique(
        &self,
        collection: &str,
        id: &RecordId,
        document: &Document,
    ) -> Result<(), StoreError> {
        for field in &self.unique_fields {
            let value = match lookup(document, field) {
                None | Some(Value::Null) => continue,
                Some(value) => value,
            };
            let taken = self
                .records
                .iter()
                .any(|(other, existing)| other != id && lookup(existing, field) == Some(value));
            if taken {
                return Err(StoreError::Conflict {
                    collection: collection.to_string(),
                    field: field.clone(),
                });
            }
        }
        Ok(())
    }

    fn record(id: &RecordId, document: &Document) -> Record {
        Record {
            id: id.clone(),
            fields: document.clone(),
        }
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        self.state
            .lock()
            .map_err(|_| StoreError::Unavailable("store mutex poisoned".to_string()))
    }
}

impl StoreState {
    /// 8 hex digits of creation seconds followed by 16 hex digits of sequence.
    fn next_id(&mut self) -> RecordId {
        self.sequence += 1;
        let seconds = Utc::now().timestamp().max(0) as u32;
        RecordId(format!("{seconds:08x}{:016x}", self.sequence))
    }

    fn collection(&mut self, name: &str) -> &mut CollectionState {
        self.collections.entry(name.to_string()).or_default()
    }
}

impl DocumentStore for InMemoryStore {
    fn insert(&self, collection: &str, document: Document) -> Result<Record, StoreError> {
        let mut state = self.lock()?;
        let id = state.next_id();
        let target = state.collection(collection);
        target.check_unique(collection, &id, &document)?;
        let record = CollectionState::record(&id, &document);
        target.records.insert(id, document);
        Ok(record)
    }

    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Record>, StoreError> {
        let state = self.lock()?;
        let Some(target) = state.collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(target
            .records
            .iter()
            .filter(|(id, document)| filter.matches(id, document))
            .map(|(id, document)| CollectionState::record(id, document))
            .collect())
    }

    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Record, StoreError> {
        let state = self.lock()?;
        state
            .collections
            .get(collection)
            .and_then(|target| {
                target
                    .records
                    .iter()
                    .find(|(id, document)| filter.matches(id, document))
            })
            .map(|(id, document)| CollectionState::record(id, document))
            .ok_or(StoreError::NotFound)
    }

    fn update_one(
        &self,
        collection: &str,
        id: &RecordId,
        document: Document,
    ) -> Result<Record, StoreError> {
        let mut state = self.lock()?;
        let target = state.collection(collection);
        if !target.records.contains_key(id) {
            return Err(StoreError::NotFound);
        }
        target.check_unique(collection, id, &document)?;
        let record = CollectionState::record(id, &document);
        target.records.insert(id.clone(), document);
        Ok(record)
    }

    fn compare_and_swap(
        &self,
        collection: &str,
        id: &RecordId,
        guard: &Guard,
        document: Document,
    ) -> Result<Record, StoreError> {
        let mut state = self.lock()?;
        let target = state.collection(collection);
        let current = target.records.get(id).ok_or(StoreError::NotFound)?;
        if !guard.holds(current) {
            return Err(StoreError::GuardMismatch {
                field: guard.field.clone(),
            });
        }
        target.check_unique(collection, id, &document)?;
        let record = CollectionState::record(id, &document);
        target.records.insert(id.clone(), document);
        Ok(record)
    }

    fn delete_one(&self, collection: &str, id: &RecordId) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        state
            .collection(collection)
            .records
            .remove(id)
            .map(|_| ())
            .ok_or(StoreError::NotFound)
    }

    fn create_unique_index(&self, collection: &str, field: &str) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        let target = state.collection(collection);
        if target.unique_fields.iter().any(|existing| existing == field) {
            return Ok(());
        }

        let mut seen = Vec::new();
        for document in target.records.values() {
            match lookup(document, field) {
                None | Some(Value::Null) => {}
                Some(value) if seen.contains(&value) => {
                    return Err(StoreError::Conflict {
                        collection: collection.to_string(),
                        field: field.to_string(),
                    });
                }
                Some(value) => seen.push(value),
            }
        }

        target.unique_fields.push(field.to_string());
        Ok(())
    }
}
