//! Document store port consumed by the marketplace managers.
//!
//! The store is a set of named collections of JSON documents. Records carry a
//! store-generated `_id`; every other field belongs to the caller. Adapters must
//! make each call atomic, enforce sparse unique indexes on insert and update, and
//! honour the [`Guard`] passed to [`DocumentStore::compare_and_swap`].

mod memory;

pub use memory::InMemoryStore;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Raw document body as persisted by the store.
pub type Document = Map<String, Value>;

/// Field name the store uses for record identifiers.
pub const ID_FIELD: &str = "_id";

/// Opaque store-generated identifier (24 hex characters for the bundled adapter).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RecordId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// A stored document together with its identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "_id")]
    pub id: RecordId,
    #[serde(flatten)]
    pub fields: Document,
}

impl Record {
    pub fn get(&self, path: &str) -> Option<&Value> {
        lookup(&self.fields, path)
    }

    /// Decode the document body into a typed view, ignoring fields the view does not name.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_value(Value::Object(self.fields.clone()))
    }
}

/// Conjunction of equality conditions over dotted field paths.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    conditions: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn by_id(id: &RecordId) -> Self {
        Self::all().eq(ID_FIELD, id.0.clone())
    }

    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.conditions.push((path.into(), value.into()));
        self
    }

    /// Every top-level entry of `document` becomes an equality condition.
    pub fn from_document(document: &Document) -> Self {
        document
            .iter()
            .fold(Self::all(), |filter, (key, value)| filter.eq(key.clone(), value.clone()))
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn matches(&self, id: &RecordId, document: &Document) -> bool {
        self.conditions.iter().all(|(path, expected)| {
            if path == ID_FIELD {
                expected.as_str() == Some(id.as_str())
            } else {
                lookup(document, path) == Some(expected)
            }
        })
    }
}

/// Expected prior value of one field, checked atomically by `compare_and_swap`.
#[derive(Debug, Clone, PartialEq)]
pub struct Guard {
    pub field: String,
    pub expected: Value,
}

impl Guard {
    pub fn new(field: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            expected: expected.into(),
        }
    }

    /// A missing field compares equal to `null`.
    pub fn holds(&self, document: &Document) -> bool {
        lookup(document, &self.field).unwrap_or(&Value::Null) == &self.expected
    }
}

/// Storage abstraction so the managers can be exercised against any backend.
pub trait DocumentStore: Send + Sync {
    fn insert(&self, collection: &str, document: Document) -> Result<Record, StoreError>;
    fn find(&self, collection: &str, filter: &Filter) -> Result<Vec<Record>, StoreError>;
    fn find_one(&self, collection: &str, filter: &Filter) -> Result<Record, StoreError>;
    fn update_one(
        &self,
        collection: &str,
        id: &RecordId,
        document: Document,
    ) -> Result<Record, StoreError>;
    fn compare_and_swap(
        &self,
        collection: &str,
        id: &RecordId,
        guard: &Guard,
        document: Document,
    ) -> Result<Record, StoreError>;
    fn delete_one(&self, collection: &str, id: &RecordId) -> Result<(), StoreError>;
    fn create_unique_index(&self, collection: &str, field: &str) -> Result<(), StoreError>;

    fn get(&self, collection: &str, id: &RecordId) -> Result<Record, StoreError> {
        self.find_one(collection, &Filter::by_id(id))
    }
}

/// Error enumeration for store failures.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("unique index on `{collection}.{field}` rejected the write")]
    Conflict { collection: String, field: String },
    #[error("record not found")]
    NotFound,
    #[error("guard on `{field}` no longer holds")]
    GuardMismatch { field: String },
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Run an idempotent read, retrying up to `extra_attempts` times on `Unavailable`.
///
/// Only reads may go through here; writes are never retried without a guard.
pub fn read_with_retry<T, F>(extra_attempts: u8, mut read: F) -> Result<T, StoreError>
where
    F: FnMut() -> Result<T, StoreError>,
{
    let mut remaining = extra_attempts;
    loop {
        match read() {
            Err(StoreError::Unavailable(reason)) if remaining > 0 => {
                remaining -= 1;
                tracing::debug!(%reason, remaining, "retrying store read");
            }
            outcome => return outcome,
        }
    }
}

/// Resolve a dotted path (`terms.status`) inside a document.
pub fn lookup<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    segments.try_fold(document.get(first)?, |value, segment| {
        value.as_object()?.get(segment)
    })
}

/// Deep-merge `patch` into `base`: nested objects merge key by key, any other
/// value in `patch` replaces the one in `base`. Keys absent from `patch` survive.
pub fn merge(base: &mut Document, patch: Document) {
    for (key, value) in patch {
        match (base.get_mut(&key), value) {
            (Some(Value::Object(existing)), Value::Object(incoming)) => merge(existing, incoming),
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}
