//! Document store contract consumed by the messaging core.
//!
//! The backend is an abstract collection store: filtered queries with
//! equality and array-contains predicates, live per-query subscriptions
//! that re-deliver the full result set on every change, field-level atomic
//! updates including array set-union, and server-assigned timestamps.
//! [`MemoryStore`] is the reference implementation backing the demo binary
//! and the test suite.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use memory::MemoryStore;

/// A single stored field value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    String(String),
    StringArray(Vec<String>),
    StringMap(BTreeMap<String, String>),
    Timestamp(DateTime<Utc>),
    /// Write-time sentinel. The store replaces it with its own clock, which
    /// is monotonic per store.
    ServerTimestamp,
}

impl FieldValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[String]> {
        match self {
            FieldValue::StringArray(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, String>> {
        match self {
            FieldValue::StringMap(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            FieldValue::Timestamp(ts) => Some(*ts),
            _ => None,
        }
    }
}

/// Field name to value map for one document.
pub type Fields = BTreeMap<String, FieldValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Store-assigned identifier, immutable after creation.
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(FieldValue::as_str)
    }

    pub fn array_field(&self, name: &str) -> Option<&[String]> {
        self.fields.get(name).and_then(FieldValue::as_array)
    }

    pub fn map_field(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.fields.get(name).and_then(FieldValue::as_map)
    }

    pub fn timestamp_field(&self, name: &str) -> Option<DateTime<Utc>> {
        self.fields.get(name).and_then(FieldValue::as_timestamp)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    FieldEquals { field: String, value: FieldValue },
    ArrayContains { field: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// A filtered collection query. Without `order_by` results come back in
/// insertion order.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, Direction)>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Query {
            collection: path.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn field_equals(mut self, field: impl Into<String>, value: FieldValue) -> Self {
        self.filters.push(Filter::FieldEquals {
            field: field.into(),
            value,
        });
        self
    }

    pub fn array_contains(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some((field.into(), direction));
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Field-level mutation applied by [`DocumentStore::update_document`].
#[derive(Debug, Clone, PartialEq)]
pub enum FieldUpdate {
    Set { field: String, value: FieldValue },
    /// Set-union on a string-array field. Commutative and idempotent, so
    /// concurrent unions from different writers are safe.
    ArrayUnion { field: String, values: Vec<String> },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Document {id} not found in collection {collection}")]
    DocumentNotFound { collection: String, id: String },
    #[error("Field {0} is not an array")]
    NotAnArray(String),
}

/// Full current result set of a subscribed query.
pub type Snapshot = Vec<Document>;

/// Handle for one live query. The holder owns the lifetime: call
/// [`Subscription::release`] when no longer interested. Nothing is cleaned
/// up on drop.
pub struct Subscription {
    rx: mpsc::UnboundedReceiver<Result<Snapshot, StoreError>>,
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        rx: mpsc::UnboundedReceiver<Result<Snapshot, StoreError>>,
        release: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Subscription {
            rx,
            release: Some(release),
        }
    }

    /// Next snapshot, in the order the store emitted them. `None` once the
    /// subscription has been released and the buffer is drained.
    pub async fn next(&mut self) -> Option<Result<Snapshot, StoreError>> {
        self.rx.recv().await
    }

    pub fn release(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Inserts a new document and returns its store-assigned id.
    async fn add_document(&self, collection: &str, fields: Fields) -> Result<String, StoreError>;

    /// Partial merge by explicit id; creates the document when absent.
    /// Fields not named in `fields` are left untouched.
    async fn merge_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError>;

    /// Applies field-level updates to an existing document.
    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<FieldUpdate>,
    ) -> Result<(), StoreError>;

    async fn get_document(&self, collection: &str, id: &str)
        -> Result<Option<Document>, StoreError>;

    async fn get_documents(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Opens a live subscription. The current result set is delivered as
    /// the first snapshot, then again after every change to the queried
    /// collection.
    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError>;
}
