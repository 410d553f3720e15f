//! In-memory reference implementation of the store contract.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::debug;
use tokio::sync::mpsc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::{
    Direction, Document, DocumentStore, FieldUpdate, FieldValue, Fields, Filter, Query, Snapshot,
    StoreError, Subscription,
};

struct StoredDocument {
    id: String,
    /// Insertion sequence, used to break timestamp ties in ordered queries.
    seq: u64,
    fields: Fields,
}

#[derive(Default)]
struct Data {
    collections: HashMap<String, Vec<StoredDocument>>,
    next_seq: u64,
    last_timestamp_micros: i64,
}

struct Watcher {
    id: u64,
    query: Query,
    tx: mpsc::UnboundedSender<Result<Snapshot, StoreError>>,
}

#[derive(Default)]
struct WatcherTable {
    next_id: u64,
    watchers: Vec<Watcher>,
}

#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<Data>,
    watchers: Arc<Mutex<WatcherTable>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Pushes the current result set to every watcher of `collection`.
    /// Watchers whose receiver is gone are dropped here.
    fn notify(&self, data: &Data, collection: &str) {
        let mut table = lock(&self.watchers);
        table.watchers.retain(|watcher| {
            if watcher.query.collection != collection {
                return true;
            }
            watcher.tx.send(Ok(data.evaluate(&watcher.query))).is_ok()
        });
    }
}

fn lock(watchers: &Mutex<WatcherTable>) -> std::sync::MutexGuard<'_, WatcherTable> {
    watchers.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Data {
    /// Monotonic per store: never earlier than the previous assignment,
    /// even if the wall clock steps backwards.
    fn server_timestamp(&mut self) -> DateTime<Utc> {
        let micros = Utc::now()
            .timestamp_micros()
            .max(self.last_timestamp_micros + 1);
        self.last_timestamp_micros = micros;
        DateTime::from_timestamp_micros(micros).unwrap_or_else(Utc::now)
    }

    fn resolve(&mut self, mut fields: Fields) -> Fields {
        for value in fields.values_mut() {
            if matches!(value, FieldValue::ServerTimestamp) {
                *value = FieldValue::Timestamp(self.server_timestamp());
            }
        }
        fields
    }

    fn evaluate(&self, query: &Query) -> Vec<Document> {
        let Some(docs) = self.collections.get(&query.collection) else {
            return Vec::new();
        };

        let mut matched: Vec<&StoredDocument> = docs
            .iter()
            .filter(|doc| query.filters.iter().all(|filter| matches(doc, filter)))
            .collect();

        if let Some((field, direction)) = &query.order_by {
            // Documents without the ordering field are excluded from
            // ordered results.
            matched.retain(|doc| order_key(doc, field).is_some());
            matched.sort_by(|a, b| {
                let ord = compare(a, b, field);
                match direction {
                    Direction::Ascending => ord,
                    Direction::Descending => ord.reverse(),
                }
            });
        }

        if let Some(limit) = query.limit {
            matched.truncate(limit);
        }

        matched
            .into_iter()
            .map(|doc| Document {
                id: doc.id.clone(),
                fields: doc.fields.clone(),
            })
            .collect()
    }
}

fn matches(doc: &StoredDocument, filter: &Filter) -> bool {
    match filter {
        Filter::FieldEquals { field, value } => doc.fields.get(field) == Some(value),
        Filter::ArrayContains { field, value } => doc
            .fields
            .get(field)
            .and_then(FieldValue::as_array)
            .is_some_and(|items| items.iter().any(|item| item == value)),
    }
}

fn order_key(doc: &StoredDocument, field: &str) -> Option<(DateTime<Utc>, u64)> {
    doc.fields
        .get(field)
        .and_then(FieldValue::as_timestamp)
        .map(|ts| (ts, doc.seq))
}

fn compare(a: &StoredDocument, b: &StoredDocument, field: &str) -> Ordering {
    order_key(a, field).cmp(&order_key(b, field))
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn add_document(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        let mut data = self.data.write().await;
        let fields = data.resolve(fields);
        let id = Uuid::new_v4().to_string();
        let seq = data.next_seq;
        data.next_seq += 1;
        data.collections
            .entry(collection.to_string())
            .or_default()
            .push(StoredDocument {
                id: id.clone(),
                seq,
                fields,
            });
        debug!("added document {id} to {collection}");
        self.notify(&data, collection);
        Ok(id)
    }

    async fn merge_document(
        &self,
        collection: &str,
        id: &str,
        fields: Fields,
    ) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let fields = data.resolve(fields);
        let seq = data.next_seq;
        let docs = data.collections.entry(collection.to_string()).or_default();
        match docs.iter_mut().find(|doc| doc.id == id) {
            Some(doc) => {
                doc.fields.extend(fields);
            }
            None => {
                docs.push(StoredDocument {
                    id: id.to_string(),
                    seq,
                    fields,
                });
                data.next_seq += 1;
            }
        }
        debug!("merged document {id} in {collection}");
        self.notify(&data, collection);
        Ok(())
    }

    async fn update_document(
        &self,
        collection: &str,
        id: &str,
        updates: Vec<FieldUpdate>,
    ) -> Result<(), StoreError> {
        let mut data = self.data.write().await;
        let updates: Vec<FieldUpdate> = updates
            .into_iter()
            .map(|update| match update {
                FieldUpdate::Set { field, value } => {
                    let value = match value {
                        FieldValue::ServerTimestamp => {
                            FieldValue::Timestamp(data.server_timestamp())
                        }
                        other => other,
                    };
                    FieldUpdate::Set { field, value }
                }
                union => union,
            })
            .collect();

        let doc = data
            .collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|doc| doc.id == id))
            .ok_or_else(|| StoreError::DocumentNotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;

        for update in updates {
            match update {
                FieldUpdate::Set { field, value } => {
                    doc.fields.insert(field, value);
                }
                FieldUpdate::ArrayUnion { field, values } => {
                    let entry = doc
                        .fields
                        .entry(field.clone())
                        .or_insert_with(|| FieldValue::StringArray(Vec::new()));
                    let FieldValue::StringArray(items) = entry else {
                        return Err(StoreError::NotAnArray(field));
                    };
                    for value in values {
                        if !items.contains(&value) {
                            items.push(value);
                        }
                    }
                }
            }
        }
        debug!("updated document {id} in {collection}");
        self.notify(&data, collection);
        Ok(())
    }

    async fn get_document(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Option<Document>, StoreError> {
        let data = self.data.read().await;
        Ok(data
            .collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| doc.id == id))
            .map(|doc| Document {
                id: doc.id.clone(),
                fields: doc.fields.clone(),
            }))
    }

    async fn get_documents(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let data = self.data.read().await;
        Ok(data.evaluate(query))
    }

    async fn subscribe(&self, query: Query) -> Result<Subscription, StoreError> {
        let data = self.data.read().await;
        let (tx, rx) = mpsc::unbounded_channel();
        let initial = data.evaluate(&query);
        let _ = tx.send(Ok(initial));

        let watcher_id;
        {
            let mut table = lock(&self.watchers);
            watcher_id = table.next_id;
            table.next_id += 1;
            table.watchers.push(Watcher {
                id: watcher_id,
                query,
                tx,
            });
        }
        debug!("opened subscription {watcher_id}");

        let watchers = Arc::clone(&self.watchers);
        let release = Box::new(move || {
            let mut table = lock(&watchers);
            table.watchers.retain(|watcher| watcher.id != watcher_id);
            debug!("released subscription {watcher_id}");
        });
        Ok(Subscription::new(rx, release))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn string(value: &str) -> FieldValue {
        FieldValue::String(value.to_string())
    }

    fn doc_fields(pairs: &[(&str, FieldValue)]) -> Fields {
        pairs
            .iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }

    #[tokio::test]
    async fn filters_by_equality_and_array_membership() {
        let store = MemoryStore::new();
        store
            .add_document(
                "chats",
                doc_fields(&[
                    ("type", string("group")),
                    ("members", FieldValue::StringArray(vec!["u1".into()])),
                ]),
            )
            .await
            .expect("add failed");
        store
            .add_document(
                "chats",
                doc_fields(&[
                    ("type", string("dm")),
                    ("members", FieldValue::StringArray(vec!["u2".into()])),
                ]),
            )
            .await
            .expect("add failed");

        let query = Query::collection("chats")
            .field_equals("type", string("group"))
            .array_contains("members", "u1");
        let docs = store.get_documents(&query).await.expect("query failed");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].str_field("type"), Some("group"));

        let query = Query::collection("chats").array_contains("members", "u3");
        let docs = store.get_documents(&query).await.expect("query failed");
        assert!(docs.is_empty());
    }

    #[tokio::test]
    async fn server_timestamps_are_strictly_increasing() {
        let store = MemoryStore::new();
        let mut previous = None;
        for _ in 0..5 {
            let id = store
                .add_document(
                    "chats",
                    doc_fields(&[("createdAt", FieldValue::ServerTimestamp)]),
                )
                .await
                .expect("add failed");
            let doc = store
                .get_document("chats", &id)
                .await
                .expect("get failed")
                .expect("document missing");
            let ts = doc.timestamp_field("createdAt").expect("no timestamp");
            if let Some(previous) = previous {
                assert!(ts > previous);
            }
            previous = Some(ts);
        }
    }

    #[tokio::test]
    async fn orders_by_timestamp_with_limit() {
        let store = MemoryStore::new();
        for text in ["a", "b", "c"] {
            store
                .add_document(
                    "chats/c1/messages",
                    doc_fields(&[
                        ("text", string(text)),
                        ("createdAt", FieldValue::ServerTimestamp),
                    ]),
                )
                .await
                .expect("add failed");
        }

        let query = Query::collection("chats/c1/messages")
            .order_by("createdAt", Direction::Ascending);
        let docs = store.get_documents(&query).await.expect("query failed");
        let texts: Vec<_> = docs.iter().filter_map(|d| d.str_field("text")).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);

        let query = Query::collection("chats/c1/messages")
            .order_by("createdAt", Direction::Descending)
            .limit(1);
        let docs = store.get_documents(&query).await.expect("query failed");
        assert_eq!(docs[0].str_field("text"), Some("c"));
    }

    #[tokio::test]
    async fn array_union_is_idempotent() {
        let store = MemoryStore::new();
        let id = store
            .add_document(
                "chats",
                doc_fields(&[("members", FieldValue::StringArray(vec!["u1".into()]))]),
            )
            .await
            .expect("add failed");

        for _ in 0..2 {
            store
                .update_document(
                    "chats",
                    &id,
                    vec![FieldUpdate::ArrayUnion {
                        field: "members".into(),
                        values: vec!["u2".into()],
                    }],
                )
                .await
                .expect("update failed");
        }

        let doc = store
            .get_document("chats", &id)
            .await
            .expect("get failed")
            .expect("document missing");
        assert_eq!(
            doc.array_field("members"),
            Some(&["u1".to_string(), "u2".to_string()][..])
        );
    }

    #[tokio::test]
    async fn update_of_missing_document_fails() {
        let store = MemoryStore::new();
        let res = store
            .update_document(
                "chats",
                "nope",
                vec![FieldUpdate::Set {
                    field: "name".into(),
                    value: string("x"),
                }],
            )
            .await;
        assert!(matches!(res, Err(StoreError::DocumentNotFound { .. })));
    }

    #[tokio::test]
    async fn merge_creates_then_updates_partially() {
        let store = MemoryStore::new();
        store
            .merge_document("users", "u1", doc_fields(&[("displayName", string("Amy"))]))
            .await
            .expect("merge failed");
        store
            .merge_document(
                "users",
                "u1",
                doc_fields(&[("email", string("amy@example.com"))]),
            )
            .await
            .expect("merge failed");

        let doc = store
            .get_document("users", "u1")
            .await
            .expect("get failed")
            .expect("document missing");
        assert_eq!(doc.str_field("displayName"), Some("Amy"));
        assert_eq!(doc.str_field("email"), Some("amy@example.com"));
    }

    #[tokio::test]
    async fn subscription_sees_initial_and_updated_snapshots() {
        let store = MemoryStore::new();
        let query = Query::collection("chats").field_equals("type", string("group"));
        let mut sub = store
            .subscribe(query.clone())
            .await
            .expect("subscribe failed");

        let initial = sub.next().await.expect("closed").expect("snapshot failed");
        assert!(initial.is_empty());

        store
            .add_document("chats", doc_fields(&[("type", string("group"))]))
            .await
            .expect("add failed");
        let snapshot = sub.next().await.expect("closed").expect("snapshot failed");
        assert_eq!(snapshot.len(), 1);

        // A mutation that no longer matches still triggers a snapshot of
        // the (unchanged) result set.
        store
            .add_document("chats", doc_fields(&[("type", string("dm"))]))
            .await
            .expect("add failed");
        let snapshot = sub.next().await.expect("closed").expect("snapshot failed");
        assert_eq!(snapshot.len(), 1);

        sub.release();
    }

    #[tokio::test]
    async fn released_subscription_stops_receiving() {
        let store = MemoryStore::new();
        let mut first = store
            .subscribe(Query::collection("chats"))
            .await
            .expect("subscribe failed");
        let second = store
            .subscribe(Query::collection("chats"))
            .await
            .expect("subscribe failed");
        second.release();

        store
            .add_document("chats", doc_fields(&[("type", string("group"))]))
            .await
            .expect("add failed");

        let initial = first.next().await.expect("closed").expect("snapshot failed");
        assert!(initial.is_empty());
        let snapshot = first.next().await.expect("closed").expect("snapshot failed");
        assert_eq!(snapshot.len(), 1);
        first.release();
    }
}
