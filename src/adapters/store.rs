//! Remote document store contract.
//!
//! The dashboard treats its backing store as an external streaming source:
//! a subscription yields full snapshots of one collection, and writes are
//! keyed field patches. Server timestamps are resolved by the store, not
//! the caller.

use std::cmp::Ordering;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::core::cancel::CancelFlag;
use crate::domain::raw::{Document, RawTimestamp};

/// Errors returned by a document store
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store cannot be reached in this environment
    #[error("Document store unavailable: {0}")]
    Unavailable(String),

    #[error("Document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Watch error: {0}")]
    Watch(String),

    #[error("{0}")]
    Failed(String),
}

impl StoreError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

// ============================================================================
// Queries
// ============================================================================

/// Which collection to follow and how to order its snapshots
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionQuery {
    pub collection: String,

    /// Timestamp field to order by
    pub order_by: Option<String>,

    pub descending: bool,
}

impl CollectionQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            order_by: None,
            descending: false,
        }
    }

    /// Newest first by the given timestamp field
    pub fn newest_first(collection: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            order_by: Some(field.into()),
            descending: true,
        }
    }

    /// Order documents for delivery.
    ///
    /// Documents missing the order field sort last in either direction;
    /// ties fall back to ascending id so snapshots are deterministic.
    pub fn sort(&self, docs: &mut [Document]) {
        let Some(field) = self.order_by.as_deref() else {
            docs.sort_by(|a, b| a.id.cmp(&b.id));
            return;
        };

        let key = |doc: &Document| {
            doc.data
                .get(field)
                .and_then(RawTimestamp::from_value)
                .and_then(|ts| ts.to_datetime())
                .map(|dt| dt.timestamp_millis())
        };

        docs.sort_by(|a, b| {
            let ordering = match (key(a), key(b)) {
                (Some(x), Some(y)) if self.descending => y.cmp(&x),
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (None, None) => Ordering::Equal,
            };
            ordering.then_with(|| a.id.cmp(&b.id))
        });
    }
}

// ============================================================================
// Patches
// ============================================================================

/// A single field write
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    Set(Value),

    /// Resolved by the store to a wrapped `{seconds, nanoseconds}` value
    ServerTimestamp,

    Delete,
}

/// Ordered list of field writes applied as one document write
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentPatch {
    pub fields: Vec<(String, FieldWrite)>,
}

impl DocumentPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), FieldWrite::Set(value.into())));
        self
    }

    pub fn server_timestamp(mut self, field: impl Into<String>) -> Self {
        self.fields.push((field.into(), FieldWrite::ServerTimestamp));
        self
    }

    pub fn delete(mut self, field: impl Into<String>) -> Self {
        self.fields.push((field.into(), FieldWrite::Delete));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Apply to a document body; non-object bodies are replaced by an object
    pub fn apply(&self, target: &mut Value, now: DateTime<Utc>) {
        if !target.is_object() {
            *target = Value::Object(Map::new());
        }
        let Value::Object(map) = target else {
            return;
        };

        for (field, write) in &self.fields {
            match write {
                FieldWrite::Set(value) => {
                    map.insert(field.clone(), value.clone());
                }
                FieldWrite::ServerTimestamp => {
                    map.insert(field.clone(), RawTimestamp::wrapped(now));
                }
                FieldWrite::Delete => {
                    map.remove(field);
                }
            }
        }
    }
}

// ============================================================================
// Subscriptions
// ============================================================================

/// One delivery on a live subscription
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotEvent {
    /// Full current contents of the collection, in query order
    Snapshot(Vec<Document>),

    /// The stream failed; no further snapshots follow
    Error(String),
}

/// Cancellable handle over a live collection.
///
/// The first event is always the current snapshot. `cancel()` is idempotent
/// and dropping the handle cancels it.
#[derive(Debug)]
pub struct Subscription {
    collection: String,
    rx: mpsc::UnboundedReceiver<SnapshotEvent>,
    cancel: CancelFlag,
}

impl Subscription {
    pub fn new(
        collection: impl Into<String>,
        rx: mpsc::UnboundedReceiver<SnapshotEvent>,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            collection: collection.into(),
            rx,
            cancel,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Next event, or `None` once cancelled or the store side has closed
    pub async fn next(&mut self) -> Option<SnapshotEvent> {
        if self.cancel.is_cancelled() {
            return None;
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => None,
            event = self.rx.recv() => event,
        }
    }

    pub fn cancel(&mut self) {
        self.cancel.cancel();
        self.rx.close();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Subscriber {
    query: CollectionQuery,
    tx: mpsc::UnboundedSender<SnapshotEvent>,
    cancel: CancelFlag,
}

/// Store-side fan-out of snapshots to every live subscription of one collection
#[derive(Default)]
pub(crate) struct Fanout {
    subscribers: Vec<Subscriber>,
}

impl Fanout {
    /// Register a subscriber and deliver its initial snapshot
    pub(crate) fn subscribe(&mut self, query: CollectionQuery, current: &[Document]) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancelFlag::new();

        let mut docs = current.to_vec();
        query.sort(&mut docs);
        let _ = tx.send(SnapshotEvent::Snapshot(docs));

        let collection = query.collection.clone();
        self.subscribers.push(Subscriber {
            query,
            tx,
            cancel: cancel.clone(),
        });

        Subscription::new(collection, rx, cancel)
    }

    /// Deliver a fresh snapshot, dropping cancelled subscribers
    pub(crate) fn publish(&mut self, current: &[Document]) {
        self.subscribers.retain(|sub| {
            if sub.cancel.is_cancelled() {
                return false;
            }
            let mut docs = current.to_vec();
            sub.query.sort(&mut docs);
            sub.tx.send(SnapshotEvent::Snapshot(docs)).is_ok()
        });
    }

    /// Fail every subscriber; the stream is finished afterwards
    pub(crate) fn publish_error(&mut self, message: &str) {
        for sub in self.subscribers.drain(..) {
            let _ = sub.tx.send(SnapshotEvent::Error(message.to_string()));
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.subscribers
            .iter()
            .filter(|sub| !sub.cancel.is_cancelled())
            .count()
    }
}

// ============================================================================
// Store trait
// ============================================================================

/// A remote document store with live subscriptions
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Human-readable store name
    fn name(&self) -> &str;

    /// Follow a collection. The first event is the current snapshot.
    async fn subscribe(&self, query: CollectionQuery) -> Result<Subscription, StoreError>;

    /// Merge fields into a document, creating it when absent
    async fn upsert(&self, collection: &str, id: &str, patch: DocumentPatch)
        -> Result<(), StoreError>;

    /// Merge fields into an existing document; `NotFound` when absent
    async fn update(&self, collection: &str, id: &str, patch: DocumentPatch)
        -> Result<(), StoreError>;

    /// Delete a document; deleting a missing document succeeds
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sort_newest_first_missing_last() {
        let mut docs = vec![
            Document::new("a", json!({ "createdAt": "2026-01-01T00:00:00Z" })),
            Document::new("b", json!({})),
            Document::new("c", json!({ "createdAt": { "seconds": 1_900_000_000, "nanoseconds": 0 } })),
        ];
        CollectionQuery::newest_first("cases", "createdAt").sort(&mut docs);

        let ids: Vec<_> = docs.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a", "b"]);
    }

    #[test]
    fn test_patch_resolves_server_timestamp() {
        let now = Utc::now();
        let mut body = json!({ "status": "Pending", "statusDate": "old" });
        DocumentPatch::new()
            .set("status", "Resolved")
            .server_timestamp("updatedAt")
            .delete("statusDate")
            .apply(&mut body, now);

        assert_eq!(body["status"], "Resolved");
        assert_eq!(body["updatedAt"]["seconds"], now.timestamp());
        assert!(body.get("statusDate").is_none());
    }

    #[tokio::test]
    async fn test_subscription_first_event_is_snapshot() {
        let mut fanout = Fanout::default();
        let docs = vec![Document::new("x", json!({}))];
        let mut sub = fanout.subscribe(CollectionQuery::new("cases"), &docs);

        assert_eq!(sub.next().await, Some(SnapshotEvent::Snapshot(docs)));
    }

    #[tokio::test]
    async fn test_cancelled_subscription_yields_none_and_is_pruned() {
        let mut fanout = Fanout::default();
        let mut sub = fanout.subscribe(CollectionQuery::new("cases"), &[]);
        sub.cancel();
        sub.cancel();

        assert_eq!(sub.next().await, None);
        fanout.publish(&[]);
        assert_eq!(fanout.len(), 0);
    }

    #[tokio::test]
    async fn test_dropped_subscription_is_pruned() {
        let mut fanout = Fanout::default();
        let sub = fanout.subscribe(CollectionQuery::new("evidence"), &[]);
        assert_eq!(fanout.len(), 1);
        drop(sub);
        assert_eq!(fanout.len(), 0);
    }
}
