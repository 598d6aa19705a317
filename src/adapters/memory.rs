//! In-process document store.
//!
//! Used as the fake remote store in tests and for dry runs. Supports fault
//! injection: the whole store can be marked unavailable, and writes or
//! subscriptions can be made to fail per collection.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;

use super::store::{
    CollectionQuery, DocumentPatch, DocumentStore, Fanout, StoreError, Subscription,
};
use crate::domain::raw::Document;

#[derive(Default)]
struct MemoryState {
    collections: HashMap<String, BTreeMap<String, Value>>,
    fanouts: HashMap<String, Fanout>,
    unavailable: bool,
    failing_writes: HashSet<String>,
    failing_subscriptions: HashSet<String>,

    /// "op collection/id" per accepted write, in order
    write_log: Vec<String>,
}

impl MemoryState {
    fn snapshot(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn publish(&mut self, collection: &str) {
        let docs = self.snapshot(collection);
        if let Some(fanout) = self.fanouts.get_mut(collection) {
            fanout.publish(&docs);
        }
    }

    fn check_write(&self, collection: &str) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        if self.failing_writes.contains(collection) {
            return Err(StoreError::Failed(format!(
                "writes to '{}' are rejected",
                collection
            )));
        }
        Ok(())
    }
}

/// In-memory store with live fan-out
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Replace a document wholesale and notify subscribers
    pub fn seed(&self, collection: &str, id: &str, data: Value) {
        let mut state = self.lock();
        state
            .collections
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), data);
        state.publish(collection);
    }

    /// Remove a document and notify subscribers
    pub fn remove(&self, collection: &str, id: &str) {
        let mut state = self.lock();
        if let Some(docs) = state.collections.get_mut(collection) {
            docs.remove(id);
        }
        state.publish(collection);
    }

    /// Current documents of a collection, ordered by id
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.lock().snapshot(collection)
    }

    pub fn document(&self, collection: &str, id: &str) -> Option<Value> {
        self.lock()
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned()
    }

    /// Accepted writes so far, as `"<op> <collection>/<id>"`
    pub fn write_log(&self) -> Vec<String> {
        self.lock().write_log.clone()
    }

    /// Number of live subscriptions on a collection
    pub fn subscriber_count(&self, collection: &str) -> usize {
        self.lock()
            .fanouts
            .get(collection)
            .map(Fanout::len)
            .unwrap_or(0)
    }

    /// Simulate an environment without the remote store
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    pub fn fail_writes(&self, collection: &str) {
        self.lock().failing_writes.insert(collection.to_string());
    }

    pub fn restore_writes(&self, collection: &str) {
        self.lock().failing_writes.remove(collection);
    }

    pub fn fail_subscriptions(&self, collection: &str) {
        self.lock()
            .failing_subscriptions
            .insert(collection.to_string());
    }

    /// Break every live subscription on a collection
    pub fn emit_error(&self, collection: &str, message: &str) {
        if let Some(fanout) = self.lock().fanouts.get_mut(collection) {
            fanout.publish_error(message);
        }
    }

    fn write(
        &self,
        op: &str,
        collection: &str,
        id: &str,
        apply: impl FnOnce(&mut BTreeMap<String, Value>) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let mut state = self.lock();
        state.check_write(collection)?;

        let docs = state.collections.entry(collection.to_string()).or_default();
        apply(docs)?;

        state.write_log.push(format!("{} {}/{}", op, collection, id));
        state.publish(collection);
        Ok(())
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn subscribe(&self, query: CollectionQuery) -> Result<Subscription, StoreError> {
        let mut state = self.lock();
        if state.unavailable {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        if state.failing_subscriptions.contains(&query.collection) {
            return Err(StoreError::Failed(format!(
                "permission denied on '{}'",
                query.collection
            )));
        }

        let docs = state.snapshot(&query.collection);
        let fanout = state.fanouts.entry(query.collection.clone()).or_default();
        Ok(fanout.subscribe(query, &docs))
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        patch: DocumentPatch,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        self.write("upsert", collection, id, |docs| {
            let body = docs
                .entry(id.to_string())
                .or_insert_with(|| Value::Object(Default::default()));
            patch.apply(body, now);
            Ok(())
        })
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: DocumentPatch,
    ) -> Result<(), StoreError> {
        let now = Utc::now();
        self.write("update", collection, id, |docs| {
            let body = docs.get_mut(id).ok_or_else(|| StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            })?;
            patch.apply(body, now);
            Ok(())
        })
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        self.write("delete", collection, id, |docs| {
            docs.remove(id);
            Ok(())
        })
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let state = self.lock();
        if state.unavailable {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document::new(id, data.clone())))
    }
}
