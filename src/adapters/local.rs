//! File-backed document store.
//!
//! Each collection is one JSON file under the store directory, holding an
//! object that maps document id to document body:
//!
//! ```text
//! <store>/cases.json        {"WS-0001": {...}, "WS-0002": {...}}
//! <store>/evidence.json
//! <store>/case_status.json
//! ```
//!
//! Writes are read-modify-write under an exclusive lock on `<store>/.lock`
//! and land via temp file + rename. Files changed by other processes are
//! picked up by a debounced watcher and re-published to subscribers.

use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use fs2::FileExt;
use notify::{RecommendedWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer, DebounceEventResult, Debouncer};
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::store::{
    CollectionQuery, DocumentPatch, DocumentStore, Fanout, StoreError, Subscription,
};
use crate::domain::raw::Document;

const LOCK_FILE: &str = ".lock";
const DEBOUNCE: Duration = Duration::from_millis(250);

#[derive(Default)]
struct Shared {
    fanouts: Mutex<HashMap<String, Fanout>>,
}

impl Shared {
    fn fanouts(&self) -> MutexGuard<'_, HashMap<String, Fanout>> {
        self.fanouts.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, collection: &str, docs: &[Document]) {
        if let Some(fanout) = self.fanouts().get_mut(collection) {
            fanout.publish(docs);
        }
    }
}

/// Handle to the directory watcher; dropping the debouncer stops it
struct WatchHandle {
    _debouncer: Debouncer<RecommendedWatcher>,
    task: JoinHandle<()>,
}

/// JSON-file-per-collection store
pub struct LocalStore {
    root: PathBuf,
    shared: Arc<Shared>,
    watch: Mutex<Option<WatchHandle>>,
}

impl LocalStore {
    /// Open a store rooted at `root`. A missing directory is reported as
    /// `Unavailable` on first use rather than here.
    pub fn open(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            shared: Arc::new(Shared::default()),
            watch: Mutex::new(None),
        }
    }

    /// Open a store, creating its directory if needed
    pub fn create(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let store = Self::open(root);
        std::fs::create_dir_all(&store.root)?;
        Ok(store)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Names of the collections present on disk
    pub fn collections(&self) -> Result<Vec<String>, StoreError> {
        self.ensure_available()?;
        let pattern = format!("{}/*.json", self.root.display());
        let paths = glob::glob(&pattern).map_err(|e| StoreError::Failed(e.to_string()))?;

        let mut names: Vec<String> = paths
            .filter_map(|entry| entry.ok())
            .filter_map(|path| collection_name(&path))
            .collect();
        names.sort();
        Ok(names)
    }

    fn ensure_available(&self) -> Result<(), StoreError> {
        if self.root.is_dir() {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!(
                "store directory not found: {}",
                self.root.display()
            )))
        }
    }

    /// Start the directory watcher on first subscription
    fn ensure_watching(&self) -> Result<(), StoreError> {
        let mut watch = self.watch.lock().unwrap_or_else(|e| e.into_inner());
        if watch.is_some() {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<String>();
        let mut debouncer = new_debouncer(DEBOUNCE, move |result: DebounceEventResult| {
            match result {
                Ok(events) => {
                    for event in events {
                        if let Some(name) = collection_name(&event.path) {
                            let _ = tx.send(name);
                        }
                    }
                }
                Err(e) => warn!("Store watcher error: {:?}", e),
            }
        })
        .map_err(|e| StoreError::Watch(e.to_string()))?;

        debouncer
            .watcher()
            .watch(&self.root, RecursiveMode::NonRecursive)
            .map_err(|e| StoreError::Watch(e.to_string()))?;

        let shared = Arc::clone(&self.shared);
        let root = self.root.clone();
        let task = tokio::spawn(async move {
            while let Some(collection) = rx.recv().await {
                let read_root = root.clone();
                let name = collection.clone();
                match tokio::task::spawn_blocking(move || read_collection(&read_root, &name)).await
                {
                    Ok(Ok(docs)) => {
                        debug!(collection = %collection, docs = docs.len(), "Collection changed on disk");
                        shared.publish(&collection, &docs);
                    }
                    Ok(Err(e)) => warn!("Failed to reload {}: {}", collection, e),
                    Err(e) => warn!("Reload task failed for {}: {}", collection, e),
                }
            }
        });

        info!("Watching {} for store changes", self.root.display());
        *watch = Some(WatchHandle {
            _debouncer: debouncer,
            task,
        });
        Ok(())
    }

    /// Locked read-modify-write of one collection file, then publish
    async fn mutate<F>(&self, op: &str, collection: &str, id: &str, apply: F) -> Result<(), StoreError>
    where
        F: FnOnce(&mut Map<String, Value>) -> Result<(), StoreError> + Send + 'static,
    {
        self.ensure_available()?;

        let root = self.root.clone();
        let name = collection.to_string();
        let docs = tokio::task::spawn_blocking(move || {
            let _lock = acquire_lock(&root)?;
            let mut map = read_map(&root, &name)?;
            apply(&mut map)?;
            write_map(&root, &name, &map)?;
            Ok::<_, StoreError>(into_documents(map))
        })
        .await
        .map_err(|e| StoreError::Failed(format!("write task failed: {}", e)))??;

        debug!(op, collection, id, "Local store write");
        self.shared.publish(collection, &docs);
        Ok(())
    }
}

impl Drop for LocalStore {
    fn drop(&mut self) {
        let watch = self.watch.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(handle) = watch.take() {
            handle.task.abort();
        }
    }
}

#[async_trait]
impl DocumentStore for LocalStore {
    fn name(&self) -> &str {
        "local"
    }

    async fn subscribe(&self, query: CollectionQuery) -> Result<Subscription, StoreError> {
        self.ensure_available()?;
        self.ensure_watching()?;

        let root = self.root.clone();
        let name = query.collection.clone();
        let docs = tokio::task::spawn_blocking(move || read_collection(&root, &name))
            .await
            .map_err(|e| StoreError::Failed(format!("read task failed: {}", e)))??;

        let mut fanouts = self.shared.fanouts();
        let fanout = fanouts.entry(query.collection.clone()).or_default();
        Ok(fanout.subscribe(query, &docs))
    }

    async fn upsert(
        &self,
        collection: &str,
        id: &str,
        patch: DocumentPatch,
    ) -> Result<(), StoreError> {
        let key = id.to_string();
        self.mutate("upsert", collection, id, move |map| {
            let body = map
                .entry(key)
                .or_insert_with(|| Value::Object(Map::new()));
            patch.apply(body, Utc::now());
            Ok(())
        })
        .await
    }

    async fn update(
        &self,
        collection: &str,
        id: &str,
        patch: DocumentPatch,
    ) -> Result<(), StoreError> {
        let key = id.to_string();
        let coll = collection.to_string();
        self.mutate("update", collection, id, move |map| {
            let body = map.get_mut(&key).ok_or(StoreError::NotFound {
                collection: coll,
                id: key.clone(),
            })?;
            patch.apply(body, Utc::now());
            Ok(())
        })
        .await
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        let key = id.to_string();
        self.mutate("delete", collection, id, move |map| {
            map.remove(&key);
            Ok(())
        })
        .await
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        self.ensure_available()?;
        let root = self.root.clone();
        let name = collection.to_string();
        let key = id.to_string();
        tokio::task::spawn_blocking(move || {
            let map = read_map(&root, &name)?;
            Ok::<_, StoreError>(map.get(&key).map(|data| Document::new(key.clone(), data.clone())))
        })
        .await
        .map_err(|e| StoreError::Failed(format!("read task failed: {}", e)))?
    }
}

// ============================================================================
// File helpers (blocking)
// ============================================================================

/// `<root>/<name>.json` -> `name`; temp files and dotfiles are ignored
fn collection_name(path: &Path) -> Option<String> {
    if path.extension().and_then(|e| e.to_str()) != Some("json") {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    if stem.starts_with('.') {
        return None;
    }
    Some(stem.to_string())
}

fn collection_path(root: &Path, collection: &str) -> PathBuf {
    root.join(format!("{}.json", collection))
}

fn acquire_lock(root: &Path) -> Result<File, StoreError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(root.join(LOCK_FILE))?;
    file.lock_exclusive()?;
    // Lock is released when the file is dropped
    Ok(file)
}

fn read_map(root: &Path, collection: &str) -> Result<Map<String, Value>, StoreError> {
    let path = collection_path(root, collection);
    if !path.exists() {
        return Ok(Map::new());
    }
    let content = std::fs::read_to_string(&path)?;
    if content.trim().is_empty() {
        return Ok(Map::new());
    }
    Ok(serde_json::from_str(&content)?)
}

fn write_map(root: &Path, collection: &str, map: &Map<String, Value>) -> Result<(), StoreError> {
    let path = collection_path(root, collection);
    let tmp = root.join(format!(".{}.json.tmp", collection));
    std::fs::write(&tmp, serde_json::to_string_pretty(map)?)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

fn into_documents(map: Map<String, Value>) -> Vec<Document> {
    map.into_iter().map(|(id, data)| Document::new(id, data)).collect()
}

fn read_collection(root: &Path, collection: &str) -> Result<Vec<Document>, StoreError> {
    read_map(root, collection).map(into_documents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::store::SnapshotEvent;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_root_is_unavailable() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::open(temp.path().join("missing"));

        let err = store.subscribe(CollectionQuery::new("cases")).await.unwrap_err();
        assert!(err.is_unavailable());
    }

    #[tokio::test]
    async fn test_upsert_then_get() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::create(temp.path()).unwrap();

        store
            .upsert(
                "case_status",
                "WS-1",
                DocumentPatch::new()
                    .set("status", "Resolved")
                    .server_timestamp("updatedAt"),
            )
            .await
            .unwrap();

        let doc = store.get("case_status", "WS-1").await.unwrap().unwrap();
        assert_eq!(doc.data["status"], "Resolved");
        assert!(doc.data["updatedAt"]["seconds"].is_i64());
        assert_eq!(store.collections().unwrap(), vec!["case_status".to_string()]);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::create(temp.path()).unwrap();

        let err = store
            .update("cases", "WS-1", DocumentPatch::new().set("status", "Pending"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_subscription_sees_own_writes() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::create(temp.path()).unwrap();

        let mut sub = store.subscribe(CollectionQuery::new("cases")).await.unwrap();
        assert_eq!(sub.next().await, Some(SnapshotEvent::Snapshot(vec![])));

        store
            .upsert("cases", "WS-1", DocumentPatch::new().set("speciesDetected", "Pangolin"))
            .await
            .unwrap();

        match sub.next().await {
            Some(SnapshotEvent::Snapshot(docs)) => {
                assert_eq!(docs.len(), 1);
                assert_eq!(docs[0].id, "WS-1");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_external_edit_is_republished() {
        let temp = TempDir::new().unwrap();
        let store = LocalStore::create(temp.path()).unwrap();

        let mut sub = store.subscribe(CollectionQuery::new("evidence")).await.unwrap();
        sub.next().await;

        std::fs::write(
            temp.path().join("evidence.json"),
            json!({ "ev-1": { "caseId": "WS-1" } }).to_string(),
        )
        .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(10), sub.next())
            .await
            .expect("watcher should publish");
        match event {
            Some(SnapshotEvent::Snapshot(docs)) => assert_eq!(docs[0].id, "ev-1"),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn test_collection_name_ignores_temp_files() {
        assert_eq!(collection_name(Path::new("/s/cases.json")), Some("cases".to_string()));
        assert_eq!(collection_name(Path::new("/s/.cases.json.tmp")), None);
        assert_eq!(collection_name(Path::new("/s/.lock")), None);
    }
}
