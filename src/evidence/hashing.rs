//! Content hashing for evidence artifacts.
//!
//! Hashes are lowercase hex SHA-256 digests of the artifact bytes. A hash
//! supplied by the ingestion pipeline is reused verbatim. Newly computed
//! hashes are cached for the service's lifetime, per evidence id and file
//! reference, and written back to the evidence document.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinSet};
use tracing::{debug, warn};

use super::index::{EvidenceItem, HashKey};
use crate::adapters::store::{DocumentPatch, DocumentStore};
use crate::error::DashboardError;

/// Source of evidence bytes
#[async_trait]
pub trait EvidenceFetcher: Send + Sync {
    /// Fetch the artifact behind a file reference; non-success responses are errors
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>>;
}

/// Lowercase hex SHA-256 (64 characters)
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Where a hash came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashOrigin {
    /// Supplied on the evidence record
    Precomputed,
    /// Computed earlier by this service
    Cached,
    /// Fetched and digested now
    Computed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HashOutcome {
    pub evidence_id: String,
    pub hash: String,
    pub origin: HashOrigin,
}

pub type HashResult = std::result::Result<HashOutcome, DashboardError>;

struct WriteBack {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

/// Computes and caches evidence content hashes
pub struct HashingService {
    fetcher: Arc<dyn EvidenceFetcher>,
    write_back: Option<WriteBack>,
    supported: bool,
    cache: Mutex<HashMap<HashKey, String>>,
}

impl HashingService {
    pub fn new(fetcher: Arc<dyn EvidenceFetcher>) -> Self {
        Self {
            fetcher,
            write_back: None,
            supported: true,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Persist new hashes to `collection` in `store`
    pub fn with_write_back(mut self, store: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        self.write_back = Some(WriteBack {
            store,
            collection: collection.into(),
        });
        self
    }

    /// Disable digest support; every uncached item fails with `HashingUnsupported`
    pub fn with_support(mut self, supported: bool) -> Self {
        self.supported = supported;
        self
    }

    pub fn is_supported(&self) -> bool {
        self.supported
    }

    pub fn cached(&self, key: &HashKey) -> Option<String> {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    fn remember(&self, key: HashKey, hash: &str) {
        self.cache
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key, hash.to_string());
    }

    /// Produce the content hash for one evidence item
    pub async fn hash_evidence(&self, item: &EvidenceItem) -> HashResult {
        let outcome = |hash: String, origin| HashOutcome {
            evidence_id: item.evidence_id.clone(),
            hash,
            origin,
        };

        if let Some(hash) = &item.hash {
            return Ok(outcome(hash.clone(), HashOrigin::Precomputed));
        }
        if let Some(hash) = self.cached(&item.hash_key()) {
            return Ok(outcome(hash, HashOrigin::Cached));
        }
        if !self.supported {
            return Err(DashboardError::HashingUnsupported {
                evidence_id: item.evidence_id.clone(),
            });
        }

        let reference = item
            .file_url
            .as_deref()
            .ok_or_else(|| DashboardError::HashUnavailable {
                evidence_id: item.evidence_id.clone(),
                reason: "no file reference".to_string(),
            })?;

        let bytes = self
            .fetcher
            .fetch(reference)
            .await
            .map_err(|e| DashboardError::HashUnavailable {
                evidence_id: item.evidence_id.clone(),
                reason: format!("{:#}", e),
            })?;

        let hash = sha256_hex(&bytes);
        self.remember(item.hash_key(), &hash);
        debug!(evidence_id = %item.evidence_id, hash = %hash, "Computed evidence hash");

        if !item.synthesized {
            self.persist(&item.evidence_id, &hash).await;
        }

        Ok(outcome(hash, HashOrigin::Computed))
    }

    /// Write-back is best-effort: failures are logged only
    async fn persist(&self, evidence_id: &str, hash: &str) {
        let Some(write_back) = &self.write_back else {
            return;
        };

        let patch = DocumentPatch::new()
            .set("hash", hash)
            .server_timestamp("hashCalculatedAt")
            .server_timestamp("updatedAt");

        if let Err(e) = write_back
            .store
            .update(&write_back.collection, evidence_id, patch)
            .await
        {
            let err = DashboardError::PersistenceFailure {
                collection: write_back.collection.clone(),
                id: evidence_id.to_string(),
                reason: e.to_string(),
            };
            warn!("{}", err);
        }
    }

    /// Hash `item` on `set`, holding one of `permits` while fetching.
    ///
    /// The returned handle's id identifies the task when it is joined.
    pub fn spawn_hash(
        self: &Arc<Self>,
        set: &mut JoinSet<HashResult>,
        permits: Arc<Semaphore>,
        item: EvidenceItem,
    ) -> AbortHandle {
        let service = Arc::clone(self);
        set.spawn(async move {
            let _permit = permits.acquire_owned().await.ok();
            service.hash_evidence(&item).await
        })
    }
}
