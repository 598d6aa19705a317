//! Adapter interfaces for external systems.
//!
//! Two kinds of external collaborator live here:
//! - Document stores (`store`, `memory`, `local`): the live data source
//! - Text adapters (`gemini`): best-effort generative enrichment
//!
//! `http` fetches evidence bytes for content hashing.

pub mod gemini;
pub mod http;
pub mod local;
pub mod memory;
pub mod store;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

// Re-export commonly used types
pub use gemini::GeminiAdapter;
pub use http::HttpFetcher;
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use store::{
    CollectionQuery, DocumentPatch, DocumentStore, FieldWrite, SnapshotEvent, StoreError,
    Subscription,
};

/// Output from an adapter execution
#[derive(Debug, Clone)]
pub struct AdapterOutput {
    /// The content returned by the adapter
    pub content: String,

    /// Tokens used (if available)
    pub tokens_used: Option<u64>,
}

impl AdapterOutput {
    /// Create a new adapter output with just content
    pub fn new(content: String) -> Self {
        Self {
            content,
            tokens_used: None,
        }
    }
}

/// Trait for external text adapters
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Human-readable adapter name
    fn name(&self) -> &str;

    /// Execute an action with input
    async fn execute(&self, action: &str, input: &str, timeout: Duration)
        -> Result<AdapterOutput>;

    /// Health check (for HTTP adapters)
    async fn health_check(&self) -> Result<()>;
}
