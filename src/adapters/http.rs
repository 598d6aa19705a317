//! Evidence byte fetcher over HTTP(S) and the local filesystem.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::evidence::hashing::EvidenceFetcher;

/// Fetches evidence bytes for hashing.
///
/// `http://` and `https://` references go through reqwest; `file://` URLs
/// and bare paths are read from disk.
pub struct HttpFetcher {
    client: reqwest::Client,
    timeout: Duration,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            timeout,
        }
    }

    fn local_path(reference: &str) -> Option<PathBuf> {
        if let Some(path) = reference.strip_prefix("file://") {
            return Some(PathBuf::from(path));
        }
        if reference.contains("://") {
            return None;
        }
        Some(PathBuf::from(reference))
    }
}

#[async_trait]
impl EvidenceFetcher for HttpFetcher {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        if let Some(path) = Self::local_path(reference) {
            return tokio::fs::read(&path)
                .await
                .with_context(|| format!("Failed to read evidence file: {}", path.display()));
        }

        let response = self
            .client
            .get(reference)
            .timeout(self.timeout)
            .send()
            .await
            .with_context(|| format!("Failed to fetch {}", reference))?;

        let status = response.status();
        if !status.is_success() {
            anyhow::bail!("HTTP {} fetching {}", status.as_u16(), reference);
        }

        let bytes = response
            .bytes()
            .await
            .with_context(|| format!("Failed to read body of {}", reference))?;
        Ok(bytes.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_local_path_detection() {
        assert_eq!(
            HttpFetcher::local_path("file:///tmp/a.png"),
            Some(PathBuf::from("/tmp/a.png"))
        );
        assert_eq!(HttpFetcher::local_path("https://img.example/a.png"), None);
        assert_eq!(
            HttpFetcher::local_path("evidence/a.png"),
            Some(PathBuf::from("evidence/a.png"))
        );
    }

    #[tokio::test]
    async fn test_fetch_local_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("scales.jpg");
        tokio::fs::write(&path, b"jpeg bytes").await.unwrap();

        let fetcher = HttpFetcher::new(Duration::from_secs(1));
        let bytes = fetcher.fetch(path.to_str().unwrap()).await.unwrap();
        assert_eq!(bytes, b"jpeg bytes");
    }

    #[tokio::test]
    async fn test_fetch_missing_file_fails() {
        let fetcher = HttpFetcher::new(Duration::from_secs(1));
        assert!(fetcher.fetch("file:///definitely/not/here.png").await.is_err());
    }
}
