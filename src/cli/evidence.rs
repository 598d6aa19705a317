//! Evidence CLI subcommands.
//!
//! Provides commands to:
//! - `duplicates`: List every evidence item sharing a content hash
//! - `show`: Display a case's evidence and hash state
//! - `hash`: Digest a file or URL the way the hashing service does

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Subcommand;

use super::{report, settled, start_session};
use crate::adapters::HttpFetcher;
use crate::config;
use crate::evidence::{sha256_hex, EvidenceFetcher};

/// Evidence-related subcommands
#[derive(Subcommand, Debug)]
pub enum EvidenceCommands {
    /// List the duplicate-evidence group for a content hash
    Duplicates {
        /// SHA-256 hex digest
        hash: String,
    },

    /// Show evidence and duplicate state for a case
    Show {
        /// Case ID
        case_id: String,
    },

    /// Compute the content hash of a file or URL
    Hash {
        /// Local path, file:// URL or http(s) URL
        reference: String,
    },
}

/// Print the duplicate group for a hash
pub async fn execute_duplicates(officer: &str, hash: &str) -> Result<()> {
    let handle = start_session(officer).await?;
    let view = settled(&handle).await?;

    let hash = hash.trim().to_lowercase();
    println!("{}", report::duplicate_table(&hash, &view.duplicate_group(&hash)));

    handle.shutdown().await;
    Ok(())
}

/// Print a case's evidence summary
pub async fn execute_show(officer: &str, case_id: &str) -> Result<()> {
    let handle = start_session(officer).await?;
    let view = settled(&handle).await?;

    let detection = view
        .detection(case_id)
        .with_context(|| format!("Unknown case: {}", case_id))?
        .clone();

    println!("Case:        {}", detection.id);
    println!("Species:     {}", detection.animal_type);
    println!("Image:       {}", detection.image_url.as_deref().unwrap_or("-"));
    println!("Evidence:    {} item(s)", detection.evidence_count);
    println!("Hash:        {}", detection.evidence_hash.as_deref().unwrap_or("-"));
    println!("Duplicates:  {}", detection.duplicates);
    if let Some(err) = &detection.hash_error {
        println!("Hash error:  {}", err);
    }
    if !view.hashing_supported {
        println!("(content hashing is disabled in this environment)");
    }

    if let Some(hash) = &detection.evidence_hash {
        if detection.duplicates.is_duplicate() {
            println!();
            println!("{}", report::duplicate_table(hash, &view.duplicate_group(hash)));
        }
    }

    handle.shutdown().await;
    Ok(())
}

/// Digest a reference without touching the store
pub async fn execute_hash(reference: &str) -> Result<()> {
    let timeout = config::config()
        .map(|cfg| cfg.hashing.fetch_timeout())
        .unwrap_or(Duration::from_secs(30));

    let bytes = HttpFetcher::new(timeout)
        .fetch(reference)
        .await
        .with_context(|| format!("Failed to fetch {}", reference))?;

    println!("{}  {}", sha256_hex(&bytes), reference);
    Ok(())
}
