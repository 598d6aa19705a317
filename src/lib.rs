//! wildscan - Live case reconciliation for wildlife-trafficking enforcement
//!
//! Merges four live document streams (cases, evidence, officer status
//! overrides, notification read-state) into one consistent list of
//! per-case view objects, enriched with trust scores and duplicate-evidence
//! detection based on SHA-256 content hashes.
//!
//! # Architecture
//!
//! Every change on any stream triggers one full, independent re-derivation:
//! - Raw case records are normalized into canonical fragments
//! - Evidence is grouped per case and indexed by content hash
//! - Cases are grouped by species + location into trust groups
//! - The assembler overlays officer status and read-state
//!
//! Derived state is rebuilt from scratch on every pass, never patched.
//!
//! # Modules
//!
//! - `adapters`: Document store contract, in-memory and local stores, Gemini
//! - `core`: Normalizer, trust scorer, assembler, reconciliation loop
//! - `domain`: Raw records, view objects, session
//! - `evidence`: Content hashing and the evidence hash index
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Follow the live store and log new cases as they arrive
//! wildscan watch --officer "Insp. Rahman"
//!
//! # Print the current view, high priority only
//! wildscan cases --priority high
//!
//! # Mark a case as under investigation
//! wildscan status WS-0007 investigating
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod error;
pub mod evidence;

// Re-export main types at crate root for convenience
pub use adapters::{DocumentStore, LocalStore, MemoryStore};
pub use core::{DashboardView, ReconcileHandle, Reconciler};
pub use domain::{CaseStatus, Detection, Priority, Session, SessionState};
pub use error::DashboardError;
pub use evidence::{EvidenceHashIndex, HashingService};
