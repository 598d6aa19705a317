//! Evidence content hashing and duplicate detection.
//!
//! - `hashing`: SHA-256 fingerprints of evidence artifacts, with a
//!   per-session cache and best-effort write-back to the evidence store
//! - `index`: per-case evidence grouping and the hash -> case-id index used
//!   to flag the same artifact appearing under different cases
//!
//! # Example
//!
//! ```ignore
//! use wildscan::evidence::{CaseEvidence, EvidenceHashIndex};
//!
//! let evidence = CaseEvidence::group(&records);
//! let items = evidence.candidates("WS-0001", None, None, &computed);
//! let index = EvidenceHashIndex::build(&items);
//! let status = index.status(items[0].hash.as_deref(), "WS-0001");
//! ```

pub mod hashing;
pub mod index;

pub use hashing::{sha256_hex, EvidenceFetcher, HashOrigin, HashOutcome, HashResult, HashingService};
pub use index::{CaseEvidence, DuplicateEntry, EvidenceHashIndex, EvidenceItem, HashKey};
