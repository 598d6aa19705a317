//! Domain types for the wildscan dashboard.
//!
//! This module contains the core data structures:
//! - Raw: Untyped documents and field-alias helpers
//! - Detection: The canonical per-case view object
//! - Records: Officer-owned status overrides, read-state and notifications
//! - Session: Signed-in officer state

pub mod detection;
pub mod raw;
pub mod records;
pub mod session;

// Re-export commonly used types
pub use detection::{CaseStatus, Detection, DuplicateStatus, Priority};
pub use raw::{Document, EvidenceRecord, RawCaseRecord, RawTimestamp};
pub use records::{NotificationRecord, ReadStateMap, StatusOverrides};
pub use session::{Session, SessionState};
