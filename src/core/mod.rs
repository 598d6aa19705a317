//! Core reconciliation logic.
//!
//! This module contains:
//! - Normalizer: Raw case records to canonical fragments
//! - Trust: Species + location grouping
//! - Assembler: One full derivation pass
//! - Reconcile: The live loop and its published view
//! - Notifier: New-case differ and notification records
//! - Status / Writer: Ordered best-effort persistence of officer changes
//! - Query / Risk: Feed filters, stats and risk summaries

pub mod assembler;
pub mod cancel;
pub mod normalizer;
pub mod notifier;
pub mod query;
pub mod reconcile;
pub mod risk;
pub mod status;
pub mod trust;
pub mod writer;

// Re-export commonly used types
pub use assembler::{derive, stabilize, Derived, HashState, SourceSnapshot};
pub use cancel::CancelFlag;
pub use normalizer::{normalize, normalize_all, CaseFragment, NormalizationWarning};
pub use notifier::{Alert, NotificationDiffer, NotificationItem};
pub use query::{available_sources, DetectionFilter, SummaryStats};
pub use reconcile::{
    ConnectionState, DashboardView, ReconcileHandle, ReconcileOptions, Reconciler, SourceKind,
    SourceStates,
};
pub use risk::{AssessmentOrigin, RiskAssessment, RiskAssessor};
pub use status::StatusWriteReport;
pub use trust::{trust_key, TrustScorer};
pub use writer::{WriteIntent, WriteQueue};
