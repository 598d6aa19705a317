//! Error taxonomy for the reconciliation core.
//!
//! None of these are fatal to the reconciliation loop. Each one is scoped to
//! a single source, evidence item, write or enrichment call and is surfaced
//! informationally (status badge, per-detection annotation, log line).

use thiserror::Error;

/// Errors surfaced by the dashboard core
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DashboardError {
    /// A live source stream failed; recoverable only by a new session
    #[error("Subscription to '{collection}' failed: {reason}")]
    SubscriptionFailure { collection: String, reason: String },

    /// Evidence bytes could not be fetched or were missing
    #[error("Hash unavailable for evidence {evidence_id}: {reason}")]
    HashUnavailable { evidence_id: String, reason: String },

    /// Content hashing is disabled in this environment
    #[error("Hashing unsupported in this environment (evidence {evidence_id})")]
    HashingUnsupported { evidence_id: String },

    /// A best-effort write did not land
    #[error("Failed to persist {collection}/{id}: {reason}")]
    PersistenceFailure {
        collection: String,
        id: String,
        reason: String,
    },

    /// The generative summary call failed; a local fallback is used
    #[error("Enrichment failed: {0}")]
    EnrichmentFailure(String),

    /// Reconciliation requires a signed-in officer
    #[error("No authenticated session")]
    NotAuthenticated,
}

impl DashboardError {
    /// Whether this error only affects duplicate detection for one evidence item
    pub fn is_hash_error(&self) -> bool {
        matches!(
            self,
            Self::HashUnavailable { .. } | Self::HashingUnsupported { .. }
        )
    }

    /// Evidence item a hash error belongs to
    pub fn evidence_id(&self) -> Option<&str> {
        match self {
            Self::HashUnavailable { evidence_id, .. }
            | Self::HashingUnsupported { evidence_id } => Some(evidence_id),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_unavailable_carries_evidence_id() {
        let err = DashboardError::HashUnavailable {
            evidence_id: "ev-9".to_string(),
            reason: "HTTP 404".to_string(),
        };
        assert!(err.to_string().contains("ev-9"));
        assert!(err.is_hash_error());
        assert_eq!(err.evidence_id(), Some("ev-9"));
    }

    #[test]
    fn test_persistence_failure_is_not_hash_error() {
        let err = DashboardError::PersistenceFailure {
            collection: "case_status".to_string(),
            id: "WS-0001".to_string(),
            reason: "offline".to_string(),
        };
        assert!(!err.is_hash_error());
        assert_eq!(
            err.to_string(),
            "Failed to persist case_status/WS-0001: offline"
        );
    }
}
