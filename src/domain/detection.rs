//! The canonical per-case view object and its enums.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Enforcement priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Case-insensitive parse. Anything unmatched or absent is `Low`.
    pub fn parse_lenient(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_ascii_lowercase()).as_deref() {
            Some("high") => Self::High,
            Some("medium") => Self::Medium,
            _ => Self::Low,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "High",
            Self::Medium => "Medium",
            Self::Low => "Low",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Enforcement status set by an officer or embedded in the case record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CaseStatus {
    Pending,
    Investigating,
    Resolved,
}

impl CaseStatus {
    /// Match the historical spellings. Unknown text is "no status", not `Pending`.
    pub fn from_synonym(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "resolved" | "successful" => Some(Self::Resolved),
            "investigating" | "under investigation" => Some(Self::Investigating),
            "pending" => Some(Self::Pending),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "Pending",
            Self::Investigating => "Investigating",
            Self::Resolved => "Resolved",
        }
    }
}

impl fmt::Display for CaseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Duplicate-evidence verdict for a case's content hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "count", rename_all = "snake_case")]
pub enum DuplicateStatus {
    /// No hash known yet (or hashing failed)
    Unindexed,
    /// No other case shares this hash
    Unique,
    /// Number of other cases sharing this hash
    Duplicate(usize),
}

impl DuplicateStatus {
    pub fn from_count(count: usize) -> Self {
        if count == 0 {
            Self::Unique
        } else {
            Self::Duplicate(count)
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

impl fmt::Display for DuplicateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unindexed => f.write_str("Hash pending"),
            Self::Unique => f.write_str("✓ Unique"),
            Self::Duplicate(n) => write!(f, "⚠ Duplicate ({})", n),
        }
    }
}

/// Final per-case view object consumed by presentation.
///
/// Recomputed in full on every reconciliation pass and never mutated in
/// place. `id` equals the raw case record's id and is the join key across
/// all live sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub id: String,
    pub animal_type: String,
    pub display_name: String,
    pub source: String,
    pub image_url: Option<String>,

    /// 0.0 when absent; see [`Detection::has_valid_coordinates`]
    pub lat: f64,
    pub lng: f64,

    /// Canonical ISO-8601 timestamp
    pub timestamp: String,
    pub priority: Priority,

    /// 0.0 - 1.0
    pub confidence: f64,
    pub location_name: String,
    pub user_handle: Option<String>,
    pub post_url: Option<String>,
    pub description: Option<String>,

    /// Primary evidence's AI summary, when evidence exists
    pub ai_summary: Option<String>,

    /// Officer override if present, else the record's own status
    pub status: Option<CaseStatus>,

    /// SHA-256 hex of the case's primary hashed evidence
    pub evidence_hash: Option<String>,
    pub evidence_count: usize,
    pub duplicates: DuplicateStatus,

    /// Why no hash is available, if hashing failed
    pub hash_error: Option<String>,
    pub trust_score: u32,

    /// No read acknowledgement recorded for this case
    pub unread: bool,
}

impl Detection {
    /// Coordinates are usable for map placement: finite, in range, and not the 0/0 default
    pub fn has_valid_coordinates(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
            && !(self.lat == 0.0 && self.lng == 0.0)
    }

    /// Human label for the model confidence
    pub fn confidence_label(&self) -> &'static str {
        confidence_label(self.confidence)
    }
}

/// Confidence bands used in reports and fallback summaries
pub fn confidence_label(confidence: f64) -> &'static str {
    if confidence >= 0.9 {
        "Very High"
    } else if confidence >= 0.75 {
        "High"
    } else if confidence >= 0.5 {
        "Medium"
    } else {
        "Low"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_parse_is_case_insensitive() {
        assert_eq!(Priority::parse_lenient(Some("HIGH")), Priority::High);
        assert_eq!(Priority::parse_lenient(Some(" medium ")), Priority::Medium);
        assert_eq!(Priority::parse_lenient(Some("Low")), Priority::Low);
    }

    #[test]
    fn test_priority_defaults_to_low() {
        // Unknown and absent both land in Low rather than an "unknown" bucket
        assert_eq!(Priority::parse_lenient(Some("urgent")), Priority::Low);
        assert_eq!(Priority::parse_lenient(None), Priority::Low);
    }

    #[test]
    fn test_status_synonyms() {
        assert_eq!(CaseStatus::from_synonym("Successful"), Some(CaseStatus::Resolved));
        assert_eq!(
            CaseStatus::from_synonym("under investigation"),
            Some(CaseStatus::Investigating)
        );
        assert_eq!(CaseStatus::from_synonym("PENDING"), Some(CaseStatus::Pending));
        assert_eq!(CaseStatus::from_synonym("closed"), None);
    }

    #[test]
    fn test_duplicate_labels() {
        assert_eq!(DuplicateStatus::from_count(0).to_string(), "✓ Unique");
        assert_eq!(DuplicateStatus::from_count(1).to_string(), "⚠ Duplicate (1)");
        assert_eq!(DuplicateStatus::Unindexed.to_string(), "Hash pending");
    }

    #[test]
    fn test_confidence_bands() {
        assert_eq!(confidence_label(0.94), "Very High");
        assert_eq!(confidence_label(0.75), "High");
        assert_eq!(confidence_label(0.5), "Medium");
        assert_eq!(confidence_label(0.2), "Low");
    }
}
