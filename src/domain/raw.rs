//! Raw documents as delivered by the live store.
//!
//! Case and evidence documents are loosely typed: several historical field
//! names exist for the same value, and timestamps arrive either wrapped
//! (`{seconds, nanoseconds}`), as ISO-8601 strings, or as epoch millis.
//! Nothing here assumes a field is present.

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single document from a live collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable document identifier (the join key across sources)
    pub id: String,

    /// Untyped field bag
    pub data: Value,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Value) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// A raw case record, owned only until it has been normalized
#[derive(Debug, Clone, PartialEq)]
pub struct RawCaseRecord {
    pub id: String,
    pub fields: Value,
}

impl RawCaseRecord {
    pub fn new(id: impl Into<String>, fields: Value) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    pub fn from_document(doc: &Document) -> Self {
        Self::new(doc.id.clone(), doc.data.clone())
    }
}

/// First non-blank string found under any of `keys`
pub fn str_field<'a>(fields: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|s| !s.is_empty())
}

/// First finite number found under any of `keys`; numeric strings are accepted
pub fn number_field(fields: &Value, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .filter_map(|value| match value {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        })
        .find(|n| n.is_finite())
}

/// A timestamp in any of the shapes the store has produced over time
#[derive(Debug, Clone, PartialEq)]
pub enum RawTimestamp {
    /// Server timestamp: `{seconds, nanoseconds}` (or `_seconds`/`_nanoseconds`)
    Wrapped { seconds: i64, nanos: u32 },

    /// ISO-8601 / RFC 3339 string
    Iso(String),

    /// Milliseconds since the Unix epoch
    EpochMillis(i64),
}

impl RawTimestamp {
    /// Interpret a field value as a timestamp. Blank strings and nulls are absent.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Object(map) => {
                let seconds = map
                    .get("seconds")
                    .or_else(|| map.get("_seconds"))
                    .and_then(Value::as_i64)?;
                let nanos = map
                    .get("nanoseconds")
                    .or_else(|| map.get("_nanoseconds"))
                    .and_then(Value::as_u64)
                    .unwrap_or(0)
                    .min(999_999_999) as u32;
                Some(Self::Wrapped { seconds, nanos })
            }
            Value::String(s) if !s.trim().is_empty() => Some(Self::Iso(s.trim().to_string())),
            Value::Number(n) => n.as_i64().map(Self::EpochMillis),
            _ => None,
        }
    }

    /// Build the wrapped form the store uses for server-generated timestamps
    pub fn wrapped(at: DateTime<Utc>) -> Value {
        serde_json::json!({
            "seconds": at.timestamp(),
            "nanoseconds": at.timestamp_subsec_nanos(),
        })
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Wrapped { seconds, nanos } => Utc.timestamp_opt(*seconds, *nanos).single(),
            Self::Iso(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            Self::EpochMillis(ms) => Utc.timestamp_millis_opt(*ms).single(),
        }
    }

    /// ISO strings always count; wrapped and epoch values only when they
    /// map to a representable instant
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Iso(_)) || self.to_datetime().is_some()
    }

    /// Canonical ISO-8601 string (millisecond precision, `Z` suffix).
    ///
    /// ISO strings that do not parse are passed through verbatim.
    pub fn to_iso(&self) -> String {
        match (self, self.to_datetime()) {
            (_, Some(dt)) => to_iso(dt),
            (Self::Iso(s), None) => s.clone(),
            (_, None) => String::new(),
        }
    }
}

/// Format a UTC instant the way the dashboard stores canonical timestamps
pub fn to_iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// An uploaded evidence artifact
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRecord {
    /// Evidence document id
    pub id: String,

    /// Owning case (foreign key into cases)
    pub case_id: Option<String>,

    /// File reference (URL or local path)
    pub file_url: Option<String>,

    /// Platform the artifact was captured from
    pub platform_source: Option<String>,

    /// AI-generated summary from the ingestion pipeline
    pub ai_summary: Option<String>,

    /// Precomputed SHA-256 content hash, if any
    pub hash: Option<String>,

    /// Upload time, used to pick the primary evidence for a case
    pub uploaded_at: Option<DateTime<Utc>>,
}

impl EvidenceRecord {
    pub fn from_document(doc: &Document) -> Self {
        let fields = &doc.data;
        let owned = |keys: &[&str]| str_field(fields, keys).map(str::to_string);

        let uploaded_at = ["uploadedAt", "uploaded_at", "createdAt"]
            .iter()
            .filter_map(|key| fields.get(*key))
            .filter_map(RawTimestamp::from_value)
            .find_map(|ts| ts.to_datetime());

        Self {
            id: doc.id.clone(),
            case_id: owned(&["caseId", "case_id"]),
            file_url: owned(&["fileUrl", "file_url", "imageUrl", "image_url"]),
            platform_source: owned(&["platformSource", "platform_source", "platform"]),
            ai_summary: owned(&["aiSummary", "ai_summary", "summary"]),
            hash: owned(&["hash", "evidenceHash", "sha256"]),
            uploaded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_str_field_skips_blank_values() {
        let fields = json!({ "animal_type": "  ", "speciesDetected": "Pangolin" });
        assert_eq!(
            str_field(&fields, &["animal_type", "speciesDetected"]),
            Some("Pangolin")
        );
    }

    #[test]
    fn test_number_field_accepts_numeric_strings() {
        let fields = json!({ "confidence": "0.75" });
        assert_eq!(number_field(&fields, &["confidence"]), Some(0.75));
        assert_eq!(number_field(&json!({ "confidence": "high" }), &["confidence"]), None);
    }

    #[test]
    fn test_wrapped_timestamp_to_iso() {
        let value = json!({ "seconds": 1_700_000_000, "nanoseconds": 500_000_000 });
        let ts = RawTimestamp::from_value(&value).unwrap();
        assert_eq!(ts.to_iso(), "2023-11-14T22:13:20.500Z");
    }

    #[test]
    fn test_legacy_underscore_timestamp() {
        let value = json!({ "_seconds": 0, "_nanoseconds": 0 });
        let ts = RawTimestamp::from_value(&value).unwrap();
        assert_eq!(ts.to_iso(), "1970-01-01T00:00:00.000Z");
    }

    #[test]
    fn test_unparseable_iso_passes_through() {
        let ts = RawTimestamp::from_value(&json!("yesterday-ish")).unwrap();
        assert_eq!(ts.to_iso(), "yesterday-ish");
        assert!(ts.to_datetime().is_none());
    }

    #[test]
    fn test_out_of_range_values_are_not_usable() {
        let wrapped = RawTimestamp::from_value(&json!({ "seconds": i64::MAX, "nanoseconds": 0 })).unwrap();
        assert!(!wrapped.is_usable());
        assert!(!RawTimestamp::from_value(&json!(i64::MAX)).unwrap().is_usable());
        assert!(RawTimestamp::from_value(&json!("yesterday-ish")).unwrap().is_usable());
        assert!(RawTimestamp::from_value(&json!(0)).unwrap().is_usable());
    }

    #[test]
    fn test_iso_is_canonicalized() {
        let ts = RawTimestamp::from_value(&json!("2026-02-01T08:30:00+08:00")).unwrap();
        assert_eq!(ts.to_iso(), "2026-02-01T00:30:00.000Z");
    }

    #[test]
    fn test_evidence_record_aliases() {
        let doc = Document::new(
            "ev-1",
            json!({
                "caseId": "WS-0001",
                "fileUrl": "https://img.example/1.png",
                "platformSource": "Telegram Channel",
                "aiSummary": "Scales offered in bulk",
                "uploadedAt": { "seconds": 10, "nanoseconds": 0 }
            }),
        );
        let record = EvidenceRecord::from_document(&doc);
        assert_eq!(record.case_id.as_deref(), Some("WS-0001"));
        assert_eq!(record.platform_source.as_deref(), Some("Telegram Channel"));
        assert!(record.hash.is_none());
        assert_eq!(record.uploaded_at.unwrap().timestamp(), 10);
    }
}
