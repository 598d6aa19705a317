//! Record normalizer.
//!
//! Maps one loosely-typed raw case record onto the fields of a
//! [`Detection`](crate::domain::Detection) that need no cross-case context.
//! Every field is resolved through a fixed alias precedence; nothing is
//! assumed present.
//!
//! The output is pure in its input and the injected clock. The clock is
//! only read when a record carries no usable timestamp at all.

use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::domain::detection::{CaseStatus, Priority};
use crate::domain::raw::{number_field, str_field, to_iso, RawCaseRecord, RawTimestamp};

const SPECIES_KEYS: &[&str] = &[
    "animal_type",
    "speciesDetected",
    "SpeciesDetected",
    "species",
    "suspectedSpecies",
];
const DISPLAY_NAME_KEYS: &[&str] = &["case_name", "caseName", "title"];
const SOURCE_KEYS: &[&str] = &["platformSource", "platform_source", "source"];
const LOCATION_STRING_KEYS: &[&str] = &["location", "location_name", "locationName"];
const LOCATION_NAME_KEYS: &[&str] = &["name", "locationName", "label"];
const IMAGE_KEYS: &[&str] = &["image_url", "imageUrl"];
const DESCRIPTION_KEYS: &[&str] = &["description", "reasonSummary"];
const STATUS_KEYS: &[&str] = &["status", "Status"];
const LEGACY_HASH_KEYS: &[&str] = &["evidenceHash", "hash", "imageHash"];

/// Timestamp fields in precedence order: created, legacy, detected, updated
const TIMESTAMP_KEYS: &[&str] = &["createdAt", "timestamp", "detectedAt", "updatedAt"];

/// Source label used when a record names none
pub const UNKNOWN_SOURCE: &str = "Unknown";

/// Why a raw record could not be normalized
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NormalizationWarning {
    #[error("Case {0} is not an object")]
    NotAnObject(String),

    #[error("Case record has no id")]
    MissingId,
}

/// Canonical per-case fields derivable from a single raw record
#[derive(Debug, Clone, PartialEq)]
pub struct CaseFragment {
    pub id: String,
    pub animal_type: String,
    pub display_name: String,
    pub source: String,
    pub image_url: Option<String>,
    pub lat: f64,
    pub lng: f64,
    pub timestamp: String,
    pub priority: Priority,
    pub confidence: f64,
    pub location_name: String,
    pub user_handle: Option<String>,
    pub post_url: Option<String>,
    pub description: Option<String>,

    /// Status embedded in the record itself
    pub status: Option<CaseStatus>,

    /// Single hash carried directly on older case records
    pub legacy_hash: Option<String>,
}

/// Normalize one raw case record
pub fn normalize(
    record: &RawCaseRecord,
    now: DateTime<Utc>,
) -> Result<CaseFragment, NormalizationWarning> {
    if record.id.trim().is_empty() {
        return Err(NormalizationWarning::MissingId);
    }
    let fields = &record.fields;
    if !fields.is_object() {
        return Err(NormalizationWarning::NotAnObject(record.id.clone()));
    }

    let owned = |keys: &[&str]| str_field(fields, keys).map(str::to_string);

    let animal_type = owned(SPECIES_KEYS).unwrap_or_default();
    let display_name = owned(DISPLAY_NAME_KEYS).unwrap_or_else(|| {
        if animal_type.is_empty() {
            record.id.clone()
        } else {
            animal_type.clone()
        }
    });
    let (lat, lng) = resolve_coordinates(fields);

    Ok(CaseFragment {
        id: record.id.clone(),
        display_name,
        source: owned(SOURCE_KEYS).unwrap_or_else(|| UNKNOWN_SOURCE.to_string()),
        image_url: owned(IMAGE_KEYS),
        lat,
        lng,
        timestamp: resolve_timestamp(fields, now),
        priority: Priority::parse_lenient(str_field(fields, &["priority"])),
        confidence: resolve_confidence(fields),
        location_name: resolve_location(fields),
        user_handle: owned(&["user_handle", "userHandle"]),
        post_url: owned(&["post_url", "postUrl"]),
        description: owned(DESCRIPTION_KEYS),
        status: str_field(fields, STATUS_KEYS).and_then(CaseStatus::from_synonym),
        legacy_hash: owned(LEGACY_HASH_KEYS),
        animal_type,
    })
}

/// Normalize a snapshot, dropping (and logging) records that cannot be read
pub fn normalize_all(records: &[RawCaseRecord], now: DateTime<Utc>) -> Vec<CaseFragment> {
    records
        .iter()
        .filter_map(|record| match normalize(record, now) {
            Ok(fragment) => Some(fragment),
            Err(warning) => {
                warn!("Skipping case record: {}", warning);
                None
            }
        })
        .collect()
}

/// String location, else structured name, else joined geographic parts, else ""
fn resolve_location(fields: &Value) -> String {
    if let Some(name) = str_field(fields, LOCATION_STRING_KEYS) {
        return name.to_string();
    }

    let Some(location) = fields.get("location").filter(|v| v.is_object()) else {
        return String::new();
    };

    if let Some(name) = str_field(location, LOCATION_NAME_KEYS) {
        return name.to_string();
    }

    [
        str_field(location, &["city"]),
        str_field(location, &["district"]),
        str_field(location, &["state", "province"]),
        str_field(location, &["country"]),
    ]
    .into_iter()
    .flatten()
    .collect::<Vec<_>>()
    .join(", ")
}

/// Flat lat/lng, else latitude/longitude, else nested in the location object; 0 when absent
fn resolve_coordinates(fields: &Value) -> (f64, f64) {
    let from = |value: &Value| {
        (
            number_field(value, &["lat", "latitude"]),
            number_field(value, &["lng", "lon", "longitude"]),
        )
    };

    let (mut lat, mut lng) = from(fields);
    if let Some(location) = fields.get("location").filter(|v| v.is_object()) {
        let (nested_lat, nested_lng) = from(location);
        lat = lat.or(nested_lat);
        lng = lng.or(nested_lng);
    }

    (lat.unwrap_or(0.0), lng.unwrap_or(0.0))
}

fn resolve_confidence(fields: &Value) -> f64 {
    number_field(fields, &["confidence"])
        .or_else(|| number_field(fields, &["confidenceScore"]))
        .unwrap_or(0.0)
}

/// First present timestamp field in precedence order, canonicalized; else `now`
fn resolve_timestamp(fields: &Value, now: DateTime<Utc>) -> String {
    TIMESTAMP_KEYS
        .iter()
        .filter_map(|key| fields.get(*key))
        .filter_map(RawTimestamp::from_value)
        .find(RawTimestamp::is_usable)
        .map(|ts| ts.to_iso())
        .unwrap_or_else(|| to_iso(now))
}
