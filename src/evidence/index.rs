//! Evidence grouping and the content-hash index.
//!
//! The index maps a SHA-256 content hash to the set of case ids whose
//! evidence carries it. It is rebuilt from scratch on every pass and never
//! patched, so a case can only ever appear under hashes of its own
//! current evidence.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::detection::{Detection, DuplicateStatus};
use crate::domain::raw::EvidenceRecord;

/// Suffix for the single item synthesized from a case's legacy fields
pub const LEGACY_SUFFIX: &str = "#legacy";

/// One evidence candidate for a case
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceItem {
    pub evidence_id: String,
    pub case_id: String,
    pub file_url: Option<String>,
    pub platform_source: Option<String>,
    pub ai_summary: Option<String>,
    pub hash: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,

    /// Built from the case record's legacy fields rather than an evidence document
    pub synthesized: bool,
}

impl EvidenceItem {
    /// `None` for evidence not linked to any case
    pub fn from_record(record: &EvidenceRecord) -> Option<Self> {
        let case_id = record.case_id.clone()?;
        Some(Self {
            evidence_id: record.id.clone(),
            case_id,
            file_url: record.file_url.clone(),
            platform_source: record.platform_source.clone(),
            ai_summary: record.ai_summary.clone(),
            hash: record.hash.clone(),
            uploaded_at: record.uploaded_at,
            synthesized: false,
        })
    }

    /// Key under which a hash computed for this item is remembered
    pub fn hash_key(&self) -> HashKey {
        HashKey {
            evidence_id: self.evidence_id.clone(),
            file_url: self.file_url.clone(),
        }
    }

    /// Single-entry stand-in built from a case's legacy hash/image fields
    pub fn legacy(case_id: &str, hash: Option<&str>, image_url: Option<&str>) -> Option<Self> {
        if hash.is_none() && image_url.is_none() {
            return None;
        }
        Some(Self {
            evidence_id: format!("{}{}", case_id, LEGACY_SUFFIX),
            case_id: case_id.to_string(),
            file_url: image_url.map(str::to_string),
            platform_source: None,
            ai_summary: None,
            hash: hash.map(str::to_string),
            uploaded_at: None,
            synthesized: true,
        })
    }
}

/// An evidence id together with the reference its bytes were fetched from.
///
/// A replaced file behind the same id (or a new legacy image on a case) is a
/// different key, so a digest of the old bytes is never reused for it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HashKey {
    pub evidence_id: String,
    pub file_url: Option<String>,
}

/// Evidence documents grouped by owning case, newest upload first
#[derive(Debug, Clone, Default)]
pub struct CaseEvidence {
    by_case: HashMap<String, Vec<EvidenceItem>>,
}

impl CaseEvidence {
    pub fn group(records: &[EvidenceRecord]) -> Self {
        let mut by_case: HashMap<String, Vec<EvidenceItem>> = HashMap::new();
        for item in records.iter().filter_map(EvidenceItem::from_record) {
            by_case.entry(item.case_id.clone()).or_default().push(item);
        }

        for items in by_case.values_mut() {
            // Undated uploads sort after dated ones
            items.sort_by(|a, b| {
                b.uploaded_at
                    .cmp(&a.uploaded_at)
                    .then_with(|| a.evidence_id.cmp(&b.evidence_id))
            });
        }

        Self { by_case }
    }

    pub fn items(&self, case_id: &str) -> &[EvidenceItem] {
        self.by_case.get(case_id).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Most recently uploaded evidence for a case
    pub fn primary(&self, case_id: &str) -> Option<&EvidenceItem> {
        self.items(case_id).first()
    }

    /// Fill in hashes computed during this loop's lifetime
    pub fn overlay_hashes(&mut self, computed: &HashMap<HashKey, String>) {
        for item in self.by_case.values_mut().flatten() {
            if item.hash.is_none() {
                item.hash = computed.get(&item.hash_key()).cloned();
            }
        }
    }

    /// Candidate evidence for one case: the full list if present, else a
    /// single item synthesized from the legacy fields, else nothing.
    pub fn candidates(
        &self,
        case_id: &str,
        legacy_hash: Option<&str>,
        legacy_image: Option<&str>,
        computed: &HashMap<HashKey, String>,
    ) -> Vec<EvidenceItem> {
        let items = self.items(case_id);
        if !items.is_empty() {
            return items.to_vec();
        }

        EvidenceItem::legacy(case_id, legacy_hash, legacy_image)
            .map(|mut item| {
                if item.hash.is_none() {
                    item.hash = computed.get(&item.hash_key()).cloned();
                }
                vec![item]
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct HashEntry {
    case_ids: BTreeSet<String>,
    items: Vec<EvidenceItem>,
}

/// Content hash -> cases carrying it
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvidenceHashIndex {
    by_hash: BTreeMap<String, HashEntry>,
}

impl EvidenceHashIndex {
    /// Build from the candidate evidence of every live case.
    ///
    /// Items without a hash are left unindexed.
    pub fn build<'a>(candidates: impl IntoIterator<Item = &'a EvidenceItem>) -> Self {
        let mut by_hash: BTreeMap<String, HashEntry> = BTreeMap::new();
        for item in candidates {
            let Some(hash) = item.hash.as_deref() else {
                continue;
            };
            let entry = by_hash.entry(hash.to_string()).or_default();
            entry.case_ids.insert(item.case_id.clone());
            entry.items.push(item.clone());
        }
        Self { by_hash }
    }

    /// Case ids indexed under a hash
    pub fn case_ids(&self, hash: &str) -> Vec<&str> {
        self.by_hash
            .get(hash)
            .map(|entry| entry.case_ids.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Other cases sharing `hash`, excluding `case_id` itself
    pub fn duplicate_count(&self, hash: &str, case_id: &str) -> usize {
        self.by_hash
            .get(hash)
            .map(|entry| entry.case_ids.len() - usize::from(entry.case_ids.contains(case_id)))
            .unwrap_or(0)
    }

    pub fn status(&self, hash: Option<&str>, case_id: &str) -> DuplicateStatus {
        match hash {
            Some(hash) => DuplicateStatus::from_count(self.duplicate_count(hash, case_id)),
            None => DuplicateStatus::Unindexed,
        }
    }

    /// Hashes shared by more than one case
    pub fn duplicated_hashes(&self) -> Vec<&str> {
        self.by_hash
            .iter()
            .filter(|(_, entry)| entry.case_ids.len() > 1)
            .map(|(hash, _)| hash.as_str())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_hash.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_hash.is_empty()
    }

    /// Every evidence item carrying `hash`, annotated with its owning case.
    ///
    /// Read-only projection for officer review.
    pub fn group<'a>(
        &self,
        hash: &str,
        case_of: impl Fn(&str) -> Option<&'a Detection>,
    ) -> Vec<DuplicateEntry> {
        let Some(entry) = self.by_hash.get(hash) else {
            return Vec::new();
        };

        entry
            .items
            .iter()
            .map(|item| {
                let case = case_of(&item.case_id);
                DuplicateEntry {
                    evidence_id: item.evidence_id.clone(),
                    case_id: item.case_id.clone(),
                    file_url: item.file_url.clone(),
                    platform_source: item.platform_source.clone(),
                    uploaded_at: item.uploaded_at,
                    animal_type: case.map(|c| c.animal_type.clone()),
                    location_name: case.map(|c| c.location_name.clone()),
                    timestamp: case.map(|c| c.timestamp.clone()),
                    image_url: case.and_then(|c| c.image_url.clone()),
                }
            })
            .collect()
    }
}

/// One evidence item in a duplicate group
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DuplicateEntry {
    pub evidence_id: String,
    pub case_id: String,
    pub file_url: Option<String>,
    pub platform_source: Option<String>,
    pub uploaded_at: Option<DateTime<Utc>>,

    // Owning case, for side-by-side review
    pub animal_type: Option<String>,
    pub location_name: Option<String>,
    pub timestamp: Option<String>,
    pub image_url: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(id: &str, case: &str, hash: Option<&str>, uploaded: i64) -> EvidenceRecord {
        EvidenceRecord {
            id: id.to_string(),
            case_id: Some(case.to_string()),
            file_url: Some(format!("https://img.example/{}.jpg", id)),
            platform_source: None,
            ai_summary: None,
            hash: hash.map(str::to_string),
            uploaded_at: Utc.timestamp_opt(uploaded, 0).single(),
        }
    }

    #[test]
    fn test_group_orders_newest_first() {
        let evidence = CaseEvidence::group(&[
            record("ev-old", "A", None, 10),
            record("ev-new", "A", None, 20),
        ]);
        assert_eq!(evidence.primary("A").unwrap().evidence_id, "ev-new");
        assert_eq!(evidence.items("A").len(), 2);
        assert!(evidence.items("B").is_empty());
    }

    #[test]
    fn test_unlinked_evidence_is_ignored() {
        let mut orphan = record("ev-1", "A", None, 0);
        orphan.case_id = None;
        let evidence = CaseEvidence::group(&[orphan]);
        assert!(evidence.items("A").is_empty());
    }

    #[test]
    fn test_candidates_fall_back_to_legacy_fields() {
        let evidence = CaseEvidence::default();
        let computed = HashMap::new();

        let items = evidence.candidates("A", Some("abc"), None, &computed);
        assert_eq!(items.len(), 1);
        assert!(items[0].synthesized);
        assert_eq!(items[0].evidence_id, "A#legacy");

        assert!(evidence.candidates("A", None, None, &computed).is_empty());
    }

    #[test]
    fn test_candidates_prefer_full_list() {
        let evidence = CaseEvidence::group(&[record("ev-1", "A", Some("h1"), 0)]);
        let items = evidence.candidates("A", Some("legacy"), None, &HashMap::new());
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].hash.as_deref(), Some("h1"));
    }

    #[test]
    fn test_duplicate_count_is_symmetric() {
        let a = EvidenceItem::legacy("A", Some("abc123"), None).unwrap();
        let b = EvidenceItem::legacy("B", Some("abc123"), None).unwrap();
        let c = EvidenceItem::legacy("C", Some("fff000"), None).unwrap();
        let index = EvidenceHashIndex::build([&a, &b, &c]);

        assert_eq!(index.duplicate_count("abc123", "A"), 1);
        assert_eq!(index.duplicate_count("abc123", "B"), 1);
        assert_eq!(index.status(Some("fff000"), "C"), DuplicateStatus::Unique);
        // A case not carrying the hash sees every holder as a duplicate
        assert_eq!(index.duplicate_count("abc123", "C"), 2);
        assert_eq!(index.duplicated_hashes(), vec!["abc123"]);
    }

    #[test]
    fn test_same_case_twice_is_not_a_duplicate() {
        let first = record("ev-1", "A", Some("h"), 1);
        let second = record("ev-2", "A", Some("h"), 2);
        let items = CaseEvidence::group(&[first, second]);
        let index = EvidenceHashIndex::build(items.items("A"));

        assert_eq!(index.duplicate_count("h", "A"), 0);
        assert_eq!(index.group("h", |_| None).len(), 2);
    }

    #[test]
    fn test_unhashed_items_are_unindexed() {
        let item = EvidenceItem::legacy("A", None, Some("https://img.example/a.jpg")).unwrap();
        let index = EvidenceHashIndex::build([&item]);
        assert!(index.is_empty());
        assert_eq!(index.status(None, "A"), DuplicateStatus::Unindexed);
    }

    #[test]
    fn test_overlay_hashes_keeps_precomputed() {
        let mut evidence = CaseEvidence::group(&[
            record("ev-1", "A", Some("given"), 1),
            record("ev-2", "A", None, 2),
        ]);
        let computed: HashMap<HashKey, String> = evidence
            .items("A")
            .iter()
            .map(|item| (item.hash_key(), format!("computed-{}", item.evidence_id)))
            .collect();
        evidence.overlay_hashes(&computed);

        let hashes: Vec<_> = evidence.items("A").iter().map(|i| i.hash.clone()).collect();
        assert_eq!(
            hashes,
            vec![Some("computed-ev-2".to_string()), Some("given".to_string())]
        );
    }

    #[test]
    fn test_replaced_reference_does_not_reuse_hash() {
        let before = EvidenceItem::legacy("A", None, Some("a.jpg")).unwrap();
        let computed = HashMap::from([(before.hash_key(), "digest-of-a".to_string())]);
        let evidence = CaseEvidence::default();

        let items = evidence.candidates("A", None, Some("a.jpg"), &computed);
        assert_eq!(items[0].hash.as_deref(), Some("digest-of-a"));

        let items = evidence.candidates("A", None, Some("b.jpg"), &computed);
        assert_eq!(items[0].evidence_id, before.evidence_id);
        assert!(items[0].hash.is_none());

        let mut record = record("ev-1", "A", None, 1);
        let mut grouped = CaseEvidence::group(&[record.clone()]);
        let computed = HashMap::from([(grouped.items("A")[0].hash_key(), "old".to_string())]);
        record.file_url = Some("https://img.example/replaced.jpg".to_string());
        grouped = CaseEvidence::group(&[record]);
        grouped.overlay_hashes(&computed);
        assert!(grouped.items("A")[0].hash.is_none());
    }
}
