//! View model assembler.
//!
//! One reconciliation pass: normalize every case, group and index the
//! evidence, score trust groups, then overlay officer status and
//! read-state. All derived state is built from scratch from one consistent
//! set of source snapshots.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use super::normalizer::{normalize_all, CaseFragment, UNKNOWN_SOURCE};
use super::trust::TrustScorer;
use crate::domain::detection::Detection;
use crate::domain::raw::{Document, EvidenceRecord, RawCaseRecord};
use crate::domain::records::{ReadStateMap, StatusOverrides};
use crate::evidence::index::{CaseEvidence, EvidenceHashIndex, EvidenceItem, HashKey};

/// Latest snapshot of every live source, as of one trigger
#[derive(Debug, Clone, Default)]
pub struct SourceSnapshot {
    /// Case documents in delivery order (newest first)
    pub cases: Vec<Document>,
    pub evidence: Vec<Document>,
    pub overrides: StatusOverrides,
    pub reads: ReadStateMap,
}

/// Hash results gathered during the loop's lifetime, keyed by evidence id
/// and the file reference that was fetched
#[derive(Debug, Clone, Default)]
pub struct HashState {
    pub computed: HashMap<HashKey, String>,
    pub failures: HashMap<HashKey, String>,
}

impl HashState {
    /// Known or already attempted; never re-queued within one lifetime
    pub fn is_settled(&self, key: &HashKey) -> bool {
        self.computed.contains_key(key) || self.failures.contains_key(key)
    }
}

/// Output of one derivation pass
#[derive(Debug, Clone, Default)]
pub struct Derived {
    pub detections: Vec<Detection>,
    pub index: EvidenceHashIndex,

    /// Evidence candidates still lacking a hash
    pub unhashed: Vec<EvidenceItem>,
}

/// Run Normalizer -> Evidence Index -> Trust Scorer -> Assembler in order
pub fn derive(sources: &SourceSnapshot, hashes: &HashState, now: DateTime<Utc>) -> Derived {
    let raw: Vec<RawCaseRecord> = sources.cases.iter().map(RawCaseRecord::from_document).collect();
    let fragments = normalize_all(&raw, now);

    let records: Vec<EvidenceRecord> = sources
        .evidence
        .iter()
        .map(EvidenceRecord::from_document)
        .collect();
    let mut evidence = CaseEvidence::group(&records);
    evidence.overlay_hashes(&hashes.computed);

    let candidates: Vec<Vec<EvidenceItem>> = fragments
        .iter()
        .map(|case| {
            evidence.candidates(
                &case.id,
                case.legacy_hash.as_deref(),
                case.image_url.as_deref(),
                &hashes.computed,
            )
        })
        .collect();

    let index = EvidenceHashIndex::build(candidates.iter().flatten());
    let scorer = TrustScorer::build(&fragments);

    let detections = fragments
        .iter()
        .zip(&candidates)
        .map(|(case, items)| assemble(case, items, &evidence, &index, &scorer, sources, hashes))
        .collect();

    let unhashed = candidates
        .into_iter()
        .flatten()
        .filter(|item| item.hash.is_none())
        .collect();

    Derived {
        detections,
        index,
        unhashed,
    }
}

fn assemble(
    case: &CaseFragment,
    candidates: &[EvidenceItem],
    evidence: &CaseEvidence,
    index: &EvidenceHashIndex,
    scorer: &TrustScorer,
    sources: &SourceSnapshot,
    hashes: &HashState,
) -> Detection {
    let primary = evidence.primary(&case.id);

    let evidence_hash = candidates.iter().find_map(|item| item.hash.clone());
    let hash_error = match evidence_hash {
        Some(_) => None,
        None => candidates
            .iter()
            .find_map(|item| hashes.failures.get(&item.hash_key()).cloned()),
    };

    let source = match primary.and_then(|p| p.platform_source.as_ref()) {
        Some(platform) if case.source == UNKNOWN_SOURCE => platform.clone(),
        _ => case.source.clone(),
    };

    Detection {
        id: case.id.clone(),
        animal_type: case.animal_type.clone(),
        display_name: case.display_name.clone(),
        source,
        image_url: primary
            .and_then(|p| p.file_url.clone())
            .or_else(|| case.image_url.clone()),
        lat: case.lat,
        lng: case.lng,
        timestamp: case.timestamp.clone(),
        priority: case.priority,
        confidence: case.confidence,
        location_name: case.location_name.clone(),
        user_handle: case.user_handle.clone(),
        post_url: case.post_url.clone(),
        description: case.description.clone(),
        ai_summary: primary.and_then(|p| p.ai_summary.clone()),
        status: sources.overrides.get(&case.id).or(case.status),
        duplicates: index.status(evidence_hash.as_deref(), &case.id),
        evidence_hash,
        evidence_count: evidence.items(&case.id).len(),
        hash_error,
        trust_score: scorer.score(case),
        unread: sources.reads.is_unread(&case.id),
    }
}

/// Wrap a pass's detections, reusing the previous `Arc` for every case
/// whose derived value did not change.
pub fn stabilize(previous: &[Arc<Detection>], next: Vec<Detection>) -> Vec<Arc<Detection>> {
    let by_id: HashMap<&str, &Arc<Detection>> =
        previous.iter().map(|d| (d.id.as_str(), d)).collect();

    next.into_iter()
        .map(|detection| match by_id.get(detection.id.as_str()) {
            Some(prev) if ***prev == detection => Arc::clone(prev),
            _ => Arc::new(detection),
        })
        .collect()
}
