//! Notification differ and notification persistence.
//!
//! The differ owns the set of case ids seen during one reconciliation
//! lifetime. The first non-empty population is absorbed silently; after
//! that every id not seen before yields exactly one alert. Ids are never
//! forgotten, so a case that disappears and comes back does not alert
//! twice.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::warn;

use crate::adapters::store::{DocumentPatch, DocumentStore, StoreError};
use crate::config::Collections;
use crate::domain::detection::Detection;
use crate::domain::records::{NotificationRecord, ReadStateMap};
use crate::error::DashboardError;

const NO_DESCRIPTION: &str = "No description provided.";

/// Tracks known case ids across passes
#[derive(Debug, Clone, Default)]
pub struct NotificationDiffer {
    known: HashSet<String>,
}

impl NotificationDiffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cases present now that were never seen before
    pub fn diff<'a>(&mut self, detections: &'a [Arc<Detection>]) -> Vec<&'a Arc<Detection>> {
        if detections.is_empty() {
            return Vec::new();
        }

        if self.known.is_empty() {
            self.known
                .extend(detections.iter().map(|d| d.id.clone()));
            return Vec::new();
        }

        let fresh: Vec<&Arc<Detection>> = detections
            .iter()
            .filter(|d| !self.known.contains(&d.id))
            .collect();
        self.known.extend(fresh.iter().map(|d| d.id.clone()));
        fresh
    }

    pub fn is_known(&self, case_id: &str) -> bool {
        self.known.contains(case_id)
    }

    pub fn known_count(&self) -> usize {
        self.known.len()
    }
}

/// One-shot alert for a newly appeared case
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub case_id: String,
    pub title: String,
    pub location: String,
    pub description: String,
    pub at: DateTime<Utc>,
}

impl Alert {
    pub fn from_detection(detection: &Detection, at: DateTime<Utc>) -> Self {
        Self {
            case_id: detection.id.clone(),
            title: detection.animal_type.clone(),
            location: detection.location_name.clone(),
            description: detection
                .description
                .clone()
                .unwrap_or_else(|| NO_DESCRIPTION.to_string()),
            at,
        }
    }

    pub fn record(&self) -> NotificationRecord {
        NotificationRecord {
            case_id: self.case_id.clone(),
            title: self.title.clone(),
            location: self.location.clone(),
            read: false,
        }
    }
}

/// Entry in the notification list
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NotificationItem {
    pub case_id: String,
    pub title: String,
    pub location: String,
    pub status_label: String,
    pub time: DateTime<Utc>,
    pub is_read: bool,
}

/// Session alerts (oldest first) as a newest-first list with current status and read-state
pub fn notification_list(
    alerts: &[Alert],
    detections: &[Arc<Detection>],
    reads: &ReadStateMap,
) -> Vec<NotificationItem> {
    alerts
        .iter()
        .rev()
        .map(|alert| {
            let status = detections
                .iter()
                .find(|d| d.id == alert.case_id)
                .and_then(|d| d.status);
            NotificationItem {
                case_id: alert.case_id.clone(),
                title: alert.title.clone(),
                location: alert.location.clone(),
                status_label: status
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_else(|| "New".to_string()),
                time: alert.at,
                is_read: !reads.is_unread(&alert.case_id),
            }
        })
        .collect()
}

fn persistence_failure(collection: &str, id: &str, err: StoreError) -> DashboardError {
    DashboardError::PersistenceFailure {
        collection: collection.to_string(),
        id: id.to_string(),
        reason: err.to_string(),
    }
}

/// Write the notification record for a new case
pub async fn persist_notification(
    store: &dyn DocumentStore,
    collections: &Collections,
    record: &NotificationRecord,
) -> Result<(), DashboardError> {
    let patch = DocumentPatch::new()
        .set("caseId", record.case_id.as_str())
        .set("title", record.title.as_str())
        .set("location", record.location.as_str())
        .server_timestamp("createdAt")
        .set("read", record.read);

    store
        .upsert(&collections.notifications, &record.case_id, patch)
        .await
        .map_err(|e| persistence_failure(&collections.notifications, &record.case_id, e))
        .map_err(|err| {
            warn!("{}", err);
            err
        })
}

/// Record an officer's acknowledgement of a case.
///
/// Returns the failed writes. A case with no notification record only gets
/// its read-state entry.
pub async fn persist_read(
    store: &dyn DocumentStore,
    collections: &Collections,
    case_id: &str,
) -> Vec<DashboardError> {
    let mut failures = Vec::new();

    let read_patch = DocumentPatch::new()
        .set("read", true)
        .server_timestamp("readAt")
        .server_timestamp("updatedAt");
    if let Err(e) = store.upsert(&collections.case_reads, case_id, read_patch).await {
        failures.push(persistence_failure(&collections.case_reads, case_id, e));
    }

    let notification_patch = DocumentPatch::new().set("read", true);
    match store
        .update(&collections.notifications, case_id, notification_patch)
        .await
    {
        Ok(()) | Err(StoreError::NotFound { .. }) => {}
        Err(e) => failures.push(persistence_failure(&collections.notifications, case_id, e)),
    }

    for err in &failures {
        warn!("{}", err);
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryStore;
    use crate::domain::detection::{CaseStatus, DuplicateStatus, Priority};

    fn detection(id: &str) -> Arc<Detection> {
        Arc::new(Detection {
            id: id.to_string(),
            animal_type: "Pangolin".to_string(),
            display_name: "Pangolin".to_string(),
            source: "Telegram".to_string(),
            image_url: None,
            lat: 0.0,
            lng: 0.0,
            timestamp: "2026-01-01T00:00:00.000Z".to_string(),
            priority: Priority::Low,
            confidence: 0.5,
            location_name: "Johor Bahru".to_string(),
            user_handle: None,
            post_url: None,
            description: None,
            ai_summary: None,
            status: None,
            evidence_hash: None,
            evidence_count: 0,
            duplicates: DuplicateStatus::Unindexed,
            hash_error: None,
            trust_score: 1,
            unread: true,
        })
    }

    fn list(ids: &[&str]) -> Vec<Arc<Detection>> {
        ids.iter().map(|id| detection(id)).collect()
    }

    #[test]
    fn test_first_population_is_silent() {
        let mut differ = NotificationDiffer::new();
        assert!(differ.diff(&list(&["A", "B", "C", "D", "E"])).is_empty());
        assert_eq!(differ.known_count(), 5);

        let second = list(&["F", "A", "B", "C", "D", "E"]);
        let fresh = differ.diff(&second);
        let ids: Vec<_> = fresh.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["F"]);
    }

    #[test]
    fn test_replay_emits_nothing() {
        let mut differ = NotificationDiffer::new();
        let cases = list(&["A", "B"]);
        differ.diff(&cases);
        assert!(differ.diff(&cases).is_empty());
        assert!(differ.diff(&cases).is_empty());
    }

    #[test]
    fn test_reappearing_case_does_not_retrigger() {
        let mut differ = NotificationDiffer::new();
        differ.diff(&list(&["A"]));
        assert_eq!(differ.diff(&list(&["A", "B"])).len(), 1);
        assert!(differ.diff(&list(&["A"])).is_empty());
        assert!(differ.diff(&list(&["A", "B"])).is_empty());
    }

    #[test]
    fn test_empty_pass_does_not_seed() {
        let mut differ = NotificationDiffer::new();
        assert!(differ.diff(&[]).is_empty());
        assert_eq!(differ.known_count(), 0);
        // The first non-empty pass is still the silent one
        assert!(differ.diff(&list(&["A"])).is_empty());
    }

    #[test]
    fn test_alert_defaults_description() {
        let alert = Alert::from_detection(&detection("A"), Utc::now());
        assert_eq!(alert.title, "Pangolin");
        assert_eq!(alert.description, NO_DESCRIPTION);
        assert!(!alert.record().read);
    }

    #[test]
    fn test_notification_list_is_newest_first() {
        let mut resolved = (*detection("B")).clone();
        resolved.status = Some(CaseStatus::Resolved);
        let detections = vec![detection("A"), Arc::new(resolved)];

        let now = Utc::now();
        let alerts = vec![
            Alert::from_detection(&detections[0], now),
            Alert::from_detection(&detections[1], now),
        ];
        let mut reads = ReadStateMap::new();
        reads.mark_read("A");

        let items = notification_list(&alerts, &detections, &reads);
        assert_eq!(items[0].case_id, "B");
        assert_eq!(items[0].status_label, "Resolved");
        assert!(!items[0].is_read);
        assert_eq!(items[1].status_label, "New");
        assert!(items[1].is_read);
    }

    #[tokio::test]
    async fn test_persist_notification_and_read() {
        let store = MemoryStore::new();
        let collections = Collections::default();
        let alert = Alert::from_detection(&detection("A"), Utc::now());

        persist_notification(&store, &collections, &alert.record())
            .await
            .unwrap();
        let doc = store.document("notifications", "A").unwrap();
        assert_eq!(doc["caseId"], "A");
        assert_eq!(doc["read"], false);
        assert!(doc["createdAt"]["seconds"].is_i64());

        let failures = persist_read(&store, &collections, "A").await;
        assert!(failures.is_empty());
        assert_eq!(store.document("notifications", "A").unwrap()["read"], true);
        assert_eq!(store.document("case_reads", "A").unwrap()["read"], true);
    }

    #[tokio::test]
    async fn test_read_without_notification_record() {
        let store = MemoryStore::new();
        let failures = persist_read(&store, &Collections::default(), "Z").await;
        assert!(failures.is_empty());
        assert!(store.document("notifications", "Z").is_none());
    }
}
