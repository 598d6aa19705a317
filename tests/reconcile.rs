//! Reconciliation Loop Integration Tests
//!
//! Drives the live loop against an in-memory store: first-population
//! silence, new-case alerts, officer status and read-state, connection
//! badges and teardown.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use wildscan::core::{ConnectionState, DashboardView, ReconcileHandle, ReconcileOptions, Reconciler};
use wildscan::domain::CaseStatus;
use wildscan::evidence::{EvidenceFetcher, HashingService};
use wildscan::{DashboardError, MemoryStore, SessionState};

const WAIT: Duration = Duration::from_secs(5);

/// Fetcher for loops that never need evidence bytes
struct NoFetch;

#[async_trait]
impl EvidenceFetcher for NoFetch {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>> {
        bail!("unexpected fetch of {}", reference)
    }
}

fn case(species: &str, location: &str, created: &str) -> Value {
    json!({
        "speciesDetected": species,
        "location": location,
        "priority": "High",
        "confidence": 0.9,
        "createdAt": created,
    })
}

fn seeded_store(count: usize) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    for i in 1..=count {
        store.seed(
            "cases",
            &format!("WS-{}", i),
            case("Sunda Pangolin", "Johor Bahru", &format!("2026-02-0{}T00:00:00Z", i)),
        );
    }
    store
}

async fn start(store: &Arc<MemoryStore>) -> ReconcileHandle {
    let hasher = Arc::new(HashingService::new(Arc::new(NoFetch)));
    Reconciler::new(store.clone(), hasher, ReconcileOptions::default())
        .start(&SessionState::sign_in("Insp. Rahman"))
        .await
        .unwrap()
}

async fn until(
    handle: &ReconcileHandle,
    predicate: impl Fn(&DashboardView) -> bool,
) -> Arc<DashboardView> {
    tokio::time::timeout(WAIT, handle.wait_for(predicate))
        .await
        .expect("view did not reach the expected state")
        .expect("loop stopped")
}

async fn settle(handle: &ReconcileHandle) -> Arc<DashboardView> {
    until(handle, DashboardView::is_settled).await
}

#[tokio::test]
async fn test_signed_out_session_cannot_start() {
    let store = Arc::new(MemoryStore::new());
    let hasher = Arc::new(HashingService::new(Arc::new(NoFetch)));
    let result = Reconciler::new(store.clone(), hasher, ReconcileOptions::default())
        .start(&SessionState::SignedOut)
        .await;

    assert!(matches!(result, Err(DashboardError::NotAuthenticated)));
    assert_eq!(store.subscriber_count("cases"), 0);
}

#[tokio::test]
async fn test_first_population_is_silent_then_one_alert_per_new_case() {
    let store = seeded_store(5);
    let handle = start(&store).await;

    let view = settle(&handle).await;
    assert_eq!(view.detections.len(), 5);
    assert_eq!(view.connection(), ConnectionState::Connected);
    assert!(view.toasts.is_empty());
    assert!(view.notifications.is_empty());
    // Newest first, as delivered by the source
    assert_eq!(view.detections[0].id, "WS-5");
    // Same species at the same place
    assert!(view.detections.iter().all(|d| d.trust_score == 5));

    let mut alerts = handle.alerts();
    store.seed("cases", "WS-6", case("Helmeted Hornbill", "Sibu", "2026-02-08T00:00:00Z"));

    let view = until(&handle, |v| v.detections.len() == 6).await;
    assert_eq!(view.detections[0].id, "WS-6");
    assert_eq!(view.toasts.len(), 1);
    assert_eq!(view.notifications[0].case_id, "WS-6");
    assert_eq!(view.notifications[0].status_label, "New");
    assert!(view.has_unread());

    let alert = tokio::time::timeout(WAIT, alerts.recv()).await.unwrap().unwrap();
    assert_eq!(alert.case_id, "WS-6");
    assert_eq!(alert.title, "Helmeted Hornbill");
    assert_eq!(alert.description, "No description provided.");

    // Re-delivering the same case does not alert again
    store.seed("cases", "WS-6", case("Helmeted Hornbill", "Sibu Jaya", "2026-02-08T00:00:00Z"));
    until(&handle, |v| {
        v.detection("WS-6")
            .map(|d| d.location_name == "Sibu Jaya")
            .unwrap_or(false)
    })
    .await;
    assert!(alerts.try_recv().is_err());

    handle.shutdown().await;
    assert_eq!(store.documents("notifications").len(), 1);
    let record = store.document("notifications", "WS-6").unwrap();
    assert_eq!(record["title"], "Helmeted Hornbill");
    assert_eq!(record["read"], false);
}

#[tokio::test]
async fn test_removed_case_reappearing_does_not_alert() {
    let store = seeded_store(2);
    let handle = start(&store).await;
    settle(&handle).await;
    let mut alerts = handle.alerts();

    store.remove("cases", "WS-1");
    until(&handle, |v| v.detections.len() == 1).await;
    store.seed("cases", "WS-1", case("Sunda Pangolin", "Johor Bahru", "2026-02-01T00:00:00Z"));
    let view = until(&handle, |v| v.detections.len() == 2).await;

    assert!(view.toasts.is_empty());
    assert!(alerts.try_recv().is_err());
    handle.shutdown().await;
}

#[tokio::test]
async fn test_toasts_are_capped_newest_first() {
    let store = seeded_store(1);
    let handle = start(&store).await;
    settle(&handle).await;

    for i in 2..=5 {
        store.seed("cases", &format!("WS-{}", i), case("Tiger", "Gerik", "2026-02-09T00:00:00Z"));
    }
    let view = until(&handle, |v| v.detections.len() == 5).await;

    let toasts: Vec<_> = view.toasts.iter().map(|a| a.case_id.as_str()).collect();
    assert_eq!(toasts, vec!["WS-5", "WS-4", "WS-3"]);
    assert_eq!(view.notifications.len(), 4);
    handle.shutdown().await;
}

#[tokio::test]
async fn test_status_set_and_unset_reach_both_destinations() {
    let store = seeded_store(1);
    let handle = start(&store).await;
    settle(&handle).await;

    let report = handle
        .set_status_confirmed("WS-1", Some(CaseStatus::Investigating))
        .await
        .unwrap();
    assert!(report.is_consistent());
    until(&handle, |v| {
        v.detection("WS-1").and_then(|d| d.status) == Some(CaseStatus::Investigating)
    })
    .await;
    assert_eq!(store.document("case_status", "WS-1").unwrap()["status"], "Investigating");
    assert_eq!(store.document("cases", "WS-1").unwrap()["status"], "Investigating");

    let report = handle.set_status_confirmed("WS-1", None).await.unwrap();
    assert!(report.is_consistent());
    until(&handle, |v| v.detection("WS-1").map(|d| d.status.is_none()).unwrap_or(false)).await;
    assert!(store.document("case_status", "WS-1").is_none());
    assert!(store.document("cases", "WS-1").unwrap().get("status").is_none());

    handle.shutdown().await;
}

#[tokio::test]
async fn test_failed_status_write_keeps_local_state() {
    let store = seeded_store(1);
    let handle = start(&store).await;
    settle(&handle).await;

    store.fail_writes("case_status");
    store.fail_writes("cases");
    let report = handle
        .set_status_confirmed("WS-1", Some(CaseStatus::Resolved))
        .await
        .unwrap();
    assert!(!report.is_consistent());

    // An unrelated snapshot must not roll the officer's change back
    let before = handle.view().pass;
    store.seed("case_status", "WS-9", json!({ "status": "Pending" }));
    let view = until(&handle, |v| v.pass > before).await;
    assert_eq!(view.detection("WS-1").unwrap().status, Some(CaseStatus::Resolved));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_override_beats_embedded_status() {
    let store = seeded_store(1);
    let mut record = case("Sunda Pangolin", "Johor Bahru", "2026-02-01T00:00:00Z");
    record["Status"] = json!("pending");
    store.seed("cases", "WS-1", record);
    store.seed("case_status", "WS-1", json!({ "status": "resolved" }));

    let handle = start(&store).await;
    let view = settle(&handle).await;
    assert_eq!(view.detection("WS-1").unwrap().status, Some(CaseStatus::Resolved));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_mark_read_updates_view_and_store() {
    let store = seeded_store(1);
    let handle = start(&store).await;
    settle(&handle).await;

    store.seed("cases", "WS-2", case("Tiger", "Gerik", "2026-02-09T00:00:00Z"));
    let view = until(&handle, |v| v.notifications.len() == 1).await;
    assert!(view.detection("WS-2").unwrap().unread);

    assert!(handle.mark_read("WS-2"));
    let view = until(&handle, |v| !v.has_unread()).await;
    assert!(!view.detection("WS-2").unwrap().unread);
    assert!(view.notifications[0].is_read);

    handle.shutdown().await;
    assert_eq!(store.document("case_reads", "WS-2").unwrap()["read"], true);
    assert_eq!(store.document("notifications", "WS-2").unwrap()["read"], true);
}

#[tokio::test]
async fn test_failed_source_shows_error_badge() {
    let store = seeded_store(2);
    store.fail_subscriptions("evidence");

    let handle = start(&store).await;
    let view = settle(&handle).await;

    assert_eq!(view.detections.len(), 2);
    assert_eq!(view.sources.cases, ConnectionState::Connected);
    match view.connection() {
        ConnectionState::Error(message) => assert!(message.contains("evidence")),
        other => panic!("expected error badge, got {:?}", other),
    }
    handle.shutdown().await;
}

#[tokio::test]
async fn test_stream_error_mid_session() {
    let store = seeded_store(1);
    let handle = start(&store).await;
    settle(&handle).await;

    store.emit_error("case_reads", "quota exceeded");
    let view = until(&handle, |v| v.sources.reads.is_terminal()).await;
    assert!(matches!(view.connection(), ConnectionState::Error(ref m) if m.contains("quota exceeded")));

    // The remaining sources keep flowing
    store.seed("cases", "WS-2", case("Tiger", "Gerik", "2026-02-09T00:00:00Z"));
    until(&handle, |v| v.detections.len() == 2).await;
    handle.shutdown().await;
}

#[tokio::test]
async fn test_unavailable_store_is_offline() {
    let store = Arc::new(MemoryStore::new());
    store.set_unavailable(true);

    let handle = start(&store).await;
    let view = settle(&handle).await;
    assert_eq!(view.connection(), ConnectionState::Offline);
    assert!(view.detections.is_empty());
    handle.shutdown().await;
}

#[tokio::test]
async fn test_teardown_cancels_subscriptions() {
    let store = seeded_store(1);
    let handle = start(&store).await;
    settle(&handle).await;
    assert_eq!(store.subscriber_count("cases"), 1);
    let views = handle.watch();

    handle.shutdown().await;

    for collection in ["cases", "evidence", "case_status", "case_reads"] {
        assert_eq!(store.subscriber_count(collection), 0, "{} still subscribed", collection);
    }
    // Nothing is published after teardown
    let last = views.borrow().pass;
    store.seed("cases", "WS-2", case("Tiger", "Gerik", "2026-02-09T00:00:00Z"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(views.borrow().pass, last);
}

#[tokio::test]
async fn test_unchanged_cases_keep_their_allocation() {
    let store = seeded_store(2);
    let handle = start(&store).await;
    let before = settle(&handle).await;

    store.seed("case_reads", "WS-1", json!({ "read": true }));
    let after = until(&handle, |v| v.detection("WS-1").map(|d| !d.unread).unwrap_or(false)).await;

    assert!(Arc::ptr_eq(
        before.detection("WS-2").unwrap(),
        after.detection("WS-2").unwrap()
    ));
    assert!(!Arc::ptr_eq(
        before.detection("WS-1").unwrap(),
        after.detection("WS-1").unwrap()
    ));
    handle.shutdown().await;
}
