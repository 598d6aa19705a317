//! Officer status changes.
//!
//! A status change is applied to local state first and then persisted to
//! two destinations: the per-case override record and the case record's own
//! status field, both as merge-upserts. The two writes are independent and
//! best-effort. There is no transaction across them and no automatic retry;
//! a failed write is logged and the local state stands.

use tracing::{info, warn};

use crate::adapters::store::{DocumentPatch, DocumentStore, StoreError};
use crate::config::Collections;
use crate::domain::detection::CaseStatus;
use crate::error::DashboardError;

/// Outcome of both destination writes for one status change
#[derive(Debug, Clone, PartialEq)]
pub struct StatusWriteReport {
    pub case_id: String,
    pub status: Option<CaseStatus>,
    pub override_record: Result<(), DashboardError>,
    pub case_record: Result<(), DashboardError>,
}

impl StatusWriteReport {
    /// Both destinations agree with the local state
    pub fn is_consistent(&self) -> bool {
        self.override_record.is_ok() && self.case_record.is_ok()
    }
}

fn persistence_failure(collection: &str, id: &str, err: StoreError) -> DashboardError {
    DashboardError::PersistenceFailure {
        collection: collection.to_string(),
        id: id.to_string(),
        reason: err.to_string(),
    }
}

/// Persist a status change (or unset, when `status` is `None`)
pub async fn persist_status(
    store: &dyn DocumentStore,
    collections: &Collections,
    case_id: &str,
    status: Option<CaseStatus>,
) -> StatusWriteReport {
    let (override_write, case_patch) = match status {
        Some(status) => {
            let override_patch = DocumentPatch::new()
                .set("status", status.as_str())
                .server_timestamp("statusDate")
                .server_timestamp("updatedAt");
            let case_patch = DocumentPatch::new()
                .set("status", status.as_str())
                .server_timestamp("statusDate")
                .server_timestamp("updatedAt");
            (
                store
                    .upsert(&collections.case_status, case_id, override_patch)
                    .await,
                case_patch,
            )
        }
        None => {
            // Clear every historical spelling on the case record
            let case_patch = DocumentPatch::new()
                .delete("status")
                .delete("Status")
                .delete("statusDate")
                .server_timestamp("updatedAt");
            (
                store.delete(&collections.case_status, case_id).await,
                case_patch,
            )
        }
    };

    let override_record =
        override_write.map_err(|e| persistence_failure(&collections.case_status, case_id, e));
    let case_record = store
        .upsert(&collections.cases, case_id, case_patch)
        .await
        .map_err(|e| persistence_failure(&collections.cases, case_id, e));

    let report = StatusWriteReport {
        case_id: case_id.to_string(),
        status,
        override_record,
        case_record,
    };

    for err in [&report.override_record, &report.case_record]
        .into_iter()
        .filter_map(|r| r.as_ref().err())
    {
        warn!("{}", err);
    }
    if report.is_consistent() {
        info!(
            case_id,
            status = status.map(|s| s.as_str()).unwrap_or("unset"),
            "Case status persisted"
        );
    }

    report
}
