//! Plain-text rendering for CLI output.

use std::sync::Arc;

use crate::core::notifier::Alert;
use crate::core::query::SummaryStats;
use crate::core::status::StatusWriteReport;
use crate::domain::detection::Detection;
use crate::evidence::index::DuplicateEntry;

const RULE: &str = "────────────────────────────────────────────────────────────────";

/// One line per detection, in view order
pub fn detection_table(detections: &[Arc<Detection>]) -> String {
    if detections.is_empty() {
        return "(no detections)".to_string();
    }

    let mut out = format!(
        "{:<12} {:<6} {:<13} {:>5} {:>5}  {:<18} {}\n{}\n",
        "CASE", "PRIO", "STATUS", "CONF", "TRUST", "EVIDENCE", "SPECIES @ LOCATION [SOURCE]", RULE
    );
    for d in detections {
        let status = d.status.map(|s| s.as_str()).unwrap_or("New");
        let evidence = match &d.hash_error {
            Some(_) => "Hash unavailable".to_string(),
            None => d.duplicates.to_string(),
        };
        out.push_str(&format!(
            "{:<12} {:<6} {:<13} {:>4.0}% {:>5}  {:<18} {}{} @ {} [{}]\n",
            d.id,
            d.priority.as_str(),
            status,
            d.confidence * 100.0,
            d.trust_score,
            evidence,
            if d.unread { "* " } else { "" },
            d.animal_type,
            d.location_name,
            d.source,
        ));
    }
    out
}

/// Header statistics block
pub fn stats_block(stats: &SummaryStats) -> String {
    let activity: Vec<String> = stats.activity.iter().map(|n| n.to_string()).collect();
    format!(
        "Total: {}  (High {} / Medium {} / Low {})\n\
         Avg confidence: {:.0}%\n\
         Activity, last 7h (oldest first): {}\n\
         Latest: {}",
        stats.total,
        stats.high,
        stats.medium,
        stats.low,
        stats.avg_confidence * 100.0,
        activity.join(" "),
        stats
            .latest
            .map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string()),
    )
}

pub fn duplicate_table(hash: &str, entries: &[DuplicateEntry]) -> String {
    if entries.is_empty() {
        return format!("No evidence with hash {}", hash);
    }

    let mut out = format!("Hash {} appears in {} evidence item(s)\n{}\n", hash, entries.len(), RULE);
    for entry in entries {
        out.push_str(&format!(
            "{:<12} {:<16} {} @ {}  {}\n",
            entry.case_id,
            entry.evidence_id,
            entry.animal_type.as_deref().unwrap_or("(case not loaded)"),
            entry.location_name.as_deref().unwrap_or("-"),
            entry
                .file_url
                .as_deref()
                .or(entry.image_url.as_deref())
                .unwrap_or("-"),
        ));
    }
    out
}

pub fn status_report(report: &StatusWriteReport) -> String {
    let outcome = |r: &Result<(), crate::error::DashboardError>| match r {
        Ok(()) => "ok".to_string(),
        Err(e) => format!("FAILED ({})", e),
    };
    format!(
        "{} -> {}\n  override record: {}\n  case record:     {}",
        report.case_id,
        report.status.map(|s| s.as_str()).unwrap_or("(cleared)"),
        outcome(&report.override_record),
        outcome(&report.case_record),
    )
}

pub fn alert_line(alert: &Alert) -> String {
    format!(
        "🔔 New case {}: {} at {}\n   {}",
        alert.case_id, alert.title, alert.location, alert.description
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::detection::CaseStatus;
    use crate::error::DashboardError;

    #[test]
    fn test_empty_table() {
        assert_eq!(detection_table(&[]), "(no detections)");
    }

    #[test]
    fn test_status_report_shows_failures() {
        let report = StatusWriteReport {
            case_id: "WS-1".to_string(),
            status: Some(CaseStatus::Resolved),
            override_record: Ok(()),
            case_record: Err(DashboardError::PersistenceFailure {
                collection: "cases".to_string(),
                id: "WS-1".to_string(),
                reason: "not found".to_string(),
            }),
        };
        let text = status_report(&report);
        assert!(text.starts_with("WS-1 -> Resolved"));
        assert!(text.contains("override record: ok"));
        assert!(text.contains("case record:     FAILED"));
    }
}
