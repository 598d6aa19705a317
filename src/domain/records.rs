//! Officer-owned records: status overrides, read-state and notifications.
//!
//! These live in their own collections so the next raw-case sync never
//! overwrites an officer's edit.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::detection::CaseStatus;
use super::raw::{Document, RawTimestamp};

/// One officer-set status for a case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseStatusOverride {
    pub case_id: String,
    pub status: CaseStatus,
    pub status_date: Option<DateTime<Utc>>,
}

/// Case id -> officer override
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusOverrides {
    overrides: HashMap<String, CaseStatusOverride>,
}

impl StatusOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from an override-collection snapshot. Documents whose status
    /// does not parse carry no override.
    pub fn from_documents(docs: &[Document]) -> Self {
        let overrides = docs
            .iter()
            .filter_map(|doc| {
                let status = doc
                    .data
                    .get("status")
                    .and_then(|v| v.as_str())
                    .and_then(CaseStatus::from_synonym)?;
                let status_date = doc
                    .data
                    .get("statusDate")
                    .and_then(RawTimestamp::from_value)
                    .and_then(|ts| ts.to_datetime());
                Some((
                    doc.id.clone(),
                    CaseStatusOverride {
                        case_id: doc.id.clone(),
                        status,
                        status_date,
                    },
                ))
            })
            .collect();

        Self { overrides }
    }

    pub fn get(&self, case_id: &str) -> Option<CaseStatus> {
        self.overrides.get(case_id).map(|o| o.status)
    }

    /// Apply an officer change locally ahead of persistence
    pub fn apply_local(&mut self, case_id: &str, status: Option<CaseStatus>, at: DateTime<Utc>) {
        match status {
            Some(status) => {
                self.overrides.insert(
                    case_id.to_string(),
                    CaseStatusOverride {
                        case_id: case_id.to_string(),
                        status,
                        status_date: Some(at),
                    },
                );
            }
            None => {
                self.overrides.remove(case_id);
            }
        }
    }

    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }
}

/// Case id -> "an officer has acknowledged this case's notification"
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReadStateMap {
    read: HashMap<String, bool>,
}

impl ReadStateMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(docs: &[Document]) -> Self {
        let read = docs
            .iter()
            .map(|doc| {
                let value = doc
                    .data
                    .get("read")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                (doc.id.clone(), value)
            })
            .collect();
        Self { read }
    }

    /// Unread unless an entry exists with value `true`
    pub fn is_unread(&self, case_id: &str) -> bool {
        !self.read.get(case_id).copied().unwrap_or(false)
    }

    pub fn mark_read(&mut self, case_id: &str) {
        self.read.insert(case_id.to_string(), true);
    }
}

/// Persisted once per genuinely new case
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub case_id: String,
    pub title: String,
    pub location: String,
    pub read: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overrides_skip_unknown_status() {
        let docs = vec![
            Document::new("WS-1", json!({ "status": "Resolved" })),
            Document::new("WS-2", json!({ "status": "archived" })),
        ];
        let overrides = StatusOverrides::from_documents(&docs);
        assert_eq!(overrides.get("WS-1"), Some(CaseStatus::Resolved));
        assert_eq!(overrides.get("WS-2"), None);
        assert_eq!(overrides.len(), 1);
    }

    #[test]
    fn test_apply_local_unset_removes_override() {
        let mut overrides = StatusOverrides::new();
        overrides.apply_local("WS-1", Some(CaseStatus::Investigating), Utc::now());
        assert_eq!(overrides.get("WS-1"), Some(CaseStatus::Investigating));

        overrides.apply_local("WS-1", None, Utc::now());
        assert!(overrides.is_empty());
    }

    #[test]
    fn test_read_state_requires_true_entry() {
        let docs = vec![
            Document::new("WS-1", json!({ "read": true })),
            Document::new("WS-2", json!({ "read": false })),
            Document::new("WS-3", json!({})),
        ];
        let reads = ReadStateMap::from_documents(&docs);
        assert!(!reads.is_unread("WS-1"));
        assert!(reads.is_unread("WS-2"));
        assert!(reads.is_unread("WS-3"));
        assert!(reads.is_unread("WS-404"));
    }
}
