//! Officer session. Reconciliation only runs inside a signed-in session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An authenticated officer session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Uuid,
    pub officer: String,
    pub started_at: DateTime<Utc>,
}

impl Session {
    pub fn new(officer: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            officer: officer.into(),
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub enum SessionState {
    #[default]
    SignedOut,
    SignedIn(Session),
}

impl SessionState {
    /// Sign in; blank officer names are rejected
    pub fn sign_in(officer: &str) -> Self {
        let officer = officer.trim();
        if officer.is_empty() {
            Self::SignedOut
        } else {
            Self::SignedIn(Session::new(officer))
        }
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::SignedIn(session) => Some(session),
            Self::SignedOut => None,
        }
    }

    pub fn is_signed_in(&self) -> bool {
        self.session().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_officer_stays_signed_out() {
        assert!(!SessionState::sign_in("   ").is_signed_in());
        assert!(SessionState::sign_in("Insp. Rahman").is_signed_in());
    }
}
