//! Risk assessment for a single detection.
//!
//! A generated two-sentence assessment when a text adapter is configured
//! and answers in time; otherwise a deterministic summary built from the
//! detection's priority, confidence band, trust score and duplicate state.
//! Officers always get a summary.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use super::cancel::CancelFlag;
use crate::adapters::Adapter;
use crate::domain::detection::{Detection, DuplicateStatus, Priority};
use crate::error::DashboardError;

pub const OFFLINE_NOTICE: &str =
    "AI verification offline. Detection flagged based on metadata matching illegal trade patterns.";

const EMPTY_RESPONSE: &str = "Analysis completed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AssessmentOrigin {
    Generated,
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskAssessment {
    pub text: String,
    pub origin: AssessmentOrigin,
    /// Why the fallback was used, if it was
    #[serde(skip)]
    pub error: Option<DashboardError>,
}

pub struct RiskAssessor {
    adapter: Option<Arc<dyn Adapter>>,
    model: String,
    timeout: Duration,
}

impl RiskAssessor {
    pub fn new(adapter: Option<Arc<dyn Adapter>>, model: impl Into<String>, timeout: Duration) -> Self {
        Self {
            adapter,
            model: model.into(),
            timeout,
        }
    }

    /// Fallback only
    pub fn offline() -> Self {
        Self::new(None, String::new(), Duration::from_secs(0))
    }

    /// Assess a detection; `None` if cancelled before an answer was ready
    pub async fn assess(&self, detection: &Detection, cancel: &CancelFlag) -> Option<RiskAssessment> {
        let Some(adapter) = &self.adapter else {
            return Some(fallback_assessment(
                detection,
                DashboardError::EnrichmentFailure("no generative adapter configured".to_string()),
            ));
        };

        let prompt = prompt(detection);
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = adapter.execute(&self.model, &prompt, self.timeout) => result,
        };

        if cancel.is_cancelled() {
            return None;
        }

        match result {
            Ok(output) => {
                debug!(
                    case_id = %detection.id,
                    adapter = adapter.name(),
                    tokens = output.tokens_used,
                    "Risk assessment generated"
                );
                let text = output.content.trim();
                Some(RiskAssessment {
                    text: if text.is_empty() {
                        EMPTY_RESPONSE.to_string()
                    } else {
                        text.to_string()
                    },
                    origin: AssessmentOrigin::Generated,
                    error: None,
                })
            }
            Err(e) => {
                let err = DashboardError::EnrichmentFailure(format!("{:#}", e));
                warn!(case_id = %detection.id, "{}", err);
                Some(fallback_assessment(detection, err))
            }
        }
    }
}

fn fallback_assessment(detection: &Detection, error: DashboardError) -> RiskAssessment {
    RiskAssessment {
        text: fallback(detection),
        origin: AssessmentOrigin::Fallback,
        error: Some(error),
    }
}

/// Prompt sent to the generative model
pub fn prompt(detection: &Detection) -> String {
    format!(
        "Analyze this wildlife trade detection for enforcement officers.\n\
         Species: {}\n\
         Source Platform: {}\n\
         User Provided Description: {}\n\
         Location: {}\n\n\
         Provide a professional 2-sentence risk assessment regarding the legality and conservation status.",
        detection.animal_type,
        detection.source,
        detection.description.as_deref().unwrap_or("N/A"),
        detection.location_name,
    )
}

/// Deterministic local summary
pub fn fallback(detection: &Detection) -> String {
    let urgency = match detection.priority {
        Priority::High => "immediate review recommended",
        Priority::Medium => "review within the current shift",
        Priority::Low => "routine monitoring",
    };

    let mut text = format!(
        "{} priority {} listing on {} with {} model confidence ({:.0}%); {}.",
        detection.priority,
        detection.animal_type,
        detection.source,
        detection.confidence_label().to_lowercase(),
        detection.confidence * 100.0,
        urgency,
    );

    let others = detection.trust_score.saturating_sub(1);
    if others > 0 {
        text.push_str(&format!(
            " Corroborated by {} other report{} of this species at {}.",
            others,
            if others == 1 { "" } else { "s" },
            detection.location_name,
        ));
    }

    if let DuplicateStatus::Duplicate(n) = detection.duplicates {
        text.push_str(&format!(
            " Evidence image reused in {} other case{}.",
            n,
            if n == 1 { "" } else { "s" },
        ));
    }

    text.push(' ');
    text.push_str(OFFLINE_NOTICE);
    text
}
