//! Dashboard filters and summary statistics over a published view.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::domain::detection::{Detection, Priority};

/// Number of hourly activity buckets in the summary
pub const ACTIVITY_HOURS: usize = 7;

/// Feed filters. The default lets everything through.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectionFilter {
    /// Case-insensitive substring over species, location, source and id
    pub search: String,
    pub priorities: Vec<Priority>,
    /// `None` means all sources
    pub source: Option<String>,
    pub min_confidence: f64,
}

impl Default for DetectionFilter {
    fn default() -> Self {
        Self {
            search: String::new(),
            priorities: Priority::ALL.to_vec(),
            source: None,
            min_confidence: 0.0,
        }
    }
}

impl DetectionFilter {
    /// Source filter from a user value; "All" (any case) or blank clears it
    pub fn with_source(mut self, source: Option<&str>) -> Self {
        self.source = source
            .map(str::trim)
            .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("all"))
            .map(str::to_string);
        self
    }

    /// Toggle one severity. The last active severity cannot be switched off.
    pub fn toggle_priority(&mut self, priority: Priority) {
        if let Some(pos) = self.priorities.iter().position(|p| *p == priority) {
            if self.priorities.len() > 1 {
                self.priorities.remove(pos);
            }
        } else {
            self.priorities.push(priority);
        }
    }

    pub fn matches(&self, detection: &Detection) -> bool {
        let needle = self.search.trim().to_lowercase();
        let search_ok = needle.is_empty()
            || [
                detection.animal_type.as_str(),
                detection.location_name.as_str(),
                detection.source.as_str(),
                detection.id.as_str(),
            ]
            .iter()
            .any(|field| field.to_lowercase().contains(&needle));

        let source_ok = self
            .source
            .as_deref()
            .map(|s| detection.source == s)
            .unwrap_or(true);

        search_ok
            && source_ok
            && self.priorities.contains(&detection.priority)
            && detection.confidence >= self.min_confidence
    }

    /// Matching detections in view order
    pub fn apply(&self, detections: &[Arc<Detection>]) -> Vec<Arc<Detection>> {
        detections
            .iter()
            .filter(|d| self.matches(d))
            .cloned()
            .collect()
    }
}

/// Distinct sources, sorted
pub fn available_sources(detections: &[Arc<Detection>]) -> Vec<String> {
    detections
        .iter()
        .map(|d| d.source.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Detections that can be placed on the map
pub fn mappable(detections: &[Arc<Detection>]) -> Vec<Arc<Detection>> {
    detections
        .iter()
        .filter(|d| d.has_valid_coordinates())
        .cloned()
        .collect()
}

/// Header statistics for the feed
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SummaryStats {
    pub total: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
    pub avg_confidence: f64,
    /// Detections per hour over the last seven hours, oldest first
    pub activity: [usize; ACTIVITY_HOURS],
    pub latest: Option<DateTime<Utc>>,
}

impl SummaryStats {
    pub fn compute(detections: &[Arc<Detection>], now: DateTime<Utc>) -> Self {
        let count = |p: Priority| detections.iter().filter(|d| d.priority == p).count();

        let avg_confidence = if detections.is_empty() {
            0.0
        } else {
            detections.iter().map(|d| d.confidence).sum::<f64>() / detections.len() as f64
        };

        let window = Duration::hours(ACTIVITY_HOURS as i64);
        let mut activity = [0usize; ACTIVITY_HOURS];
        let mut latest: Option<DateTime<Utc>> = None;

        for at in detections.iter().filter_map(|d| parse_timestamp(&d.timestamp)) {
            latest = Some(latest.map_or(at, |l| l.max(at)));

            let age = now - at;
            if age < Duration::zero() || age > window {
                continue;
            }
            let hours = (age.num_seconds() / 3600) as usize;
            let index = hours.min(ACTIVITY_HOURS - 1);
            activity[ACTIVITY_HOURS - 1 - index] += 1;
        }

        Self {
            total: detections.len(),
            high: count(Priority::High),
            medium: count(Priority::Medium),
            low: count(Priority::Low),
            avg_confidence,
            activity,
            latest,
        }
    }
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|at| at.with_timezone(&Utc))
}
