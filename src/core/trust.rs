//! Trust scorer.
//!
//! Cases reporting the same species at the same place corroborate each
//! other. A case's trust score is the number of live cases (itself
//! included) sharing its trust key. Cases with no species and no location
//! have no key and score 0.

use std::collections::HashMap;

use super::normalizer::CaseFragment;

const SEPARATOR: char = '|';

fn escape(component: &str) -> String {
    component
        .trim()
        .to_lowercase()
        .replace('\\', "\\\\")
        .replace(SEPARATOR, "\\|")
}

/// Derive the trust key for a species/location pair.
///
/// Components are trimmed, lowercased and escaped, so `("a|b", "")` and
/// `("a", "b")` never collide.
pub fn trust_key(species: &str, location: &str) -> Option<String> {
    let species = escape(species);
    let location = escape(location);
    if species.is_empty() && location.is_empty() {
        return None;
    }
    Some(format!("{}{}{}", species, SEPARATOR, location))
}

/// Counts of cases per trust key, rebuilt for the whole case set each pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrustScorer {
    counts: HashMap<String, u32>,
}

impl TrustScorer {
    pub fn build<'a>(cases: impl IntoIterator<Item = &'a CaseFragment>) -> Self {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for case in cases {
            if let Some(key) = trust_key(&case.animal_type, &case.location_name) {
                *counts.entry(key).or_insert(0) += 1;
            }
        }
        Self { counts }
    }

    pub fn score(&self, case: &CaseFragment) -> u32 {
        trust_key(&case.animal_type, &case.location_name)
            .and_then(|key| self.counts.get(&key).copied())
            .unwrap_or(0)
    }

    /// Number of distinct non-empty trust keys
    pub fn groups(&self) -> usize {
        self.counts.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::normalizer::normalize;
    use crate::domain::raw::RawCaseRecord;
    use chrono::Utc;
    use serde_json::json;

    fn case(id: &str, species: &str, location: &str) -> CaseFragment {
        normalize(
            &RawCaseRecord::new(id, json!({ "animal_type": species, "location": location })),
            Utc::now(),
        )
        .unwrap()
    }

    #[test]
    fn test_trust_key_normalizes_case_and_whitespace() {
        assert_eq!(
            trust_key(" Pangolin ", "JOHOR BAHRU"),
            trust_key("pangolin", "johor bahru")
        );
        assert_eq!(trust_key("", "  "), None);
    }

    #[test]
    fn test_separator_is_escaped() {
        assert_ne!(trust_key("a|b", ""), trust_key("a", "b"));
        assert_ne!(trust_key("a\\", "|b"), trust_key("a", "\\|b"));
        assert_eq!(trust_key("a|b", "").unwrap(), "a\\|b|");
    }

    #[test]
    fn test_matching_cases_score_together() {
        let cases = vec![
            case("A", "Pangolin", "Johor Bahru"),
            case("B", "pangolin", "johor bahru "),
            case("C", "", ""),
        ];
        let scorer = TrustScorer::build(&cases);

        assert_eq!(scorer.score(&cases[0]), 2);
        assert_eq!(scorer.score(&cases[1]), 2);
        assert_eq!(scorer.score(&cases[2]), 0);
        assert_eq!(scorer.groups(), 1);
    }

    #[test]
    fn test_scores_are_order_independent() {
        let mut cases = vec![
            case("A", "Tiger", "Gerik"),
            case("B", "Hornbill", "Sibu"),
            case("C", "Tiger", "Gerik"),
            case("D", "Tiger", ""),
            case("E", "", "Gerik"),
        ];
        let expected: Vec<u32> = {
            let scorer = TrustScorer::build(&cases);
            cases.iter().map(|c| scorer.score(c)).collect()
        };
        assert_eq!(expected, vec![2, 1, 2, 1, 1]);

        for rotation in 1..cases.len() {
            cases.rotate_left(1);
            let scorer = TrustScorer::build(&cases);
            for c in &cases {
                let original = ["A", "B", "C", "D", "E"]
                    .iter()
                    .position(|id| *id == c.id)
                    .unwrap();
                assert_eq!(scorer.score(c), expected[original], "rotation {}", rotation);
            }
        }
    }
}
