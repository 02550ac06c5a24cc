use super::{Classifier, QueryIntent};
use crate::store::RecordKind;

const FIRST_PERSON_MARKERS: [&str; 8] = ["i ", "i'", "my ", "mine", "me ", "myself", "am i", "do i"];

const TEMPORAL_MARKERS: [(&str, u64); 7] = [
    ("yesterday", 86_400),
    ("today", 86_400),
    ("last week", 7 * 86_400),
    ("last month", 30 * 86_400),
    ("this week", 7 * 86_400),
    ("earlier", 30 * 86_400),
    ("previously", 90 * 86_400),
];

/// A pattern-list router: no model in the loop, just substring checks
/// against a short, curated list per signal. Cheap enough to run on
/// every query; a real NLU classifier can implement the same trait
/// later without touching callers.
pub struct RuleBasedClassifier;

impl Classifier for RuleBasedClassifier {
    fn classify(&self, query: &str) -> QueryIntent {
        let lower = query.to_lowercase();

        let self_referential = FIRST_PERSON_MARKERS.iter().any(|m| lower.contains(m));
        let temporal_window = TEMPORAL_MARKERS
            .iter()
            .find(|(marker, _)| lower.contains(marker))
            .map(|(_, secs)| std::time::Duration::from_secs(*secs));

        let mut suggested_sources = Vec::new();
        if self_referential {
            suggested_sources.push(RecordKind::Persona);
        }
        if temporal_window.is_some() {
            suggested_sources.push(RecordKind::Episode);
            suggested_sources.push(RecordKind::Instance);
        }
        if suggested_sources.is_empty() {
            suggested_sources.push(RecordKind::Knowledge);
        }

        QueryIntent { self_referential, temporal_window, suggested_sources }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_person_query_is_self_referential() {
        let intent = RuleBasedClassifier.classify("what do I like for breakfast");
        assert!(intent.self_referential);
        assert!(intent.suggested_sources.contains(&RecordKind::Persona));
    }

    #[test]
    fn temporal_marker_sets_a_window() {
        let intent = RuleBasedClassifier.classify("what did we discuss yesterday");
        assert!(intent.temporal_window.is_some());
        assert!(intent.suggested_sources.contains(&RecordKind::Episode));
    }

    #[test]
    fn plain_topical_query_suggests_knowledge() {
        let intent = RuleBasedClassifier.classify("explain the borrow checker");
        assert!(!intent.self_referential);
        assert_eq!(intent.suggested_sources, vec![RecordKind::Knowledge]);
    }
}
