//! Ingestion-time classification (§6, §4.H): decides which entity a
//! freshly ingested piece of text becomes before the Facade persists it.
//! Distinct from [`super::Classifier`], which routes an already-known
//! query rather than classifying new content.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestLayer {
    Persona,
    Knowledge,
    Skill,
    Process,
    Episodic,
}

impl IngestLayer {
    pub fn as_str(&self) -> &'static str {
        match self {
            IngestLayer::Persona => "persona",
            IngestLayer::Knowledge => "knowledge",
            IngestLayer::Skill => "skill",
            IngestLayer::Process => "process",
            IngestLayer::Episodic => "episodic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct IngestClassification {
    pub layer: IngestLayer,
    pub category: String,
    pub confidence: f32,
}

pub trait IngestClassifier: Send + Sync {
    fn classify(&self, text: &str, persona_hint: Option<&str>) -> IngestClassification;
}

const FIRST_PERSON_STATE_MARKERS: [&str; 4] = ["i am", "i'm", "i have", "i've"];
const SKILL_MARKERS: [&str; 3] = ["i can", "i know how to", "i'm good at"];
const PROCESS_MARKERS: [&str; 4] = ["first,", "step 1", "to do this", "the process is"];
const TEMPORAL_MARKERS: [&str; 8] = ["today", "yesterday", "this morning", "last night", "earlier today", "just now", "a moment ago", "this week"];

/// No model in the loop: grammatical person and a short marker list,
/// same texture as [`super::rules::RuleBasedClassifier`].
pub struct RuleBasedIngestClassifier;

impl IngestClassifier for RuleBasedIngestClassifier {
    fn classify(&self, text: &str, persona_hint: Option<&str>) -> IngestClassification {
        let lower = text.to_ascii_lowercase();

        if TEMPORAL_MARKERS.iter().any(|m| lower.contains(m)) {
            return IngestClassification { layer: IngestLayer::Episodic, category: "episodic_event".to_string(), confidence: 0.6 };
        }
        if SKILL_MARKERS.iter().any(|m| lower.contains(m)) {
            return IngestClassification { layer: IngestLayer::Skill, category: "skill".to_string(), confidence: 0.6 };
        }
        if PROCESS_MARKERS.iter().any(|m| lower.contains(m)) {
            return IngestClassification { layer: IngestLayer::Process, category: "process".to_string(), confidence: 0.55 };
        }
        if FIRST_PERSON_STATE_MARKERS.iter().any(|m| lower.contains(m)) || persona_hint.is_some() {
            return IngestClassification { layer: IngestLayer::Persona, category: "persona".to_string(), confidence: 0.6 };
        }
        IngestClassification { layer: IngestLayer::Knowledge, category: "knowledge".to_string(), confidence: 0.5 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_person_state_is_persona() {
        let c = RuleBasedIngestClassifier.classify("I am a backend engineer who likes Rust", None);
        assert_eq!(c.layer, IngestLayer::Persona);
    }

    #[test]
    fn ability_claim_is_skill() {
        let c = RuleBasedIngestClassifier.classify("I can debug a segfault with gdb", None);
        assert_eq!(c.layer, IngestLayer::Skill);
    }

    #[test]
    fn temporal_marker_is_episodic() {
        let c = RuleBasedIngestClassifier.classify("Today we shipped the migration to production", None);
        assert_eq!(c.layer, IngestLayer::Episodic);
    }

    #[test]
    fn plain_statement_is_knowledge() {
        let c = RuleBasedIngestClassifier.classify("The Rust borrow checker enforces aliasing rules at compile time", None);
        assert_eq!(c.layer, IngestLayer::Knowledge);
    }
}
