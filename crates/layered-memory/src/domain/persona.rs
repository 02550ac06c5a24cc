use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::Metadata;

/// Per-user profile record. At most one row per `user_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Persona {
    pub user_id: String,
    pub name: Option<String>,
    pub preferences: Metadata,
    pub interests: BTreeSet<String>,
    pub expertise: BTreeSet<String>,
    pub raw_content: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Persona {
    pub fn new(user_id: impl Into<String>, raw_content: impl Into<String>, embedding: Vec<f32>) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            name: None,
            preferences: BTreeMap::new(),
            interests: BTreeSet::new(),
            expertise: BTreeSet::new(),
            raw_content: raw_content.into(),
            embedding,
            created_at: now,
            updated_at: now,
        }
    }

    /// Applies an in-place update, matching the "last writer wins on
    /// fields" ordering guarantee from §5 — callers still issue a cache
    /// invalidation regardless of whether this call actually wins the race.
    pub fn apply_update(&mut self, raw_content: impl Into<String>, embedding: Vec<f32>) {
        self.raw_content = raw_content.into();
        self.embedding = embedding;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_persona_has_equal_created_and_updated() {
        let p = Persona::new("u1", "likes rust", vec![0.0; 4]);
        assert_eq!(p.created_at, p.updated_at);
    }

    #[test]
    fn apply_update_bumps_updated_at() {
        let mut p = Persona::new("u1", "likes rust", vec![0.0; 4]);
        let before = p.updated_at;
        std::thread::sleep(std::time::Duration::from_millis(2));
        p.apply_update("likes rust and go", vec![1.0; 4]);
        assert!(p.updated_at >= before);
        assert_eq!(p.raw_content, "likes rust and go");
    }
}
