use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Metadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Knowledge,
    Skill,
    Process,
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Knowledge => "knowledge",
            Category::Skill => "skill",
            Category::Process => "process",
            Category::Other => "other",
        }
    }
}

/// Long-lived factual record (§3). `tags` is an ordered set: insertion
/// order is preserved, duplicates are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub id: Uuid,
    pub user_id: String,
    pub category: Category,
    pub content: String,
    pub tags: Vec<String>,
    pub metadata: Metadata,
    pub importance: f32,
    pub confidence: f32,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

impl KnowledgeItem {
    pub fn new(
        user_id: impl Into<String>,
        category: Category,
        content: impl Into<String>,
        embedding: Vec<f32>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            category,
            content: content.into(),
            tags: Vec::new(),
            metadata: Metadata::new(),
            importance: 0.5,
            confidence: 0.5,
            embedding,
            created_at: now,
            updated_at: now,
            last_accessed_at: now,
        }
    }

    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }

    /// Clamps `importance`/`confidence` into [0, 1], per the cross-entity invariant.
    pub fn clamp_scores(&mut self) {
        self.importance = super::clamp_unit(self.importance);
        self.confidence = super::clamp_unit(self.confidence);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_tag_is_idempotent() {
        let mut item = KnowledgeItem::new("u1", Category::Knowledge, "rust is great", vec![]);
        item.add_tag("rust");
        item.add_tag("rust");
        assert_eq!(item.tags, vec!["rust".to_string()]);
    }

    #[test]
    fn clamp_scores_bounds_out_of_range_values() {
        let mut item = KnowledgeItem::new("u1", Category::Skill, "x", vec![]);
        item.importance = 5.0;
        item.confidence = -3.0;
        item.clamp_scores();
        assert_eq!(item.importance, 1.0);
        assert_eq!(item.confidence, 0.0);
    }
}
