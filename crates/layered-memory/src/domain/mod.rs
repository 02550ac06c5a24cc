//! Entity definitions (§3). Struct-per-table, one module per entity:
//! persona, knowledge, episode/instance, message.

pub(crate) mod episode;
mod knowledge;
pub(crate) mod message;
mod persona;

pub use episode::{Episode, Instance, SourceKind};
pub use knowledge::{Category, KnowledgeItem};
pub use message::{ChatMessage, Conversation, ConversationKind, Role};
pub use persona::Persona;

use serde_json::Value;
use std::collections::BTreeMap;

pub type Metadata = BTreeMap<String, Value>;

/// Clamps a ranking score into the [0, 1] range per the cross-entity invariant.
pub fn clamp_unit(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_unit_clamps_both_ends() {
        assert_eq!(clamp_unit(-1.0), 0.0);
        assert_eq!(clamp_unit(2.0), 1.0);
        assert_eq!(clamp_unit(0.5), 0.5);
    }
}
