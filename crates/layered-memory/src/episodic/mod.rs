//! Episodic Pipeline (§4.E): two idempotent, crash-safe jobs. Both run
//! as plain interval loops owned by the construction root, wrapping
//! their unit of work in `tracing` spans and §10.2 metrics counters —
//! there's no ambient global scheduler here.

pub mod conversation_log;
pub mod episodization;
pub mod instancization;
pub mod sqlite_log;

pub use conversation_log::{ConversationLog, InMemoryConversationLog, SharedConversationLog};
pub use episodization::{EpisodizationJob, EpisodizationReport};
pub use instancization::{InstancizationJob, InstancizationReport};
pub use sqlite_log::SqliteConversationLog;
