//! The optional LLM capability (§6): used only by the Facade's
//! chat-composition (out of scope here) and, if present, by the
//! optimizer's contradiction and compression stages as a higher-quality
//! alternative to their heuristic fallbacks. Absence must never break a
//! core operation — every caller of this trait has a working fallback
//! path that doesn't touch it.

pub mod http;

use async_trait::async_trait;

use crate::error::Result;

/// A single exchange turn, mirroring the OpenAI-style chat shape every
/// `/v1/chat/completions`-compatible backend expects.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl ChatTurn {
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }
}

/// Whether two statements contradict each other, per an NLI-style
/// judgment. Returned by [`Llm::judge_contradiction`] in place of the
/// optimizer's negation-XOR heuristic when a capability is configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContradictionVerdict {
    pub contradicts: bool,
}

#[async_trait]
pub trait Llm: Send + Sync {
    async fn chat(&self, turns: &[ChatTurn], max_tokens: u32, temperature: f32) -> Result<String>;

    /// Convenience used by the optimizer's compression step: a
    /// query-focused extractive-or-abstractive summary of `content`
    /// within roughly `max_tokens`.
    async fn summarize(&self, query: &str, content: &str, max_tokens: u32) -> Result<String> {
        let prompt = format!("Summarize the following passage, keeping only the parts relevant to \"{query}\":\n\n{content}");
        self.chat(&[ChatTurn::user(prompt)], max_tokens, 0.2).await
    }

    /// Convenience used by the optimizer's contradiction step: whether
    /// `a` and `b` assert incompatible claims.
    async fn judge_contradiction(&self, a: &str, b: &str) -> Result<ContradictionVerdict> {
        let prompt = format!("Do these two statements contradict each other? Answer only \"yes\" or \"no\".\n\nA: {a}\nB: {b}");
        let reply = self.chat(&[ChatTurn::user(prompt)], 4, 0.0).await?;
        Ok(ContradictionVerdict { contradicts: reply.to_ascii_lowercase().contains("yes") })
    }
}

pub use http::HttpLlm;
