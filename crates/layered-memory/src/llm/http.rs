//! HTTP-backed LLM capability: a chat-completion request against a
//! `/v1/chat/completions` endpoint, compatible with any OpenAI-style
//! backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{ChatTurn, Llm};
use crate::error::{MemoryError, Result};

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessageWire>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessageWire {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: Option<ChatMessageWire>,
}

pub struct HttpLlm {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl HttpLlm {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::builder().timeout(Duration::from_secs(120)).build().unwrap_or_default(),
        }
    }

    fn url(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url)
    }
}

#[async_trait]
impl Llm for HttpLlm {
    async fn chat(&self, turns: &[ChatTurn], max_tokens: u32, temperature: f32) -> Result<String> {
        debug!(turns = turns.len(), max_tokens, "requesting chat completion");
        let request = ChatCompletionRequest {
            model: &self.model,
            messages: turns.iter().map(|t| ChatMessageWire { role: t.role.clone(), content: t.content.clone() }).collect(),
            max_tokens,
            temperature,
            stream: false,
        };

        let response = self
            .client
            .post(self.url())
            .json(&request)
            .send()
            .await
            .map_err(|e| MemoryError::transient(format!("llm request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(MemoryError::transient(format!("llm backend returned {status}: {body}")));
        }

        let parsed: ChatCompletionResponse =
            response.json().await.map_err(|e| MemoryError::internal(anyhow::anyhow!("failed to parse llm response: {e}")))?;

        Ok(parsed.choices.into_iter().next().and_then(|c| c.message).map(|m| m.content).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;

    #[tokio::test]
    async fn chat_parses_first_choice() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "yes"}}]}"#)
            .create_async()
            .await;

        let llm = HttpLlm::new(server.url(), "test-model");
        let reply = llm.chat(&[ChatTurn::user("do these contradict?")], 4, 0.0).await.unwrap();
        assert_eq!(reply, "yes");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn non_success_status_is_transient() {
        let mut server = Server::new_async().await;
        server.mock("POST", "/v1/chat/completions").with_status(503).create_async().await;

        let llm = HttpLlm::new(server.url(), "test-model");
        let err = llm.chat(&[ChatTurn::user("hi")], 4, 0.0).await.unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn judge_contradiction_parses_yes() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices": [{"message": {"role": "assistant", "content": "Yes"}}]}"#)
            .create_async()
            .await;

        let llm = HttpLlm::new(server.url(), "test-model");
        let verdict = llm.judge_contradiction("it is stable", "it is not stable").await.unwrap();
        assert!(verdict.contradicts);
    }
}
