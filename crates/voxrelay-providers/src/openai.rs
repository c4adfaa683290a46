//! OpenAI-compatible Chat Completions generator.
//!
//! Streams `/chat/completions` over SSE. Serves Groq (the default backend)
//! and OpenAI, which differ only in base URL.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::{debug, trace};

use voxrelay_core::config::GenerationConfig;
use voxrelay_core::conversation::ConversationHistory;

use crate::Generator;
use crate::fragment::DeltaStream;
use crate::prompt::chat_messages;
use crate::sse::parse_sse_stream;

pub const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

pub struct ChatCompletionsGenerator {
    pub base_url: String,
    provider_id: String,
    api_key: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    system_prompt: String,
    client: reqwest::Client,
}

impl ChatCompletionsGenerator {
    pub fn from_config(config: &GenerationConfig) -> Self {
        let default_base = match config.provider.as_str() {
            "openai" => OPENAI_BASE_URL,
            _ => GROQ_BASE_URL,
        };
        Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(default_base)
                .trim_end_matches('/')
                .to_string(),
            provider_id: config.provider.clone(),
            api_key: config.resolve_api_key(),
            model: config.model().to_string(),
            temperature: config.temperature(),
            max_tokens: config.max_tokens(),
            system_prompt: config.system_prompt().to_string(),
            client: reqwest::Client::new(),
        }
    }

    fn request(&self, method: reqwest::Method, path: &str) -> anyhow::Result<reqwest::RequestBuilder> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow::anyhow!("No API key configured for '{}'", self.provider_id))?;
        Ok(self
            .client
            .request(method, format!("{}{path}", self.base_url))
            .header("authorization", format!("Bearer {api_key}")))
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<serde_json::Value>,
    max_tokens: u32,
    temperature: f64,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Pull the text delta out of one SSE `data:` payload.
///
/// Returns `Ok(None)` for keep-alives, role-only deltas and finish markers.
fn parse_chunk(data: &str) -> anyhow::Result<Option<String>> {
    if let Ok(err) = serde_json::from_str::<serde_json::Value>(data) {
        if let Some(message) = err.get("error").and_then(|e| e.get("message")) {
            anyhow::bail!("backend error: {message}");
        }
    }
    let chunk: ChatCompletionChunk = match serde_json::from_str(data) {
        Ok(c) => c,
        Err(e) => {
            trace!(%e, data, "Skipping unparseable chunk");
            return Ok(None);
        }
    };
    let Some(choice) = chunk.choices.into_iter().next() else {
        return Ok(None);
    };
    if let Some(reason) = &choice.finish_reason {
        trace!(reason, "Completion finished");
    }
    Ok(choice.delta.content.filter(|c| !c.is_empty()))
}

#[async_trait]
impl Generator for ChatCompletionsGenerator {
    fn id(&self) -> &str {
        &self.provider_id
    }

    async fn ready(&self) -> anyhow::Result<()> {
        let response = self.request(reqwest::Method::GET, "/models")?.send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Model listing failed {status}: {body}");
        }
        Ok(())
    }

    async fn stream_deltas(
        &self,
        prompt: &str,
        history: &ConversationHistory,
    ) -> anyhow::Result<DeltaStream> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: chat_messages(&self.system_prompt, history, prompt),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream: true,
        };

        debug!(
            model = %body.model,
            base_url = %self.base_url,
            turns = history.len(),
            "Streaming chat completion"
        );

        let response = self
            .request(reqwest::Method::POST, "/chat/completions")?
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Chat completion error {status}: {body}");
        }

        let deltas = parse_sse_stream(response)
            .take_while(|event| !matches!(event, Ok(e) if e.data.trim() == "[DONE]"))
            .filter_map(|event| match event {
                Ok(event) => parse_chunk(event.data.trim()).transpose(),
                Err(e) => Some(Err(e)),
            });

        Ok(Box::pin(deltas))
    }
}
