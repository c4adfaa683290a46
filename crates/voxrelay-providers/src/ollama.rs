//! Local Ollama generator using `/api/generate` with a flattened transcript.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_stream::StreamExt;
use tracing::debug;

use voxrelay_core::config::GenerationConfig;
use voxrelay_core::conversation::ConversationHistory;

use crate::Generator;
use crate::fragment::DeltaStream;
use crate::prompt::flatten_transcript;
use crate::sse::parse_ndjson_stream;

pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

pub struct OllamaGenerator {
    pub base_url: String,
    model: String,
    temperature: f64,
    max_tokens: u32,
    system_prompt: String,
    client: reqwest::Client,
}

impl OllamaGenerator {
    pub fn from_config(config: &GenerationConfig) -> Self {
        Self {
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(OLLAMA_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: config.model().to_string(),
            temperature: config.temperature(),
            max_tokens: config.max_tokens(),
            system_prompt: config.system_prompt().to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    system: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: f64,
    num_predict: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Debug, Deserialize)]
struct TagEntry {
    name: String,
}

/// Decode one NDJSON line into a delta. `Ok(None)` marks a line with no text.
fn parse_line(line: &str) -> anyhow::Result<Option<String>> {
    let parsed: GenerateLine = serde_json::from_str(line)
        .map_err(|e| anyhow::anyhow!("malformed generate line: {e}"))?;
    if let Some(error) = parsed.error {
        anyhow::bail!("ollama error: {error}");
    }
    if parsed.done && parsed.response.is_empty() {
        return Ok(None);
    }
    Ok(Some(parsed.response).filter(|r| !r.is_empty()))
}

/// Whether a tag list contains `model`, treating a missing tag as `:latest`.
fn has_model(tags: &TagsResponse, model: &str) -> bool {
    tags.models.iter().any(|m| {
        m.name == model || (!model.contains(':') && m.name == format!("{model}:latest"))
    })
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn id(&self) -> &str {
        "ollama"
    }

    async fn ready(&self) -> anyhow::Result<()> {
        let response = self
            .client
            .get(format!("{}/api/tags", self.base_url))
            .send()
            .await?;
        if !response.status().is_success() {
            anyhow::bail!("Ollama answered {}", response.status());
        }
        let tags: TagsResponse = response.json().await?;
        if !has_model(&tags, &self.model) {
            anyhow::bail!("Ollama model '{}' is not pulled", self.model);
        }
        Ok(())
    }

    async fn stream_deltas(
        &self,
        prompt: &str,
        history: &ConversationHistory,
    ) -> anyhow::Result<DeltaStream> {
        let body = GenerateRequest {
            model: &self.model,
            prompt: flatten_transcript(history, prompt),
            system: &self.system_prompt,
            stream: true,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        debug!(model = %self.model, base_url = %self.base_url, "Streaming Ollama generation");

        let response = self
            .client
            .post(format!("{}/api/generate", self.base_url))
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Ollama error {status}: {body}");
        }

        let deltas = parse_ndjson_stream(response).filter_map(|line| match line {
            Ok(line) => parse_line(&line).transpose(),
            Err(e) => Some(Err(e)),
        });
        Ok(Box::pin(deltas))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_base_url() {
        let generator = OllamaGenerator::from_config(&GenerationConfig {
            provider: "ollama".into(),
            model: Some("llama3".into()),
            ..GenerationConfig::default()
        });
        assert_eq!(generator.base_url, OLLAMA_BASE_URL);
        assert_eq!(generator.id(), "ollama");
        assert_eq!(generator.model, "llama3");
    }

    #[test]
    fn test_parse_lines() {
        assert_eq!(
            parse_line(r#"{"model":"llama3","response":"Hel","done":false}"#)
                .unwrap()
                .as_deref(),
            Some("Hel")
        );
        assert_eq!(
            parse_line(r#"{"model":"llama3","response":"","done":true,"eval_count":12}"#).unwrap(),
            None
        );
        assert!(parse_line(r#"{"error":"model not found"}"#).is_err());
        assert!(parse_line("garbage").is_err());
    }

    #[test]
    fn test_has_model_latest_tag() {
        let tags: TagsResponse =
            serde_json::from_str(r#"{"models":[{"name":"llama3:latest"},{"name":"phi3:mini"}]}"#)
                .unwrap();
        assert!(has_model(&tags, "llama3"));
        assert!(has_model(&tags, "phi3:mini"));
        assert!(!has_model(&tags, "phi3"));
    }

    #[test]
    fn test_request_body_shape() {
        let body = GenerateRequest {
            model: "llama3",
            prompt: "User: hi\nAssistant:".into(),
            system: "Be brief.",
            stream: true,
            options: GenerateOptions {
                temperature: 0.7,
                num_predict: 1000,
            },
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["stream"], true);
        assert_eq!(json["options"]["num_predict"], 1000);
        assert!(json["prompt"].as_str().unwrap().ends_with("Assistant:"));
    }
}
