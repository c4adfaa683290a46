//! Text-generation adapters.
//!
//! Each backend implements [`Generator`] by streaming raw text deltas. The
//! provided [`Generator::generate`] turns those into the cumulative,
//! terminal-guaranteed [`ResponseFragment`] stream sessions consume.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use voxrelay_core::config::GenerationConfig;
use voxrelay_core::conversation::ConversationHistory;

pub mod fragment;
pub mod ollama;
pub mod openai;
pub mod prompt;
pub mod sse;

pub use fragment::{DeltaStream, FragmentStream, ResponseFragment};

/// The text-generation capability.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Backend identifier (e.g., "groq", "ollama").
    fn id(&self) -> &str;

    /// Probe the backend once at startup.
    async fn ready(&self) -> anyhow::Result<()>;

    /// Start a generation and return the backend's raw text deltas.
    async fn stream_deltas(
        &self,
        prompt: &str,
        history: &ConversationHistory,
    ) -> anyhow::Result<DeltaStream>;

    /// Generate a reply to `prompt` given `history`.
    ///
    /// Never fails: a backend that cannot start yields a single failure
    /// fragment. Dropping the stream aborts the underlying request.
    async fn generate(&self, prompt: &str, history: &ConversationHistory) -> FragmentStream {
        match self.stream_deltas(prompt, history).await {
            Ok(deltas) => fragment::into_fragments(deltas),
            Err(e) => {
                warn!(backend = self.id(), error = %e, "Generation failed to start");
                fragment::single(ResponseFragment::failure(format!("{e:#}")))
            }
        }
    }
}

/// Build the generator named by `config.provider`.
pub fn build_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "groq" | "openai" => Ok(Arc::new(openai::ChatCompletionsGenerator::from_config(config))),
        "ollama" => Ok(Arc::new(ollama::OllamaGenerator::from_config(config))),
        other => anyhow::bail!("Unknown generation provider '{other}'"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    struct Refusing;

    #[async_trait]
    impl Generator for Refusing {
        fn id(&self) -> &str {
            "refusing"
        }

        async fn ready(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn stream_deltas(
            &self,
            _prompt: &str,
            _history: &ConversationHistory,
        ) -> anyhow::Result<DeltaStream> {
            anyhow::bail!("connection refused")
        }
    }

    #[tokio::test]
    async fn test_start_failure_becomes_fragment() {
        let fragments: Vec<_> = Refusing
            .generate("hi", &ConversationHistory::new())
            .await
            .collect()
            .await;
        assert_eq!(fragments.len(), 1);
        assert!(!fragments[0].success);
        assert!(fragments[0].error.as_deref().unwrap().contains("connection refused"));
    }

    #[test]
    fn test_build_generator_by_provider() {
        let groq = build_generator(&GenerationConfig::default()).unwrap();
        assert_eq!(groq.id(), "groq");

        let ollama = build_generator(&GenerationConfig {
            provider: "ollama".into(),
            ..GenerationConfig::default()
        })
        .unwrap();
        assert_eq!(ollama.id(), "ollama");

        assert!(
            build_generator(&GenerationConfig {
                provider: "bard".into(),
                ..GenerationConfig::default()
            })
            .is_err()
        );
    }
}
