//! Speech-to-text behind a uniform async contract.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use voxrelay_core::audio::AudioChunk;
use voxrelay_core::config::TranscriptionConfig;

/// One timed span of transcribed text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcription {
    pub text: String,
    #[serde(default)]
    pub segments: Vec<Segment>,
    pub language: String,
}

impl Transcription {
    /// True when the transcript holds no words.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Tagged transcription failure. Never a panic, never an unclassified error.
#[derive(Debug, Error)]
pub enum TranscriptionFailure {
    #[error("transcription backend unavailable: {0}")]
    Unavailable(String),

    #[error("could not decode transcription: {0}")]
    Decode(String),

    #[error("no audio to transcribe")]
    EmptyInput,

    #[error("transcription backend error: {0}")]
    Backend(String),
}

/// Speech-to-text capability.
///
/// Input audio must be non-empty mono at the rate the transcriber was built
/// for. Resampling and normalisation are the caller's job.
#[async_trait]
pub trait Transcriber: Send + Sync {
    /// Backend identifier for logs.
    fn id(&self) -> &str;

    /// Probe the backend once at startup.
    async fn ready(&self) -> Result<(), TranscriptionFailure>;

    async fn transcribe(&self, audio: &AudioChunk) -> Result<Transcription, TranscriptionFailure>;
}

/// Wrap raw 16-bit PCM in a WAV container.
pub fn pcm_to_wav(pcm: &[i16], sample_rate: u32, channels: u16, bits_per_sample: u16) -> Vec<u8> {
    let data_len = pcm.len() * 2;
    let byte_rate = sample_rate * channels as u32 * bits_per_sample as u32 / 8;
    let block_align = channels * bits_per_sample / 8;
    let file_size = 36 + data_len as u32;

    let mut wav = Vec::with_capacity(44 + data_len);

    wav.extend_from_slice(b"RIFF");
    wav.extend_from_slice(&file_size.to_le_bytes());
    wav.extend_from_slice(b"WAVE");

    wav.extend_from_slice(b"fmt ");
    wav.extend_from_slice(&16u32.to_le_bytes());
    wav.extend_from_slice(&1u16.to_le_bytes()); // PCM
    wav.extend_from_slice(&channels.to_le_bytes());
    wav.extend_from_slice(&sample_rate.to_le_bytes());
    wav.extend_from_slice(&byte_rate.to_le_bytes());
    wav.extend_from_slice(&block_align.to_le_bytes());
    wav.extend_from_slice(&bits_per_sample.to_le_bytes());

    wav.extend_from_slice(b"data");
    wav.extend_from_slice(&(data_len as u32).to_le_bytes());
    for &sample in pcm {
        wav.extend_from_slice(&sample.to_le_bytes());
    }

    wav
}

/// Convert `[-1.0, 1.0]` float samples to 16-bit PCM, clamping overshoot.
pub fn f32_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * i16::MAX as f32) as i16)
        .collect()
}

/// OpenAI-compatible base URL for a transcription provider.
pub fn provider_base_url(config: &TranscriptionConfig) -> String {
    if let Some(url) = &config.base_url {
        return url.trim_end_matches('/').to_string();
    }
    match config.provider.as_str() {
        "openai" => "https://api.openai.com/v1".into(),
        _ => "https://api.groq.com/openai/v1".into(),
    }
}

/// Whisper-style `verbose_json` response body.
#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    text: String,
    #[serde(default)]
    segments: Vec<Segment>,
    #[serde(default)]
    language: Option<String>,
}

/// Transcriber for OpenAI-compatible `/audio/transcriptions` endpoints (Groq, OpenAI, self-hosted).
pub struct HttpTranscriber {
    client: reqwest::Client,
    provider: String,
    base_url: String,
    api_key: Option<String>,
    model: String,
    language: String,
}

impl HttpTranscriber {
    pub fn from_config(config: &TranscriptionConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            provider: config.provider.clone(),
            base_url: provider_base_url(config),
            api_key: config.resolve_api_key(),
            model: config.model().to_string(),
            language: config.language().to_string(),
        }
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("Authorization", format!("Bearer {key}")),
            None => request,
        }
    }
}

#[async_trait]
impl Transcriber for HttpTranscriber {
    fn id(&self) -> &str {
        &self.provider
    }

    async fn ready(&self) -> Result<(), TranscriptionFailure> {
        if self.api_key.is_none() && self.provider != "custom" {
            return Err(TranscriptionFailure::Unavailable(format!(
                "no API key configured for '{}'",
                self.provider
            )));
        }

        let url = format!("{}/models", self.base_url);
        let resp = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|e| TranscriptionFailure::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(TranscriptionFailure::Unavailable(format!(
                "{url} answered {}",
                resp.status()
            )));
        }
        Ok(())
    }

    async fn transcribe(&self, audio: &AudioChunk) -> Result<Transcription, TranscriptionFailure> {
        if audio.is_empty() {
            return Err(TranscriptionFailure::EmptyInput);
        }

        let wav_data = pcm_to_wav(&f32_to_pcm16(&audio.samples), audio.sample_rate, 1, 16);
        let url = format!("{}/audio/transcriptions", self.base_url);

        debug!(
            url,
            model = %self.model,
            wav_bytes = wav_data.len(),
            "Sending audio for transcription"
        );

        let part = reqwest::multipart::Part::bytes(wav_data)
            .file_name("audio.wav")
            .mime_str("audio/wav")
            .map_err(|e| TranscriptionFailure::Backend(e.to_string()))?;

        let form = reqwest::multipart::Form::new()
            .text("model", self.model.clone())
            .text("language", self.language.clone())
            .text("response_format", "verbose_json")
            .part("file", part);

        let resp = self
            .authorize(self.client.post(&url))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TranscriptionFailure::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(TranscriptionFailure::Backend(format!("{status}: {body}")));
        }

        let body = resp
            .text()
            .await
            .map_err(|e| TranscriptionFailure::Decode(e.to_string()))?;
        let parsed: VerboseTranscription =
            serde_json::from_str(&body).map_err(|e| TranscriptionFailure::Decode(e.to_string()))?;

        Ok(Transcription {
            text: parsed.text.trim().to_string(),
            segments: parsed.segments,
            language: parsed.language.unwrap_or_else(|| self.language.clone()),
        })
    }
}
