//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::audio::DEFAULT_SAMPLE_RATE;

/// Top-level voxrelay configuration, loaded from a JSON5 file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub audio: Option<AudioConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub transcription: Option<TranscriptionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation: Option<GenerationConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub logging: Option<LoggingConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bind: Option<String>,

    /// Interval between server pings in seconds (0 disables heartbeats).
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval_secs: u64,

    /// Outbound messages buffered per connection before sends apply backpressure.
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,

    /// Largest accepted WebSocket frame in bytes.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            bind: None,
            heartbeat_interval_secs: default_heartbeat_interval(),
            outbound_buffer: default_outbound_buffer(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_port() -> u16 {
    8765
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_outbound_buffer() -> usize {
    64
}

fn default_max_frame_bytes() -> usize {
    1_048_576
}

/// Inbound audio format and voice-activity sensitivity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,

    /// RMS level (on `[-1.0, 1.0]` samples) above which a sub-frame counts as speech.
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,

    /// Sub-frame length used by the energy detector.
    #[serde(default = "default_frame_ms")]
    pub frame_ms: u32,

    /// Fraction of sub-frames that must be voiced for a chunk to count as speech.
    #[serde(default = "default_min_speech_ratio")]
    pub min_speech_ratio: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            vad_threshold: default_vad_threshold(),
            frame_ms: default_frame_ms(),
            min_speech_ratio: default_min_speech_ratio(),
        }
    }
}

fn default_sample_rate() -> u32 {
    DEFAULT_SAMPLE_RATE
}

fn default_vad_threshold() -> f32 {
    0.01
}

fn default_frame_ms() -> u32 {
    30
}

fn default_min_speech_ratio() -> f32 {
    0.1
}

/// Speech-to-text capability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptionConfig {
    /// Provider: "groq", "openai", or "custom" (default: "groq").
    #[serde(default = "default_transcription_provider")]
    pub provider: String,

    /// Base URL override (required for "custom").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    /// Model name (e.g. "whisper-large-v3-turbo").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    /// Language hint passed to the backend (default: "en").
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            provider: default_transcription_provider(),
            base_url: None,
            api_key: None,
            api_key_env: Some("GROQ_API_KEY".into()),
            model: None,
            language: None,
        }
    }
}

fn default_transcription_provider() -> String {
    "groq".into()
}

impl TranscriptionConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("whisper-large-v3-turbo")
    }

    pub fn language(&self) -> &str {
        self.language.as_deref().unwrap_or("en")
    }
}

/// Text-generation capability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Provider: "groq", "openai", or "ollama" (default: "groq").
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            base_url: None,
            api_key: None,
            api_key_env: Some("GROQ_API_KEY".into()),
            model: None,
            temperature: None,
            max_tokens: None,
            system_prompt: None,
        }
    }
}

fn default_generation_provider() -> String {
    "groq".into()
}

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful and knowledgeable voice assistant. \
Provide clear, concise, and accurate responses.";

impl GenerationConfig {
    pub fn resolve_api_key(&self) -> Option<String> {
        resolve_secret_field(&self.api_key, &self.api_key_env)
    }

    pub fn model(&self) -> &str {
        self.model.as_deref().unwrap_or("mixtral-8x7b-32768")
    }

    pub fn temperature(&self) -> f64 {
        self.temperature.unwrap_or(0.7)
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.unwrap_or(1000)
    }

    pub fn system_prompt(&self) -> &str {
        self.system_prompt.as_deref().unwrap_or(DEFAULT_SYSTEM_PROMPT)
    }
}

/// Which conversation store backs session history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreKind {
    #[default]
    Memory,
    Jsonl,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Maximum retained conversation turns per session (default: 10).
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Upper bound on a single transcription call or a single fragment wait.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage_timeout_secs: Option<u64>,

    /// Consecutive non-speech chunks that end an utterance (0 = transcribe each speech chunk).
    #[serde(default)]
    pub utterance_silence_chunks: usize,

    /// Utterances are flushed to transcription once they reach this length.
    #[serde(default = "default_max_utterance_secs")]
    pub max_utterance_secs: u64,

    /// Inputs queued per session before the connection stops reading (default: 32).
    #[serde(default = "default_inbox_capacity")]
    pub inbox_capacity: usize,

    #[serde(default)]
    pub store: StoreKind,

    /// Directory for the JSONL store (default: `~/.voxrelay/conversations`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_dir: Option<String>,
}

fn default_inbox_capacity() -> usize {
    32
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            history_turns: default_history_turns(),
            stage_timeout_secs: None,
            utterance_silence_chunks: 0,
            max_utterance_secs: default_max_utterance_secs(),
            inbox_capacity: default_inbox_capacity(),
            store: StoreKind::Memory,
            store_dir: None,
        }
    }
}

fn default_history_turns() -> usize {
    10
}

fn default_max_utterance_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log format: "plain" (default) or "json".
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Log level override (trace/debug/info/warn/error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,

    /// Per-crate log level overrides (e.g. "voxrelay_agent=debug").
    #[serde(default)]
    pub filters: Vec<String>,

    /// Output target: "stderr" (default) or "stdout".
    #[serde(default = "default_log_output")]
    pub output: String,
}

fn default_log_format() -> String {
    "plain".into()
}

fn default_log_output() -> String {
    "stderr".into()
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Serve Prometheus metrics at `/metrics` (requires the `metrics` feature).
    #[serde(default)]
    pub enabled: bool,
}

/// Resolve a secret: check the direct value first, then the env-var reference.
pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> crate::error::Result<String> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| crate::error::VoxRelayError::Config(e.to_string()))?;
    Ok(re
        .replace_all(input, |caps: &regex::Captures| {
            std::env::var(&caps[1]).unwrap_or_default()
        })
        .into_owned())
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    ///
    /// A missing file yields the default config.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path)?;
        Self::parse(&raw)
    }

    /// Parse config text (JSON5), substituting `${ENV_VAR}` references.
    pub fn parse(raw: &str) -> crate::error::Result<Self> {
        let substituted = substitute_env_vars(raw)?;
        json5::from_str(&substituted)
            .map_err(|e| crate::error::VoxRelayError::Config(e.to_string()))
    }

    /// Default config file location: `~/.voxrelay/config.json`.
    pub fn default_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn gateway(&self) -> GatewayConfig {
        self.gateway.clone().unwrap_or_default()
    }

    pub fn audio(&self) -> AudioConfig {
        self.audio.clone().unwrap_or_default()
    }

    pub fn transcription(&self) -> TranscriptionConfig {
        self.transcription.clone().unwrap_or_default()
    }

    pub fn generation(&self) -> GenerationConfig {
        self.generation.clone().unwrap_or_default()
    }

    pub fn session(&self) -> SessionConfig {
        self.session.clone().unwrap_or_default()
    }

    pub fn gateway_port(&self) -> u16 {
        self.gateway
            .as_ref()
            .map(|g| g.port)
            .unwrap_or_else(default_port)
    }

    pub fn metrics_enabled(&self) -> bool {
        self.metrics.as_ref().is_some_and(|m| m.enabled)
    }

    /// Directory used by the JSONL conversation store.
    pub fn store_dir(&self) -> PathBuf {
        self.session
            .as_ref()
            .and_then(|s| s.store_dir.as_ref())
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir().join("conversations"))
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        let transcription = self.transcription();
        if transcription.provider != "custom" && transcription.resolve_api_key().is_none() {
            warnings.push(format!(
                "Transcription provider '{}' has no API key configured",
                transcription.provider
            ));
        }
        if transcription.provider == "custom" && transcription.base_url.is_none() {
            errors.push("Transcription provider 'custom' requires base_url".to_string());
        }

        let generation = self.generation();
        if generation.provider != "ollama" && generation.resolve_api_key().is_none() {
            warnings.push(format!(
                "Generation provider '{}' has no API key configured",
                generation.provider
            ));
        }

        let session = self.session();
        if session.history_turns < 2 || session.history_turns % 2 != 0 {
            errors.push(format!(
                "session.history_turns must be an even number >= 2 (got {})",
                session.history_turns
            ));
        }
        if session.inbox_capacity == 0 {
            errors.push("session.inbox_capacity cannot be 0".to_string());
        }
        if session.stage_timeout_secs == Some(0) {
            errors.push("session.stage_timeout_secs cannot be 0".to_string());
        }

        let audio = self.audio();
        if audio.sample_rate == 0 {
            errors.push("audio.sample_rate cannot be 0".to_string());
        }
        if !(0.0..=1.0).contains(&audio.min_speech_ratio) {
            errors.push(format!(
                "audio.min_speech_ratio must be within [0, 1] (got {})",
                audio.min_speech_ratio
            ));
        }

        if let Some(gw) = &self.gateway {
            if gw.port == 0 {
                errors.push("Gateway port cannot be 0".to_string());
            }
            if gw.outbound_buffer == 0 {
                errors.push("gateway.outbound_buffer cannot be 0".to_string());
            }
        }

        (warnings, errors)
    }
}

/// Base directory for voxrelay data: `~/.voxrelay/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".voxrelay")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        // SAFETY: test-only, the variable name is unique to this test
        unsafe { std::env::set_var("TEST_VR_KEY", "gsk-test-123") };
        let result = substitute_env_vars(r#"{"key": "${TEST_VR_KEY}", "other": "plain"}"#).unwrap();
        assert!(result.contains("gsk-test-123"));
        assert!(result.contains("plain"));
        unsafe { std::env::remove_var("TEST_VR_KEY") };
    }

    #[test]
    fn test_env_var_missing() {
        let result = substitute_env_vars(r#"{"key": "${NONEXISTENT_VAR_VR_TEST}"}"#).unwrap();
        assert!(result.contains(r#""""#));
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.gateway_port(), 8765);
        assert_eq!(config.session().history_turns, 10);
        assert_eq!(config.audio().sample_rate, 16_000);
        assert_eq!(config.generation().model(), "mixtral-8x7b-32768");
        assert_eq!(config.generation().max_tokens(), 1000);
        assert!(!config.metrics_enabled());
    }

    #[test]
    fn test_parse_json5_sections() {
        let config = Config::parse(
            r#"{
                // comments are fine in JSON5
                gateway: { port: 9000 },
                session: { history_turns: 6, stage_timeout_secs: 20, store: "jsonl" },
                generation: { provider: "ollama", model: "llama3" },
            }"#,
        )
        .unwrap();
        assert_eq!(config.gateway_port(), 9000);
        assert_eq!(config.gateway().heartbeat_interval_secs, 30);
        let session = config.session();
        assert_eq!(session.history_turns, 6);
        assert_eq!(session.stage_timeout_secs, Some(20));
        assert_eq!(session.store, StoreKind::Jsonl);
        assert_eq!(config.generation().model(), "llama3");
    }

    #[test]
    fn test_resolve_secret_prefers_direct_value() {
        // SAFETY: test-only, the variable name is unique to this test
        unsafe { std::env::set_var("TEST_VR_API_KEY", "from-env") };
        let from_env = GenerationConfig {
            api_key_env: Some("TEST_VR_API_KEY".into()),
            ..GenerationConfig::default()
        };
        assert_eq!(from_env.resolve_api_key(), Some("from-env".into()));

        let direct = GenerationConfig {
            api_key: Some("direct-key".into()),
            api_key_env: Some("TEST_VR_API_KEY".into()),
            ..GenerationConfig::default()
        };
        assert_eq!(direct.resolve_api_key(), Some("direct-key".into()));
        unsafe { std::env::remove_var("TEST_VR_API_KEY") };
    }

    #[test]
    fn test_logging_config_defaults() {
        let config = Config::parse(r#"{ "logging": {} }"#).unwrap();
        let logging = config.logging.expect("logging should be present");
        assert_eq!(logging.format, "plain");
        assert!(logging.level.is_none());
        assert_eq!(logging.output, "stderr");
        assert!(logging.filters.is_empty());
    }

    #[test]
    fn test_validate_odd_history_cap_errors() {
        let config = Config {
            session: Some(SessionConfig {
                history_turns: 7,
                ..SessionConfig::default()
            }),
            ..Config::default()
        };
        let (_warnings, errors) = config.validate();
        assert!(
            errors.iter().any(|e| e.contains("history_turns")),
            "Expected a history_turns error, got: {errors:?}"
        );
    }

    #[test]
    fn test_inbox_capacity_default_and_zero() {
        let config = Config::parse(r#"{ "session": {} }"#).unwrap();
        assert_eq!(config.session().inbox_capacity, 32);

        let config = Config::parse(r#"{ "session": { "inbox_capacity": 0 } }"#).unwrap();
        let (_warnings, errors) = config.validate();
        assert!(
            errors.iter().any(|e| e.contains("inbox_capacity")),
            "Expected an inbox_capacity error, got: {errors:?}"
        );
    }

    #[test]
    fn test_validate_missing_api_key_warns() {
        let config = Config {
            generation: Some(GenerationConfig {
                provider: "openai".into(),
                api_key_env: None,
                ..GenerationConfig::default()
            }),
            ..Config::default()
        };
        let (warnings, _errors) = config.validate();
        assert!(
            warnings.iter().any(|w| w.contains("openai") && w.contains("API key")),
            "Expected a warning about the openai key, got: {warnings:?}"
        );
    }

    #[test]
    fn test_validate_ollama_needs_no_key() {
        let config = Config {
            generation: Some(GenerationConfig {
                provider: "ollama".into(),
                api_key_env: None,
                ..GenerationConfig::default()
            }),
            ..Config::default()
        };
        let (warnings, _errors) = config.validate();
        assert!(!warnings.iter().any(|w| w.contains("Generation provider")));
    }
}
