//! Server configuration loading from file and environment variables.

use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Top-level server configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server network settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Database settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Bearer-token settings.
    #[serde(default)]
    pub auth: AuthConfig,

    /// Session budget settings.
    #[serde(default)]
    pub session: SessionConfig,

    /// Interview orchestration settings.
    #[serde(default)]
    pub interview: InterviewConfig,

    /// Speech-to-text provider settings.
    #[serde(default)]
    pub stt: SttConfig,

    /// Language-model provider settings.
    #[serde(default)]
    pub llm: LlmProviderConfig,

    /// Text-to-speech provider settings.
    #[serde(default)]
    pub tts: TtsProviderConfig,
}

/// Network configuration for the HTTP server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Host address to bind to.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,
}

/// Database configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_db_path")]
    pub path: String,

    /// SQLite busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,

    /// Maximum pooled connections.
    #[serde(default = "default_pool_max_size")]
    pub pool_max_size: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g., "info", "debug", "viva_server=debug,info").
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Whether to output logs in JSON format.
    #[serde(default)]
    pub json: bool,
}

/// Bearer-token configuration. The identity provider and this server share
/// `token_secret`; Viva only verifies.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    /// Shared secret the HMAC token key is derived from.
    #[serde(default = "default_token_secret")]
    pub token_secret: String,
}

/// Session budget tunables.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    /// Hard absolute ceiling on one session's duration, in seconds.
    #[serde(default = "default_hard_ceiling_secs")]
    pub hard_ceiling_secs: i64,

    /// Heartbeat staleness beyond which a session counts as abandoned.
    #[serde(default = "default_zombie_threshold_secs")]
    pub zombie_threshold_secs: i64,

    /// Fixed-window rate limit (requests/minute) for most endpoints.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_min: u32,

    /// Stricter fixed-window rate limit for session starts.
    #[serde(default = "default_start_rate_limit")]
    pub start_rate_limit_per_min: u32,
}

/// Interview orchestration knobs. Everything not listed here keeps the
/// engine's built-in defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct InterviewConfig {
    /// The position the interviewer persona is hiring for.
    #[serde(default = "default_position")]
    pub position: String,

    /// Overrides the built-in scripted greeting.
    #[serde(default)]
    pub greeting: Option<String>,
}

/// Whisper subprocess configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SttConfig {
    #[serde(default = "default_stt_binary")]
    pub binary_path: String,

    #[serde(default = "default_stt_model")]
    pub model_path: String,

    #[serde(default = "default_language")]
    pub language: String,

    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

/// OpenAI-compatible chat-completions provider configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LlmProviderConfig {
    #[serde(default = "default_llm_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

/// Synthesizer selection and configuration. `engine` is "piper" or "system"
/// (espeak-ng fallback).
#[derive(Debug, Clone, Deserialize)]
pub struct TtsProviderConfig {
    #[serde(default = "default_tts_engine")]
    pub engine: String,

    #[serde(default = "default_tts_binary")]
    pub binary_path: String,

    #[serde(default = "default_tts_voice")]
    pub voice_path: String,

    #[serde(default = "default_speed")]
    pub speed: f32,

    #[serde(default = "default_tts_max_chars")]
    pub max_chars: usize,

    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
}

fn default_port() -> u16 {
    3000
}

fn default_db_path() -> String {
    "viva.db".to_string()
}

fn default_busy_timeout_ms() -> u64 {
    5_000
}

fn default_pool_max_size() -> u32 {
    8
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_token_secret() -> String {
    "dev-secret-change-me".to_string()
}

fn default_hard_ceiling_secs() -> i64 {
    3_600
}

fn default_zombie_threshold_secs() -> i64 {
    120
}

fn default_rate_limit() -> u32 {
    120
}

fn default_start_rate_limit() -> u32 {
    10
}

fn default_position() -> String {
    "a software engineering position".to_string()
}

fn default_stt_binary() -> String {
    "whisper".to_string()
}

fn default_stt_model() -> String {
    "models/ggml-base.en.bin".to_string()
}

fn default_language() -> String {
    "en".to_string()
}

fn default_provider_timeout_secs() -> u64 {
    30
}

fn default_llm_endpoint() -> String {
    "http://127.0.0.1:8080/v1".to_string()
}

fn default_llm_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.7
}

fn default_tts_engine() -> String {
    "piper".to_string()
}

fn default_tts_binary() -> String {
    "piper".to_string()
}

fn default_tts_voice() -> String {
    "voices/en_US-lessac-medium.onnx".to_string()
}

fn default_speed() -> f32 {
    1.0
}

fn default_tts_max_chars() -> usize {
    2_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
            pool_max_size: default_pool_max_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: default_token_secret(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hard_ceiling_secs: default_hard_ceiling_secs(),
            zombie_threshold_secs: default_zombie_threshold_secs(),
            rate_limit_per_min: default_rate_limit(),
            start_rate_limit_per_min: default_start_rate_limit(),
        }
    }
}

impl Default for InterviewConfig {
    fn default() -> Self {
        Self {
            position: default_position(),
            greeting: None,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            binary_path: default_stt_binary(),
            model_path: default_stt_model(),
            language: default_language(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

impl Default for LlmProviderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_llm_endpoint(),
            api_key: None,
            model: default_llm_model(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

impl Default for TtsProviderConfig {
    fn default() -> Self {
        Self {
            engine: default_tts_engine(),
            binary_path: default_tts_binary(),
            voice_path: default_tts_voice(),
            speed: default_speed(),
            max_chars: default_tts_max_chars(),
            timeout_secs: default_provider_timeout_secs(),
        }
    }
}

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Loads configuration from a TOML file, falling back to defaults.
///
/// Environment variable overrides:
/// - `VIVA_HOST` overrides `server.host`
/// - `VIVA_PORT` overrides `server.port`
/// - `VIVA_DB_PATH` overrides `database.path`
/// - `VIVA_LOG_LEVEL` overrides `logging.level`
/// - `VIVA_LOG_JSON` overrides `logging.json` (set to "true" to enable)
/// - `VIVA_TOKEN_SECRET` overrides `auth.token_secret`
/// - `VIVA_LLM_ENDPOINT` overrides `llm.endpoint`
/// - `VIVA_LLM_API_KEY` overrides `llm.api_key`
///
/// # Errors
///
/// Returns `ConfigError` if the file exists but cannot be read or parsed.
pub fn load_config(path: Option<&str>) -> Result<Config, ConfigError> {
    let mut config = match path {
        Some(p) => match std::fs::read_to_string(p) {
            Ok(contents) => toml::from_str(&contents)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = p, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(ConfigError::FileRead(e)),
        },
        None => Config::default(),
    };

    // Environment variable overrides
    if let Ok(host) = std::env::var("VIVA_HOST") {
        if let Ok(parsed) = host.parse() {
            config.server.host = parsed;
        }
    }
    if let Ok(port) = std::env::var("VIVA_PORT") {
        if let Ok(parsed) = port.parse() {
            config.server.port = parsed;
        }
    }
    if let Ok(db_path) = std::env::var("VIVA_DB_PATH") {
        config.database.path = db_path;
    }
    if let Ok(level) = std::env::var("VIVA_LOG_LEVEL") {
        config.logging.level = level;
    }
    if let Ok(json) = std::env::var("VIVA_LOG_JSON") {
        config.logging.json = json == "true" || json == "1";
    }
    if let Ok(secret) = std::env::var("VIVA_TOKEN_SECRET") {
        config.auth.token_secret = secret;
    }
    if let Ok(endpoint) = std::env::var("VIVA_LLM_ENDPOINT") {
        config.llm.endpoint = endpoint;
    }
    if let Ok(key) = std::env::var("VIVA_LLM_API_KEY") {
        config.llm.api_key = Some(key);
    }

    Ok(config)
}
