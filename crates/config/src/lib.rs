//! Configuration loading, validation, and management for studyloom.
//!
//! Loads configuration from `~/.studyloom/config.toml` with environment
//! variable overrides. Validates and clamps all settings at startup — the
//! loaded struct is passed by reference into each component's constructor,
//! never read ad hoc from the environment mid-request.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.studyloom/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// API key fallback (can be overridden per-provider)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Ordered provider identifiers the failover chain attempts. The
    /// deterministic template fallback is always appended after these.
    #[serde(default = "default_priority_order")]
    pub provider_priority_order: Vec<String>,

    /// Default max tokens per AI reply (clamped to 200..=2000 at load).
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// History window size in user+assistant pairs (clamped to 4..=20).
    #[serde(default = "default_max_history_turns")]
    pub max_history_turns: usize,

    /// Learning-note milestone interval in messages (>= 1).
    #[serde(default = "default_note_milestone_interval")]
    pub note_milestone_interval: i64,

    /// Whether archetype-specific prompt guidance is appended at all.
    #[serde(default = "default_true")]
    pub archetype_prompts_enabled: bool,

    /// Cap on simultaneous in-flight provider calls.
    #[serde(default = "default_max_inflight_calls")]
    pub max_inflight_calls: usize,

    /// Retry/backoff behavior for transient provider errors.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Provider-specific configurations, keyed by provider identifier.
    #[serde(default)]
    pub providers: HashMap<String, ProviderConfig>,

    /// Store configuration.
    #[serde(default)]
    pub store: StoreConfig,
}

fn default_priority_order() -> Vec<String> {
    vec!["anthropic".into(), "openai".into()]
}
fn default_max_tokens() -> u32 {
    400
}
fn default_max_history_turns() -> usize {
    8
}
fn default_note_milestone_interval() -> i64 {
    5
}
fn default_max_inflight_calls() -> usize {
    8
}
fn default_true() -> bool {
    true
}

/// Redact a secret string for Debug output.
fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("api_key", &redact(&self.api_key))
            .field("provider_priority_order", &self.provider_priority_order)
            .field("max_tokens", &self.max_tokens)
            .field("max_history_turns", &self.max_history_turns)
            .field("note_milestone_interval", &self.note_milestone_interval)
            .field("archetype_prompts_enabled", &self.archetype_prompts_enabled)
            .field("max_inflight_calls", &self.max_inflight_calls)
            .field("retry", &self.retry)
            .field("providers", &self.providers)
            .field("store", &self.store)
            .finish()
    }
}

/// Retry/backoff knobs for the failover controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per provider before advancing the chain (>= 1).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base delay for exponential backoff, in milliseconds.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Cap on a single backoff delay, in milliseconds.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Hard timeout for one provider call, in seconds.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    800
}
fn default_max_delay_ms() -> u64 {
    8_000
}
fn default_request_timeout_secs() -> u64 {
    20
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &redact(&self.api_key))
            .field("api_url", &self.api_url)
            .field("model", &self.model)
            .finish()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// SQLite database path. `sqlite::memory:` for ephemeral use.
    #[serde(default = "default_db_path")]
    pub database_path: String,
}

fn default_db_path() -> String {
    "sqlite://studyloom.db".into()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_db_path(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.studyloom/config.toml).
    ///
    /// Also checks environment variables for API keys:
    /// - `STUDYLOOM_API_KEY` (highest priority)
    /// - `ANTHROPIC_API_KEY`
    /// - `OPENAI_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;

        if config.api_key.is_none() {
            config.api_key = std::env::var("STUDYLOOM_API_KEY")
                .ok()
                .or_else(|| std::env::var("ANTHROPIC_API_KEY").ok())
                .or_else(|| std::env::var("OPENAI_API_KEY").ok());
        }

        if let Ok(db) = std::env::var("STUDYLOOM_DB") {
            config.store.database_path = db;
        }

        Ok(config)
    }

    /// Load configuration from a specific file path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("No config file found at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let mut config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        config.clamp();
        Ok(config)
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".studyloom")
    }

    /// Validate the configuration. Hard failures only — out-of-range
    /// numeric settings are clamped, not rejected (see [`Self::clamp`]).
    fn validate(&self) -> Result<(), ConfigError> {
        if self.provider_priority_order.is_empty() {
            return Err(ConfigError::ValidationError(
                "provider_priority_order must not be empty".into(),
            ));
        }

        for name in &self.provider_priority_order {
            if !matches!(name.as_str(), "anthropic" | "openai") && !self.providers.contains_key(name)
            {
                return Err(ConfigError::ValidationError(format!(
                    "unknown provider '{name}' in provider_priority_order"
                )));
            }
        }

        if self.retry.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "retry.max_attempts must be >= 1".into(),
            ));
        }

        Ok(())
    }

    /// Clamp tunables into their documented ranges.
    fn clamp(&mut self) {
        self.max_tokens = self.max_tokens.clamp(200, 2000);
        self.max_history_turns = self.max_history_turns.clamp(4, 20);
        self.note_milestone_interval = self.note_milestone_interval.max(1);
        self.max_inflight_calls = self.max_inflight_calls.max(1);
        self.retry.max_attempts = self.retry.max_attempts.min(3);
    }

    /// Resolve the API key for a named provider (provider-specific key
    /// first, then the global fallback).
    pub fn api_key_for(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|p| p.api_key.clone())
            .or_else(|| self.api_key.clone())
    }

    /// Generate a default config TOML string (for onboarding).
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            provider_priority_order: default_priority_order(),
            max_tokens: default_max_tokens(),
            max_history_turns: default_max_history_turns(),
            note_milestone_interval: default_note_milestone_interval(),
            archetype_prompts_enabled: true,
            max_inflight_calls: default_max_inflight_calls(),
            retry: RetryConfig::default(),
            providers: HashMap::new(),
            store: StoreConfig::default(),
        }
    }
}

/// Get the user's home directory.
fn dirs_home() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var("USERPROFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("C:\\Users\\Default"))
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/tmp"))
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file at {path}: {reason}")]
    ReadError { path: PathBuf, reason: String },

    #[error("Failed to parse config file at {path}: {reason}")]
    ParseError { path: PathBuf, reason: String },

    #[error("Configuration validation failed: {0}")]
    ValidationError(String),
}
