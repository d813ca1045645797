//! Configuration loading, validation, and management for stepwise.
//!
//! Loads configuration from `~/.stepwise/config.toml` with environment
//! variable overrides. Validates all settings at startup.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The root configuration structure.
///
/// Maps directly to `~/.stepwise/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Reasoning oracle connection settings
    #[serde(default)]
    pub oracle: OracleSettings,

    /// Reasoning loop limits
    #[serde(default)]
    pub agent: AgentSettings,
}

/// Where and how to reach the oracle.
#[derive(Clone, Serialize, Deserialize)]
pub struct OracleSettings {
    /// Provider name, used for logging and error messages
    #[serde(default = "default_provider")]
    pub provider: String,

    /// API key (usually supplied through the environment instead)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible chat completions API
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens per oracle reply
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Deadline for a single oracle attempt
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_provider() -> String {
    "deepseek".into()
}
fn default_base_url() -> String {
    "https://api.deepseek.com/v1".into()
}
fn default_model() -> String {
    "deepseek-chat".into()
}
fn default_temperature() -> f32 {
    0.1
}
fn default_max_tokens() -> u32 {
    1000
}
fn default_timeout_secs() -> u64 {
    60
}

impl Default for OracleSettings {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn redact(s: &Option<String>) -> &'static str {
    match s {
        Some(_) => "[REDACTED]",
        None => "None",
    }
}

impl std::fmt::Debug for OracleSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OracleSettings")
            .field("provider", &self.provider)
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

/// Bounds on a single reasoning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSettings {
    /// Maximum completed action steps per run
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// Token budget for the context sent to the oracle
    #[serde(default = "default_context_budget")]
    pub context_budget_tokens: usize,

    /// Deadline for a single tool invocation
    #[serde(default = "default_tool_timeout_ms")]
    pub tool_timeout_ms: u64,

    /// Extra attempts after a transient oracle failure
    #[serde(default = "default_oracle_retries")]
    pub oracle_retries: u32,

    /// Base backoff between oracle retries (doubled each attempt)
    #[serde(default = "default_oracle_backoff_ms")]
    pub oracle_backoff_ms: u64,
}

fn default_max_steps() -> usize {
    10
}
fn default_context_budget() -> usize {
    6000
}
fn default_tool_timeout_ms() -> u64 {
    30_000
}
fn default_oracle_retries() -> u32 {
    2
}
fn default_oracle_backoff_ms() -> u64 {
    500
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            context_budget_tokens: default_context_budget(),
            tool_timeout_ms: default_tool_timeout_ms(),
            oracle_retries: default_oracle_retries(),
            oracle_backoff_ms: default_oracle_backoff_ms(),
        }
    }
}

impl AppConfig {
    /// Load configuration from the default path (~/.stepwise/config.toml).
    ///
    /// Also checks environment variables for the API key:
    /// - `STEPWISE_API_KEY` (highest priority)
    /// - `OPENAI_API_KEY`
    /// - `DEEPSEEK_API_KEY`
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = Self::config_dir().join("config.toml");
        let mut config = Self::load_from(&config_path)?;
        config.apply_env_overrides();
        config.validate()?;
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

        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if self.oracle.api_key.is_none() {
            self.oracle.api_key = std::env::var("STEPWISE_API_KEY")
                .ok()
                .or_else(|| std::env::var("OPENAI_API_KEY").ok())
                .or_else(|| std::env::var("DEEPSEEK_API_KEY").ok())
                .filter(|k| !k.is_empty());
        }

        if let Ok(url) = std::env::var("STEPWISE_BASE_URL") {
            self.oracle.base_url = url;
        }

        if let Ok(model) = std::env::var("STEPWISE_MODEL") {
            self.oracle.model = model;
        }
    }

    /// Get the configuration directory path.
    pub fn config_dir() -> PathBuf {
        dirs_home().join(".stepwise")
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let oracle = &self.oracle;
        if !(0.0..=2.0).contains(&oracle.temperature) {
            return Err(ConfigError::ValidationError(
                "oracle.temperature must be between 0.0 and 2.0".into(),
            ));
        }
        if oracle.timeout_secs == 0 {
            return Err(ConfigError::ValidationError(
                "oracle.timeout_secs must be > 0".into(),
            ));
        }
        if oracle.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "oracle.base_url must not be empty".into(),
            ));
        }

        let agent = &self.agent;
        if agent.max_steps == 0 {
            return Err(ConfigError::ValidationError(
                "agent.max_steps must be at least 1".into(),
            ));
        }
        if agent.context_budget_tokens < 256 {
            return Err(ConfigError::ValidationError(
                "agent.context_budget_tokens must be at least 256".into(),
            ));
        }
        if agent.tool_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "agent.tool_timeout_ms must be > 0".into(),
            ));
        }
        if agent.oracle_retries > 10 {
            return Err(ConfigError::ValidationError(
                "agent.oracle_retries must be at most 10".into(),
            ));
        }

        Ok(())
    }

    /// Check if an API key is available (from config or environment).
    pub fn has_api_key(&self) -> bool {
        self.oracle.api_key.is_some()
    }

    /// Generate a default config TOML string.
    pub fn default_toml() -> String {
        toml::to_string_pretty(&Self::default()).unwrap_or_default()
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
