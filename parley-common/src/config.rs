//! Configuration management for the Parley service.
//!
//! Configuration lives in a single JSON file at `~/.parley/config.json`.
//!
//! # Configuration Priority
//!
//! 1. Explicit config file values
//! 2. Environment variables
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! ## Network
//! - `PARLEY_BIND_ADDRESS` → server.host
//! - `PARLEY_PORT` → server.port
//!
//! ## Auth
//! - `PARLEY_JWT_SECRET` → auth.jwt_secret
//!
//! ## LLM API Keys (→ llm.api_key, resolved per provider)
//! - `GROQ_API_KEY` when llm.provider = "groq"
//! - `OPENAI_API_KEY` when llm.provider = "openai"
//! - `ANTHROPIC_API_KEY` when llm.provider = "anthropic"
//! - `PARLEY_API_KEY` for custom endpoints

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    directories::UserDirs::new().map_or_else(
        || PathBuf::from(".parley"),
        |dirs| dirs.home_dir().join(".parley"),
    )
}

/// Get the configuration file path.
pub fn config_path() -> PathBuf {
    config_dir().join("config.json")
}

/// Top-level Parley configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// HTTP server settings
    #[serde(default)]
    pub server: ServerConfig,

    /// Authentication settings
    #[serde(default)]
    pub auth: AuthConfig,

    /// Upstream LLM provider settings
    #[serde(default)]
    pub llm: LlmConfig,

    /// Conversation memory settings
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Database settings
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ============================================================================
// Server Configuration
// ============================================================================

/// HTTP server configuration.
///
/// Fields left unset fall back to environment variables, then defaults.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ServerConfig {
    /// Bind address. Default: "127.0.0.1" (local only)
    #[serde(default)]
    pub host: Option<String>,

    /// Port number. Default: 4500
    #[serde(default)]
    pub port: Option<u16>,
}

// ============================================================================
// Auth Configuration
// ============================================================================

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthConfig {
    /// JWT signing secret. Falls back to `PARLEY_JWT_SECRET`.
    #[serde(default)]
    pub jwt_secret: Option<String>,

    /// Token lifetime in seconds (default: 24 hours)
    #[serde(default = "default_token_expiry")]
    pub token_expiry_secs: u64,
}

fn default_token_expiry() -> u64 {
    86_400
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            token_expiry_secs: default_token_expiry(),
        }
    }
}

// ============================================================================
// LLM Configuration
// ============================================================================

/// Upstream LLM provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Provider name: "groq", "openai", "anthropic", or "custom"
    #[serde(default = "default_provider")]
    pub provider: String,

    /// API key. Falls back to the provider's environment variable.
    #[serde(default)]
    pub api_key: Option<String>,

    /// Base URL override (required for provider = "custom")
    #[serde(default)]
    pub base_url: Option<String>,

    /// Model to use for chat and summarization
    #[serde(default = "default_model")]
    pub model: String,

    /// Sampling temperature for chat turns
    #[serde(default)]
    pub temperature: Option<f64>,

    /// Maximum tokens per response
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<i64>,

    /// System prompt seeding every conversation
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
}

fn default_provider() -> String {
    "groq".into()
}

fn default_model() -> String {
    "llama-3.3-70b-versatile".into()
}

fn default_max_tokens() -> Option<i64> {
    Some(1024)
}

fn default_system_prompt() -> String {
    "You are a helpful assistant. Keep your responses concise and to the point.".into()
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            api_key: None,
            base_url: None,
            model: default_model(),
            temperature: None,
            max_tokens: default_max_tokens(),
            system_prompt: default_system_prompt(),
        }
    }
}

// ============================================================================
// Memory Configuration
// ============================================================================

/// Conversation memory configuration.
///
/// When a user's stored history grows past `summarization_threshold`
/// messages, the oldest `messages_to_summarize` messages are condensed
/// into one summary row and deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Whether summarization is enabled (default: true)
    #[serde(default = "default_memory_enabled")]
    pub enabled: bool,

    /// Message count above which summarization triggers (default: 40)
    #[serde(default = "default_summarization_threshold")]
    pub summarization_threshold: usize,

    /// Number of oldest messages condensed per pass (default: 30)
    #[serde(default = "default_messages_to_summarize")]
    pub messages_to_summarize: usize,
}

fn default_memory_enabled() -> bool {
    true
}

fn default_summarization_threshold() -> usize {
    40
}

fn default_messages_to_summarize() -> usize {
    30
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            enabled: default_memory_enabled(),
            summarization_threshold: default_summarization_threshold(),
            messages_to_summarize: default_messages_to_summarize(),
        }
    }
}

// ============================================================================
// Database Configuration
// ============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DatabaseConfig {
    /// Path to the SQLite database file. Supports `~` expansion.
    /// Default: `~/.parley/parley.db`
    #[serde(default)]
    pub path: Option<String>,
}

impl DatabaseConfig {
    /// Resolve the database file path, expanding `~`.
    pub fn resolve_path(&self) -> PathBuf {
        match &self.path {
            Some(path) => PathBuf::from(shellexpand::tilde(path).into_owned()),
            None => config_dir().join("parley.db"),
        }
    }
}

// ============================================================================
// Observability Configuration
// ============================================================================

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Base log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Output format: "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

// ============================================================================
// Loading & Resolution
// ============================================================================

impl Config {
    /// Load configuration from the default path.
    ///
    /// A missing file is not an error; defaults apply.
    pub fn load() -> Result<Self> {
        Self::load_from(&config_path())
    }

    /// Load configuration from an explicit path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Resolve the bind address (config → `PARLEY_BIND_ADDRESS` → default).
    pub fn bind_address(&self) -> String {
        self.server
            .host
            .clone()
            .or_else(|| std::env::var("PARLEY_BIND_ADDRESS").ok())
            .unwrap_or_else(|| "127.0.0.1".into())
    }

    /// Resolve the port (config → `PARLEY_PORT` → default).
    pub fn port(&self) -> u16 {
        self.server
            .port
            .or_else(|| {
                std::env::var("PARLEY_PORT")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .unwrap_or(4500)
    }

    /// Resolve the JWT secret (config → `PARLEY_JWT_SECRET` → dev default).
    pub fn jwt_secret(&self) -> String {
        self.auth
            .jwt_secret
            .clone()
            .or_else(|| std::env::var("PARLEY_JWT_SECRET").ok())
            .unwrap_or_else(|| "parley-default-secret-change-me!".into())
    }

    /// Resolve the LLM API key (config → provider env var).
    pub fn api_key(&self) -> Option<String> {
        if let Some(key) = &self.llm.api_key {
            if !key.is_empty() {
                return Some(key.clone());
            }
        }

        let env_var = match self.llm.provider.as_str() {
            "groq" => "GROQ_API_KEY",
            "openai" => "OPENAI_API_KEY",
            "anthropic" => "ANTHROPIC_API_KEY",
            _ => "PARLEY_API_KEY",
        };
        std::env::var(env_var).ok().filter(|k| !k.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.llm.provider, "groq");
        assert_eq!(config.memory.summarization_threshold, 40);
        assert_eq!(config.memory.messages_to_summarize, 30);
        assert!(config.memory.enabled);
        assert_eq!(config.auth.token_expiry_secs, 86_400);
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.observability.log_format, "pretty");
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("nope.json")).unwrap();
        assert_eq!(config.llm.provider, "groq");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{
                "server": { "port": 8080 },
                "llm": { "provider": "openai", "model": "gpt-4o-mini" },
                "memory": { "summarization_threshold": 10 }
            }"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.server.port, Some(8080));
        assert_eq!(config.llm.provider, "openai");
        assert_eq!(config.llm.model, "gpt-4o-mini");
        assert_eq!(config.memory.summarization_threshold, 10);
        // Untouched sections keep defaults
        assert_eq!(config.memory.messages_to_summarize, 30);
        assert_eq!(config.auth.token_expiry_secs, 86_400);
    }

    #[test]
    fn test_load_invalid_json_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_port_resolution_order() {
        // Env var applies when config is silent, config wins otherwise.
        std::env::set_var("PARLEY_PORT", "9999");

        let config = Config::default();
        assert_eq!(config.port(), 9999);

        let mut config = Config::default();
        config.server.port = Some(4600);
        assert_eq!(config.port(), 4600);

        std::env::remove_var("PARLEY_PORT");
    }

    #[test]
    fn test_api_key_prefers_config() {
        let mut config = Config::default();
        config.llm.api_key = Some("config-key".into());
        assert_eq!(config.api_key(), Some("config-key".into()));
    }

    #[test]
    fn test_database_path_expansion() {
        let mut db = DatabaseConfig::default();
        db.path = Some("/tmp/parley-test/chat.db".into());
        assert_eq!(db.resolve_path(), PathBuf::from("/tmp/parley-test/chat.db"));

        let db = DatabaseConfig::default();
        assert!(db.resolve_path().ends_with("parley.db"));
    }

    #[test]
    fn test_jwt_secret_from_config() {
        let mut config = Config::default();
        config.auth.jwt_secret = Some("my-secret".into());
        assert_eq!(config.jwt_secret(), "my-secret");
    }
}
