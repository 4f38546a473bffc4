//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::mcp::SessionSettings;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// MCP server launch and session settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Language model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Chat loop settings.
    #[serde(default)]
    pub chat: ChatConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("server.request_timeout_secs", self.server.request_timeout_secs),
            ("server.init_timeout_secs", self.server.init_timeout_secs),
            ("server.shutdown_timeout_secs", self.server.shutdown_timeout_secs),
            ("model.request_timeout_secs", self.model.request_timeout_secs),
        ];
        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::ValidationError {
                    message: format!("{name} must be greater than zero"),
                });
            }
        }

        if self.chat.max_tool_rounds == 0 {
            return Err(ConfigError::ValidationError {
                message: "chat.max_tool_rounds must be greater than zero".to_string(),
            });
        }

        if self.chat.exit_keyword.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "chat.exit_keyword must not be empty".to_string(),
            });
        }

        if self.model.api_key_env.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "model.api_key_env must name an environment variable".to_string(),
            });
        }

        if !self.model.base_url.starts_with("http://") && !self.model.base_url.starts_with("https://")
        {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "Invalid model.base_url '{}'. Must start with http:// or https://",
                    self.model.base_url
                ),
            });
        }

        Ok(())
    }
}

/// MCP server configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Interpreter used to launch the server script.
    /// Default: inferred from the file extension.
    #[serde(default)]
    pub launcher: Option<String>,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Handshake timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub init_timeout_secs: u64,

    /// Grace period for the server to exit before it is killed.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

impl ServerConfig {
    /// Session timeouts derived from this section.
    #[must_use]
    pub const fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            request_timeout: Duration::from_secs(self.request_timeout_secs),
            init_timeout: Duration::from_secs(self.init_timeout_secs),
            shutdown_timeout: Duration::from_secs(self.shutdown_timeout_secs),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            launcher: None,
            request_timeout_secs: default_request_timeout(),
            init_timeout_secs: default_request_timeout(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_shutdown_timeout() -> u64 {
    5
}

/// Language model configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelConfig {
    /// Base URL of the OpenAI-compatible API.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model identifier.
    #[serde(default = "default_model")]
    pub model: String,

    /// Maximum tokens per completion.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Retries for transient failures.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry, doubled after each attempt.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// HTTP request timeout in seconds.
    #[serde(default = "default_model_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            api_key_env: default_api_key_env(),
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            request_timeout_secs: default_model_timeout(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

const fn default_max_tokens() -> u32 {
    1000
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

const fn default_max_retries() -> u32 {
    2
}

const fn default_initial_backoff_ms() -> u64 {
    500
}

const fn default_model_timeout() -> u64 {
    60
}

/// Chat loop configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChatConfig {
    /// Model rounds with tool calls allowed per user turn.
    #[serde(default = "default_max_tool_rounds")]
    pub max_tool_rounds: usize,

    /// Input that ends the session (case-insensitive).
    #[serde(default = "default_exit_keyword")]
    pub exit_keyword: String,

    /// Optional system message that seeds every conversation.
    #[serde(default)]
    pub system_prompt: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_tool_rounds: default_max_tool_rounds(),
            exit_keyword: default_exit_keyword(),
            system_prompt: None,
        }
    }
}

const fn default_max_tool_rounds() -> usize {
    10
}

fn default_exit_keyword() -> String {
    "quit".to_string()
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_minimal_config() {
        let json = r"{}";
        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.chat.max_tool_rounds, 10);
        assert_eq!(config.model.model, "gpt-4o-mini");
    }

    #[test]
    fn parse_full_config() {
        let json = r#"{
            "$schema": "https://json-schema.org/draft/2020-12/schema",
            "_comment": "Test config",
            "server": {
                "launcher": "python3.12",
                "request_timeout_secs": 10,
                "init_timeout_secs": 15,
                "shutdown_timeout_secs": 2
            },
            "model": {
                "base_url": "http://localhost:8080/v1",
                "model": "local-model",
                "max_tokens": 256,
                "api_key_env": "LOCAL_KEY",
                "max_retries": 0,
                "initial_backoff_ms": 10,
                "request_timeout_secs": 5
            },
            "chat": {
                "max_tool_rounds": 3,
                "exit_keyword": "exit",
                "system_prompt": "Be brief."
            },
            "logging": {
                "level": "debug"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.launcher.as_deref(), Some("python3.12"));
        assert_eq!(config.model.base_url, "http://localhost:8080/v1");
        assert_eq!(config.model.max_tokens, 256);
        assert_eq!(config.chat.max_tool_rounds, 3);
        assert_eq!(config.chat.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(config.logging.level, "debug");

        let settings = config.server.session_settings();
        assert_eq!(settings.request_timeout, Duration::from_secs(10));
        assert_eq!(settings.init_timeout, Duration::from_secs(15));
        assert_eq!(settings.shutdown_timeout, Duration::from_secs(2));
    }

    #[test]
    fn server_config_defaults() {
        let config = ServerConfig::default();
        assert!(config.launcher.is_none());
        assert_eq!(config.request_timeout_secs, 30);
        assert_eq!(config.shutdown_timeout_secs, 5);
    }

    #[test]
    fn model_config_defaults() {
        let config = ModelConfig::default();
        assert_eq!(config.base_url, "https://api.openai.com/v1");
        assert_eq!(config.max_tokens, 1000);
        assert_eq!(config.api_key_env, "OPENAI_API_KEY");
    }

    #[test]
    fn chat_config_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.max_tool_rounds, 10);
        assert_eq!(config.exit_keyword, "quit");
        assert!(config.system_prompt.is_none());
    }

    #[test]
    fn logging_config_defaults() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "warn");
    }

    #[test]
    fn reject_zero_tool_rounds() {
        let json = r#"{
            "chat": {
                "max_tool_rounds": 0
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_zero_timeout() {
        let json = r#"{
            "server": {
                "request_timeout_secs": 0
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("server.request_timeout_secs"));
    }

    #[test]
    fn reject_empty_exit_keyword() {
        let json = r#"{
            "chat": {
                "exit_keyword": "  "
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_bad_base_url() {
        let json = r#"{
            "model": {
                "base_url": "api.openai.com"
            }
        }"#;

        let config: Config = serde_json::from_str(json).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn reject_unknown_fields() {
        let json = r#"{
            "unknown_field": "value"
        }"#;

        let result: Result<Config, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
