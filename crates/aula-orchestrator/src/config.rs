//! Configuration types for the Aula resource pipeline.
//!
//! This module provides the configuration structures that control the
//! generative backend connection, retry behavior, image-generation admission
//! control, and the live server.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{AulaError, Result};

/// The default config file name.
pub const CONFIG_FILE_NAME: &str = "aula.json";

/// Default environment variable holding the backend API key.
fn default_api_key_env() -> String {
    "GEMINI_API_KEY".to_string()
}

/// Default backend REST endpoint.
fn default_base_url() -> String {
    aula_backend::gemini::DEFAULT_BASE_URL.to_string()
}

/// Default model for text, JSON, and grounded calls.
fn default_text_model() -> String {
    aula_backend::gemini::DEFAULT_TEXT_MODEL.to_string()
}

/// Default model for image generation.
fn default_image_model() -> String {
    aula_backend::gemini::DEFAULT_IMAGE_MODEL.to_string()
}

/// Default per-request timeout in seconds.
const fn default_request_timeout() -> u64 {
    60
}

/// Default total attempts per remote call.
const fn default_max_attempts() -> u32 {
    3
}

/// Default base backoff delay in milliseconds.
const fn default_base_delay_ms() -> u64 {
    1000
}

/// Default jitter bound in milliseconds.
const fn default_jitter_ms() -> u64 {
    200
}

/// Default image-generation window size.
const fn default_max_concurrent_generations() -> usize {
    2
}

/// Default HTTP port for `aula serve`.
const fn default_port() -> u16 {
    3000
}

/// Default broadcast channel capacity for WebSocket events.
const fn default_event_capacity() -> usize {
    100
}

/// Main configuration for Aula.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Generative backend connection.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Retry policy applied to every remote call.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Resource resolver tuning.
    #[serde(default)]
    pub resolver: ResolverConfig,

    /// HTTP/WebSocket server settings.
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Loads configuration from the current working directory.
    ///
    /// Looks for `aula.json` in the current directory. If found, loads and
    /// validates the configuration. If not found, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load() -> Result<Self> {
        let current_dir = std::env::current_dir().map_err(|e| {
            AulaError::config_parse(
                "<current directory>",
                format!("cannot determine current directory: {e}"),
            )
        })?;
        Self::load_from_dir(&current_dir)
    }

    /// Loads configuration from a specific directory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but contains invalid JSON.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE_NAME);
        Self::load_from_file(&config_path)
    }

    /// Loads configuration from a specific file path.
    ///
    /// If the file does not exist, returns default configuration.
    ///
    /// # Errors
    ///
    /// Returns `AulaError::ConfigParseError` if the file exists but contains
    /// invalid JSON.
    ///
    /// Returns `AulaError::ConfigValidationError` if the configuration values
    /// are invalid (e.g., zero attempts, empty model names).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                let config = Self::default();
                config.validate()?;
                return Ok(config);
            }
            Err(e) => {
                return Err(AulaError::config_parse(
                    path,
                    format!("failed to read file: {e}"),
                ));
            }
        };

        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| AulaError::config_parse(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `AulaError::ConfigValidationError` if any validation check fails.
    pub fn validate(&self) -> Result<()> {
        if self.backend.api_key_env.trim().is_empty() {
            return Err(AulaError::config_validation(
                "backend.apiKeyEnv must not be empty",
                "Set backend.apiKeyEnv to the name of the variable holding your API key",
            ));
        }

        if self.backend.text_model.trim().is_empty() || self.backend.image_model.trim().is_empty()
        {
            return Err(AulaError::config_validation(
                "backend.textModel and backend.imageModel must not be empty",
                "Remove the fields from aula.json to use the default models",
            ));
        }

        if url::Url::parse(&self.backend.base_url).is_err() {
            return Err(AulaError::config_validation(
                format!("backend.baseUrl '{}' is not a valid URL", self.backend.base_url),
                "Use an absolute URL such as https://generativelanguage.googleapis.com/v1beta",
            ));
        }

        if self.backend.request_timeout_secs == 0 {
            return Err(AulaError::config_validation(
                "backend.requestTimeoutSecs must be greater than 0",
                "Set backend.requestTimeoutSecs to at least 1 second in your aula.json",
            ));
        }

        if self.retry.max_attempts == 0 {
            return Err(AulaError::config_validation(
                "retry.maxAttempts must be greater than 0",
                "Set retry.maxAttempts to at least 1 in your aula.json",
            ));
        }

        if self.resolver.max_concurrent_generations == 0 {
            return Err(AulaError::config_validation(
                "resolver.maxConcurrentGenerations must be greater than 0",
                "Set resolver.maxConcurrentGenerations to at least 1 in your aula.json",
            ));
        }

        if self.server.event_capacity == 0 {
            return Err(AulaError::config_validation(
                "server.eventCapacity must be greater than 0",
                "Set server.eventCapacity to at least 1 in your aula.json",
            ));
        }

        Ok(())
    }
}

/// Generative backend connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendConfig {
    /// Name of the environment variable holding the API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// REST endpoint.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Model for text, JSON, and grounded calls.
    #[serde(default = "default_text_model")]
    pub text_model: String,

    /// Model for image generation.
    #[serde(default = "default_image_model")]
    pub image_model: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            api_key_env: default_api_key_env(),
            base_url: default_base_url(),
            text_model: default_text_model(),
            image_model: default_image_model(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl BackendConfig {
    /// Returns the per-request timeout.
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Retry policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts per remote call, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Base backoff delay in milliseconds; doubles each attempt.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound of the uniform random jitter added to each delay.
    #[serde(default = "default_jitter_ms")]
    pub jitter_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            jitter_ms: default_jitter_ms(),
        }
    }
}

/// Resource resolver settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolverConfig {
    /// Image generations in flight per window.
    #[serde(default = "default_max_concurrent_generations")]
    pub max_concurrent_generations: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_concurrent_generations: default_max_concurrent_generations(),
        }
    }
}

/// HTTP/WebSocket server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Broadcast channel capacity; slow WebSocket clients past this lag.
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            event_capacity: default_event_capacity(),
        }
    }
}
