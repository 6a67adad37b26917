//! Configuration management for Inworld clients
//!
//! Values come from built-in defaults, then from `INWORLD_`-prefixed
//! environment variables (nested sections separated by `__`). A `.env`
//! file is loaded first when present.

use config::{Config, Environment};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const ENV_PREFIX: &str = "INWORLD";
const ENV_SEPARATOR: &str = "__";

#[derive(Error, Debug)]
pub enum ConfigLoadError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Credentials used to sign session requests
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base64_signature: String,
}

/// Reconnect backoff
#[derive(Debug, Clone, Deserialize)]
pub struct ReconnectConfig {
    /// Delay before the second consecutive retry
    pub initial_delay_ms: u64,
    /// Added to the delay after every further retry
    pub interval_ms: u64,
    /// Ceiling for the delay
    pub max_delay_ms: u64,
}

impl ReconnectConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1000,
            interval_ms: 250,
            max_delay_ms: 5000,
        }
    }
}

/// Microphone processing
#[derive(Debug, Clone, Deserialize)]
pub struct AudioConfig {
    pub vad_enabled: bool,
    pub aec_enabled: bool,
    /// Write every outbound chunk to `dump_path`
    pub dump_enabled: bool,
    pub dump_path: String,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            vad_enabled: true,
            aec_enabled: false,
            dump_enabled: false,
            dump_path: "inworld_audio_dump.pcm".to_string(),
        }
    }
}

/// Client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub server_url: String,
    pub workspace: String,
    /// Scene to load when no other origin is given (short or long name)
    pub scene: String,
    pub client_id: String,
    pub auth: AuthConfig,
    pub reconnect: ReconnectConfig,
    pub audio: AudioConfig,
    pub log_level: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "api-engine.inworld.ai:443".to_string(),
            workspace: String::new(),
            scene: String::new(),
            client_id: "rust".to_string(),
            auth: AuthConfig::default(),
            reconnect: ReconnectConfig::default(),
            audio: AudioConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigLoadError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        Self::load(Environment::with_prefix(ENV_PREFIX))
    }

    /// Load configuration from an explicit variable map instead of the process environment
    pub fn from_vars(vars: config::Map<String, String>) -> Result<Self, ConfigLoadError> {
        Self::load(Environment::with_prefix(ENV_PREFIX).source(Some(vars)))
    }

    fn load(environment: Environment) -> Result<Self, ConfigLoadError> {
        let defaults = ClientConfig::default();

        let config: ClientConfig = Config::builder()
            .set_default("server_url", defaults.server_url)?
            .set_default("workspace", defaults.workspace)?
            .set_default("scene", defaults.scene)?
            .set_default("client_id", defaults.client_id)?
            .set_default("auth.api_key", defaults.auth.api_key)?
            .set_default("auth.api_secret", defaults.auth.api_secret)?
            .set_default("auth.base64_signature", defaults.auth.base64_signature)?
            .set_default("reconnect.initial_delay_ms", defaults.reconnect.initial_delay_ms as i64)?
            .set_default("reconnect.interval_ms", defaults.reconnect.interval_ms as i64)?
            .set_default("reconnect.max_delay_ms", defaults.reconnect.max_delay_ms as i64)?
            .set_default("audio.vad_enabled", defaults.audio.vad_enabled)?
            .set_default("audio.aec_enabled", defaults.audio.aec_enabled)?
            .set_default("audio.dump_enabled", defaults.audio.dump_enabled)?
            .set_default("audio.dump_path", defaults.audio.dump_path)?
            .set_default("log_level", defaults.log_level)?
            .add_source(
                environment
                    .prefix_separator("_")
                    .separator(ENV_SEPARATOR)
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.server_url.is_empty() {
            return Err(ConfigLoadError::Invalid("server_url must not be empty".to_string()));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(ConfigLoadError::Invalid(format!(
                "reconnect.max_delay_ms ({}) is below reconnect.initial_delay_ms ({})",
                self.reconnect.max_delay_ms, self.reconnect.initial_delay_ms
            )));
        }
        Ok(())
    }

    /// Get log level, defaulting to "info"
    pub fn log_level(&self) -> &str {
        if self.log_level.is_empty() {
            "info"
        } else {
            &self.log_level
        }
    }

    pub fn has_credentials(&self) -> bool {
        !self.auth.base64_signature.is_empty()
            || (!self.auth.api_key.is_empty() && !self.auth.api_secret.is_empty())
    }
}
