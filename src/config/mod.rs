//! Application configuration module
//!
//! This module provides type-safe configuration loading using the `config` and
//! `dotenvy` crates. Sources, lowest precedence first:
//!
//! 1. `.env` file if present (development)
//! 2. Optional YAML/TOML/JSON file named by `GATEWAY_CONFIG_FILE`
//! 3. Environment variables with the `GATEWAY` prefix, nested with `__`
//!
//! # Example
//!
//! ```no_run
//! use channel_gateway::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Server running on {}", config.server.port);
//! ```

mod auth;
mod broker;
mod channels;
mod error;
mod server;

pub use auth::{AuthConfig, MIN_PRODUCTION_SECRET_BYTES};
pub use broker::{BrokerConfig, MEMORY_SCHEME};
pub use channels::{build_catalog, default_channels};
pub use error::{ConfigError, ValidationError};
pub use server::{Environment, ServerConfig};

use serde::Deserialize;
use std::path::Path;

use crate::domain::gateway::{ChannelBinding, ChannelCatalog};

/// Environment variable naming an optional configuration file.
pub const CONFIG_FILE_VAR: &str = "GATEWAY_CONFIG_FILE";

/// Root application configuration
///
/// Load using [`AppConfig::load()`].
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment, ws path)
    #[serde(default)]
    pub server: ServerConfig,

    /// Token validation (HS256 shared secret)
    pub auth: AuthConfig,

    /// Message broker connection and topology
    pub broker: BrokerConfig,

    /// Subscribable channels and their broker queues
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelBinding>,
}

impl AppConfig {
    /// Load configuration from the environment
    ///
    /// # Environment Variable Format
    ///
    /// - `GATEWAY__SERVER__PORT=8080` -> `server.port = 8080`
    /// - `GATEWAY__BROKER__URL=amqp://...` -> `broker.url = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Required values are missing
    /// - Values cannot be parsed into expected types
    /// - The file named by `GATEWAY_CONFIG_FILE` cannot be read
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let file = std::env::var(CONFIG_FILE_VAR).ok();
        Self::load_from(file.as_deref().map(Path::new))
    }

    /// Load from an explicit file (if any) plus environment variables.
    pub fn load_from(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::default()
                    .prefix("GATEWAY")
                    .separator("__"),
            )
            .build()?
            .try_deserialize()?;

        Ok(config)
    }

    /// Validate all configuration values
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.server.validate()?;
        self.auth.validate(&self.server.environment)?;
        self.broker.validate()?;
        build_catalog(&self.channels)?;
        Ok(())
    }

    /// The subscribe allow-list.
    pub fn catalog(&self) -> Result<ChannelCatalog, ValidationError> {
        build_catalog(&self.channels)
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}
