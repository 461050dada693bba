//! Application configuration module
//!
//! This module provides type-safe configuration loading from environment variables
//! using the `config` and `dotenvy` crates. Configuration is loaded with the
//! `EVENT_BUS` prefix and nested values use double underscores as separators.
//!
//! # Example
//!
//! ```no_run
//! use message_event_bus::config::AppConfig;
//!
//! let config = AppConfig::load().expect("Failed to load configuration");
//! config.validate().expect("Invalid configuration");
//!
//! println!("Server running on {:?}", config.server.socket_addr());
//! ```

mod delivery;
mod deployment;
mod error;
mod redis;
mod server;
mod store;

pub use delivery::DeliveryConfig;
pub use deployment::DeploymentConfig;
pub use error::{ConfigError, ValidationError};
pub use redis::RedisConfig;
pub use server::{Environment, LogFormat, ServerConfig};
pub use store::StoreConfig;

use serde::Deserialize;
use std::path::PathBuf;

/// Root application configuration
///
/// Every section has defaults, so an empty environment yields a working
/// single-process bus with in-memory storage.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// Server configuration (host, port, environment)
    #[serde(default)]
    pub server: ServerConfig,

    /// Event log storage
    #[serde(default)]
    pub store: StoreConfig,

    /// Delivery retry policy and limits
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Cross-process relay; absent for single-process deployments
    pub redis: Option<RedisConfig>,

    /// Release/environment tags and instance owner
    #[serde(default)]
    pub deployment: DeploymentConfig,

    /// Where destination configs are persisted; in memory when absent
    pub destinations_dir: Option<PathBuf>,
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// This function:
    /// 1. Loads `.env` file if present (for development)
    /// 2. Reads environment variables with `EVENT_BUS` prefix
    /// 3. Uses `__` (double underscore) to separate nested values
    /// 4. Deserializes into typed configuration structs
    ///
    /// # Environment Variable Format
    ///
    /// - `EVENT_BUS__SERVER__PORT=5678` -> `server.port = 5678`
    /// - `EVENT_BUS__REDIS__URL=...` -> `redis.url = ...`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if values cannot be parsed into expected types.
    pub fn load() -> Result<Self, ConfigError> {
        // Load .env file if present (development)
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .prefix("EVENT_BUS")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
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
        self.store.validate()?;
        self.delivery.validate()?;
        if let Some(redis) = &self.redis {
            redis.validate()?;
        }
        Ok(())
    }

    /// Check if running in production environment
    pub fn is_production(&self) -> bool {
        self.server.is_production()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::InstanceMode;
    use std::env;
    use std::sync::Mutex;

    // Mutex to ensure tests don't run in parallel (env vars are global)
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    const VARS: &[&str] = &[
        "EVENT_BUS__SERVER__PORT",
        "EVENT_BUS__SERVER__ENVIRONMENT",
        "EVENT_BUS__STORE__LOG_DIR",
        "EVENT_BUS__DELIVERY__MAX_ATTEMPTS",
        "EVENT_BUS__REDIS__URL",
        "EVENT_BUS__REDIS__MODE",
        "EVENT_BUS__DESTINATIONS_DIR",
    ];

    /// Helper to clear environment variables after testing
    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    #[test]
    fn test_load_with_empty_environment() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        let result = AppConfig::load();

        assert!(result.is_ok(), "Failed to load config: {:?}", result.err());
        let config = result.unwrap();
        assert_eq!(config.server.port, 5678);
        assert!(config.redis.is_none());
        assert!(config.store.log_dir.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_nested_values() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("EVENT_BUS__SERVER__PORT", "3000");
        env::set_var("EVENT_BUS__STORE__LOG_DIR", "/var/lib/n8n");
        env::set_var("EVENT_BUS__DELIVERY__MAX_ATTEMPTS", "7");
        env::set_var("EVENT_BUS__DESTINATIONS_DIR", "/etc/n8n/destinations");
        let result = AppConfig::load();
        clear_env();

        let config = result.unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.store.log_dir, Some(PathBuf::from("/var/lib/n8n")));
        assert_eq!(config.delivery.max_attempts, 7);
        assert_eq!(
            config.destinations_dir,
            Some(PathBuf::from("/etc/n8n/destinations"))
        );
    }

    #[test]
    fn test_redis_section() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("EVENT_BUS__REDIS__URL", "redis://localhost:6379");
        env::set_var("EVENT_BUS__REDIS__MODE", "worker");
        let result = AppConfig::load();
        clear_env();

        let redis = result.unwrap().redis.unwrap();
        assert_eq!(redis.url, "redis://localhost:6379");
        assert_eq!(redis.mode, InstanceMode::Worker);
    }

    #[test]
    fn test_is_production() {
        let _guard = ENV_MUTEX.lock().unwrap();
        env::set_var("EVENT_BUS__SERVER__ENVIRONMENT", "production");
        let result = AppConfig::load();
        clear_env();

        assert!(result.unwrap().is_production());
    }

    #[test]
    fn test_validate_reports_invalid_section() {
        let config = AppConfig {
            redis: Some(RedisConfig::default()),
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::MissingRequired("REDIS_URL"))
        );
    }
}
