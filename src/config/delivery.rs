//! Destination delivery configuration

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::application::DeliverySettings;
use crate::domain::foundation::Backoff;

/// Retry policy and resource limits for destination delivery
#[derive(Debug, Clone, Deserialize)]
pub struct DeliveryConfig {
    /// Attempts per message and destination before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,

    /// Fraction of each delay randomised (0.0 - 1.0)
    #[serde(default = "default_jitter")]
    pub jitter: f64,

    /// Timeout of a single delivery attempt
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_ms: u64,

    /// Concurrent attempts per destination
    #[serde(default = "default_max_in_flight")]
    pub max_in_flight: usize,

    /// Bound for draining and closing destinations on shutdown
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_ms: u64,

    /// Recover unfinished executions on startup
    #[serde(default = "default_recover_on_start")]
    pub recover_on_start: bool,
}

impl DeliveryConfig {
    pub fn settings(&self) -> DeliverySettings {
        DeliverySettings::default()
            .with_max_attempts(self.max_attempts)
            .with_backoff(Backoff::new(
                Duration::from_millis(self.initial_backoff_ms),
                Duration::from_millis(self.max_backoff_ms),
                self.jitter,
            ))
            .with_attempt_timeout(Duration::from_millis(self.attempt_timeout_ms))
            .with_max_in_flight(self.max_in_flight)
            .with_shutdown_timeout(Duration::from_millis(self.shutdown_timeout_ms))
    }

    /// Validate delivery configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_attempts == 0 {
            return Err(ValidationError::MustBePositive("max_attempts"));
        }
        if self.initial_backoff_ms == 0 {
            return Err(ValidationError::MustBePositive("initial_backoff_ms"));
        }
        if self.max_backoff_ms < self.initial_backoff_ms {
            return Err(ValidationError::InvalidBackoffRange);
        }
        if !(0.0..=1.0).contains(&self.jitter) {
            return Err(ValidationError::InvalidJitter);
        }
        if self.attempt_timeout_ms == 0 {
            return Err(ValidationError::MustBePositive("attempt_timeout_ms"));
        }
        if self.max_in_flight == 0 {
            return Err(ValidationError::MustBePositive("max_in_flight"));
        }
        Ok(())
    }
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
            jitter: default_jitter(),
            attempt_timeout_ms: default_attempt_timeout(),
            max_in_flight: default_max_in_flight(),
            shutdown_timeout_ms: default_shutdown_timeout(),
            recover_on_start: default_recover_on_start(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_backoff() -> u64 {
    500
}

fn default_max_backoff() -> u64 {
    30_000
}

fn default_jitter() -> f64 {
    0.2
}

fn default_attempt_timeout() -> u64 {
    10_000
}

fn default_max_in_flight() -> usize {
    16
}

fn default_shutdown_timeout() -> u64 {
    5_000
}

fn default_recover_on_start() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_defaults() {
        let config = DeliveryConfig::default();
        assert_eq!(config.max_attempts, 5);
        assert!(config.recover_on_start);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_settings_conversion() {
        let config = DeliveryConfig {
            max_attempts: 2,
            attempt_timeout_ms: 250,
            ..Default::default()
        };
        let settings = config.settings();
        assert_eq!(settings.max_attempts, 2);
        assert_eq!(settings.attempt_timeout, Duration::from_millis(250));
        assert_eq!(settings.backoff.max, Duration::from_secs(30));
    }

    #[test]
    fn test_jitter_range() {
        let config = DeliveryConfig {
            jitter: 1.5,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ValidationError::InvalidJitter));
    }

    #[test]
    fn test_zero_attempts_rejected() {
        let config = DeliveryConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::MustBePositive("max_attempts"))
        );
    }
}
