//! Deployment metadata and instance identity

use serde::Deserialize;

use crate::adapters::destinations::DeploymentInfo;

/// Release and environment reported to monitoring sinks, plus the
/// instance owner used as actor context.
#[derive(Debug, Clone, Deserialize)]
pub struct DeploymentConfig {
    /// Version string; defaults to the crate version
    #[serde(default = "default_release")]
    pub release: String,

    /// Environment name; falls back to `server.environment`
    pub environment: Option<String>,

    #[serde(default = "default_owner_id")]
    pub owner_id: String,

    pub owner_email: Option<String>,
}

impl DeploymentConfig {
    pub fn info(&self, fallback_environment: &str) -> DeploymentInfo {
        DeploymentInfo {
            release: self.release.clone(),
            environment: self
                .environment
                .clone()
                .unwrap_or_else(|| fallback_environment.to_string()),
        }
    }
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            release: default_release(),
            environment: None,
            owner_id: default_owner_id(),
            owner_email: None,
        }
    }
}

fn default_release() -> String {
    format!("n8n@{}", env!("CARGO_PKG_VERSION"))
}

fn default_owner_id() -> String {
    "instance-owner".to_string()
}
