//! Sentry DSN parsing.

use crate::domain::foundation::ValidationError;

/// Components of a `{scheme}://{public_key}@{host}/{project_id}` DSN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentryDsn {
    pub scheme: String,
    pub public_key: String,
    pub host: String,
    /// Optional path between host and project id (self-hosted installs).
    pub path: String,
    pub project_id: String,
}

impl SentryDsn {
    pub fn parse(dsn: &str) -> Result<Self, ValidationError> {
        let invalid = |reason: &str| ValidationError::invalid_format("dsn", reason);

        let (scheme, rest) = dsn
            .split_once("://")
            .ok_or_else(|| invalid("missing scheme"))?;
        if scheme != "http" && scheme != "https" {
            return Err(invalid("scheme must be http or https"));
        }

        let (credentials, location) = rest
            .split_once('@')
            .ok_or_else(|| invalid("missing public key"))?;
        let public_key = credentials.split(':').next().unwrap_or_default();
        if public_key.is_empty() {
            return Err(invalid("missing public key"));
        }

        let (host_and_path, project_id) = location
            .trim_end_matches('/')
            .rsplit_once('/')
            .ok_or_else(|| invalid("missing project id"))?;
        if project_id.is_empty() || !project_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(invalid("project id must be numeric"));
        }

        let (host, path) = match host_and_path.split_once('/') {
            Some((host, path)) => (host, format!("/{}", path)),
            None => (host_and_path, String::new()),
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            scheme: scheme.to_string(),
            public_key: public_key.to_string(),
            host: host.to_string(),
            path,
            project_id: project_id.to_string(),
        })
    }

    /// Event ingestion endpoint for this project.
    pub fn store_url(&self) -> String {
        format!(
            "{}://{}{}/api/{}/store/",
            self.scheme, self.host, self.path, self.project_id
        )
    }

    /// `X-Sentry-Auth` header value.
    pub fn auth_header(&self, client: &str) -> String {
        format!(
            "Sentry sentry_version=7, sentry_client={}, sentry_key={}",
            client, self.public_key
        )
    }
}
