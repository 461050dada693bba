//! Persisted destination configuration records.
//!
//! The record is a tagged union keyed by `__type`:
//!
//! ```json
//! { "__type": "webhook", "label": "Ops hook", "enabled": true,
//!   "subscribedEvents": ["n8n.workflow"], "url": "https://example.test/hook" }
//! ```
//!
//! Unknown or missing `__type` values are rejected before any field is read.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::foundation::{DestinationId, ValidationError};
use crate::domain::message::EventMessage;

/// Placeholder that replaces secrets in client-facing echoes.
pub const REDACTED: &str = "__redacted__";

/// Discriminator values accepted in `__type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DestinationType {
    Webhook,
    Syslog,
    Sentry,
}

impl DestinationType {
    pub fn parse(value: &str) -> Result<Self, ValidationError> {
        match value {
            "webhook" => Ok(Self::Webhook),
            "syslog" => Ok(Self::Syslog),
            "sentry" => Ok(Self::Sentry),
            other => Err(ValidationError::UnknownDestinationType(other.to_string())),
        }
    }

    pub fn default_label(&self) -> &'static str {
        match self {
            Self::Webhook => "Webhook Endpoint",
            Self::Syslog => "Syslog Server",
            Self::Sentry => "Sentry DSN",
        }
    }
}

impl fmt::Display for DestinationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Webhook => "webhook",
            Self::Syslog => "syslog",
            Self::Sentry => "sentry",
        };
        f.write_str(s)
    }
}

fn default_true() -> bool {
    true
}

fn default_subscribed_events() -> Vec<String> {
    vec!["*".to_string()]
}

/// Fields shared by every destination variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommonOptions {
    #[serde(default)]
    pub id: DestinationId,

    #[serde(default)]
    pub label: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Event-name prefixes this destination receives; `*` means all.
    #[serde(default = "default_subscribed_events")]
    pub subscribed_events: Vec<String>,

    /// Strip personal data from audit events before delivery.
    #[serde(default)]
    pub anonymize_audit_messages: bool,
}

impl CommonOptions {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: DestinationId::new(),
            label: label.into(),
            enabled: true,
            subscribed_events: default_subscribed_events(),
            anonymize_audit_messages: false,
        }
    }

    /// True when one subscription prefix matches the message's name.
    pub fn is_subscribed(&self, message: &EventMessage) -> bool {
        self.subscribed_events
            .iter()
            .any(|prefix| message.event_name().matches_prefix(prefix))
    }
}

impl Default for CommonOptions {
    fn default() -> Self {
        Self::new("")
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Webhook
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum WebhookMethod {
    #[default]
    Post,
    Put,
    Patch,
}

/// Authentication attached to webhook requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum WebhookAuth {
    Bearer { token: String },
    Basic { username: String, password: String },
    Header { name: String, value: String },
}

impl WebhookAuth {
    fn redacted(&self) -> Self {
        match self {
            Self::Bearer { .. } => Self::Bearer {
                token: REDACTED.to_string(),
            },
            Self::Basic { username, .. } => Self::Basic {
                username: username.clone(),
                password: REDACTED.to_string(),
            },
            Self::Header { name, .. } => Self::Header {
                name: name.clone(),
                value: REDACTED.to_string(),
            },
        }
    }
}

/// Optional request batching: up to `size` messages per request, waiting
/// at most `linger_ms` for a batch to fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchOptions {
    pub size: usize,
    #[serde(default = "default_linger_ms")]
    pub linger_ms: u64,
}

fn default_linger_ms() -> u64 {
    1_000
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookOptions {
    #[serde(flatten)]
    pub common: CommonOptions,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub method: WebhookMethod,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth: Option<WebhookAuth>,

    /// HMAC-SHA256 key used to sign request bodies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signing_secret: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch: Option<BatchOptions>,
}

impl WebhookOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            common: CommonOptions::new(DestinationType::Webhook.default_label()),
            url: url.into(),
            method: WebhookMethod::Post,
            headers: BTreeMap::new(),
            auth: None,
            signing_secret: None,
            batch: None,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::empty_field("url"));
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(ValidationError::invalid_format(
                "url",
                "must start with http:// or https://",
            ));
        }
        if let Some(batch) = &self.batch {
            if batch.size == 0 || batch.size > 1_000 {
                return Err(ValidationError::out_of_range(
                    "batch.size",
                    1,
                    1_000,
                    batch.size as i64,
                ));
            }
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Syslog
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyslogProtocol {
    #[default]
    Udp,
    Tcp,
}

fn default_syslog_port() -> u16 {
    514
}

fn default_facility() -> u8 {
    16
}

fn default_app_name() -> String {
    "n8n".to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyslogOptions {
    #[serde(flatten)]
    pub common: CommonOptions,

    #[serde(default)]
    pub host: String,

    #[serde(default = "default_syslog_port")]
    pub port: u16,

    #[serde(default)]
    pub protocol: SyslogProtocol,

    /// RFC 5424 facility code, 16 is local0.
    #[serde(default = "default_facility")]
    pub facility: u8,

    #[serde(default = "default_app_name")]
    pub app_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
}

impl SyslogOptions {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            common: CommonOptions::new(DestinationType::Syslog.default_label()),
            host: host.into(),
            port: default_syslog_port(),
            protocol: SyslogProtocol::Udp,
            facility: default_facility(),
            app_name: default_app_name(),
            hostname: None,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.host.trim().is_empty() {
            return Err(ValidationError::empty_field("host"));
        }
        if self.port == 0 {
            return Err(ValidationError::out_of_range("port", 1, 65_535, 0));
        }
        if self.facility > 23 {
            return Err(ValidationError::out_of_range(
                "facility",
                0,
                23,
                i64::from(self.facility),
            ));
        }
        if self.app_name.trim().is_empty() || self.app_name.contains(' ') {
            return Err(ValidationError::invalid_format(
                "appName",
                "must be a non-empty token without spaces",
            ));
        }
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Sentry
// ════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentryOptions {
    #[serde(flatten)]
    pub common: CommonOptions,

    #[serde(default)]
    pub dsn: String,

    #[serde(default = "default_true")]
    pub send_payload: bool,

    /// Strip personal data from every event before capture.
    #[serde(default)]
    pub anonymize_messages: bool,
}

impl SentryOptions {
    pub fn new(dsn: impl Into<String>) -> Self {
        Self {
            common: CommonOptions::new(DestinationType::Sentry.default_label()),
            dsn: dsn.into(),
            send_payload: true,
            anonymize_messages: false,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.dsn.trim().is_empty() {
            return Err(ValidationError::empty_field("dsn"));
        }
        super::SentryDsn::parse(&self.dsn)?;
        Ok(())
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Tagged union
// ════════════════════════════════════════════════════════════════════════════

/// A destination configuration, discriminated by `__type`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "__type", rename_all = "lowercase")]
pub enum DestinationOptions {
    Webhook(WebhookOptions),
    Syslog(SyslogOptions),
    Sentry(SentryOptions),
}

impl DestinationOptions {
    /// Parses an untrusted JSON body.
    ///
    /// Fails with `UnknownDestinationType` when `__type` is missing or not
    /// recognised, and with a field error when the variant is malformed.
    /// An empty label is replaced with the variant's default.
    pub fn from_json(value: JsonValue) -> Result<Self, ValidationError> {
        let type_name = value
            .get("__type")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| ValidationError::empty_field("__type"))?;
        DestinationType::parse(type_name)?;

        let mut options: DestinationOptions = serde_json::from_value(value)
            .map_err(|e| ValidationError::invalid_format("body", e.to_string()))?;

        let default_label = options.destination_type().default_label();
        let common = options.common_mut();
        if common.label.trim().is_empty() {
            common.label = default_label.to_string();
        }

        options.validate()?;
        Ok(options)
    }

    pub fn destination_type(&self) -> DestinationType {
        match self {
            Self::Webhook(_) => DestinationType::Webhook,
            Self::Syslog(_) => DestinationType::Syslog,
            Self::Sentry(_) => DestinationType::Sentry,
        }
    }

    pub fn common(&self) -> &CommonOptions {
        match self {
            Self::Webhook(o) => &o.common,
            Self::Syslog(o) => &o.common,
            Self::Sentry(o) => &o.common,
        }
    }

    pub fn common_mut(&mut self) -> &mut CommonOptions {
        match self {
            Self::Webhook(o) => &mut o.common,
            Self::Syslog(o) => &mut o.common,
            Self::Sentry(o) => &mut o.common,
        }
    }

    pub fn id(&self) -> DestinationId {
        self.common().id
    }

    pub fn label(&self) -> &str {
        &self.common().label
    }

    pub fn enabled(&self) -> bool {
        self.common().enabled
    }

    /// Variant-specific validation.
    pub fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Webhook(o) => o.validate(),
            Self::Syslog(o) => o.validate(),
            Self::Sentry(o) => o.validate(),
        }
    }

    /// Copy safe to echo to clients: credentials replaced with [`REDACTED`].
    pub fn redacted(&self) -> Self {
        match self {
            Self::Webhook(o) => Self::Webhook(WebhookOptions {
                auth: o.auth.as_ref().map(WebhookAuth::redacted),
                signing_secret: o.signing_secret.as_ref().map(|_| REDACTED.to_string()),
                ..o.clone()
            }),
            other => other.clone(),
        }
    }
}
