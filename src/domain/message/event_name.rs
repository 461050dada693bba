//! Dot-namespaced event names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::domain::foundation::ValidationError;

/// A validated `{namespace}.{domain}.{event}` name.
///
/// The event part may itself contain dots (`n8n.audit.user.signedup`), so a
/// name has at least three segments. Segments are non-empty and made of
/// ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EventName(String);

impl EventName {
    /// Parses and validates an event name.
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        let segments: Vec<&str> = name.split('.').collect();

        if segments.len() < 3 {
            return Err(ValidationError::invalid_format(
                "eventName",
                format!("'{}' does not match {{namespace}}.{{domain}}.{{event}}", name),
            ));
        }

        for segment in &segments {
            let valid = !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
            if !valid {
                return Err(ValidationError::invalid_format(
                    "eventName",
                    format!("'{}' contains an empty or invalid segment", name),
                ));
            }
        }

        Ok(Self(name))
    }

    /// Wraps a catalogued name without re-validating it.
    pub(crate) fn from_static(name: &'static str) -> Self {
        debug_assert!(Self::new(name).is_ok(), "catalogued name {name} is malformed");
        Self(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First segment, e.g. `n8n`.
    pub fn namespace(&self) -> &str {
        self.0.split('.').next().unwrap_or_default()
    }

    /// Second segment, e.g. `workflow` or `audit`.
    pub fn domain(&self) -> &str {
        self.0.split('.').nth(1).unwrap_or_default()
    }

    /// Severity convention used by monitoring sinks: names ending in
    /// `error` (case-insensitive) are errors.
    pub fn is_error(&self) -> bool {
        self.0.to_lowercase().ends_with("error")
    }

    /// Subscription matching. `*` matches everything; otherwise the prefix
    /// must match whole segments (`n8n.workflow` matches
    /// `n8n.workflow.started` but not `n8n.workflows.x`).
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        if prefix == "*" || prefix == self.0 {
            return true;
        }
        let prefix = prefix.trim_end_matches('.');
        self.0
            .strip_prefix(prefix)
            .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EventName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for EventName {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EventName> for String {
    fn from(name: EventName) -> Self {
        name.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_three_segment_name() {
        let name = EventName::new("n8n.workflow.error").unwrap();
        assert_eq!(name.namespace(), "n8n");
        assert_eq!(name.domain(), "workflow");
    }

    #[test]
    fn accepts_deeper_audit_names() {
        assert!(EventName::new("n8n.audit.user.signedup").is_ok());
    }

    #[test]
    fn rejects_two_segments() {
        assert!(EventName::new("n8n.workflow").is_err());
    }

    #[test]
    fn rejects_empty_segment() {
        assert!(EventName::new("n8n..started").is_err());
        assert!(EventName::new("n8n.workflow.").is_err());
    }

    #[test]
    fn rejects_spaces() {
        assert!(EventName::new("n8n.work flow.started").is_err());
    }

    #[test]
    fn error_suffix_is_case_insensitive() {
        assert!(EventName::new("n8n.workflow.Error").unwrap().is_error());
        assert!(EventName::new("n8n.node.executionError").unwrap().is_error());
        assert!(!EventName::new("n8n.workflow.failed").unwrap().is_error());
    }

    #[test]
    fn prefix_matching_respects_segments() {
        let name = EventName::new("n8n.workflow.started").unwrap();
        assert!(name.matches_prefix("*"));
        assert!(name.matches_prefix("n8n.workflow"));
        assert!(name.matches_prefix("n8n.workflow."));
        assert!(name.matches_prefix("n8n.workflow.started"));
        assert!(!name.matches_prefix("n8n.work"));
        assert!(!name.matches_prefix("n8n.node"));
    }

    #[test]
    fn deserialization_validates() {
        assert!(serde_json::from_str::<EventName>("\"bad\"").is_err());
        let ok: EventName = serde_json::from_str("\"n8n.node.finished\"").unwrap();
        assert_eq!(ok.as_str(), "n8n.node.finished");
    }
}
