//! The immutable log record carried by the bus.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::names::{AUDIT_PREFIX, DESTINATION_TEST};
use super::EventName;
use crate::domain::foundation::{ExecutionId, MessageId, Timestamp, ValidationError};

/// Payload keys that always count as personal data.
const PII_KEYS: &[&str] = &["email", "firstName", "lastName", "userEmail", "ip"];

/// A single occurrence in the system.
///
/// Messages are created once by a producer and never mutated; the only
/// transformation is [`EventMessage::anonymize`], which returns a copy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "EventMessageOptions")]
pub struct EventMessage {
    id: MessageId,
    event_name: EventName,
    #[serde(rename = "ts")]
    timestamp: Timestamp,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    execution_id: Option<ExecutionId>,
}

impl EventMessage {
    /// Creates a message stamped now, with a fresh id and no payload.
    pub fn new(event_name: EventName) -> Self {
        Self {
            id: MessageId::new(),
            event_name,
            timestamp: Timestamp::now(),
            payload: None,
            execution_id: None,
        }
    }

    /// Parses the name and creates a message in one step.
    pub fn named(event_name: &str) -> Result<Self, ValidationError> {
        Ok(Self::new(EventName::new(event_name)?))
    }

    /// Attaches a payload. If the payload carries an `executionId` and none
    /// was set explicitly, it becomes the correlation key.
    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        if self.execution_id.is_none() {
            self.execution_id = execution_id_from_payload(&payload);
        }
        self.payload = Some(payload);
        self
    }

    pub fn with_execution_id(mut self, execution_id: ExecutionId) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    pub fn with_timestamp(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Synthetic probe used to validate a destination's configuration.
    pub fn destination_test() -> Self {
        Self {
            id: MessageId::new(),
            event_name: EventName::from_static(DESTINATION_TEST),
            timestamp: Timestamp::now(),
            payload: Some(serde_json::json!({ "msg": "Hello World", "test": true })),
            execution_id: None,
        }
    }

    pub fn id(&self) -> MessageId {
        self.id
    }

    pub fn event_name(&self) -> &EventName {
        &self.event_name
    }

    pub fn timestamp(&self) -> Timestamp {
        self.timestamp
    }

    pub fn payload(&self) -> Option<&JsonValue> {
        self.payload.as_ref()
    }

    pub fn execution_id(&self) -> Option<&ExecutionId> {
        self.execution_id.as_ref()
    }

    /// Looks up a string field in the payload.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.as_ref()?.get(key)?.as_str()
    }

    pub fn is_audit(&self) -> bool {
        self.event_name.matches_prefix(AUDIT_PREFIX)
    }

    pub fn is_destination_test(&self) -> bool {
        self.event_name.as_str() == DESTINATION_TEST
    }

    /// Returns a copy with personal data removed from the payload.
    ///
    /// Keys starting with `_` and well-known PII keys are dropped at every
    /// nesting level. Identity, name, timestamp and correlation key are kept.
    pub fn anonymize(&self) -> Self {
        Self {
            payload: self.payload.as_ref().map(strip_pii),
            ..self.clone()
        }
    }
}

fn strip_pii(value: &JsonValue) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let cleaned: Map<String, JsonValue> = map
                .iter()
                .filter(|(key, _)| !key.starts_with('_') && !PII_KEYS.contains(&key.as_str()))
                .map(|(key, v)| (key.clone(), strip_pii(v)))
                .collect();
            JsonValue::Object(cleaned)
        }
        JsonValue::Array(items) => JsonValue::Array(items.iter().map(strip_pii).collect()),
        other => other.clone(),
    }
}

fn execution_id_from_payload(payload: &JsonValue) -> Option<ExecutionId> {
    match payload.get("executionId")? {
        JsonValue::String(s) => ExecutionId::new(s.clone()).ok(),
        JsonValue::Number(n) => ExecutionId::new(n.to_string()).ok(),
        _ => None,
    }
}

/// Wire shape accepted when a message is posted or replayed.
///
/// Only `eventName` is required; missing ids and timestamps are generated.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventMessageOptions {
    #[serde(default)]
    pub id: Option<MessageId>,
    pub event_name: String,
    #[serde(default)]
    pub ts: Option<Timestamp>,
    #[serde(default)]
    pub payload: Option<JsonValue>,
    #[serde(default)]
    pub execution_id: Option<String>,
}

impl TryFrom<EventMessageOptions> for EventMessage {
    type Error = ValidationError;

    fn try_from(options: EventMessageOptions) -> Result<Self, Self::Error> {
        let event_name = EventName::new(options.event_name)?;
        let explicit = options.execution_id.map(ExecutionId::new).transpose()?;
        let execution_id =
            explicit.or_else(|| options.payload.as_ref().and_then(execution_id_from_payload));

        Ok(Self {
            id: options.id.unwrap_or_default(),
            event_name,
            timestamp: options.ts.unwrap_or_default(),
            payload: options.payload,
            execution_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn execution_id_is_lifted_from_payload() {
        let msg = EventMessage::named("n8n.node.finished")
            .unwrap()
            .with_payload(json!({ "executionId": 17, "nodeName": "A" }));
        assert_eq!(msg.execution_id().unwrap().as_str(), "17");
    }

    #[test]
    fn explicit_execution_id_wins() {
        let msg = EventMessage::named("n8n.node.finished")
            .unwrap()
            .with_execution_id(ExecutionId::new("1").unwrap())
            .with_payload(json!({ "executionId": "2" }));
        assert_eq!(msg.execution_id().unwrap().as_str(), "1");
    }

    #[test]
    fn anonymize_strips_underscore_and_pii_keys_without_mutating_original() {
        let msg = EventMessage::named("n8n.audit.user.updated")
            .unwrap()
            .with_payload(json!({
                "userId": "u1",
                "_email": "a@b.c",
                "email": "a@b.c",
                "changes": { "firstName": "Ada", "role": "owner" },
            }));

        let anon = msg.anonymize();

        assert_eq!(anon.id(), msg.id());
        assert_eq!(
            anon.payload().unwrap(),
            &json!({ "userId": "u1", "changes": { "role": "owner" } })
        );
        assert_eq!(msg.payload().unwrap()["email"], "a@b.c");
    }

    #[test]
    fn deserializes_minimal_body() {
        let msg: EventMessage =
            serde_json::from_str(r#"{"eventName":"n8n.workflow.error","payload":{"x":1}}"#)
                .unwrap();
        assert_eq!(msg.event_name().as_str(), "n8n.workflow.error");
        assert_eq!(msg.payload().unwrap()["x"], 1);
    }

    #[test]
    fn deserialization_rejects_malformed_name() {
        let result = serde_json::from_str::<EventMessage>(r#"{"eventName":"workflow"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn serialized_form_uses_wire_names() {
        let msg = EventMessage::named("n8n.workflow.started")
            .unwrap()
            .with_execution_id(ExecutionId::new("9").unwrap());
        let value = serde_json::to_value(&msg).unwrap();

        assert!(value.get("eventName").is_some());
        assert!(value.get("ts").is_some());
        assert_eq!(value["executionId"], "9");
        assert!(value.get("payload").is_none());

        let back: EventMessage = serde_json::from_value(value).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn audit_detection() {
        assert!(EventMessage::named("n8n.audit.user.signedup").unwrap().is_audit());
        assert!(!EventMessage::named("n8n.workflow.started").unwrap().is_audit());
    }
}
