//! Sentry destination.
//!
//! Captures each message as a Sentry event through the DSN's store
//! endpoint. The event carries:
//!
//! | Field         | Value                                                   |
//! |---------------|---------------------------------------------------------|
//! | `message`     | payload as JSON text, or the event name without payload |
//! | `level`       | `error` for names ending in `error`, else `log`         |
//! | `user`        | instance owner id and email                             |
//! | `tags`        | `event` = event name, `logger` = destination id         |
//! | `release`     | deployment release                                      |
//! | `environment` | deployment environment                                  |

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::{debug, warn};

use super::DeploymentInfo;
use crate::domain::destination::{DestinationOptions, SentryDsn, SentryOptions};
use crate::domain::message::EventMessage;
use crate::ports::{ConfirmSent, InstanceOwner, InstanceOwnerProvider, MessageEventBusDestination};

const SENTRY_CLIENT: &str = concat!("message-event-bus/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Serialize)]
struct SentryUser<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    email: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct SentryTags {
    event: String,
    logger: String,
}

#[derive(Debug, Serialize)]
struct SentryEvent<'a> {
    event_id: String,
    timestamp: String,
    platform: &'static str,
    level: &'static str,
    logger: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    release: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    environment: Option<&'a str>,
    user: SentryUser<'a>,
    tags: SentryTags,
}

pub struct SentryDestination {
    options: DestinationOptions,
    sentry: SentryOptions,
    dsn: SentryDsn,
    client: Client,
    deployment: DeploymentInfo,
    owner: Arc<dyn InstanceOwnerProvider>,
}

impl SentryDestination {
    /// # Errors
    /// Returns the DSN validation error when the DSN is malformed.
    pub fn new(
        client: Client,
        sentry: SentryOptions,
        deployment: DeploymentInfo,
        owner: Arc<dyn InstanceOwnerProvider>,
    ) -> Result<Self, crate::domain::foundation::ValidationError> {
        let dsn = SentryDsn::parse(&sentry.dsn)?;
        Ok(Self {
            options: DestinationOptions::Sentry(sentry.clone()),
            sentry,
            dsn,
            client,
            deployment,
            owner,
        })
    }

    /// Message text sent to Sentry.
    fn message_text(&self, message: &EventMessage) -> String {
        let message = if self.sentry.anonymize_messages {
            message.anonymize()
        } else {
            message.clone()
        };
        match message.payload() {
            Some(payload) if self.sentry.send_payload => payload.to_string(),
            _ => message.event_name().to_string(),
        }
    }

    fn build_event<'a>(
        &'a self,
        message: &EventMessage,
        owner: &'a InstanceOwner,
    ) -> SentryEvent<'a> {
        SentryEvent {
            event_id: message.id().as_uuid().simple().to_string(),
            timestamp: message.timestamp().to_rfc3339(),
            platform: "other",
            level: if message.event_name().is_error() {
                "error"
            } else {
                "log"
            },
            logger: self.id().to_string(),
            message: self.message_text(message),
            release: non_empty(&self.deployment.release),
            environment: non_empty(&self.deployment.environment),
            user: SentryUser {
                id: &owner.id,
                email: owner.email.as_deref(),
            },
            tags: SentryTags {
                event: message.event_name().to_string(),
                logger: self.id().to_string(),
            },
        }
    }
}

fn non_empty(value: &str) -> Option<&str> {
    Some(value).filter(|v| !v.is_empty())
}

#[async_trait]
impl MessageEventBusDestination for SentryDestination {
    fn options(&self) -> &DestinationOptions {
        &self.options
    }

    async fn receive_from_event_bus(
        &self,
        message: &EventMessage,
        confirm: &dyn ConfirmSent,
    ) -> bool {
        let owner = match self.owner.instance_owner().await {
            Ok(owner) => owner,
            Err(e) => {
                warn!(destination = %self.id(), error = %e, "Instance owner lookup failed");
                return false;
            }
        };

        let event = self.build_event(message, &owner);
        let response = self
            .client
            .post(self.dsn.store_url())
            .header("X-Sentry-Auth", self.dsn.auth_header(SENTRY_CLIENT))
            .json(&event)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => {
                confirm.confirm_sent(message, self.id()).await;
                true
            }
            Ok(resp) => {
                debug!(
                    destination = %self.id(),
                    message_id = %message.id(),
                    status = %resp.status(),
                    "Sentry rejected event"
                );
                false
            }
            Err(e) => {
                debug!(
                    destination = %self.id(),
                    message_id = %message.id(),
                    error = %e,
                    "Sentry delivery failed"
                );
                false
            }
        }
    }

    async fn close(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::identity::StaticInstanceOwner;
    use serde_json::json;

    fn destination(options: SentryOptions) -> SentryDestination {
        SentryDestination::new(
            Client::new(),
            options,
            DeploymentInfo {
                release: "1.2.3".into(),
                environment: "test".into(),
            },
            Arc::new(StaticInstanceOwner::new("owner-1", Some("owner@example.test".into()))),
        )
        .unwrap()
    }

    #[test]
    fn event_maps_level_user_and_tags() {
        let dest = destination(SentryOptions::new("https://key@sentry.example.test/1"));
        let owner = InstanceOwner {
            id: "owner-1".into(),
            email: Some("owner@example.test".into()),
        };
        let message = EventMessage::named("n8n.node.executionError")
            .unwrap()
            .with_payload(json!({ "node": "A" }));

        let event = serde_json::to_value(dest.build_event(&message, &owner)).unwrap();

        assert_eq!(event["level"], "error");
        assert_eq!(event["user"]["id"], "owner-1");
        assert_eq!(event["tags"]["event"], "n8n.node.executionError");
        assert_eq!(event["tags"]["logger"], dest.id().to_string());
        assert_eq!(event["release"], "1.2.3");
        assert_eq!(event["message"], "{\"node\":\"A\"}");
    }

    #[test]
    fn message_without_payload_uses_event_name() {
        let dest = destination(SentryOptions::new("https://key@sentry.example.test/1"));
        let message = EventMessage::named("n8n.workflow.success").unwrap();
        assert_eq!(dest.message_text(&message), "n8n.workflow.success");
    }

    #[test]
    fn anonymize_mode_strips_personal_data() {
        let mut options = SentryOptions::new("https://key@sentry.example.test/1");
        options.anonymize_messages = true;
        let dest = destination(options);
        let message = EventMessage::named("n8n.audit.user.updated")
            .unwrap()
            .with_payload(json!({ "email": "a@b.c", "userId": "u1" }));

        let text = dest.message_text(&message);
        assert!(!text.contains("a@b.c"));
        assert!(text.contains("u1"));
    }

    #[test]
    fn send_payload_off_sends_name_only() {
        let mut options = SentryOptions::new("https://key@sentry.example.test/1");
        options.send_payload = false;
        let dest = destination(options);
        let message = EventMessage::named("n8n.workflow.failed")
            .unwrap()
            .with_payload(json!({ "x": 1 }));
        assert_eq!(dest.message_text(&message), "n8n.workflow.failed");
    }
}
