//! Builds destination instances from their `__type`-tagged configs.

use std::sync::Arc;

use reqwest::Client;

use super::{SentryDestination, SyslogDestination, WebhookDestination};
use crate::domain::destination::DestinationOptions;
use crate::domain::foundation::ValidationError;
use crate::ports::{InstanceOwnerProvider, MessageEventBusDestination};

/// Process-wide deployment metadata handed to monitoring sinks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeploymentInfo {
    pub release: String,
    pub environment: String,
}

/// Shared collaborators every destination variant may need.
#[derive(Clone)]
pub struct DestinationFactory {
    client: Client,
    deployment: DeploymentInfo,
    owner: Arc<dyn InstanceOwnerProvider>,
}

impl DestinationFactory {
    pub fn new(
        client: Client,
        deployment: DeploymentInfo,
        owner: Arc<dyn InstanceOwnerProvider>,
    ) -> Self {
        Self {
            client,
            deployment,
            owner,
        }
    }

    /// Validates `options` and instantiates the matching variant.
    ///
    /// # Errors
    /// Returns `ValidationError` when the config is incomplete or malformed.
    pub fn build(
        &self,
        options: DestinationOptions,
    ) -> Result<Arc<dyn MessageEventBusDestination>, ValidationError> {
        options.validate()?;
        let destination: Arc<dyn MessageEventBusDestination> = match options {
            DestinationOptions::Webhook(webhook) => {
                Arc::new(WebhookDestination::new(self.client.clone(), webhook))
            }
            DestinationOptions::Syslog(syslog) => Arc::new(SyslogDestination::new(syslog)),
            DestinationOptions::Sentry(sentry) => Arc::new(SentryDestination::new(
                self.client.clone(),
                sentry,
                self.deployment.clone(),
                self.owner.clone(),
            )?),
        };
        Ok(destination)
    }
}
