//! InstanceOwnerProvider port - actor identity attached to monitoring events.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::DomainError;

/// The user that owns this installation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceOwner {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[async_trait]
pub trait InstanceOwnerProvider: Send + Sync {
    async fn instance_owner(&self) -> Result<InstanceOwner, DomainError>;
}
