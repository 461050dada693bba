//! Instance owner provider backed by deployment configuration.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::ports::{InstanceOwner, InstanceOwnerProvider};

/// Returns the same owner for every lookup.
#[derive(Debug, Clone)]
pub struct StaticInstanceOwner {
    owner: InstanceOwner,
}

impl StaticInstanceOwner {
    pub fn new(id: impl Into<String>, email: Option<String>) -> Self {
        Self {
            owner: InstanceOwner {
                id: id.into(),
                email,
            },
        }
    }
}

#[async_trait]
impl InstanceOwnerProvider for StaticInstanceOwner {
    async fn instance_owner(&self) -> Result<InstanceOwner, DomainError> {
        Ok(self.owner.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_configured_owner() {
        let provider = StaticInstanceOwner::new("42", Some("owner@example.test".into()));
        let owner = provider.instance_owner().await.unwrap();
        assert_eq!(owner.id, "42");
        assert_eq!(owner.email.as_deref(), Some("owner@example.test"));
    }
}
