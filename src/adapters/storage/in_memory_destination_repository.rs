//! In-Memory Destination Repository
//!
//! Keeps destination configs in memory. Useful for testing and for
//! deployments that configure destinations at startup only.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::destination::DestinationOptions;
use crate::domain::foundation::DestinationId;
use crate::ports::{DestinationRepository, StorageError};

#[derive(Debug, Clone, Default)]
pub struct InMemoryDestinationRepository {
    configs: Arc<RwLock<HashMap<DestinationId, DestinationOptions>>>,
}

impl InMemoryDestinationRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored configs
    pub async fn count(&self) -> usize {
        self.configs.read().await.len()
    }
}

#[async_trait]
impl DestinationRepository for InMemoryDestinationRepository {
    async fn save(&self, options: &DestinationOptions) -> Result<(), StorageError> {
        self.configs
            .write()
            .await
            .insert(options.id(), options.clone());
        Ok(())
    }

    async fn delete(&self, id: DestinationId) -> Result<bool, StorageError> {
        Ok(self.configs.write().await.remove(&id).is_some())
    }

    async fn load_all(&self) -> Result<Vec<DestinationOptions>, StorageError> {
        let mut configs: Vec<_> = self.configs.read().await.values().cloned().collect();
        configs.sort_by(|a, b| a.label().cmp(b.label()).then(a.id().cmp(&b.id())));
        Ok(configs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::destination::SyslogOptions;

    #[tokio::test]
    async fn save_delete_cycle() {
        let repo = InMemoryDestinationRepository::new();
        let options = DestinationOptions::Syslog(SyslogOptions::new("logs"));

        repo.save(&options).await.unwrap();
        assert_eq!(repo.count().await, 1);
        assert!(repo.delete(options.id()).await.unwrap());
        assert_eq!(repo.count().await, 0);
    }
}
