//! DestinationRepository port - persisted destination configurations.

use async_trait::async_trait;

use super::StorageError;
use crate::domain::destination::DestinationOptions;
use crate::domain::foundation::DestinationId;

/// Port for saving and restoring destination configs across restarts.
#[async_trait]
pub trait DestinationRepository: Send + Sync {
    /// Inserts or replaces the config with the same id.
    async fn save(&self, options: &DestinationOptions) -> Result<(), StorageError>;

    /// Removes a config. Returns `false` when it did not exist.
    async fn delete(&self, id: DestinationId) -> Result<bool, StorageError>;

    /// Every stored config, ordered by label then id.
    async fn load_all(&self) -> Result<Vec<DestinationOptions>, StorageError>;
}
