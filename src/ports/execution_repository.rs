//! ExecutionRepository port - the external execution record store that
//! recovery writes reconstructed results back to.

use async_trait::async_trait;

use super::StorageError;
use crate::domain::foundation::ExecutionId;
use crate::domain::recovery::ExecutionResult;

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    /// Inserts or replaces the record for `result.execution_id`.
    ///
    /// Writing the same result twice leaves the store as writing it once.
    async fn upsert(&self, result: &ExecutionResult) -> Result<(), StorageError>;

    async fn find(&self, execution_id: &ExecutionId)
        -> Result<Option<ExecutionResult>, StorageError>;
}
