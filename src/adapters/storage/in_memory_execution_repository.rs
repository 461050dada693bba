//! In-Memory Execution Repository
//!
//! Receives results written back by crash recovery.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::foundation::ExecutionId;
use crate::domain::recovery::ExecutionResult;
use crate::ports::{ExecutionRepository, StorageError};

#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionRepository {
    records: Arc<RwLock<HashMap<ExecutionId, ExecutionResult>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn upsert(&self, result: &ExecutionResult) -> Result<(), StorageError> {
        self.records
            .write()
            .await
            .insert(result.execution_id.clone(), result.clone());
        Ok(())
    }

    async fn find(
        &self,
        execution_id: &ExecutionId,
    ) -> Result<Option<ExecutionResult>, StorageError> {
        Ok(self.records.read().await.get(execution_id).cloned())
    }
}
