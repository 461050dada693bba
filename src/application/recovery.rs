//! RecoveryService - rebuilds execution state from the log.

use std::sync::Arc;

use serde_json::json;
use tracing::{error, info, warn};

use super::{EventBusError, MessageEventBus};
use crate::domain::foundation::ExecutionId;
use crate::domain::message::names::WORKFLOW_CRASHED;
use crate::domain::message::EventMessage;
use crate::domain::recovery::{recover_execution_data, ExecutionResult, RunStatus};
use crate::ports::{EventQuery, EventStore, ExecutionRepository};

pub struct RecoveryService {
    store: Arc<dyn EventStore>,
    executions: Arc<dyn ExecutionRepository>,
}

impl RecoveryService {
    pub fn new(store: Arc<dyn EventStore>, executions: Arc<dyn ExecutionRepository>) -> Self {
        Self { store, executions }
    }

    /// Reconstructs `execution_id` from its most recent `log_history`
    /// entries (all when `None`).
    ///
    /// With `apply_to_store` the result is upserted into the execution
    /// repository. Nothing is written when the log is inconsistent.
    pub async fn recover(
        &self,
        execution_id: &ExecutionId,
        log_history: Option<usize>,
        apply_to_store: bool,
    ) -> Result<ExecutionResult, EventBusError> {
        let query = EventQuery::for_execution(execution_id.clone()).log_history(log_history);
        let events = self.store.query(&query).await?;
        let result = recover_execution_data(execution_id, &events)?;

        if apply_to_store {
            self.executions.upsert(&result).await?;
        }

        info!(
            execution_id = %execution_id,
            status = ?result.status,
            inferred = result.inferred,
            nodes = result.nodes.len(),
            applied = apply_to_store,
            "Execution recovered"
        );
        Ok(result)
    }

    /// Startup pass: recovers every unfinished execution with write-back and
    /// logs `n8n.workflow.crashed` for it, so the next start skips it.
    ///
    /// An execution whose log is inconsistent is reported and left alone.
    pub async fn recover_unfinished(
        &self,
        bus: &MessageEventBus,
    ) -> Result<Vec<ExecutionResult>, EventBusError> {
        let unfinished = self.store.unfinished_executions().await?;
        if unfinished.is_empty() {
            return Ok(Vec::new());
        }
        warn!(count = unfinished.len(), "Found unfinished executions, recovering");

        let mut recovered = Vec::with_capacity(unfinished.len());
        for execution_id in unfinished {
            let result = match self.recover(&execution_id, None, true).await {
                Ok(result) => result,
                Err(e) => {
                    error!(execution_id = %execution_id, error = %e, "Recovery failed");
                    continue;
                }
            };

            if result.status == RunStatus::Crashed {
                let mut payload = json!({
                    "executionId": execution_id.as_str(),
                    "isManual": false,
                    "recovered": true,
                });
                if let Some(workflow_id) = &result.workflow_id {
                    payload["workflowId"] = json!(workflow_id);
                }
                let crashed = EventMessage::named(WORKFLOW_CRASHED)?
                    .with_execution_id(execution_id.clone())
                    .with_payload(payload);
                bus.send(crashed).await?;
            }
            recovered.push(result);
        }
        Ok(recovered)
    }
}
