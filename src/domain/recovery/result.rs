use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::foundation::{ExecutionId, Timestamp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Nothing but node events seen so far.
    Unknown,
    Running,
    Success,
    Failed,
    Crashed,
}

/// One finished node run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeRun {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    pub finished_at: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonValue>,
}

/// Reconstructed run state of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub execution_id: ExecutionId,
    pub status: RunStatus,
    /// True when the status was inferred from a missing terminal event.
    pub inferred: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Finished nodes in log order; a node that ran twice appears twice.
    pub nodes: Vec<NodeRun>,
    /// Nodes that started but never finished.
    pub interrupted_nodes: Vec<String>,
    pub last_sequence: u64,
}

impl ExecutionResult {
    pub fn new(execution_id: ExecutionId) -> Self {
        Self {
            execution_id,
            status: RunStatus::Unknown,
            inferred: false,
            workflow_id: None,
            started_at: None,
            finished_at: None,
            error: None,
            nodes: Vec::new(),
            interrupted_nodes: Vec::new(),
            last_sequence: 0,
        }
    }

    /// Output of the latest run of `node`.
    pub fn output_of(&self, node: &str) -> Option<&JsonValue> {
        self.nodes
            .iter()
            .rev()
            .find(|n| n.name == node)
            .and_then(|n| n.output.as_ref())
    }
}
