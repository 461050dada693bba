//! Reconstruction of execution state from the event log.
//!
//! Replays one execution's log slice in sequence order and folds it into
//! an [`ExecutionResult`]:
//!
//! | Event                  | Effect                                        |
//! |------------------------|-----------------------------------------------|
//! | `n8n.workflow.started` | opens the run, status `Running`               |
//! | `n8n.node.started`     | marks the node as open                        |
//! | `n8n.node.finished`    | closes the node, keeps `payload.output`       |
//! | `n8n.workflow.success` | status `Success`                              |
//! | `n8n.workflow.failed`  | status `Failed`                               |
//! | `n8n.workflow.crashed` | status `Crashed`                              |
//!
//! A run that never reaches a terminal event is classified `Crashed`.
//! Inconsistent slices are rejected with [`RecoveryError`] instead of being
//! patched up.

mod errors;
mod result;

pub use errors::RecoveryError;
pub use result::{ExecutionResult, NodeRun, RunStatus};

use std::collections::BTreeMap;

use serde_json::Value as JsonValue;

use crate::domain::foundation::{ExecutionId, Timestamp};
use crate::domain::logged::LoggedEvent;
use crate::domain::message::names::{
    is_execution_start, NODE_FINISHED, NODE_STARTED, WORKFLOW_CRASHED, WORKFLOW_FAILED,
    WORKFLOW_SUCCESS,
};
use crate::domain::message::EventMessage;

/// Rebuilds the best-effort final state of `execution_id` from its log.
///
/// `events` must be the execution's slice in ascending sequence order.
/// Events that are neither workflow nor node lifecycle events are skipped.
pub fn recover_execution_data(
    execution_id: &ExecutionId,
    events: &[LoggedEvent],
) -> Result<ExecutionResult, RecoveryError> {
    if events.is_empty() {
        return Err(RecoveryError::EmptyLog(execution_id.clone()));
    }

    let mut result = ExecutionResult::new(execution_id.clone());
    let mut open_nodes: BTreeMap<String, Timestamp> = BTreeMap::new();
    let mut started_at_sequence: Option<u64> = None;
    let mut terminal_sequence: Option<u64> = None;
    let mut previous_sequence: Option<u64> = None;

    for event in events {
        let message = &event.message;

        if let Some(previous) = previous_sequence {
            if event.sequence <= previous {
                return Err(RecoveryError::OutOfOrder {
                    previous,
                    found: event.sequence,
                });
            }
        }
        previous_sequence = Some(event.sequence);

        match message.execution_id() {
            Some(found) if found == execution_id => {}
            other => {
                return Err(RecoveryError::ForeignEvent {
                    expected: execution_id.clone(),
                    found: other.map(ToString::to_string),
                    sequence: event.sequence,
                })
            }
        }

        let name = message.event_name().as_str();
        let is_lifecycle = is_execution_start(name)
            || matches!(
                name,
                WORKFLOW_SUCCESS | WORKFLOW_FAILED | WORKFLOW_CRASHED | NODE_STARTED | NODE_FINISHED
            );
        if !is_lifecycle {
            continue;
        }

        if let Some(terminal) = terminal_sequence {
            return Err(RecoveryError::EventAfterTerminal {
                terminal,
                sequence: event.sequence,
            });
        }

        match name {
            _ if is_execution_start(name) => {
                if let Some(first) = started_at_sequence {
                    return Err(RecoveryError::DuplicateStart {
                        first,
                        second: event.sequence,
                    });
                }
                started_at_sequence = Some(event.sequence);
                result.status = RunStatus::Running;
                result.started_at = Some(message.timestamp());
                result.workflow_id = message.payload_str("workflowId").map(str::to_string);
            }
            NODE_STARTED => {
                let node = node_name(message, event.sequence)?;
                open_nodes.insert(node, message.timestamp());
            }
            NODE_FINISHED => {
                let node = node_name(message, event.sequence)?;
                let started_at = open_nodes.remove(&node);
                result.nodes.push(NodeRun {
                    name: node,
                    started_at,
                    finished_at: message.timestamp(),
                    output: node_output(message),
                });
            }
            _ => {
                terminal_sequence = Some(event.sequence);
                result.finished_at = Some(message.timestamp());
                result.error = message.payload_str("error").map(str::to_string);
                result.status = match name {
                    WORKFLOW_SUCCESS => RunStatus::Success,
                    WORKFLOW_FAILED => RunStatus::Failed,
                    _ => RunStatus::Crashed,
                };
            }
        }

        result.last_sequence = event.sequence;
    }

    if terminal_sequence.is_none() {
        result.status = RunStatus::Crashed;
        result.inferred = true;
        result.finished_at = events.last().map(|e| e.message.timestamp());
    }
    result.interrupted_nodes = open_nodes.into_keys().collect();

    Ok(result)
}

fn node_name(message: &EventMessage, sequence: u64) -> Result<String, RecoveryError> {
    message
        .payload_str("nodeName")
        .map(str::to_string)
        .ok_or(RecoveryError::MissingNodeName { sequence })
}

fn node_output(message: &EventMessage) -> Option<JsonValue> {
    message.payload()?.get("output").cloned()
}
