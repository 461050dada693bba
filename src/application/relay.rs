//! Pub/sub relay handlers for multi-process deployments.
//!
//! | Channel          | Handler                   | Runs on |
//! |------------------|---------------------------|---------|
//! | `EventLog`       | `EventLogRelayHandler`    | main    |
//! | `Command`        | `CommandHandler`          | all     |
//! | `WorkerResponse` | `WorkerResponseRegistry`  | main    |
//!
//! Workers hand their messages to a `PubSubEventForwarder` instead of a
//! local bus; the main process logs and fans them out.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use tokio::sync::RwLock;
use tracing::{debug, info};

use super::MessageEventBus;
use crate::adapters::pubsub::PubSubBridge;
use crate::domain::foundation::{DomainError, ErrorCode};
use crate::domain::message::EventMessage;
use crate::ports::{EventSink, PubSubChannel, PubSubHandler};

// ════════════════════════════════════════════════════════════════════════════
// Event log relay
// ════════════════════════════════════════════════════════════════════════════

/// Logs messages published by workers into the local bus.
///
/// The relay is at-least-once; a redelivered message hits the store's id
/// deduplication and is not dispatched twice.
pub struct EventLogRelayHandler {
    bus: MessageEventBus,
}

impl EventLogRelayHandler {
    pub fn new(bus: MessageEventBus) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl PubSubHandler for EventLogRelayHandler {
    async fn handle(&self, payload: &JsonValue) -> Result<(), DomainError> {
        let message: EventMessage = serde_json::from_value(payload.clone())
            .map_err(|e| DomainError::new(ErrorCode::MalformedPayload, e.to_string()))?;
        let receipt = self.bus.send(message).await?;
        debug!(
            message_id = %receipt.message_id,
            duplicate = receipt.duplicate,
            "Relayed event from worker"
        );
        Ok(())
    }

    fn name(&self) -> &'static str {
        "event_log_relay"
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Commands
// ════════════════════════════════════════════════════════════════════════════

/// Control command sent to every bus instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusCommand {
    pub command: String,
    /// Instances the command is meant for; absent means all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub targets: Option<Vec<String>>,
}

impl BusCommand {
    pub const RESTART_EVENT_BUS: &'static str = "restartEventBus";
    pub const GET_STATUS: &'static str = "getStatus";

    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            targets: None,
        }
    }

    fn addressed_to(&self, instance_id: &str) -> bool {
        self.targets
            .as_ref()
            .map_or(true, |targets| targets.iter().any(|t| t == instance_id))
    }
}

/// Reply published on the worker-response channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerResponse {
    pub worker_id: String,
    pub command: String,
    pub payload: JsonValue,
}

/// Executes `restartEventBus` and `getStatus` on this instance.
pub struct CommandHandler {
    bus: MessageEventBus,
    bridge: Arc<PubSubBridge>,
    instance_id: String,
}

impl CommandHandler {
    pub fn new(bus: MessageEventBus, bridge: Arc<PubSubBridge>, instance_id: impl Into<String>) -> Self {
        Self {
            bus,
            bridge,
            instance_id: instance_id.into(),
        }
    }

    async fn reply(&self, command: &str, payload: JsonValue) -> Result<(), DomainError> {
        let response = WorkerResponse {
            worker_id: self.instance_id.clone(),
            command: command.to_string(),
            payload,
        };
        self.bridge
            .publish(PubSubChannel::WorkerResponse, &response)
            .await
            .map_err(|e| DomainError::new(ErrorCode::TransportError, e.to_string()))
    }
}

#[async_trait]
impl PubSubHandler for CommandHandler {
    async fn handle(&self, payload: &JsonValue) -> Result<(), DomainError> {
        let command: BusCommand = serde_json::from_value(payload.clone())
            .map_err(|e| DomainError::new(ErrorCode::MalformedPayload, e.to_string()))?;
        if !command.addressed_to(&self.instance_id) {
            return Ok(());
        }

        match command.command.as_str() {
            BusCommand::RESTART_EVENT_BUS => {
                let loaded = self.bus.restart().await?;
                info!(instance = %self.instance_id, destinations = loaded, "Event bus restarted by command");
                self.reply(BusCommand::RESTART_EVENT_BUS, json!({ "result": "success" }))
                    .await
            }
            BusCommand::GET_STATUS => {
                let status = self.bus.status().await;
                let payload = serde_json::to_value(status)
                    .map_err(|e| DomainError::new(ErrorCode::InternalError, e.to_string()))?;
                self.reply(BusCommand::GET_STATUS, payload).await
            }
            other => Err(DomainError::new(
                ErrorCode::UnsupportedCommand,
                format!("Unknown command '{}'", other),
            )),
        }
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Worker responses
// ════════════════════════════════════════════════════════════════════════════

/// Keeps the latest response of every worker.
#[derive(Default)]
pub struct WorkerResponseRegistry {
    responses: RwLock<BTreeMap<String, WorkerResponse>>,
}

impl WorkerResponseRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn responses(&self) -> Vec<WorkerResponse> {
        self.responses.read().await.values().cloned().collect()
    }

    pub async fn response_of(&self, worker_id: &str) -> Option<WorkerResponse> {
        self.responses.read().await.get(worker_id).cloned()
    }
}

#[async_trait]
impl PubSubHandler for WorkerResponseRegistry {
    async fn handle(&self, payload: &JsonValue) -> Result<(), DomainError> {
        let response: WorkerResponse = serde_json::from_value(payload.clone())
            .map_err(|e| DomainError::new(ErrorCode::MalformedPayload, e.to_string()))?;
        debug!(worker = %response.worker_id, command = %response.command, "Worker response received");
        self.responses
            .write()
            .await
            .insert(response.worker_id.clone(), response);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "worker_response"
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Worker-side sink
// ════════════════════════════════════════════════════════════════════════════

/// Producer sink for worker processes: publishes on the event-log channel.
pub struct PubSubEventForwarder {
    bridge: Arc<PubSubBridge>,
}

impl PubSubEventForwarder {
    pub fn new(bridge: Arc<PubSubBridge>) -> Self {
        Self { bridge }
    }
}

#[async_trait]
impl EventSink for PubSubEventForwarder {
    async fn emit(&self, message: EventMessage) -> Result<(), DomainError> {
        self.bridge
            .publish(PubSubChannel::EventLog, &message)
            .await
            .map_err(|e| DomainError::new(ErrorCode::TransportError, e.to_string()))
    }
}
