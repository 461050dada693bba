//! Pub/sub ports - the cross-process relay between bus instances.
//!
//! ## Channels
//!
//! | Channel          | Suffix             | Carries                         |
//! |------------------|--------------------|---------------------------------|
//! | `EventLog`       | `.events`          | event messages from workers     |
//! | `Command`        | `.commands`        | control commands to every node  |
//! | `WorkerResponse` | `.worker-response` | replies from workers            |
//!
//! A transport hands out sessions. A session ends when its inbound stream
//! closes; the bridge then reconnects.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;

use crate::domain::foundation::DomainError;

/// Logical relay channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PubSubChannel {
    EventLog,
    Command,
    WorkerResponse,
}

impl PubSubChannel {
    pub const ALL: [PubSubChannel; 3] = [
        PubSubChannel::EventLog,
        PubSubChannel::Command,
        PubSubChannel::WorkerResponse,
    ];

    fn suffix(&self) -> &'static str {
        match self {
            PubSubChannel::EventLog => "events",
            PubSubChannel::Command => "commands",
            PubSubChannel::WorkerResponse => "worker-response",
        }
    }

    /// Transport-level channel name, e.g. `n8n.events`.
    pub fn key(&self, prefix: &str) -> String {
        format!("{}.{}", prefix, self.suffix())
    }

    /// Reverse of [`PubSubChannel::key`].
    pub fn from_key(prefix: &str, key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.key(prefix) == key)
    }
}

/// Errors raised by pub/sub transports.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Subscribe failed: {0}")]
    Subscribe(String),

    #[error("Session closed")]
    Closed,
}

/// A raw message received on a transport channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub channel: String,
    pub payload: String,
}

/// Outbound half of a live session.
#[async_trait]
pub trait SessionPublisher: Send + Sync {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError>;
}

/// A connected session: a publisher plus the stream of subscribed messages.
/// The stream ending means the connection was lost.
pub struct TransportSession {
    pub publisher: Box<dyn SessionPublisher>,
    pub inbound: mpsc::Receiver<InboundMessage>,
}

/// Port for establishing pub/sub sessions.
#[async_trait]
pub trait PubSubTransport: Send + Sync {
    /// Connects and subscribes to `channels`.
    ///
    /// # Errors
    /// Returns `TransportError::Connect` or `TransportError::Subscribe`
    /// when the server is unreachable.
    async fn connect(&self, channels: &[String]) -> Result<TransportSession, TransportError>;
}

/// Handler for decoded messages on one channel.
///
/// Handlers registered on the same channel run one after another in
/// registration order. A failing handler is logged and does not stop the
/// handlers after it.
#[async_trait]
pub trait PubSubHandler: Send + Sync {
    async fn handle(&self, payload: &JsonValue) -> Result<(), DomainError>;

    /// Handler name for logging.
    fn name(&self) -> &'static str;
}
