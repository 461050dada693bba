//! In-memory pub/sub transport for tests and single-process runs.
//!
//! One [`InMemoryBroker`] stands in for the server; every transport
//! created from it shares the same channels. Taking the broker offline
//! closes all live sessions and makes connects and publishes fail until
//! it comes back.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::ports::{
    InboundMessage, PubSubTransport, SessionPublisher, TransportError, TransportSession,
};

const SESSION_CAPACITY: usize = 1_024;

struct Session {
    channels: Vec<String>,
    tx: mpsc::Sender<InboundMessage>,
}

#[derive(Default)]
struct BrokerState {
    offline: bool,
    sessions: Vec<Session>,
    published: Vec<InboundMessage>,
}

#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn transport(&self) -> InMemoryTransport {
        InMemoryTransport {
            broker: self.clone(),
        }
    }

    /// Takes the broker down (closing every session) or brings it back.
    pub async fn set_online(&self, online: bool) {
        let mut state = self.state.lock().await;
        state.offline = !online;
        if !online {
            state.sessions.clear();
        }
    }

    /// Every message accepted so far, in publish order.
    pub async fn published(&self) -> Vec<InboundMessage> {
        self.state.lock().await.published.clone()
    }

    pub async fn session_count(&self) -> usize {
        self.state.lock().await.sessions.len()
    }

    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
        let mut state = self.state.lock().await;
        if state.offline {
            return Err(TransportError::Publish("broker offline".into()));
        }

        let message = InboundMessage {
            channel: channel.to_string(),
            payload: payload.to_string(),
        };
        state.published.push(message.clone());
        state.sessions.retain(|session| {
            if !session.channels.iter().any(|c| c == channel) {
                return !session.tx.is_closed();
            }
            match session.tx.try_send(message.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(channel, "In-memory subscriber is full, message dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        Ok(())
    }
}

#[derive(Clone)]
pub struct InMemoryTransport {
    broker: InMemoryBroker,
}

struct InMemoryPublisher {
    broker: InMemoryBroker,
}

#[async_trait]
impl SessionPublisher for InMemoryPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
        self.broker.publish(channel, payload).await
    }
}

#[async_trait]
impl PubSubTransport for InMemoryTransport {
    async fn connect(&self, channels: &[String]) -> Result<TransportSession, TransportError> {
        let mut state = self.broker.state.lock().await;
        if state.offline {
            return Err(TransportError::Connect("broker offline".into()));
        }

        let (tx, rx) = mpsc::channel(SESSION_CAPACITY);
        state.sessions.push(Session {
            channels: channels.to_vec(),
            tx,
        });

        Ok(TransportSession {
            publisher: Box::new(InMemoryPublisher {
                broker: self.broker.clone(),
            }),
            inbound: rx,
        })
    }
}
