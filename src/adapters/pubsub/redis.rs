//! Redis pub/sub transport.
//!
//! Each session opens two connections: a multiplexed one for `PUBLISH`
//! and a dedicated subscriber connection whose messages are forwarded to
//! the session's inbound stream. When Redis goes away the subscriber
//! stream ends, the inbound stream closes and the bridge reconnects.

use async_trait::async_trait;
use futures::StreamExt;
use redis::aio::MultiplexedConnection;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::ports::{
    InboundMessage, PubSubTransport, SessionPublisher, TransportError, TransportSession,
};

/// Inbound messages buffered between the subscriber and the bridge.
const INBOUND_CAPACITY: usize = 1_024;

#[derive(Clone)]
pub struct RedisTransport {
    client: redis::Client,
}

impl RedisTransport {
    /// # Errors
    /// Returns `TransportError::Connect` when the URL is malformed.
    pub fn new(url: &str) -> Result<Self, TransportError> {
        let client = redis::Client::open(url).map_err(|e| TransportError::Connect(e.to_string()))?;
        Ok(Self { client })
    }
}

struct RedisPublisher {
    conn: MultiplexedConnection,
}

#[async_trait]
impl SessionPublisher for RedisPublisher {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), TransportError> {
        let mut conn = self.conn.clone();
        conn.publish::<_, _, ()>(channel, payload)
            .await
            .map_err(|e: redis::RedisError| TransportError::Publish(e.to_string()))
    }
}

#[async_trait]
impl PubSubTransport for RedisTransport {
    async fn connect(&self, channels: &[String]) -> Result<TransportSession, TransportError> {
        let conn = self
            .client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut pubsub = self
            .client
            .get_async_connection()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?
            .into_pubsub();
        for channel in channels {
            pubsub
                .subscribe(channel.as_str())
                .await
                .map_err(|e| TransportError::Subscribe(e.to_string()))?;
        }

        let (tx, rx) = mpsc::channel(INBOUND_CAPACITY);
        tokio::spawn(async move {
            let mut messages = pubsub.into_on_message();
            while let Some(msg) = messages.next().await {
                let payload: String = match msg.get_payload() {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(channel = msg.get_channel_name(), error = %e, "Dropping non-text pub/sub payload");
                        continue;
                    }
                };
                let inbound = InboundMessage {
                    channel: msg.get_channel_name().to_string(),
                    payload,
                };
                if tx.send(inbound).await.is_err() {
                    break;
                }
            }
            debug!("Redis subscriber stream ended");
        });

        Ok(TransportSession {
            publisher: Box::new(RedisPublisher { conn }),
            inbound: rx,
        })
    }
}
