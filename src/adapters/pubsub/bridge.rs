//! Pub/sub bridge - an owned, reconnecting relay connection.
//!
//! The bridge keeps one transport session alive for the whole process and
//! routes messages between local handlers and the other bus instances.
//!
//! ```text
//! Disconnected --[run loop]--> Connecting --[session up]--> Connected
//!      ^                            |                           |
//!      +-------[connect failed]-----+                           |
//!      +----------------------[inbound stream closed]-----------+
//! ```
//!
//! While not connected, [`PubSubBridge::publish`] queues messages in a
//! bounded buffer. The oldest message is dropped on overflow. The buffer
//! is flushed in order as soon as a session is established.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{watch, Mutex, RwLock};
use tracing::{debug, error, info, warn};

use crate::domain::foundation::{Backoff, StateMachine};
use crate::ports::{
    InboundMessage, PubSubChannel, PubSubHandler, PubSubTransport, SessionPublisher,
    TransportError,
};

/// Connection state of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl StateMachine for ConnectionState {
    fn can_transition_to(&self, target: &Self) -> bool {
        self.valid_transitions().contains(target)
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use ConnectionState::*;
        match self {
            Disconnected => vec![Connecting],
            Connecting => vec![Connected, Disconnected],
            Connected => vec![Disconnected],
        }
    }
}

/// Configuration for the bridge.
#[derive(Debug, Clone)]
pub struct PubSubBridgeConfig {
    /// Prefix for transport channel names (`{prefix}.events`, ...).
    pub channel_prefix: String,
    /// Messages kept while disconnected.
    pub buffer_capacity: usize,
    pub reconnect: Backoff,
}

impl Default for PubSubBridgeConfig {
    fn default() -> Self {
        Self {
            channel_prefix: "n8n".to_string(),
            buffer_capacity: 1_000,
            reconnect: Backoff::new(Duration::from_millis(500), Duration::from_secs(30), 0.2),
        }
    }
}

impl PubSubBridgeConfig {
    pub fn with_channel_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.channel_prefix = prefix.into();
        self
    }

    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity.max(1);
        self
    }

    pub fn with_reconnect(mut self, reconnect: Backoff) -> Self {
        self.reconnect = reconnect;
        self
    }
}

struct Pending {
    channel: PubSubChannel,
    payload: String,
}

#[derive(Default)]
struct Outbound {
    publisher: Option<Arc<dyn SessionPublisher>>,
    buffer: VecDeque<Pending>,
}

/// Reconnecting relay between bus instances.
pub struct PubSubBridge {
    transport: Arc<dyn PubSubTransport>,
    config: PubSubBridgeConfig,
    handlers: RwLock<BTreeMap<PubSubChannel, Vec<Arc<dyn PubSubHandler>>>>,
    outbound: Mutex<Outbound>,
    state: watch::Sender<ConnectionState>,
    dropped: AtomicU64,
}

impl PubSubBridge {
    pub fn new(transport: Arc<dyn PubSubTransport>, config: PubSubBridgeConfig) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            transport,
            config,
            handlers: RwLock::new(BTreeMap::new()),
            outbound: Mutex::new(Outbound::default()),
            state,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Receiver that observes every state change.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    /// Messages waiting for a connection.
    pub async fn buffered(&self) -> usize {
        self.outbound.lock().await.buffer.len()
    }

    /// Messages discarded because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Registers a handler. Handlers on one channel run in registration order.
    pub async fn subscribe(&self, channel: PubSubChannel, handler: Arc<dyn PubSubHandler>) {
        debug!(channel = ?channel, handler = handler.name(), "Subscribing pub/sub handler");
        self.handlers
            .write()
            .await
            .entry(channel)
            .or_default()
            .push(handler);
    }

    /// Publishes `message` on `channel`.
    ///
    /// Never fails because of the connection: when disconnected, or when
    /// the live publish fails, the message is buffered for the next session.
    ///
    /// # Errors
    /// Returns `TransportError::Publish` only when `message` cannot be
    /// serialized.
    pub async fn publish<T: Serialize + ?Sized>(
        &self,
        channel: PubSubChannel,
        message: &T,
    ) -> Result<(), TransportError> {
        let payload =
            serde_json::to_string(message).map_err(|e| TransportError::Publish(e.to_string()))?;
        let key = channel.key(&self.config.channel_prefix);

        let mut outbound = self.outbound.lock().await;
        if let Some(publisher) = outbound.publisher.clone() {
            match publisher.publish(&key, &payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!(channel = %key, error = %e, "Publish failed, buffering until reconnect");
                    outbound.publisher = None;
                }
            }
        }
        self.push_buffered(&mut outbound, Pending { channel, payload });
        Ok(())
    }

    fn push_buffered(&self, outbound: &mut Outbound, pending: Pending) {
        if outbound.buffer.len() >= self.config.buffer_capacity {
            if let Some(oldest) = outbound.buffer.pop_front() {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!(
                    channel = ?oldest.channel,
                    capacity = self.config.buffer_capacity,
                    "Pub/sub buffer full, dropping oldest message"
                );
            }
        }
        outbound.buffer.push_back(pending);
    }

    /// Runs the connection loop until `shutdown` flips to true.
    ///
    /// Reconnects forever with backoff. Inbound messages are decoded and
    /// handed to the handlers of their channel.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(prefix = %self.config.channel_prefix, "Pub/sub bridge starting");
        let keys: Vec<String> = PubSubChannel::ALL
            .iter()
            .map(|c| c.key(&self.config.channel_prefix))
            .collect();
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                break;
            }

            self.set_state(ConnectionState::Connecting);
            let mut inbound = match self.transport.connect(&keys).await {
                Ok(session) => match self.flush(Arc::from(session.publisher)).await {
                    Ok(()) => {
                        attempt = 0;
                        self.set_state(ConnectionState::Connected);
                        info!("Pub/sub bridge connected");
                        session.inbound
                    }
                    Err(e) => {
                        warn!(error = %e, "Flushing buffered messages failed");
                        self.set_state(ConnectionState::Disconnected);
                        if self.pause(attempt, &mut shutdown).await {
                            break;
                        }
                        attempt = attempt.saturating_add(1);
                        continue;
                    }
                },
                Err(e) => {
                    warn!(error = %e, attempt, "Redis unavailable - trying to reconnect");
                    self.set_state(ConnectionState::Disconnected);
                    if self.pause(attempt, &mut shutdown).await {
                        break;
                    }
                    attempt = attempt.saturating_add(1);
                    continue;
                }
            };

            loop {
                tokio::select! {
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    received = inbound.recv() => match received {
                        Some(message) => self.dispatch(message).await,
                        None => {
                            warn!("Pub/sub connection lost");
                            break;
                        }
                    }
                }
            }

            self.outbound.lock().await.publisher = None;
            self.set_state(ConnectionState::Disconnected);
            if *shutdown.borrow() || self.pause(attempt, &mut shutdown).await {
                break;
            }
        }

        self.outbound.lock().await.publisher = None;
        self.set_state(ConnectionState::Disconnected);
        info!("Pub/sub bridge stopped");
    }

    /// Sends every buffered message through the new session, then makes it
    /// the live publisher. On failure the unsent tail stays buffered.
    async fn flush(&self, publisher: Arc<dyn SessionPublisher>) -> Result<(), TransportError> {
        let mut outbound = self.outbound.lock().await;
        let pending = outbound.buffer.len();
        while let Some(next) = outbound.buffer.pop_front() {
            let key = next.channel.key(&self.config.channel_prefix);
            if let Err(e) = publisher.publish(&key, &next.payload).await {
                outbound.buffer.push_front(next);
                return Err(e);
            }
        }
        if pending > 0 {
            info!(count = pending, "Flushed buffered pub/sub messages");
        }
        outbound.publisher = Some(publisher);
        Ok(())
    }

    async fn dispatch(&self, message: InboundMessage) {
        let Some(channel) = PubSubChannel::from_key(&self.config.channel_prefix, &message.channel)
        else {
            debug!(channel = %message.channel, "Ignoring message on unknown channel");
            return;
        };

        let payload: JsonValue = match serde_json::from_str(&message.payload) {
            Ok(value) => value,
            Err(e) => {
                warn!(channel = %message.channel, error = %e, "Dropping malformed pub/sub payload");
                return;
            }
        };

        let handlers = self
            .handlers
            .read()
            .await
            .get(&channel)
            .cloned()
            .unwrap_or_default();

        for handler in handlers {
            if let Err(e) = handler.handle(&payload).await {
                error!(
                    channel = %message.channel,
                    handler = handler.name(),
                    error = %e,
                    "Pub/sub handler failed"
                );
            }
        }
    }

    /// Waits out the backoff. Returns true when shutdown was requested.
    async fn pause(&self, attempt: u32, shutdown: &mut watch::Receiver<bool>) -> bool {
        let delay = self.config.reconnect.delay(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => *shutdown.borrow(),
            changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            if !current.can_transition_to(&next) {
                debug!(from = ?*current, to = ?next, "Unexpected bridge state change");
            }
            *current = next;
            true
        });
    }
}
