//! MessageEventBus - durable log plus confirmed fan-out.
//!
//! `send` logs a message first and only then hands it to the destinations
//! that want it. Each destination has its own dispatcher task fed in
//! append order; every delivery attempt runs in its own task under a
//! per-destination concurrency limit and timeout, so a slow destination
//! never holds up the others.
//!
//! ```text
//! send ──► EventStore.append ──► dispatcher(dest A) ──► attempt ──► confirm_sent
//!                           └──► dispatcher(dest B) ──► attempt ──► record_failure
//!                                                          │           │
//!                                                          └─ backoff ◄┘ (until max_attempts)
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value as JsonValue;
use tokio::sync::{mpsc, watch, Mutex, Notify, OwnedSemaphorePermit, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

use super::EventBusError;
use crate::adapters::destinations::DestinationFactory;
use crate::domain::delivery::DeliveryState;
use crate::domain::destination::DestinationOptions;
use crate::domain::failed::{summarize_failures, FailedEventSummary};
use crate::domain::foundation::{
    Backoff, DestinationId, DomainError, ExecutionId, StateMachine, Timestamp,
};
use crate::domain::message::EventMessage;
use crate::ports::{
    ConfirmSent, DestinationRepository, EventQuery, EventSink, EventStore,
    LoggedEvent, MessageEventBusDestination, StatusFilter, StoreReceipt,
};

/// Retry and resource limits for destination delivery.
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    /// Attempts per (message, destination) before the pair is abandoned.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub attempt_timeout: Duration,
    /// Concurrent attempts per destination.
    pub max_in_flight: usize,
    /// Bound for draining deliveries and for each destination's `close`.
    pub shutdown_timeout: Duration,
}

impl Default for DeliverySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::default(),
            attempt_timeout: Duration::from_secs(10),
            max_in_flight: 16,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl DeliverySettings {
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.max_in_flight = limit.max(1);
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }
}

/// Snapshot reported by `getStatus`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStatus {
    pub accepting: bool,
    pub destinations: usize,
    pub in_flight: usize,
}

// ════════════════════════════════════════════════════════════════════════════
// In-flight accounting
// ════════════════════════════════════════════════════════════════════════════

#[derive(Default)]
struct InFlight {
    count: AtomicUsize,
    idle: Notify,
}

impl InFlight {
    fn enter(self: &Arc<Self>) -> InFlightGuard {
        self.count.fetch_add(1, Ordering::SeqCst);
        InFlightGuard(self.clone())
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    async fn wait_idle(&self) {
        loop {
            let idle = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            idle.await;
        }
    }
}

/// Held by a queued or running delivery until its final outcome.
struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.0.count.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.0.idle.notify_waiters();
        }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Delivery
// ════════════════════════════════════════════════════════════════════════════

/// What delivery tasks need: the store and the retry policy.
struct Courier {
    store: Arc<dyn EventStore>,
    settings: DeliverySettings,
}

#[async_trait]
impl ConfirmSent for Courier {
    async fn confirm_sent(&self, message: &EventMessage, destination: DestinationId) {
        match self
            .store
            .mark_confirmed(message.id(), destination, Timestamp::now())
            .await
        {
            Ok(true) => debug!(message_id = %message.id(), destination = %destination, "Delivery confirmed"),
            Ok(false) => debug!(message_id = %message.id(), destination = %destination, "Confirmation already recorded"),
            Err(e) => error!(
                message_id = %message.id(),
                destination = %destination,
                error = %e,
                "Failed to record confirmation"
            ),
        }
    }
}

/// One delivery handed to a dispatcher.
struct QueueItem {
    message: EventMessage,
    /// Attempts already spent, from before a restart.
    attempts: u32,
    guard: InFlightGuard,
}

impl Courier {
    /// Feeds one destination in append order.
    async fn dispatch_loop(
        self: Arc<Self>,
        destination: Arc<dyn MessageEventBusDestination>,
        mut queue: mpsc::UnboundedReceiver<QueueItem>,
        cancel: watch::Receiver<bool>,
    ) {
        let permits = Arc::new(Semaphore::new(self.settings.max_in_flight.max(1)));
        while let Some(item) = queue.recv().await {
            if *cancel.borrow() {
                break;
            }
            let Ok(permit) = permits.clone().acquire_owned().await else {
                break;
            };
            tokio::spawn(self.clone().deliver(
                destination.clone(),
                item,
                permits.clone(),
                permit,
                cancel.clone(),
            ));
        }
        debug!(destination = %destination.id(), "Dispatcher stopped");
    }

    async fn deliver(
        self: Arc<Self>,
        destination: Arc<dyn MessageEventBusDestination>,
        item: QueueItem,
        permits: Arc<Semaphore>,
        first_permit: OwnedSemaphorePermit,
        mut cancel: watch::Receiver<bool>,
    ) {
        let QueueItem {
            message,
            attempts,
            guard: _guard,
        } = item;
        let destination_id = destination.id();
        let outgoing = outgoing_for(destination.as_ref(), message);
        let mut next_permit = Some(first_permit);
        let mut attempt: u32 = attempts;

        loop {
            attempt += 1;
            let permit = match next_permit.take() {
                Some(permit) => permit,
                None => match permits.clone().acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                },
            };

            let outcome = tokio::time::timeout(
                self.settings.attempt_timeout,
                destination.receive_from_event_bus(&outgoing, self.as_ref()),
            )
            .await;
            drop(permit);

            let failure = match outcome {
                Ok(true) => return,
                Ok(false) => "destination reported failure".to_string(),
                Err(_) => format!(
                    "attempt timed out after {}ms",
                    self.settings.attempt_timeout.as_millis()
                ),
            };

            let abandon = attempt >= self.settings.max_attempts;
            if let Err(e) = self
                .store
                .record_failure(outgoing.id(), destination_id, Timestamp::now(), &failure, abandon)
                .await
            {
                error!(message_id = %outgoing.id(), destination = %destination_id, error = %e, "Failed to record delivery failure");
            }

            if abandon {
                warn!(
                    message_id = %outgoing.id(),
                    destination = %destination_id,
                    attempt,
                    error = %failure,
                    "Delivery abandoned"
                );
                return;
            }

            let delay = self.settings.backoff.delay(attempt.saturating_sub(1));
            debug!(
                message_id = %outgoing.id(),
                destination = %destination_id,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "Delivery failed, retrying"
            );
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancelled(&mut cancel) => {
                    debug!(message_id = %outgoing.id(), destination = %destination_id, "Destination removed, retry cancelled");
                    return;
                }
            }

            if let Err(e) = self.store.mark_retrying(outgoing.id(), destination_id).await {
                error!(message_id = %outgoing.id(), destination = %destination_id, error = %e, "Failed to mark retry");
            }
        }
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    let _ = cancel.wait_for(|cancelled| *cancelled).await;
}

/// Applies the destination's anonymization setting.
fn outgoing_for(destination: &dyn MessageEventBusDestination, message: EventMessage) -> EventMessage {
    if destination.options().common().anonymize_audit_messages && message.is_audit() {
        message.anonymize()
    } else {
        message
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Bus
// ════════════════════════════════════════════════════════════════════════════

struct Registration {
    destination: Arc<dyn MessageEventBusDestination>,
    queue: mpsc::UnboundedSender<QueueItem>,
    cancel: watch::Sender<bool>,
}

struct Inner {
    courier: Arc<Courier>,
    repository: Arc<dyn DestinationRepository>,
    factory: DestinationFactory,
    destinations: RwLock<BTreeMap<DestinationId, Registration>>,
    send_order: Mutex<()>,
    accepting: AtomicBool,
    in_flight: Arc<InFlight>,
}

/// The event bus. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct MessageEventBus {
    inner: Arc<Inner>,
}

impl MessageEventBus {
    pub fn new(
        store: Arc<dyn EventStore>,
        repository: Arc<dyn DestinationRepository>,
        factory: DestinationFactory,
        settings: DeliverySettings,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                courier: Arc::new(Courier { store, settings }),
                repository,
                factory,
                destinations: RwLock::new(BTreeMap::new()),
                send_order: Mutex::new(()),
                accepting: AtomicBool::new(true),
                in_flight: Arc::new(InFlight::default()),
            }),
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.inner.courier.store
    }

    pub fn settings(&self) -> &DeliverySettings {
        &self.inner.courier.settings
    }

    /// Logs `message` and schedules delivery to every enabled destination
    /// subscribed to it. Returns once the message is durable.
    ///
    /// # Errors
    /// `StorageError` when the append fails; `ShuttingDown` after shutdown
    /// started. Delivery outcomes are never reported here.
    pub async fn send(&self, message: EventMessage) -> Result<StoreReceipt, EventBusError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(EventBusError::ShuttingDown);
        }

        // Append and enqueue under one lock: dispatch order is append order.
        let _order = self.inner.send_order.lock().await;
        let destinations = self.inner.destinations.read().await;
        let recipients: BTreeSet<DestinationId> = destinations
            .values()
            .filter(|r| r.destination.wants(&message))
            .map(|r| r.destination.id())
            .collect();

        let store = &self.inner.courier.store;
        let receipt = store.append(&message, &recipients).await?;
        if receipt.duplicate {
            debug!(message_id = %message.id(), sequence = receipt.sequence, "Message already logged");
            return Ok(receipt);
        }

        if recipients.is_empty() {
            store
                .mark_confirmed(message.id(), DestinationId::event_bus(), receipt.stored_at)
                .await?;
        }

        for id in &recipients {
            if let Some(registration) = destinations.get(id) {
                self.enqueue(registration, message.clone(), 0);
            }
        }

        debug!(
            message_id = %message.id(),
            event = %message.event_name(),
            sequence = receipt.sequence,
            recipients = recipients.len(),
            "Message logged"
        );
        Ok(receipt)
    }

    fn enqueue(&self, registration: &Registration, message: EventMessage, attempts: u32) {
        let item = QueueItem {
            message,
            attempts,
            guard: self.inner.in_flight.enter(),
        };
        if let Err(mpsc::error::SendError(item)) = registration.queue.send(item) {
            warn!(
                message_id = %item.message.id(),
                destination = %registration.destination.id(),
                "Dispatcher gone, message stays unsent"
            );
        }
    }

    /// Hands logged messages that are still pending or failed back to
    /// their registered destinations, in sequence order. Abandoned and
    /// delivered records are left alone. Returns the number of deliveries
    /// queued.
    ///
    /// Runs after destinations are (re)loaded, so a message whose delivery
    /// was interrupted by a crash or a restart is retried.
    pub async fn resume_unsent(&self) -> Result<usize, EventBusError> {
        let _order = self.inner.send_order.lock().await;
        let destinations = self.inner.destinations.read().await;
        let store = &self.inner.courier.store;
        let unsent = store
            .query(&EventQuery::with_status(StatusFilter::Unsent))
            .await?;

        let mut queued = 0;
        for event in unsent {
            for (id, record) in &event.deliveries {
                if record.state.is_terminal() {
                    continue;
                }
                let Some(registration) = destinations.get(id) else {
                    continue;
                };
                if record.state == DeliveryState::Failed {
                    store.mark_retrying(event.message.id(), *id).await?;
                }
                self.enqueue(registration, event.message.clone(), record.attempts);
                queued += 1;
            }
        }

        if queued > 0 {
            info!(queued, "Resumed unsent deliveries");
        }
        Ok(queued)
    }

    /// Records a delivery confirmation.
    pub async fn confirm_sent(&self, message: &EventMessage, destination: DestinationId) {
        self.inner.courier.confirm_sent(message, destination).await;
    }

    // ────────────────────────────────────────────────────────────────────────
    // Destinations
    // ────────────────────────────────────────────────────────────────────────

    /// Validates, persists and activates a destination config.
    ///
    /// A config carrying the id of an active destination replaces it.
    /// Returns the client-facing view of the stored config.
    pub async fn add_destination(&self, body: JsonValue) -> Result<DestinationOptions, EventBusError> {
        let options = DestinationOptions::from_json(body)?;
        let destination = self.inner.factory.build(options.clone())?;
        self.inner.repository.save(&options).await?;
        let view = destination.client_view();
        self.register(destination).await;
        Ok(view)
    }

    /// Activates an already constructed destination without persisting it.
    pub async fn register(&self, destination: Arc<dyn MessageEventBusDestination>) {
        let id = destination.id();
        let (queue, queue_rx) = mpsc::unbounded_channel();
        let (cancel, cancel_rx) = watch::channel(false);
        tokio::spawn(self.inner.courier.clone().dispatch_loop(
            destination.clone(),
            queue_rx,
            cancel_rx,
        ));

        let previous = self.inner.destinations.write().await.insert(
            id,
            Registration {
                destination: destination.clone(),
                queue,
                cancel,
            },
        );
        if let Some(previous) = previous {
            self.retire(previous).await;
        }
        info!(
            destination = %id,
            label = destination.options().label(),
            kind = %destination.options().destination_type(),
            "Destination registered"
        );
    }

    /// Deactivates a destination and deletes its config.
    ///
    /// Attempts already running finish on their own; nothing new is
    /// dispatched. The destination is dropped from every logged message's
    /// expected set so its backlog no longer counts as unsent.
    pub async fn remove_destination(&self, id: DestinationId) -> Result<DestinationOptions, EventBusError> {
        let mut destinations = self.inner.destinations.write().await;
        if !destinations.contains_key(&id) {
            return Err(EventBusError::DestinationNotFound(id));
        }
        // Config first: a failed delete leaves the destination active.
        self.inner.repository.delete(id).await?;
        let registration = destinations
            .remove(&id)
            .ok_or(EventBusError::DestinationNotFound(id))?;
        drop(destinations);

        let view = registration.destination.client_view();
        self.retire(registration).await;
        let forgotten = self.inner.courier.store.forget_destination(id).await?;
        info!(destination = %id, forgotten, "Destination removed");
        Ok(view)
    }

    /// Sends a probe through one destination. The probe is logged like any
    /// other message but is never retried.
    pub async fn test_destination(&self, id: DestinationId) -> Result<bool, EventBusError> {
        if !self.inner.accepting.load(Ordering::SeqCst) {
            return Err(EventBusError::ShuttingDown);
        }
        let destination = self.destination(id).await?;
        let probe = EventMessage::destination_test();
        let store = &self.inner.courier.store;
        store.append(&probe, &BTreeSet::from([id])).await?;

        let courier = self.inner.courier.as_ref();
        let delivered = tokio::time::timeout(
            courier.settings.attempt_timeout,
            destination.receive_from_event_bus(&probe, courier),
        )
        .await
        .unwrap_or(false);

        if !delivered {
            store
                .record_failure(probe.id(), id, Timestamp::now(), "test message not delivered", true)
                .await?;
        }
        info!(destination = %id, delivered, "Destination test finished");
        Ok(delivered)
    }

    /// Active destination by id.
    pub async fn destination(
        &self,
        id: DestinationId,
    ) -> Result<Arc<dyn MessageEventBusDestination>, EventBusError> {
        self.inner
            .destinations
            .read()
            .await
            .get(&id)
            .map(|r| r.destination.clone())
            .ok_or(EventBusError::DestinationNotFound(id))
    }

    /// Client-facing configs, ordered by label. An unknown id yields an
    /// empty list.
    pub async fn destinations(&self, id: Option<DestinationId>) -> Vec<DestinationOptions> {
        let registry = self.inner.destinations.read().await;
        let mut views: Vec<DestinationOptions> = registry
            .values()
            .filter(|r| id.map_or(true, |wanted| r.destination.id() == wanted))
            .map(|r| r.destination.client_view())
            .collect();
        views.sort_by(|a, b| a.label().cmp(b.label()).then(a.id().cmp(&b.id())));
        views
    }

    /// Loads persisted configs and activates them. Invalid configs are
    /// skipped with a warning. Returns how many were activated.
    pub async fn load_destinations(&self) -> Result<usize, EventBusError> {
        let configs = self.inner.repository.load_all().await?;
        let mut loaded = 0;
        for options in configs {
            let id = options.id();
            match self.inner.factory.build(options) {
                Ok(destination) => {
                    self.register(destination).await;
                    loaded += 1;
                }
                Err(e) => warn!(destination = %id, error = %e, "Skipping invalid destination config"),
            }
        }
        info!(count = loaded, "Destinations loaded");
        Ok(loaded)
    }

    /// Closes every active destination and loads the configs again.
    pub async fn restart(&self) -> Result<usize, EventBusError> {
        let registrations: Vec<Registration> =
            std::mem::take(&mut *self.inner.destinations.write().await)
                .into_values()
                .collect();
        for registration in registrations {
            self.retire(registration).await;
        }
        let loaded = self.load_destinations().await?;
        self.resume_unsent().await?;
        Ok(loaded)
    }

    async fn retire(&self, registration: Registration) {
        let id = registration.destination.id();
        let _ = registration.cancel.send(true);
        drop(registration.queue);
        let timeout = self.inner.courier.settings.shutdown_timeout;
        if tokio::time::timeout(timeout, registration.destination.close())
            .await
            .is_err()
        {
            warn!(destination = %id, "Destination close timed out");
        }
    }

    // ────────────────────────────────────────────────────────────────────────
    // Queries
    // ────────────────────────────────────────────────────────────────────────

    pub async fn get_events_all(&self, log_history: Option<usize>) -> Result<Vec<LoggedEvent>, EventBusError> {
        self.query(EventQuery::all().log_history(log_history)).await
    }

    /// Messages every expected destination has confirmed.
    pub async fn get_events_sent(&self, log_history: Option<usize>) -> Result<Vec<LoggedEvent>, EventBusError> {
        self.query(EventQuery::with_status(StatusFilter::Sent).log_history(log_history))
            .await
    }

    /// Messages at least one expected destination has not confirmed.
    pub async fn get_events_unsent(&self, log_history: Option<usize>) -> Result<Vec<LoggedEvent>, EventBusError> {
        self.query(EventQuery::with_status(StatusFilter::Unsent).log_history(log_history))
            .await
    }

    pub async fn get_events_by_execution_id(
        &self,
        execution_id: &ExecutionId,
        log_history: Option<usize>,
    ) -> Result<Vec<LoggedEvent>, EventBusError> {
        self.query(EventQuery::for_execution(execution_id.clone()).log_history(log_history))
            .await
    }

    /// Up to `limit` failure summaries, most recent first.
    pub async fn get_events_failed(&self, limit: usize) -> Result<Vec<FailedEventSummary>, EventBusError> {
        let failed = self
            .query(EventQuery::with_status(StatusFilter::Failed))
            .await?;
        Ok(summarize_failures(&failed, limit))
    }

    /// Log slices of executions that started and never finished.
    pub async fn get_unfinished_executions(
        &self,
    ) -> Result<BTreeMap<String, Vec<LoggedEvent>>, EventBusError> {
        let mut unfinished = BTreeMap::new();
        for execution_id in self.inner.courier.store.unfinished_executions().await? {
            let events = self.get_events_by_execution_id(&execution_id, None).await?;
            unfinished.insert(execution_id.to_string(), events);
        }
        Ok(unfinished)
    }

    async fn query(&self, query: EventQuery) -> Result<Vec<LoggedEvent>, EventBusError> {
        Ok(self.inner.courier.store.query(&query).await?)
    }

    // ────────────────────────────────────────────────────────────────────────
    // Lifecycle
    // ────────────────────────────────────────────────────────────────────────

    pub async fn status(&self) -> BusStatus {
        BusStatus {
            accepting: self.inner.accepting.load(Ordering::SeqCst),
            destinations: self.inner.destinations.read().await.len(),
            in_flight: self.inner.in_flight.count(),
        }
    }

    /// Stops accepting sends, drains deliveries within the shutdown
    /// timeout, closes every destination and then the store.
    pub async fn shutdown(&self) -> Result<(), EventBusError> {
        if !self.inner.accepting.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Event bus shutting down");

        let timeout = self.inner.courier.settings.shutdown_timeout;
        if tokio::time::timeout(timeout, self.inner.in_flight.wait_idle())
            .await
            .is_err()
        {
            warn!(
                remaining = self.inner.in_flight.count(),
                "Deliveries still in flight at shutdown"
            );
        }

        let registrations: Vec<Registration> =
            std::mem::take(&mut *self.inner.destinations.write().await)
                .into_values()
                .collect();
        for registration in registrations {
            self.retire(registration).await;
        }

        self.inner.courier.store.close().await?;
        info!("Event bus stopped");
        Ok(())
    }
}

#[async_trait]
impl ConfirmSent for MessageEventBus {
    async fn confirm_sent(&self, message: &EventMessage, destination: DestinationId) {
        MessageEventBus::confirm_sent(self, message, destination).await;
    }
}

#[async_trait]
impl EventSink for MessageEventBus {
    async fn emit(&self, message: EventMessage) -> Result<(), DomainError> {
        self.send(message).await.map(|_| ()).map_err(DomainError::from)
    }
}
