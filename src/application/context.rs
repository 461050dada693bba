//! EventBusContext - explicit owner of the bus and its collaborators.
//!
//! ## Lifecycle
//!
//! ```text
//! initialize: load destinations -> resume unsent deliveries
//!             -> recover unfinished executions (main)
//!             -> start pub/sub relay -> ready
//! shutdown:   stop accepting sends -> drain deliveries (bounded)
//!             -> close destinations -> close store -> stop relay
//! ```
//!
//! Producers receive an [`EventSink`]: the bus itself on the main
//! instance, a pub/sub forwarder on workers.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::relay::{CommandHandler, EventLogRelayHandler, PubSubEventForwarder, WorkerResponseRegistry};
use super::{DeliverySettings, EventBusError, MessageEventBus, RecoveryService};
use crate::adapters::destinations::DestinationFactory;
use crate::adapters::pubsub::{PubSubBridge, PubSubBridgeConfig};
use crate::ports::{
    DestinationRepository, EventSink, EventStore, ExecutionRepository, PubSubChannel,
    PubSubTransport,
};

/// Role of this process in a multi-process deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstanceMode {
    #[default]
    Main,
    Worker,
}

/// Cross-process relay wiring.
pub struct RelaySetup {
    pub transport: Arc<dyn PubSubTransport>,
    pub bridge: PubSubBridgeConfig,
    pub mode: InstanceMode,
    pub instance_id: String,
}

/// Everything the context is built from.
pub struct ContextParts {
    pub store: Arc<dyn EventStore>,
    pub destinations: Arc<dyn DestinationRepository>,
    pub executions: Arc<dyn ExecutionRepository>,
    pub factory: DestinationFactory,
    pub delivery: DeliverySettings,
    pub recover_on_start: bool,
    pub relay: Option<RelaySetup>,
}

struct RelayRuntime {
    bridge: Arc<PubSubBridge>,
    workers: Option<Arc<WorkerResponseRegistry>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

pub struct EventBusContext {
    bus: MessageEventBus,
    recovery: Arc<RecoveryService>,
    sink: Arc<dyn EventSink>,
    mode: InstanceMode,
    relay: Option<RelayRuntime>,
}

impl EventBusContext {
    /// Brings the bus up. Fails only when the store or destination
    /// repository cannot be read.
    pub async fn initialize(parts: ContextParts) -> Result<Self, EventBusError> {
        let bus = MessageEventBus::new(
            parts.store.clone(),
            parts.destinations,
            parts.factory,
            parts.delivery,
        );
        let recovery = Arc::new(RecoveryService::new(parts.store, parts.executions));
        let mode = parts.relay.as_ref().map(|r| r.mode).unwrap_or_default();

        // 1. Destinations, then whatever they had not confirmed
        bus.load_destinations().await?;
        bus.resume_unsent().await?;

        // 2. Crash recovery
        if parts.recover_on_start && mode == InstanceMode::Main {
            let recovered = recovery.recover_unfinished(&bus).await?;
            if !recovered.is_empty() {
                info!(count = recovered.len(), "Recovered unfinished executions");
            }
        }

        // 3. Relay
        let relay = match parts.relay {
            Some(setup) => Some(Self::start_relay(&bus, setup).await),
            None => None,
        };

        let sink: Arc<dyn EventSink> = match (&relay, mode) {
            (Some(runtime), InstanceMode::Worker) => {
                Arc::new(PubSubEventForwarder::new(runtime.bridge.clone()))
            }
            _ => Arc::new(bus.clone()),
        };

        info!(mode = ?mode, relay = relay.is_some(), "Event bus ready");
        Ok(Self {
            bus,
            recovery,
            sink,
            mode,
            relay,
        })
    }

    async fn start_relay(bus: &MessageEventBus, setup: RelaySetup) -> RelayRuntime {
        let bridge = Arc::new(PubSubBridge::new(setup.transport, setup.bridge));

        bridge
            .subscribe(
                PubSubChannel::Command,
                Arc::new(CommandHandler::new(bus.clone(), bridge.clone(), setup.instance_id)),
            )
            .await;

        let workers = if setup.mode == InstanceMode::Main {
            let registry = Arc::new(WorkerResponseRegistry::new());
            bridge
                .subscribe(
                    PubSubChannel::EventLog,
                    Arc::new(EventLogRelayHandler::new(bus.clone())),
                )
                .await;
            bridge
                .subscribe(PubSubChannel::WorkerResponse, registry.clone())
                .await;
            Some(registry)
        } else {
            None
        };

        let (shutdown, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn({
            let bridge = bridge.clone();
            async move { bridge.run(shutdown_rx).await }
        });

        RelayRuntime {
            bridge,
            workers,
            shutdown,
            task: Mutex::new(Some(task)),
        }
    }

    pub fn bus(&self) -> &MessageEventBus {
        &self.bus
    }

    pub fn recovery(&self) -> &RecoveryService {
        &self.recovery
    }

    /// Where producers should send messages.
    pub fn sink(&self) -> Arc<dyn EventSink> {
        self.sink.clone()
    }

    pub fn mode(&self) -> InstanceMode {
        self.mode
    }

    pub fn bridge(&self) -> Option<&Arc<PubSubBridge>> {
        self.relay.as_ref().map(|r| &r.bridge)
    }

    /// Latest worker responses; only tracked on the main instance.
    pub fn worker_responses(&self) -> Option<&Arc<WorkerResponseRegistry>> {
        self.relay.as_ref().and_then(|r| r.workers.as_ref())
    }

    pub async fn shutdown(&self) -> Result<(), EventBusError> {
        let result = self.bus.shutdown().await;

        if let Some(relay) = &self.relay {
            let _ = relay.shutdown.send(true);
            if let Some(task) = relay.task.lock().await.take() {
                let timeout = self.bus.settings().shutdown_timeout;
                if tokio::time::timeout(timeout, task).await.is_err() {
                    warn!("Pub/sub bridge did not stop in time");
                }
            }
            let pending = relay.bridge.buffered().await;
            if pending > 0 {
                warn!(count = pending, "Discarding unpublished pub/sub messages");
            }
        }

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::destinations::DeploymentInfo;
    use crate::adapters::identity::StaticInstanceOwner;
    use crate::adapters::pubsub::{ConnectionState, InMemoryBroker};
    use crate::adapters::storage::{InMemoryDestinationRepository, InMemoryExecutionRepository};
    use crate::adapters::store::InMemoryEventStore;
    use crate::domain::foundation::ExecutionId;
    use crate::domain::message::EventMessage;
    use serde_json::json;
    use std::collections::BTreeSet;
    use std::time::Duration;

    // === Test Helpers ===

    fn parts(store: Arc<InMemoryEventStore>, relay: Option<RelaySetup>) -> ContextParts {
        ContextParts {
            store,
            destinations: Arc::new(InMemoryDestinationRepository::new()),
            executions: Arc::new(InMemoryExecutionRepository::new()),
            factory: DestinationFactory::new(
                reqwest::Client::new(),
                DeploymentInfo::default(),
                Arc::new(StaticInstanceOwner::new("owner", None)),
            ),
            delivery: DeliverySettings::default(),
            recover_on_start: true,
            relay,
        }
    }

    fn relay(broker: &InMemoryBroker, mode: InstanceMode, id: &str) -> RelaySetup {
        RelaySetup {
            transport: Arc::new(broker.transport()),
            bridge: PubSubBridgeConfig::default(),
            mode,
            instance_id: id.to_string(),
        }
    }

    async fn connected(context: &EventBusContext) {
        let mut state = context.bridge().unwrap().watch_state();
        tokio::time::timeout(
            Duration::from_secs(2),
            state.wait_for(|s| *s == ConnectionState::Connected),
        )
        .await
        .unwrap()
        .unwrap();
    }

    // === Tests ===

    #[tokio::test]
    async fn initialize_recovers_unfinished_executions() {
        let store = Arc::new(InMemoryEventStore::new());
        let started = EventMessage::named("n8n.workflow.started")
            .unwrap()
            .with_payload(json!({ "executionId": "e1" }));
        store.append(&started, &BTreeSet::new()).await.unwrap();

        let context = EventBusContext::initialize(parts(store.clone(), None)).await.unwrap();

        let log = context
            .bus()
            .get_events_by_execution_id(&ExecutionId::new("e1").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[1].message.event_name().as_str(), "n8n.workflow.crashed");
        context.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn worker_messages_reach_the_main_log() {
        let broker = InMemoryBroker::new();
        let main = EventBusContext::initialize(parts(
            Arc::new(InMemoryEventStore::new()),
            Some(relay(&broker, InstanceMode::Main, "main")),
        ))
        .await
        .unwrap();
        let worker = EventBusContext::initialize(parts(
            Arc::new(InMemoryEventStore::new()),
            Some(relay(&broker, InstanceMode::Worker, "worker-1")),
        ))
        .await
        .unwrap();
        connected(&main).await;
        connected(&worker).await;

        worker
            .sink()
            .emit(EventMessage::named("n8n.node.started").unwrap())
            .await
            .unwrap();

        let mut relayed = 0;
        for _ in 0..200 {
            relayed = main.bus().get_events_all(None).await.unwrap().len();
            if relayed == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(relayed, 1);
        assert!(worker.bus().get_events_all(None).await.unwrap().is_empty());

        worker.shutdown().await.unwrap();
        main.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn main_collects_worker_status_replies() {
        let broker = InMemoryBroker::new();
        let main = EventBusContext::initialize(parts(
            Arc::new(InMemoryEventStore::new()),
            Some(relay(&broker, InstanceMode::Main, "main")),
        ))
        .await
        .unwrap();
        let worker = EventBusContext::initialize(parts(
            Arc::new(InMemoryEventStore::new()),
            Some(relay(&broker, InstanceMode::Worker, "worker-1")),
        ))
        .await
        .unwrap();
        connected(&main).await;
        connected(&worker).await;

        main.bridge()
            .unwrap()
            .publish(PubSubChannel::Command, &json!({ "command": "getStatus" }))
            .await
            .unwrap();

        let registry = main.worker_responses().unwrap();
        let mut reply = None;
        for _ in 0..200 {
            reply = registry.response_of("worker-1").await;
            if reply.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let reply = reply.expect("worker did not reply");
        assert_eq!(reply.payload["accepting"], true);
        assert!(worker.worker_responses().is_none());

        worker.shutdown().await.unwrap();
        main.shutdown().await.unwrap();
    }
}
