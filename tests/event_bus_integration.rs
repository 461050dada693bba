//! Integration tests for the event bus delivery path.
//!
//! These tests drive the bus end to end:
//! 1. Real webhook destinations against a local HTTP endpoint
//! 2. Retry exhaustion and the failed-events summary
//! 3. The file-backed log across a restart
//! 4. Crash recovery on startup

use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use serde_json::{json, Value as JsonValue};
use tokio::net::TcpListener;
use tokio::sync::Mutex;

use message_event_bus::adapters::destinations::{
    sign, DeploymentInfo, DestinationFactory, SIGNATURE_HEADER,
};
use message_event_bus::adapters::identity::StaticInstanceOwner;
use message_event_bus::adapters::storage::{
    InMemoryDestinationRepository, InMemoryExecutionRepository,
};
use message_event_bus::adapters::store::{FileEventStore, FileEventStoreConfig, InMemoryEventStore};
use message_event_bus::application::{
    ContextParts, DeliverySettings, EventBusContext, MessageEventBus,
};
use message_event_bus::domain::destination::{DestinationOptions, WebhookOptions};
use message_event_bus::domain::foundation::{Backoff, ExecutionId};
use message_event_bus::domain::message::EventMessage;
use message_event_bus::domain::recovery::RunStatus;
use message_event_bus::ports::{DestinationRepository, EventStore};

// =============================================================================
// Test Infrastructure
// =============================================================================

/// Local webhook endpoint answering every request with a fixed status.
#[derive(Clone)]
struct Endpoint {
    status: StatusCode,
    requests: Arc<Mutex<Vec<(Option<String>, Bytes)>>>,
}

impl Endpoint {
    async fn requests(&self) -> Vec<(Option<String>, Bytes)> {
        self.requests.lock().await.clone()
    }
}

async fn hook(State(endpoint): State<Endpoint>, headers: HeaderMap, body: Bytes) -> StatusCode {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    endpoint.requests.lock().await.push((signature, body));
    endpoint.status
}

async fn spawn_endpoint(status: StatusCode) -> (String, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let endpoint = Endpoint {
        status,
        requests: Arc::new(Mutex::new(Vec::new())),
    };
    let app = Router::new()
        .route("/hook", post(hook))
        .with_state(endpoint.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}/hook", addr), endpoint)
}

fn factory() -> DestinationFactory {
    DestinationFactory::new(
        reqwest::Client::new(),
        DeploymentInfo::default(),
        Arc::new(StaticInstanceOwner::new("owner", None)),
    )
}

fn fast_settings() -> DeliverySettings {
    DeliverySettings::default()
        .with_max_attempts(2)
        .with_backoff(Backoff::new(
            Duration::from_millis(1),
            Duration::from_millis(5),
            0.0,
        ))
        .with_attempt_timeout(Duration::from_secs(2))
        .with_shutdown_timeout(Duration::from_secs(1))
}

fn bus_over(store: Arc<dyn EventStore>) -> MessageEventBus {
    MessageEventBus::new(
        store,
        Arc::new(InMemoryDestinationRepository::new()),
        factory(),
        fast_settings(),
    )
}

fn message(name: &str, execution: &str) -> EventMessage {
    EventMessage::named(name)
        .unwrap()
        .with_payload(json!({ "executionId": execution, "workflowId": "wf-1" }))
}

async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..500 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {}", what);
}

async fn open_file_store(dir: &std::path::Path) -> Arc<FileEventStore> {
    Arc::new(
        FileEventStore::open(dir, "n8nEventLog.jsonl", FileEventStoreConfig::default())
            .await
            .unwrap(),
    )
}

// =============================================================================
// Webhook delivery
// =============================================================================

#[tokio::test]
async fn webhook_receives_signed_messages_it_subscribed_to() {
    let (url, endpoint) = spawn_endpoint(StatusCode::OK).await;
    let bus = bus_over(Arc::new(InMemoryEventStore::new()));
    let options = bus
        .add_destination(json!({
            "__type": "webhook",
            "url": url,
            "signingSecret": "topsecret",
            "subscribedEvents": ["n8n.workflow"],
        }))
        .await
        .unwrap();

    let delivered = message("n8n.workflow.success", "e1");
    bus.send(delivered.clone()).await.unwrap();
    bus.send(message("n8n.node.started", "e1")).await.unwrap();

    eventually("both messages sent", || async {
        bus.get_events_sent(None).await.unwrap().len() == 2
    })
    .await;

    let requests = endpoint.requests().await;
    assert_eq!(requests.len(), 1);
    let (signature, body) = &requests[0];
    assert_eq!(signature.as_deref(), Some(sign("topsecret", body).as_str()));
    let received: JsonValue = serde_json::from_slice(body).unwrap();
    assert_eq!(received["eventName"], "n8n.workflow.success");
    assert_eq!(received["id"], delivered.id().to_string());

    let entry = bus.store().get(delivered.id()).await.unwrap().unwrap();
    assert!(entry.confirmed_by().contains_key(&options.id()));
    bus.shutdown().await.unwrap();
}

#[tokio::test]
async fn failed_query_reports_most_recent_executions_first() {
    let (url, endpoint) = spawn_endpoint(StatusCode::INTERNAL_SERVER_ERROR).await;
    let bus = bus_over(Arc::new(InMemoryEventStore::new()));
    bus.add_destination(json!({ "__type": "webhook", "url": url }))
        .await
        .unwrap();

    for n in 0..7 {
        bus.send(message("n8n.workflow.failed", &format!("e{}", n)))
            .await
            .unwrap();
    }

    eventually("every delivery abandoned", || async {
        let failed = bus.get_events_failed(100).await.unwrap();
        failed.len() == 7 && failed.iter().all(|summary| summary.abandoned)
    })
    .await;

    let failed = bus.get_events_failed(5).await.unwrap();
    assert_eq!(failed.len(), 5);
    let executions: Vec<String> = failed
        .iter()
        .map(|s| s.execution_id.as_ref().unwrap().to_string())
        .collect();
    assert_eq!(executions, vec!["e6", "e5", "e4", "e3", "e2"]);
    assert_eq!(
        failed[0].last_error.as_deref(),
        Some("destination reported failure")
    );

    // Two attempts per message, none retried after abandonment.
    assert_eq!(endpoint.requests().await.len(), 14);
    assert_eq!(bus.get_events_unsent(None).await.unwrap().len(), 7);
    bus.shutdown().await.unwrap();
}

#[tokio::test]
async fn unreachable_webhook_does_not_delay_a_healthy_one() {
    let (good_url, good) = spawn_endpoint(StatusCode::OK).await;
    let bus = bus_over(Arc::new(InMemoryEventStore::new()));
    bus.add_destination(json!({ "__type": "webhook", "url": good_url }))
        .await
        .unwrap();
    // Nothing listens on the discard port.
    bus.add_destination(json!({ "__type": "webhook", "url": "http://127.0.0.1:9/hook" }))
        .await
        .unwrap();

    for n in 0..5 {
        bus.send(message("n8n.node.finished", &format!("e{}", n)))
            .await
            .unwrap();
    }

    eventually("healthy endpoint saw every message", || async {
        good.requests().await.len() == 5
    })
    .await;
    assert_eq!(bus.destinations(None).await.len(), 2);
    bus.shutdown().await.unwrap();
}

// =============================================================================
// Durability
// =============================================================================

#[tokio::test]
async fn file_log_survives_restart_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let first = message("n8n.workflow.started", "e1");

    {
        let bus = bus_over(open_file_store(dir.path()).await);
        bus.send(first.clone()).await.unwrap();
        bus.send(message("n8n.node.started", "e1")).await.unwrap();
        bus.send(message("n8n.node.finished", "e1")).await.unwrap();
        bus.shutdown().await.unwrap();
    }

    let bus = bus_over(open_file_store(dir.path()).await);
    let names: Vec<String> = bus
        .get_events_all(None)
        .await
        .unwrap()
        .iter()
        .map(|e| e.message.event_name().as_str().to_string())
        .collect();
    assert_eq!(
        names,
        vec!["n8n.workflow.started", "n8n.node.started", "n8n.node.finished"]
    );

    let receipt = bus.send(first).await.unwrap();
    assert!(receipt.duplicate);
    assert_eq!(bus.get_events_all(None).await.unwrap().len(), 3);
    bus.shutdown().await.unwrap();
}

#[tokio::test]
async fn pending_delivery_is_retried_after_restart() {
    let (url, endpoint) = spawn_endpoint(StatusCode::OK).await;
    let options = DestinationOptions::Webhook(WebhookOptions::new(url));
    let destinations: Arc<dyn DestinationRepository> =
        Arc::new(InMemoryDestinationRepository::new());
    destinations.save(&options).await.unwrap();

    // Logged before the crash, never confirmed.
    let store = Arc::new(InMemoryEventStore::new());
    let pending = message("n8n.workflow.started", "e9");
    store
        .append(&pending, &BTreeSet::from([options.id()]))
        .await
        .unwrap();

    let context = EventBusContext::initialize(ContextParts {
        store: store.clone(),
        destinations,
        executions: Arc::new(InMemoryExecutionRepository::new()),
        factory: factory(),
        delivery: fast_settings(),
        recover_on_start: false,
        relay: None,
    })
    .await
    .unwrap();

    eventually("redelivery to the webhook", || async {
        endpoint.requests().await.len() == 1
    })
    .await;
    eventually("confirmation", || async {
        context.bus().get_events_unsent(None).await.unwrap().is_empty()
    })
    .await;

    let requests = endpoint.requests().await;
    let delivered: JsonValue = serde_json::from_slice(&requests[0].1).unwrap();
    assert_eq!(delivered["id"], pending.id().to_string());
    context.shutdown().await.unwrap();
}

#[tokio::test]
async fn restart_recovers_crashed_execution_from_file_log() {
    let dir = tempfile::tempdir().unwrap();
    let execution = ExecutionId::new("e42").unwrap();

    {
        let bus = bus_over(open_file_store(dir.path()).await);
        bus.send(message("n8n.workflow.started", "e42")).await.unwrap();
        bus.send(
            message("n8n.node.started", "e42").with_payload(json!({
                "executionId": "e42",
                "nodeName": "HTTP Request",
            })),
        )
        .await
        .unwrap();
        // Process dies without a terminal event.
        bus.store().close().await.unwrap();
    }

    let executions = Arc::new(InMemoryExecutionRepository::new());
    let destinations: Arc<dyn DestinationRepository> =
        Arc::new(InMemoryDestinationRepository::new());
    let context = EventBusContext::initialize(ContextParts {
        store: open_file_store(dir.path()).await,
        destinations,
        executions: executions.clone(),
        factory: factory(),
        delivery: fast_settings(),
        recover_on_start: true,
        relay: None,
    })
    .await
    .unwrap();

    let log = context
        .bus()
        .get_events_by_execution_id(&execution, None)
        .await
        .unwrap();
    let last = log.last().unwrap();
    assert_eq!(last.message.event_name().as_str(), "n8n.workflow.crashed");
    assert_eq!(last.message.payload().unwrap()["recovered"], true);
    assert_eq!(executions.count().await, 1);

    let result = context
        .recovery()
        .recover(&execution, None, false)
        .await
        .unwrap();
    assert_eq!(result.status, RunStatus::Crashed);
    assert_eq!(result.interrupted_nodes, vec!["HTTP Request".to_string()]);

    // Recovered executions are terminal now.
    assert!(context
        .bus()
        .get_unfinished_executions()
        .await
        .unwrap()
        .is_empty());
    context.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_refuses_new_messages() {
    let bus = bus_over(Arc::new(InMemoryEventStore::new()));
    bus.shutdown().await.unwrap();

    let err = bus
        .send(message("n8n.workflow.started", "e1"))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("shutting down"));
    assert!(!bus.status().await.accepting);
}
