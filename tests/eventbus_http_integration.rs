//! Integration tests for the `/eventbus` HTTP surface.
//!
//! These tests send requests through the full router (tracing and timeout
//! layers included) against a context backed by in-memory adapters.

use std::sync::Arc;
use std::time::Duration;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value as JsonValue};
use tower::ServiceExt;

use message_event_bus::adapters::destinations::{DeploymentInfo, DestinationFactory};
use message_event_bus::adapters::http::app_router;
use message_event_bus::adapters::identity::StaticInstanceOwner;
use message_event_bus::adapters::storage::{
    InMemoryDestinationRepository, InMemoryExecutionRepository,
};
use message_event_bus::adapters::store::InMemoryEventStore;
use message_event_bus::application::{ContextParts, DeliverySettings, EventBusContext};

// =============================================================================
// Test Infrastructure
// =============================================================================

async fn app() -> (Router, Arc<EventBusContext>) {
    let context = EventBusContext::initialize(ContextParts {
        store: Arc::new(InMemoryEventStore::new()),
        destinations: Arc::new(InMemoryDestinationRepository::new()),
        executions: Arc::new(InMemoryExecutionRepository::new()),
        factory: DestinationFactory::new(
            reqwest::Client::new(),
            DeploymentInfo::default(),
            Arc::new(StaticInstanceOwner::new("owner", None)),
        ),
        delivery: DeliverySettings::default().with_attempt_timeout(Duration::from_millis(500)),
        recover_on_start: false,
        relay: None,
    })
    .await
    .unwrap();
    let context = Arc::new(context);
    (app_router(context.clone(), Duration::from_secs(5)), context)
}

async fn call(app: &Router, method: Method, uri: &str, body: Option<JsonValue>) -> (StatusCode, JsonValue) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };
    let response = app
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        JsonValue::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

// =============================================================================
// Events
// =============================================================================

#[tokio::test]
async fn posted_event_is_listed_and_queryable_by_execution() {
    let (app, context) = app().await;

    let (status, receipt) = call(
        &app,
        Method::POST,
        "/eventbus/event",
        Some(json!({
            "eventName": "n8n.workflow.started",
            "payload": { "executionId": "77", "workflowId": "wf" },
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(receipt["duplicate"], false);

    let (status, all) = call(&app, Method::GET, "/eventbus/event?query=all", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().unwrap().len(), 1);
    assert_eq!(all[0]["id"], receipt["id"]);
    assert_eq!(all[0]["eventName"], "n8n.workflow.started");

    let (_, unfinished) = call(&app, Method::GET, "/eventbus/event?query=unfinished", None).await;
    assert!(unfinished.get("77").is_some());

    let (status, execution) = call(&app, Method::GET, "/eventbus/execution/77", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(execution.as_array().unwrap().len(), 1);

    let (status, recovered) =
        call(&app, Method::GET, "/eventbus/execution-recover/77?applyToDb=false", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(recovered["status"], "crashed");

    context.shutdown().await.unwrap();
}

#[tokio::test]
async fn malformed_event_is_rejected() {
    let (app, context) = app().await;

    let (status, error) = call(
        &app,
        Method::POST,
        "/eventbus/event",
        Some(json!({ "eventName": "not a valid name" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(error["code"], "BAD_REQUEST");
    context.shutdown().await.unwrap();
}

#[tokio::test]
async fn event_names_and_empty_failed_list() {
    let (app, context) = app().await;

    let (status, names) = call(&app, Method::GET, "/eventbus/eventnames", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(names
        .as_array()
        .unwrap()
        .iter()
        .any(|n| n == "n8n.workflow.crashed"));

    let (status, failed) = call(&app, Method::GET, "/eventbus/failed", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed, json!([]));
    context.shutdown().await.unwrap();
}

// =============================================================================
// Destinations
// =============================================================================

#[tokio::test]
async fn destination_lifecycle_hides_secrets() {
    let (app, context) = app().await;

    let (status, created) = call(
        &app,
        Method::POST,
        "/eventbus/destination",
        Some(json!({
            "__type": "webhook",
            "url": "https://example.test/hook",
            "signingSecret": "s3cret",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(created["__type"], "webhook");
    assert_ne!(created["signingSecret"], "s3cret");
    let id = created["id"].as_str().unwrap().to_string();

    let (_, listed) = call(&app, Method::GET, "/eventbus/destination", None).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);

    let (_, one) = call(&app, Method::GET, &format!("/eventbus/destination?id={}", id), None).await;
    assert_eq!(one[0]["id"], id.as_str());

    let (status, _) =
        call(&app, Method::DELETE, &format!("/eventbus/destination?id={}", id), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) =
        call(&app, Method::DELETE, &format!("/eventbus/destination?id={}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (_, listed) = call(&app, Method::GET, "/eventbus/destination", None).await;
    assert_eq!(listed, json!([]));
    context.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_destination_type_is_rejected() {
    let (app, context) = app().await;

    let (status, _) = call(
        &app,
        Method::POST,
        "/eventbus/destination",
        Some(json!({ "__type": "carrier-pigeon" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    context.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_message_requires_a_known_destination() {
    let (app, context) = app().await;

    let (status, _) = call(&app, Method::GET, "/eventbus/testmessage", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = call(
        &app,
        Method::GET,
        "/eventbus/testmessage?id=5b7c4a36-6a0e-4d7a-9a51-2f0a3a6c1e11",
        None,
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Nothing listens on the discard port, so the probe is reported undelivered.
    let (_, created) = call(
        &app,
        Method::POST,
        "/eventbus/destination",
        Some(json!({ "__type": "webhook", "url": "http://127.0.0.1:9/hook" })),
    )
    .await;
    let id = created["id"].as_str().unwrap();
    let (status, delivered) =
        call(&app, Method::GET, &format!("/eventbus/testmessage?id={}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(delivered, json!(false));
    context.shutdown().await.unwrap();
}

#[tokio::test]
async fn requests_after_shutdown_are_unavailable() {
    let (app, context) = app().await;
    context.shutdown().await.unwrap();

    let (status, error) = call(
        &app,
        Method::POST,
        "/eventbus/event",
        Some(json!({ "eventName": "n8n.workflow.started" })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error["code"], "SERVICE_UNAVAILABLE");
}
