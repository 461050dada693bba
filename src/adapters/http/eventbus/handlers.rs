//! HTTP handlers for the event bus control surface.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value as JsonValue;
use tracing::error;

use crate::application::{EventBusContext, EventBusError};
use crate::domain::foundation::{DestinationId, ExecutionId};
use crate::domain::message::names::event_names_all;
use crate::domain::message::EventMessage;

use super::dto::{
    entries, DestinationQuery, ErrorResponse, EventSelection, EventsQuery, ExecutionQuery,
    FailedQuery, RecoverQuery, SendResponse,
};

// ════════════════════════════════════════════════════════════════════════════
// Handler state
// ════════════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct EventBusHandlers {
    context: Arc<EventBusContext>,
}

impl EventBusHandlers {
    pub fn new(context: Arc<EventBusContext>) -> Self {
        Self { context }
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Events
// ════════════════════════════════════════════════════════════════════════════

/// GET /eventbus/event?query=all|sent|unsent|unfinished
pub async fn get_events(
    State(handlers): State<EventBusHandlers>,
    Query(params): Query<EventsQuery>,
) -> Response {
    let bus = handlers.context.bus();
    let result = match params.query {
        EventSelection::All => bus.get_events_all(params.log_history).await,
        EventSelection::Sent => bus.get_events_sent(params.log_history).await,
        EventSelection::Unsent => bus.get_events_unsent(params.log_history).await,
        EventSelection::Unfinished => {
            return match bus.get_unfinished_executions().await {
                Ok(unfinished) => {
                    let body: std::collections::BTreeMap<_, _> = unfinished
                        .into_iter()
                        .map(|(id, events)| (id, entries(events)))
                        .collect();
                    (StatusCode::OK, Json(body)).into_response()
                }
                Err(e) => handle_bus_error(e),
            };
        }
    };

    match result {
        Ok(events) => (StatusCode::OK, Json(entries(events))).into_response(),
        Err(e) => handle_bus_error(e),
    }
}

/// POST /eventbus/event - Log and dispatch a message
pub async fn post_event(
    State(handlers): State<EventBusHandlers>,
    Json(body): Json<JsonValue>,
) -> Response {
    let message: EventMessage = match serde_json::from_value(body) {
        Ok(message) => message,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse::bad_request(format!("Invalid event message: {}", e))),
            )
                .into_response()
        }
    };

    match handlers.context.bus().send(message).await {
        Ok(receipt) => (StatusCode::OK, Json(SendResponse::from(receipt))).into_response(),
        Err(e) => handle_bus_error(e),
    }
}

/// GET /eventbus/failed?amount=N
pub async fn get_failed(
    State(handlers): State<EventBusHandlers>,
    Query(params): Query<FailedQuery>,
) -> Response {
    match handlers.context.bus().get_events_failed(params.amount).await {
        Ok(failed) => (StatusCode::OK, Json(failed)).into_response(),
        Err(e) => handle_bus_error(e),
    }
}

/// GET /eventbus/execution/:id?logHistory=N
pub async fn get_execution_events(
    State(handlers): State<EventBusHandlers>,
    Path(id): Path<String>,
    Query(params): Query<ExecutionQuery>,
) -> Response {
    let execution_id = match ExecutionId::new(id) {
        Ok(id) => id,
        Err(e) => return handle_bus_error(e.into()),
    };

    match handlers
        .context
        .bus()
        .get_events_by_execution_id(&execution_id, params.log_history)
        .await
    {
        Ok(events) => (StatusCode::OK, Json(entries(events))).into_response(),
        Err(e) => handle_bus_error(e),
    }
}

/// GET /eventbus/execution-recover/:id?logHistory=N&applyToDb=bool
pub async fn recover_execution(
    State(handlers): State<EventBusHandlers>,
    Path(id): Path<String>,
    Query(params): Query<RecoverQuery>,
) -> Response {
    let execution_id = match ExecutionId::new(id) {
        Ok(id) => id,
        Err(e) => return handle_bus_error(e.into()),
    };

    match handlers
        .context
        .recovery()
        .recover(&execution_id, params.log_history, params.apply_to_db)
        .await
    {
        Ok(result) => (StatusCode::OK, Json(result)).into_response(),
        Err(e) => handle_bus_error(e),
    }
}

/// GET /eventbus/eventnames
pub async fn get_event_names() -> Response {
    (StatusCode::OK, Json(event_names_all())).into_response()
}

// ════════════════════════════════════════════════════════════════════════════
// Destinations
// ════════════════════════════════════════════════════════════════════════════

/// GET /eventbus/destination[?id=]
pub async fn get_destinations(
    State(handlers): State<EventBusHandlers>,
    Query(params): Query<DestinationQuery>,
) -> Response {
    let id = match params.id.as_deref().map(parse_destination_id).transpose() {
        Ok(id) => id,
        Err(response) => return response,
    };
    let views = handlers.context.bus().destinations(id).await;
    (StatusCode::OK, Json(views)).into_response()
}

/// POST /eventbus/destination - Create or replace a destination
pub async fn post_destination(
    State(handlers): State<EventBusHandlers>,
    Json(body): Json<JsonValue>,
) -> Response {
    match handlers.context.bus().add_destination(body).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => handle_bus_error(e),
    }
}

/// DELETE /eventbus/destination?id=
pub async fn delete_destination(
    State(handlers): State<EventBusHandlers>,
    Query(params): Query<DestinationQuery>,
) -> Response {
    let id = match required_destination_id(&params) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match handlers.context.bus().remove_destination(id).await {
        Ok(view) => (StatusCode::OK, Json(view)).into_response(),
        Err(e) => handle_bus_error(e),
    }
}

/// GET /eventbus/testmessage?id=
pub async fn send_test_message(
    State(handlers): State<EventBusHandlers>,
    Query(params): Query<DestinationQuery>,
) -> Response {
    let id = match required_destination_id(&params) {
        Ok(id) => id,
        Err(response) => return response,
    };
    match handlers.context.bus().test_destination(id).await {
        Ok(delivered) => (StatusCode::OK, Json(delivered)).into_response(),
        Err(e) => handle_bus_error(e),
    }
}

// ════════════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════════════

fn parse_destination_id(raw: &str) -> Result<DestinationId, Response> {
    raw.parse::<DestinationId>().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request("Invalid destination ID")),
        )
            .into_response()
    })
}

fn required_destination_id(params: &DestinationQuery) -> Result<DestinationId, Response> {
    match params.id.as_deref() {
        Some(raw) => parse_destination_id(raw),
        None => Err((
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request("Query parameter 'id' is required")),
        )
            .into_response()),
    }
}

fn handle_bus_error(error: EventBusError) -> Response {
    match error {
        EventBusError::Validation(e) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse::bad_request(e.to_string())),
        )
            .into_response(),
        EventBusError::DestinationNotFound(id) => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse::not_found("Destination", &id.to_string())),
        )
            .into_response(),
        EventBusError::ShuttingDown => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::unavailable("Event bus is shutting down")),
        )
            .into_response(),
        e @ (EventBusError::Storage(_) | EventBusError::Recovery(_)) => {
            error!(error = %e, "Event bus request failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::internal(e.to_string())),
            )
                .into_response()
        }
    }
}
