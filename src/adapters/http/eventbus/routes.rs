//! HTTP routes for the event bus endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    delete_destination, get_destinations, get_event_names, get_events, get_execution_events,
    get_failed, post_destination, post_event, recover_execution, send_test_message,
    EventBusHandlers,
};

/// Creates the event bus router. Mount it under `/eventbus`.
pub fn eventbus_routes(handlers: EventBusHandlers) -> Router {
    Router::new()
        .route("/event", get(get_events).post(post_event))
        .route("/failed", get(get_failed))
        .route("/execution/:id", get(get_execution_events))
        .route("/execution-recover/:id", get(recover_execution))
        .route(
            "/destination",
            get(get_destinations)
                .post(post_destination)
                .delete(delete_destination),
        )
        .route("/testmessage", get(send_test_message))
        .route("/eventnames", get(get_event_names))
        .with_state(handlers)
}
