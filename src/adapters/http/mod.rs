//! HTTP adapters - REST API implementations.

pub mod eventbus;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::application::EventBusContext;

pub use eventbus::{eventbus_routes, EventBusHandlers};

/// Full HTTP application: `/eventbus` routes with request tracing and a
/// per-request timeout.
pub fn app_router(context: Arc<EventBusContext>, request_timeout: Duration) -> Router {
    Router::new()
        .nest("/eventbus", eventbus_routes(EventBusHandlers::new(context)))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(request_timeout))
}
