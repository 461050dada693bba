//! HTTP adapter for the `/eventbus` control surface.

mod dto;
mod handlers;
mod routes;

pub use dto::{EventEntryResponse, ErrorResponse, EventSelection, SendResponse};
pub use handlers::EventBusHandlers;
pub use routes::eventbus_routes;
