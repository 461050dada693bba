//! Event messages: the records the bus logs and fans out.

mod event_message;
mod event_name;
pub mod names;

pub use event_message::{EventMessage, EventMessageOptions};
pub use event_name::EventName;
