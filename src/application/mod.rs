//! Application layer - the bus and the services around it.
//!
//! - `MessageEventBus` - logging, fan-out, retries and queries
//! - `RecoveryService` - execution reconstruction and startup recovery
//! - `relay` - pub/sub handlers for multi-process deployments
//! - `EventBusContext` - construction and teardown of the whole set

mod context;
mod errors;
mod event_bus;
mod recovery;
pub mod relay;

pub use context::{ContextParts, EventBusContext, InstanceMode, RelaySetup};
pub use errors::EventBusError;
pub use event_bus::{BusStatus, DeliverySettings, MessageEventBus};
pub use recovery::RecoveryService;
