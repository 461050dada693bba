//! Ports - Interfaces for external dependencies.
//!
//! Following hexagonal architecture, ports define the contracts between
//! the bus and the outside world. Adapters implement these ports.
//!
//! ## Persistence Ports
//!
//! - `EventStore` - Append-only message log with delivery bookkeeping
//! - `DestinationRepository` - Persisted destination configurations
//! - `ExecutionRepository` - Execution records that recovery writes back to
//!
//! ## Delivery Ports
//!
//! - `MessageEventBusDestination` - A downstream sink
//! - `ConfirmSent` - Delivery acknowledgement callback
//! - `InstanceOwnerProvider` - Actor identity for monitoring sinks
//! - `EventSink` - Where producers hand messages to
//!
//! ## Relay Ports
//!
//! - `PubSubTransport` - Cross-process sessions
//! - `PubSubHandler` - Per-channel message handlers

mod destination;
mod destination_repository;
mod event_sink;
mod event_store;
mod execution_repository;
mod instance_owner;
mod pubsub;

pub use destination::{ConfirmSent, MessageEventBusDestination};
pub use destination_repository::DestinationRepository;
pub use event_sink::EventSink;
pub use event_store::{EventQuery, EventStore, StatusFilter, StorageError, StoreReceipt};
pub use execution_repository::ExecutionRepository;
pub use instance_owner::{InstanceOwner, InstanceOwnerProvider};
pub use pubsub::{
    InboundMessage, PubSubChannel, PubSubHandler, PubSubTransport, SessionPublisher,
    TransportError, TransportSession,
};

pub use crate::domain::logged::LoggedEvent;
