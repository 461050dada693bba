//! EventSink port - what producers hand messages to.
//!
//! In a main process the sink is the bus itself; in a worker process it is
//! a forwarder that relays messages to the main process over pub/sub.

use async_trait::async_trait;

use crate::domain::foundation::DomainError;
use crate::domain::message::EventMessage;

#[async_trait]
pub trait EventSink: Send + Sync {
    /// Accepts a message for logging and delivery.
    ///
    /// Returns once the message is durable (or handed to the relay).
    async fn emit(&self, message: EventMessage) -> Result<(), DomainError>;
}
