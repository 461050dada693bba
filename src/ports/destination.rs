//! Destination port - a downstream sink that receives bus messages.
//!
//! Destinations never fail loudly: every delivery problem is reported as
//! `false` so the bus can apply its retry policy. A successful delivery
//! calls [`ConfirmSent::confirm_sent`] exactly once before returning `true`.

use async_trait::async_trait;

use crate::domain::destination::DestinationOptions;
use crate::domain::foundation::DestinationId;
use crate::domain::message::EventMessage;

/// Callback through which a destination acknowledges delivery.
#[async_trait]
pub trait ConfirmSent: Send + Sync {
    async fn confirm_sent(&self, message: &EventMessage, destination: DestinationId);
}

/// A configured delivery sink.
///
/// # Example
///
/// ```ignore
/// let delivered = destination.receive_from_event_bus(&message, &confirm).await;
/// if !delivered {
///     // bus schedules a retry
/// }
/// ```
#[async_trait]
pub trait MessageEventBusDestination: Send + Sync {
    /// Configuration this destination was built from.
    fn options(&self) -> &DestinationOptions;

    fn id(&self) -> DestinationId {
        self.options().id()
    }

    /// Enabled and subscribed to the message's event name.
    fn wants(&self, message: &EventMessage) -> bool {
        let common = self.options().common();
        common.enabled && common.is_subscribed(message)
    }

    /// Attempts delivery. Never errors; `false` means retry later.
    async fn receive_from_event_bus(&self, message: &EventMessage, confirm: &dyn ConfirmSent)
        -> bool;

    /// Persistable representation, secrets included.
    fn serialize(&self) -> DestinationOptions {
        self.options().clone()
    }

    /// Representation safe to return to API clients.
    fn client_view(&self) -> DestinationOptions {
        self.options().redacted()
    }

    /// Releases held connections. Safe to call when nothing was opened
    /// and safe to call twice.
    async fn close(&self);
}
