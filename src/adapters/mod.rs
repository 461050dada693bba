//! Adapters - Implementations of port interfaces.
//!
//! Adapters connect the bus to external systems:
//! - `store` - Event log (in-memory, JSON-lines file)
//! - `destinations` - Webhook, syslog and Sentry delivery
//! - `pubsub` - Cross-process relay (in-memory, Redis)
//! - `storage` - Destination configs and execution records
//! - `identity` - Instance owner lookup
//! - `http` - `/eventbus` REST surface

pub mod destinations;
pub mod http;
pub mod identity;
pub mod pubsub;
pub mod storage;
pub mod store;
