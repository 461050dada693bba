//! Pub/sub adapters: transports and the reconnecting bridge.

mod bridge;
mod in_memory;
mod redis;

pub use bridge::{ConnectionState, PubSubBridge, PubSubBridgeConfig};
pub use in_memory::{InMemoryBroker, InMemoryTransport};
pub use redis::RedisTransport;
