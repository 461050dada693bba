//! Domain layer: event bus data types and the pure algorithms over them.
//!
//! # Module Organization
//!
//! - `foundation` - Shared primitives (ids, timestamps, errors, state machines)
//! - `message` - Event messages and the event name catalogue
//! - `delivery` - Per-destination delivery state machine
//! - `logged` - A message as held by the event store
//! - `destination` - Destination configuration records
//! - `failed` - Failure summaries for the query surface
//! - `recovery` - Execution reconstruction from the log

pub mod delivery;
pub mod destination;
pub mod failed;
pub mod foundation;
pub mod logged;
pub mod message;
pub mod recovery;

