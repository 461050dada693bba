//! Foundation module - Shared domain primitives.
//!
//! Contains identifiers, timestamps, backoff, the state machine contract
//! and error types that form the vocabulary of the event bus.

mod backoff;
mod errors;
mod ids;
mod state_machine;
mod timestamp;

pub use backoff::Backoff;
pub use errors::{DomainError, ErrorCode, ValidationError};
pub use ids::{DestinationId, ExecutionId, MessageId};
pub use state_machine::StateMachine;
pub use timestamp::Timestamp;
