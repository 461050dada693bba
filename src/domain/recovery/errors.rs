use thiserror::Error;

use crate::domain::foundation::ExecutionId;

/// The log slice for an execution cannot be replayed consistently.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecoveryError {
    #[error("No log entries for execution {0}")]
    EmptyLog(ExecutionId),

    #[error("Second start event at #{second} without a terminal event after #{first}")]
    DuplicateStart { first: u64, second: u64 },

    #[error("Event #{sequence} follows terminal event #{terminal}")]
    EventAfterTerminal { terminal: u64, sequence: u64 },

    #[error("Event #{found} is not after #{previous}")]
    OutOfOrder { previous: u64, found: u64 },

    #[error("Event #{sequence} belongs to {found:?}, expected {expected}")]
    ForeignEvent {
        expected: ExecutionId,
        found: Option<String>,
        sequence: u64,
    },

    #[error("Node event #{sequence} has no nodeName")]
    MissingNodeName { sequence: u64 },
}
