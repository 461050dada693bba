//! EventStore port - the append-only message log.
//!
//! The store is the only shared mutable resource of the bus. Every
//! mutation (append, confirmation, failure) is applied atomically by the
//! implementation; callers never read-modify-write delivery records.
//!
//! ## Ordering
//!
//! Each appended message receives a strictly increasing sequence number.
//! Queries return entries in sequence order unless `reverse` is set.

use std::collections::BTreeSet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{DestinationId, ExecutionId, MessageId, Timestamp};
use crate::domain::logged::LoggedEvent;
use crate::domain::message::EventMessage;

/// Errors raised by persistence adapters.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(String),

    #[error("Failed to serialize record: {0}")]
    Serialization(String),

    #[error("Failed to deserialize record: {0}")]
    Deserialization(String),

    #[error("Message not found: {0}")]
    MessageNotFound(MessageId),

    #[error("Store is closed")]
    Closed,
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

/// Acknowledgement of a durable append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreReceipt {
    pub sequence: u64,
    pub message_id: MessageId,
    pub stored_at: Timestamp,
    /// The id was already in the log; nothing new was written.
    pub duplicate: bool,
}

/// Confirmation-status filter for queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusFilter {
    #[default]
    All,
    Sent,
    Unsent,
    Failed,
}

impl StatusFilter {
    pub fn matches(&self, event: &LoggedEvent) -> bool {
        match self {
            StatusFilter::All => true,
            StatusFilter::Sent => event.is_sent(),
            StatusFilter::Unsent => !event.is_sent(),
            StatusFilter::Failed => event.has_failures(),
        }
    }
}

/// Query over the log.
///
/// `log_history` keeps the most recent N matching entries; it is applied
/// before `reverse`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventQuery {
    pub execution_id: Option<ExecutionId>,
    pub status: StatusFilter,
    pub name_prefix: Option<String>,
    pub log_history: Option<usize>,
    pub reverse: bool,
}

impl EventQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(status: StatusFilter) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    pub fn for_execution(execution_id: ExecutionId) -> Self {
        Self {
            execution_id: Some(execution_id),
            ..Self::default()
        }
    }

    pub fn name_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.name_prefix = Some(prefix.into());
        self
    }

    pub fn log_history(mut self, entries: Option<usize>) -> Self {
        self.log_history = entries;
        self
    }

    pub fn reversed(mut self) -> Self {
        self.reverse = true;
        self
    }

    /// Filters applied per entry; history and ordering are applied by the
    /// caller over the matching set.
    pub fn matches(&self, event: &LoggedEvent) -> bool {
        if let Some(execution_id) = &self.execution_id {
            if event.message.execution_id() != Some(execution_id) {
                return false;
            }
        }
        if let Some(prefix) = &self.name_prefix {
            if !event.message.event_name().matches_prefix(prefix) {
                return false;
            }
        }
        self.status.matches(event)
    }
}

/// Port for the durable message log.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Durably appends `message`, expecting delivery to `recipients`.
    ///
    /// Appending an id that is already logged returns the original receipt
    /// with `duplicate` set.
    ///
    /// # Errors
    /// Returns `StorageError` if the backing medium is unavailable.
    async fn append(
        &self,
        message: &EventMessage,
        recipients: &BTreeSet<DestinationId>,
    ) -> Result<StoreReceipt, StorageError>;

    /// Looks up one entry by message id.
    async fn get(&self, message_id: MessageId) -> Result<Option<LoggedEvent>, StorageError>;

    /// Returns matching entries in sequence order (or reversed).
    async fn query(&self, query: &EventQuery) -> Result<Vec<LoggedEvent>, StorageError>;

    /// Records that `destination` processed the message.
    ///
    /// Idempotent: returns `false` and changes nothing when the pair is
    /// already confirmed. A destination outside the expected set is added
    /// as delivered.
    ///
    /// # Errors
    /// Returns `StorageError::MessageNotFound` for unknown message ids.
    async fn mark_confirmed(
        &self,
        message_id: MessageId,
        destination: DestinationId,
        at: Timestamp,
    ) -> Result<bool, StorageError>;

    /// Records a failed attempt; `abandon` marks the last permitted one.
    async fn record_failure(
        &self,
        message_id: MessageId,
        destination: DestinationId,
        at: Timestamp,
        error: &str,
        abandon: bool,
    ) -> Result<bool, StorageError>;

    /// Moves a failed record back to pending before a retry.
    async fn mark_retrying(
        &self,
        message_id: MessageId,
        destination: DestinationId,
    ) -> Result<bool, StorageError>;

    /// Drops `destination` from every entry's expected set. Returns the
    /// number of entries touched.
    async fn forget_destination(&self, destination: DestinationId) -> Result<usize, StorageError>;

    /// Executions with a start event and no terminal event after it, in
    /// order of their first logged event.
    async fn unfinished_executions(&self) -> Result<Vec<ExecutionId>, StorageError>;

    /// Forces buffered writes to the medium.
    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Flushes and refuses further writes.
    async fn close(&self) -> Result<(), StorageError>;
}
