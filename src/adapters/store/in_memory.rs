//! In-memory event store.
//!
//! Holds the log in a [`LogIndex`] behind an async `RwLock`; every
//! mutation takes the write lock, so confirmation updates never race.
//! Nothing survives a restart.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::log_index::{LogIndex, LogRecord};
use crate::domain::foundation::{DestinationId, ExecutionId, MessageId, Timestamp};
use crate::domain::logged::LoggedEvent;
use crate::domain::message::EventMessage;
use crate::ports::{EventQuery, EventStore, StorageError, StoreReceipt};

/// Default bound on retained entries.
pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

pub struct InMemoryEventStore {
    index: RwLock<LogIndex>,
    closed: AtomicBool,
    unavailable: AtomicBool,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::with_max_entries(DEFAULT_MAX_ENTRIES)
    }

    pub fn with_max_entries(max_entries: usize) -> Self {
        Self {
            index: RwLock::new(LogIndex::new(max_entries)),
            closed: AtomicBool::new(false),
            unavailable: AtomicBool::new(false),
        }
    }

    // === Test Helpers ===

    /// Makes every following call fail with `StorageError::Unavailable`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of retained entries.
    pub async fn len(&self) -> usize {
        self.index.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.index.read().await.is_empty()
    }

    fn check_open(&self) -> Result<(), StorageError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("in-memory store offline".into()));
        }
        if self.closed.load(Ordering::SeqCst) {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    async fn mutate(&self, record: LogRecord) -> Result<bool, StorageError> {
        self.check_open()?;
        let mut index = self.index.write().await;
        if !index.would_change(&record)? {
            return Ok(false);
        }
        Ok(index.apply(record) > 0)
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        message: &EventMessage,
        recipients: &BTreeSet<DestinationId>,
    ) -> Result<StoreReceipt, StorageError> {
        self.check_open()?;
        let mut index = self.index.write().await;
        if let Some(receipt) = index.existing_receipt(message.id()) {
            return Ok(receipt);
        }
        let record = index.append_record(message, recipients, Timestamp::now());
        index.apply(record);
        index
            .receipt(message.id())
            .ok_or(StorageError::MessageNotFound(message.id()))
    }

    async fn get(&self, message_id: MessageId) -> Result<Option<LoggedEvent>, StorageError> {
        self.check_open()?;
        Ok(self.index.read().await.get(message_id))
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<LoggedEvent>, StorageError> {
        self.check_open()?;
        Ok(self.index.read().await.query(query))
    }

    async fn mark_confirmed(
        &self,
        message_id: MessageId,
        destination: DestinationId,
        at: Timestamp,
    ) -> Result<bool, StorageError> {
        self.mutate(LogRecord::Confirm {
            message_id,
            destination,
            at,
        })
        .await
    }

    async fn record_failure(
        &self,
        message_id: MessageId,
        destination: DestinationId,
        at: Timestamp,
        error: &str,
        abandon: bool,
    ) -> Result<bool, StorageError> {
        self.mutate(LogRecord::Failure {
            message_id,
            destination,
            at,
            error: error.to_string(),
            abandon,
        })
        .await
    }

    async fn mark_retrying(
        &self,
        message_id: MessageId,
        destination: DestinationId,
    ) -> Result<bool, StorageError> {
        self.mutate(LogRecord::Retry {
            message_id,
            destination,
        })
        .await
    }

    async fn forget_destination(&self, destination: DestinationId) -> Result<usize, StorageError> {
        self.check_open()?;
        Ok(self
            .index
            .write()
            .await
            .apply(LogRecord::Forget { destination }))
    }

    async fn unfinished_executions(&self) -> Result<Vec<ExecutionId>, StorageError> {
        self.check_open()?;
        Ok(self.index.read().await.unfinished_executions())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
