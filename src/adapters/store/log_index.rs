//! In-memory index shared by the event store adapters.
//!
//! Every mutation is expressed as a [`LogRecord`]. The in-memory store
//! applies records directly; the file store writes each record as one
//! JSON line first and applies it afterwards, and replays the same
//! records on open. Both therefore end in the same state for the same
//! record sequence.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::delivery::DeliveryRecord;
use crate::domain::foundation::{DestinationId, ExecutionId, MessageId, Timestamp};
use crate::domain::logged::LoggedEvent;
use crate::domain::message::names::{is_execution_start, is_execution_terminal};
use crate::domain::message::EventMessage;
use crate::ports::{EventQuery, StorageError, StoreReceipt};

/// One state change of the log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum LogRecord {
    #[serde(rename_all = "camelCase")]
    Append {
        sequence: u64,
        stored_at: Timestamp,
        message: EventMessage,
        recipients: BTreeSet<DestinationId>,
    },
    /// Full entry, written when the file is compacted.
    #[serde(rename_all = "camelCase")]
    Snapshot {
        stored_at: Timestamp,
        event: LoggedEvent,
    },
    #[serde(rename_all = "camelCase")]
    Confirm {
        message_id: MessageId,
        destination: DestinationId,
        at: Timestamp,
    },
    #[serde(rename_all = "camelCase")]
    Failure {
        message_id: MessageId,
        destination: DestinationId,
        at: Timestamp,
        error: String,
        abandon: bool,
    },
    #[serde(rename_all = "camelCase")]
    Retry {
        message_id: MessageId,
        destination: DestinationId,
    },
    Forget { destination: DestinationId },
}

#[derive(Debug)]
pub struct LogIndex {
    entries: BTreeMap<u64, LoggedEvent>,
    receipts: HashMap<MessageId, StoreReceipt>,
    next_sequence: u64,
    max_entries: usize,
}

impl LogIndex {
    pub fn new(max_entries: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            receipts: HashMap::new(),
            next_sequence: 1,
            max_entries: max_entries.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Receipt of an already-logged message, flagged as duplicate.
    pub fn existing_receipt(&self, message_id: MessageId) -> Option<StoreReceipt> {
        self.receipts.get(&message_id).map(|receipt| StoreReceipt {
            duplicate: true,
            ..*receipt
        })
    }

    /// Record for appending `message` at the next sequence number.
    pub fn append_record(
        &self,
        message: &EventMessage,
        recipients: &BTreeSet<DestinationId>,
        stored_at: Timestamp,
    ) -> LogRecord {
        LogRecord::Append {
            sequence: self.next_sequence,
            stored_at,
            message: message.clone(),
            recipients: recipients.clone(),
        }
    }

    /// Whether applying `record` would change anything.
    ///
    /// # Errors
    /// `MessageNotFound` for delivery records on unknown messages.
    pub fn would_change(&self, record: &LogRecord) -> Result<bool, StorageError> {
        match record {
            LogRecord::Append { message, .. } => Ok(!self.receipts.contains_key(&message.id())),
            LogRecord::Snapshot { .. } => Ok(true),
            LogRecord::Confirm {
                message_id,
                destination,
                at,
            } => {
                let event = self.entry(*message_id)?;
                Ok(match event.deliveries.get(destination) {
                    Some(record) => record.clone().confirm(*at),
                    None => *destination == DestinationId::event_bus(),
                })
            }
            LogRecord::Failure {
                message_id,
                destination,
                at,
                error,
                abandon,
            } => {
                let event = self.entry(*message_id)?;
                Ok(event
                    .deliveries
                    .get(destination)
                    .is_some_and(|r| r.clone().fail(*at, error.as_str(), *abandon)))
            }
            LogRecord::Retry {
                message_id,
                destination,
            } => {
                let event = self.entry(*message_id)?;
                Ok(event
                    .deliveries
                    .get(destination)
                    .is_some_and(|r| r.clone().retry()))
            }
            LogRecord::Forget { destination } => Ok(self
                .entries
                .values()
                .any(|e| e.deliveries.contains_key(destination))),
        }
    }

    /// Applies a record and returns the number of entries it changed.
    ///
    /// Records naming unknown messages are ignored, so replaying a log
    /// whose older entries were dropped by retention is safe.
    pub fn apply(&mut self, record: LogRecord) -> usize {
        match record {
            LogRecord::Append {
                sequence,
                stored_at,
                message,
                recipients,
            } => {
                if self.receipts.contains_key(&message.id()) {
                    return 0;
                }
                let event = LoggedEvent::new(sequence, message, &recipients);
                self.insert(event, stored_at);
                1
            }
            LogRecord::Snapshot { stored_at, event } => {
                if self.receipts.contains_key(&event.message.id()) {
                    return 0;
                }
                self.insert(event, stored_at);
                1
            }
            LogRecord::Confirm {
                message_id,
                destination,
                at,
            } => self.update(message_id, |event| {
                // Only expected destinations, plus the bus confirming a
                // message nobody subscribed to.
                if destination == DestinationId::event_bus() {
                    event
                        .deliveries
                        .entry(destination)
                        .or_insert_with(DeliveryRecord::pending)
                        .confirm(at)
                } else {
                    event
                        .deliveries
                        .get_mut(&destination)
                        .is_some_and(|r| r.confirm(at))
                }
            }),
            LogRecord::Failure {
                message_id,
                destination,
                at,
                error,
                abandon,
            } => self.update(message_id, |event| {
                event
                    .deliveries
                    .get_mut(&destination)
                    .is_some_and(|r| r.fail(at, error, abandon))
            }),
            LogRecord::Retry {
                message_id,
                destination,
            } => self.update(message_id, |event| {
                event
                    .deliveries
                    .get_mut(&destination)
                    .is_some_and(DeliveryRecord::retry)
            }),
            LogRecord::Forget { destination } => self
                .entries
                .values_mut()
                .map(|event| usize::from(event.deliveries.remove(&destination).is_some()))
                .sum(),
        }
    }

    pub fn receipt(&self, message_id: MessageId) -> Option<StoreReceipt> {
        self.receipts.get(&message_id).copied()
    }

    pub fn get(&self, message_id: MessageId) -> Option<LoggedEvent> {
        let receipt = self.receipts.get(&message_id)?;
        self.entries.get(&receipt.sequence).cloned()
    }

    pub fn query(&self, query: &EventQuery) -> Vec<LoggedEvent> {
        let limit = query.log_history.unwrap_or(usize::MAX);
        let mut matched: Vec<LoggedEvent> = self
            .entries
            .values()
            .rev()
            .filter(|event| query.matches(event))
            .take(limit)
            .cloned()
            .collect();
        if !query.reverse {
            matched.reverse();
        }
        matched
    }

    pub fn unfinished_executions(&self) -> Vec<ExecutionId> {
        // execution -> (first sequence seen, open)
        let mut executions: HashMap<&ExecutionId, (u64, bool)> = HashMap::new();

        for event in self.entries.values() {
            let Some(execution_id) = event.message.execution_id() else {
                continue;
            };
            let state = executions
                .entry(execution_id)
                .or_insert((event.sequence, false));
            let name = event.message.event_name().as_str();
            if is_execution_start(name) {
                state.1 = true;
            } else if is_execution_terminal(name) {
                state.1 = false;
            }
        }

        let mut open: Vec<(u64, &ExecutionId)> = executions
            .into_iter()
            .filter(|(_, (_, open))| *open)
            .map(|(id, (first, _))| (first, id))
            .collect();
        open.sort();
        open.into_iter().map(|(_, id)| id.clone()).collect()
    }

    /// Entries in sequence order as compaction records.
    pub fn snapshot(&self) -> Vec<LogRecord> {
        self.entries
            .values()
            .map(|event| LogRecord::Snapshot {
                stored_at: self
                    .receipts
                    .get(&event.message.id())
                    .map(|r| r.stored_at)
                    .unwrap_or_else(|| event.message.timestamp()),
                event: event.clone(),
            })
            .collect()
    }

    fn entry(&self, message_id: MessageId) -> Result<&LoggedEvent, StorageError> {
        self.receipts
            .get(&message_id)
            .and_then(|r| self.entries.get(&r.sequence))
            .ok_or(StorageError::MessageNotFound(message_id))
    }

    fn update(
        &mut self,
        message_id: MessageId,
        f: impl FnOnce(&mut LoggedEvent) -> bool,
    ) -> usize {
        let Some(sequence) = self.receipts.get(&message_id).map(|r| r.sequence) else {
            return 0;
        };
        self.entries
            .get_mut(&sequence)
            .map_or(0, |event| usize::from(f(event)))
    }

    fn insert(&mut self, event: LoggedEvent, stored_at: Timestamp) {
        let sequence = event.sequence;
        let message_id = event.message.id();
        self.next_sequence = self.next_sequence.max(sequence + 1);
        self.receipts.insert(
            message_id,
            StoreReceipt {
                sequence,
                message_id,
                stored_at,
                duplicate: false,
            },
        );
        self.entries.insert(sequence, event);

        while self.entries.len() > self.max_entries {
            if let Some((_, dropped)) = self.entries.pop_first() {
                self.receipts.remove(&dropped.message.id());
                if !dropped.is_sent() {
                    tracing::debug!(
                        message_id = %dropped.message.id(),
                        sequence = dropped.sequence,
                        "Retention dropped an unsent message"
                    );
                }
            }
        }
    }
}
