//! A message as the event store holds it.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::delivery::DeliveryRecord;
use super::foundation::{DestinationId, Timestamp};
use super::message::EventMessage;

/// Store entry: the message, its append sequence and one delivery record
/// per destination that was expected to receive it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggedEvent {
    pub sequence: u64,
    pub message: EventMessage,
    pub deliveries: BTreeMap<DestinationId, DeliveryRecord>,
}

impl LoggedEvent {
    pub fn new(sequence: u64, message: EventMessage, recipients: &BTreeSet<DestinationId>) -> Self {
        let deliveries = recipients
            .iter()
            .map(|id| (*id, DeliveryRecord::pending()))
            .collect();
        Self {
            sequence,
            message,
            deliveries,
        }
    }

    /// Sent once every expected destination has confirmed.
    pub fn is_sent(&self) -> bool {
        self.deliveries.values().all(DeliveryRecord::is_delivered)
    }

    /// At least one expected destination failed or gave up.
    pub fn has_failures(&self) -> bool {
        self.deliveries.values().any(DeliveryRecord::has_failed)
    }

    /// Destinations that confirmed, with their first confirmation time.
    pub fn confirmed_by(&self) -> BTreeMap<DestinationId, Timestamp> {
        self.deliveries
            .iter()
            .filter_map(|(id, record)| record.confirmed_at.map(|at| (*id, at)))
            .collect()
    }

    /// Latest failed attempt across destinations, if any.
    pub fn last_failure_at(&self) -> Option<Timestamp> {
        self.deliveries
            .values()
            .filter(|r| r.has_failed())
            .filter_map(|r| r.last_attempt_at)
            .max()
    }
}
