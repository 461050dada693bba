//! Request and response DTOs for the event bus endpoints.

use serde::{Deserialize, Serialize};

use crate::domain::delivery::DeliveryState;
use crate::domain::foundation::{DestinationId, Timestamp};
use crate::domain::message::EventMessage;
use crate::ports::{LoggedEvent, StoreReceipt};

// ════════════════════════════════════════════════════════════════════════════
// Queries
// ════════════════════════════════════════════════════════════════════════════

/// Which projection `GET /eventbus/event` returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventSelection {
    #[default]
    All,
    Sent,
    Unsent,
    Unfinished,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventsQuery {
    #[serde(default)]
    pub query: EventSelection,
    pub log_history: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct FailedQuery {
    #[serde(default = "default_amount")]
    pub amount: usize,
}

fn default_amount() -> usize {
    5
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionQuery {
    pub log_history: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoverQuery {
    pub log_history: Option<usize>,
    #[serde(default)]
    pub apply_to_db: bool,
}

/// `?id=` for destination lookups, removal and tests.
#[derive(Debug, Default, Deserialize)]
pub struct DestinationQuery {
    pub id: Option<String>,
}

// ════════════════════════════════════════════════════════════════════════════
// Responses
// ════════════════════════════════════════════════════════════════════════════

/// A logged message with its delivery state per destination.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventEntryResponse {
    pub sequence: u64,
    #[serde(flatten)]
    pub message: EventMessage,
    pub confirmed_by: Vec<DestinationId>,
    pub pending: Vec<DestinationId>,
    pub failed: Vec<DestinationId>,
    pub abandoned: Vec<DestinationId>,
}

impl From<LoggedEvent> for EventEntryResponse {
    fn from(event: LoggedEvent) -> Self {
        let mut response = Self {
            sequence: event.sequence,
            message: event.message,
            confirmed_by: Vec::new(),
            pending: Vec::new(),
            failed: Vec::new(),
            abandoned: Vec::new(),
        };
        for (destination, record) in event.deliveries {
            let bucket = match record.state {
                DeliveryState::Delivered => &mut response.confirmed_by,
                DeliveryState::Pending => &mut response.pending,
                DeliveryState::Failed => &mut response.failed,
                DeliveryState::Abandoned => &mut response.abandoned,
            };
            bucket.push(destination);
        }
        response
    }
}

pub fn entries(events: Vec<LoggedEvent>) -> Vec<EventEntryResponse> {
    events.into_iter().map(EventEntryResponse::from).collect()
}

/// Returned by `POST /eventbus/event`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResponse {
    pub id: String,
    pub sequence: u64,
    pub stored_at: Timestamp,
    pub duplicate: bool,
}

impl From<StoreReceipt> for SendResponse {
    fn from(receipt: StoreReceipt) -> Self {
        Self {
            id: receipt.message_id.to_string(),
            sequence: receipt.sequence,
            stored_at: receipt.stored_at,
            duplicate: receipt.duplicate,
        }
    }
}

/// Standard error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: "BAD_REQUEST".to_string(),
            message: message.into(),
        }
    }

    pub fn not_found(resource_type: &str, id: &str) -> Self {
        Self {
            code: "NOT_FOUND".to_string(),
            message: format!("{} not found: {}", resource_type, id),
        }
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self {
            code: "SERVICE_UNAVAILABLE".to_string(),
            message: message.into(),
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            code: "INTERNAL_ERROR".to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::delivery::DeliveryRecord;
    use std::collections::BTreeSet;

    #[test]
    fn entry_groups_destinations_by_state() {
        let delivered = DestinationId::new();
        let waiting = DestinationId::new();
        let message = EventMessage::named("n8n.workflow.started").unwrap();
        let mut event = LoggedEvent::new(3, message, &BTreeSet::from([delivered, waiting]));
        event
            .deliveries
            .insert(delivered, {
                let mut record = DeliveryRecord::pending();
                record.confirm(Timestamp::now());
                record
            });

        let response = EventEntryResponse::from(event);

        assert_eq!(response.confirmed_by, vec![delivered]);
        assert_eq!(response.pending, vec![waiting]);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["eventName"], "n8n.workflow.started");
        assert_eq!(json["sequence"], 3);
    }

    #[test]
    fn events_query_defaults_to_all() {
        let query: EventsQuery = serde_json::from_str("{}").unwrap();
        assert_eq!(query.query, EventSelection::All);
    }

    #[test]
    fn error_response_not_found_creates_correctly() {
        let error = ErrorResponse::not_found("Destination", "abc-123");
        assert_eq!(error.code, "NOT_FOUND");
        assert!(error.message.contains("abc-123"));
    }
}
