//! Query-only view over messages some destination never confirmed.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::delivery::DeliveryState;
use super::foundation::{DestinationId, ExecutionId, MessageId, Timestamp};
use super::logged::LoggedEvent;

/// Failures of one execution, or of one uncorrelated message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedEventSummary {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<ExecutionId>,
    /// Most recent failed message in the group.
    pub last_message_id: MessageId,
    pub last_event_name: String,
    pub last_sequence: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub failed_messages: usize,
    pub destinations: BTreeSet<DestinationId>,
    /// Every failed record in the group has exhausted its retries.
    pub abandoned: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum GroupKey {
    Execution(ExecutionId),
    Message(MessageId),
}

/// Groups failed events and returns at most `limit` summaries, most
/// recent first. `events` may be in any order.
pub fn summarize_failures<'a>(
    events: impl IntoIterator<Item = &'a LoggedEvent>,
    limit: usize,
) -> Vec<FailedEventSummary> {
    let mut groups: BTreeMap<GroupKey, FailedEventSummary> = BTreeMap::new();

    for event in events.into_iter().filter(|e| e.has_failures()) {
        let message = &event.message;
        let key = match message.execution_id() {
            Some(id) => GroupKey::Execution(id.clone()),
            None => GroupKey::Message(message.id()),
        };

        let failed: Vec<_> = event
            .deliveries
            .iter()
            .filter(|(_, record)| record.has_failed())
            .collect();
        let all_abandoned = failed
            .iter()
            .all(|(_, r)| r.state == DeliveryState::Abandoned);
        let last_error = failed
            .iter()
            .filter_map(|(_, r)| r.last_error.clone())
            .next_back();

        let summary = groups.entry(key).or_insert_with(|| FailedEventSummary {
            execution_id: message.execution_id().cloned(),
            last_message_id: message.id(),
            last_event_name: message.event_name().to_string(),
            last_sequence: event.sequence,
            last_failed_at: None,
            last_error: None,
            failed_messages: 0,
            destinations: BTreeSet::new(),
            abandoned: true,
        });

        summary.failed_messages += 1;
        summary.abandoned &= all_abandoned;
        summary.destinations.extend(failed.iter().map(|(id, _)| **id));
        if event.sequence >= summary.last_sequence {
            summary.last_message_id = message.id();
            summary.last_event_name = message.event_name().to_string();
            summary.last_sequence = event.sequence;
            summary.last_error = last_error;
        }
        summary.last_failed_at = summary.last_failed_at.max(event.last_failure_at());
    }

    let mut summaries: Vec<_> = groups.into_values().collect();
    summaries.sort_by(|a, b| b.last_sequence.cmp(&a.last_sequence));
    summaries.truncate(limit);
    summaries
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::EventMessage;

    fn failed_event(
        sequence: u64,
        dest: DestinationId,
        execution: Option<&str>,
        abandon: bool,
    ) -> LoggedEvent {
        let mut message = EventMessage::named("n8n.workflow.failed").unwrap();
        if let Some(id) = execution {
            message = message.with_execution_id(ExecutionId::new(id).unwrap());
        }
        let mut event = LoggedEvent::new(sequence, message, &BTreeSet::from([dest]));
        event
            .deliveries
            .get_mut(&dest)
            .unwrap()
            .fail(Timestamp::from_unix_millis(sequence as i64), "503", abandon);
        event
    }

    #[test]
    fn limits_and_orders_most_recent_first() {
        let dest = DestinationId::new();
        let events: Vec<_> = (1..=7).map(|s| failed_event(s, dest, None, true)).collect();

        let summaries = summarize_failures(&events, 5);

        assert_eq!(summaries.len(), 5);
        let sequences: Vec<u64> = summaries.iter().map(|s| s.last_sequence).collect();
        assert_eq!(sequences, vec![7, 6, 5, 4, 3]);
    }

    #[test]
    fn groups_by_execution() {
        let dest = DestinationId::new();
        let events = vec![
            failed_event(1, dest, Some("10"), true),
            failed_event(2, dest, Some("10"), false),
            failed_event(3, dest, Some("11"), true),
        ];

        let summaries = summarize_failures(&events, 10);

        assert_eq!(summaries.len(), 2);
        let ten = summaries
            .iter()
            .find(|s| s.execution_id.as_ref().map(|e| e.as_str()) == Some("10"))
            .unwrap();
        assert_eq!(ten.failed_messages, 2);
        assert_eq!(ten.last_sequence, 2);
        assert!(!ten.abandoned);
        assert_eq!(ten.last_error.as_deref(), Some("503"));
    }

    #[test]
    fn delivered_events_are_ignored() {
        let dest = DestinationId::new();
        let mut ok = LoggedEvent::new(
            1,
            EventMessage::named("n8n.workflow.success").unwrap(),
            &BTreeSet::from([dest]),
        );
        ok.deliveries.get_mut(&dest).unwrap().confirm(Timestamp::now());

        assert!(summarize_failures(&[ok], 5).is_empty());
    }
}
