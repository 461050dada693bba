//! Per-(message, destination) delivery bookkeeping.
//!
//! ```text
//! Pending --[confirmSent]--> Delivered            (terminal)
//! Pending --[attempt failed]--> Failed
//! Failed  --[retry scheduled]--> Pending
//! Failed  --[attempt cap reached]--> Abandoned    (terminal)
//! ```
//!
//! A confirmation may arrive from `Failed` too: a destination can deliver
//! on the attempt that the bus already counted as timed out.

use serde::{Deserialize, Serialize};

use super::foundation::{StateMachine, Timestamp};

/// Lifecycle of one message at one destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    Pending,
    Delivered,
    Failed,
    Abandoned,
}

impl StateMachine for DeliveryState {
    fn can_transition_to(&self, target: &Self) -> bool {
        use DeliveryState::*;
        matches!(
            (self, target),
            (Pending, Delivered)
                | (Pending, Failed)
                | (Failed, Pending)
                | (Failed, Delivered)
                | (Failed, Abandoned)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use DeliveryState::*;
        match self {
            Pending => vec![Delivered, Failed],
            Failed => vec![Pending, Delivered, Abandoned],
            Delivered | Abandoned => vec![],
        }
    }
}

/// Delivery state of one message for one destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    pub state: DeliveryState,
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmed_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl DeliveryRecord {
    pub fn pending() -> Self {
        Self {
            state: DeliveryState::Pending,
            attempts: 0,
            confirmed_at: None,
            last_attempt_at: None,
            last_error: None,
        }
    }

    pub fn is_delivered(&self) -> bool {
        self.state == DeliveryState::Delivered
    }

    /// Failed or abandoned: at least one attempt went wrong and the
    /// message has not been delivered since.
    pub fn has_failed(&self) -> bool {
        matches!(self.state, DeliveryState::Failed | DeliveryState::Abandoned)
    }

    /// Records a confirmation. Returns false when already delivered; the
    /// first confirmation timestamp is kept.
    pub fn confirm(&mut self, at: Timestamp) -> bool {
        if self.is_delivered() {
            return false;
        }
        if let Ok(next) = self.state.transition_to(DeliveryState::Delivered) {
            self.state = next;
            self.confirmed_at = Some(at);
            self.last_error = None;
            return true;
        }
        false
    }

    /// Records a failed attempt. `abandon` marks the attempt as the last
    /// one the retry policy allows. Terminal records are left untouched.
    pub fn fail(&mut self, at: Timestamp, error: impl Into<String>, abandon: bool) -> bool {
        if self.state.is_terminal() {
            return false;
        }
        self.attempts += 1;
        self.last_attempt_at = Some(at);
        self.last_error = Some(error.into());
        self.state = DeliveryState::Failed;
        if abandon {
            self.state = DeliveryState::Abandoned;
        }
        true
    }

    /// Moves a failed record back to pending ahead of a retry.
    pub fn retry(&mut self) -> bool {
        match self.state.transition_to(DeliveryState::Pending) {
            Ok(next) => {
                self.state = next;
                true
            }
            Err(_) => false,
        }
    }
}

impl Default for DeliveryRecord {
    fn default() -> Self {
        Self::pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivered_and_abandoned_are_terminal() {
        assert!(DeliveryState::Delivered.is_terminal());
        assert!(DeliveryState::Abandoned.is_terminal());
        assert!(!DeliveryState::Failed.is_terminal());
        assert!(!DeliveryState::Pending.is_terminal());
    }

    #[test]
    fn pending_cannot_jump_to_abandoned() {
        assert!(DeliveryState::Pending
            .transition_to(DeliveryState::Abandoned)
            .is_err());
    }

    #[test]
    fn can_transition_to_is_consistent_with_valid_transitions() {
        use DeliveryState::*;
        for state in [Pending, Delivered, Failed, Abandoned] {
            for target in state.valid_transitions() {
                assert!(state.can_transition_to(&target), "{state:?} -> {target:?}");
            }
        }
    }

    #[test]
    fn confirm_is_idempotent_and_keeps_first_timestamp() {
        let mut record = DeliveryRecord::pending();
        let first = Timestamp::from_unix_millis(1_000);
        let second = Timestamp::from_unix_millis(2_000);

        assert!(record.confirm(first));
        let snapshot = record.clone();
        assert!(!record.confirm(second));

        assert_eq!(record, snapshot);
        assert_eq!(record.confirmed_at, Some(first));
    }

    #[test]
    fn retry_loop_then_abandon() {
        let mut record = DeliveryRecord::pending();

        assert!(record.fail(Timestamp::now(), "503", false));
        assert_eq!(record.state, DeliveryState::Failed);
        assert!(record.retry());
        assert_eq!(record.state, DeliveryState::Pending);

        assert!(record.fail(Timestamp::now(), "timeout", true));
        assert_eq!(record.state, DeliveryState::Abandoned);
        assert_eq!(record.attempts, 2);
        assert!(record.has_failed());

        assert!(!record.retry());
        assert!(!record.confirm(Timestamp::now()));
    }

    #[test]
    fn late_confirmation_after_failure_delivers() {
        let mut record = DeliveryRecord::pending();
        record.fail(Timestamp::now(), "timeout", false);

        assert!(record.confirm(Timestamp::now()));
        assert!(record.is_delivered());
        assert!(record.last_error.is_none());
    }
}
