//! Catalogue of event names emitted by the platform.
//!
//! The bus accepts any well-formed name; this list is what the control
//! surface advertises and what recovery keys off.

pub const WORKFLOW_STARTED: &str = "n8n.workflow.started";
pub const WORKFLOW_SUCCESS: &str = "n8n.workflow.success";
pub const WORKFLOW_FAILED: &str = "n8n.workflow.failed";
pub const WORKFLOW_CRASHED: &str = "n8n.workflow.crashed";

pub const NODE_STARTED: &str = "n8n.node.started";
pub const NODE_FINISHED: &str = "n8n.node.finished";

pub const DESTINATION_TEST: &str = "n8n.destination.test";

/// Prefix shared by every audit event.
pub const AUDIT_PREFIX: &str = "n8n.audit";

pub const EVENT_NAMES_WORKFLOW: &[&str] = &[
    WORKFLOW_STARTED,
    WORKFLOW_SUCCESS,
    WORKFLOW_FAILED,
    WORKFLOW_CRASHED,
];

pub const EVENT_NAMES_NODE: &[&str] = &[NODE_STARTED, NODE_FINISHED];

pub const EVENT_NAMES_AUDIT: &[&str] = &[
    "n8n.audit.user.signedup",
    "n8n.audit.user.updated",
    "n8n.audit.user.deleted",
    "n8n.audit.user.invited",
    "n8n.audit.user.invitation.accepted",
    "n8n.audit.user.reinvited",
    "n8n.audit.user.email.failed",
    "n8n.audit.user.reset.requested",
    "n8n.audit.user.reset",
    "n8n.audit.user.credentials.created",
    "n8n.audit.user.credentials.shared",
    "n8n.audit.user.api.created",
    "n8n.audit.user.api.deleted",
    "n8n.audit.package.installed",
    "n8n.audit.package.updated",
    "n8n.audit.package.deleted",
    "n8n.audit.workflow.created",
    "n8n.audit.workflow.deleted",
    "n8n.audit.workflow.updated",
];

/// Every advertised event name, workflow first.
pub fn event_names_all() -> Vec<&'static str> {
    EVENT_NAMES_WORKFLOW
        .iter()
        .chain(EVENT_NAMES_NODE)
        .chain(EVENT_NAMES_AUDIT)
        .copied()
        .collect()
}

pub fn is_execution_start(name: &str) -> bool {
    name == WORKFLOW_STARTED
}

pub fn is_execution_terminal(name: &str) -> bool {
    matches!(name, WORKFLOW_SUCCESS | WORKFLOW_FAILED | WORKFLOW_CRASHED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::EventName;

    #[test]
    fn every_catalogued_name_is_well_formed() {
        for name in event_names_all() {
            assert!(EventName::new(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn audit_names_share_prefix() {
        for name in EVENT_NAMES_AUDIT {
            assert!(EventName::new(*name).unwrap().matches_prefix(AUDIT_PREFIX));
        }
    }

    #[test]
    fn terminal_classification() {
        assert!(is_execution_terminal(WORKFLOW_SUCCESS));
        assert!(is_execution_terminal(WORKFLOW_CRASHED));
        assert!(!is_execution_terminal(WORKFLOW_STARTED));
        assert!(!is_execution_terminal(NODE_FINISHED));
    }
}
