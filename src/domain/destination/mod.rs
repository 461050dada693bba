//! Destination configuration: what a sink is and what it subscribes to.

mod dsn;
mod options;

pub use dsn::SentryDsn;
pub use options::{
    BatchOptions, CommonOptions, DestinationOptions, DestinationType, SentryOptions,
    SyslogOptions, SyslogProtocol, WebhookAuth, WebhookMethod, WebhookOptions, REDACTED,
};
