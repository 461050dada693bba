//! Destination adapters.
//!
//! - `WebhookDestination` - HTTP delivery, optionally signed and batched
//! - `SyslogDestination` - RFC 5424 over UDP or TCP
//! - `SentryDestination` - monitoring sink via the Sentry store API
//! - `DestinationFactory` - `__type` keyed construction

mod factory;
mod sentry;
mod syslog;
mod webhook;

pub use factory::{DeploymentInfo, DestinationFactory};
pub use sentry::SentryDestination;
pub use syslog::SyslogDestination;
pub use webhook::{sign, WebhookDestination, SIGNATURE_HEADER};
