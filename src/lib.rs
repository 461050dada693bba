//! Message Event Bus - durable event log with confirmed fan-out
//!
//! Producers hand event messages to the bus; the bus logs them and
//! delivers each one to the configured webhook, syslog and Sentry
//! destinations, tracking which destination confirmed what. Unfinished
//! workflow executions are reconstructed from the log after a crash.

pub mod adapters;
pub mod application;
pub mod config;
pub mod domain;
pub mod ports;
