//! Event store adapters.
//!
//! - `InMemoryEventStore` - volatile, for tests and single-shot runs
//! - `FileEventStore` - JSON-lines log with replay and compaction

mod file;
mod in_memory;
mod log_index;

pub use file::{FileEventStore, FileEventStoreConfig};
pub use in_memory::{InMemoryEventStore, DEFAULT_MAX_ENTRIES};
pub use log_index::{LogIndex, LogRecord};
