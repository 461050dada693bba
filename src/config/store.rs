//! Event log storage configuration

use serde::Deserialize;
use std::path::PathBuf;

use super::error::ValidationError;
use crate::adapters::store::{FileEventStoreConfig, DEFAULT_MAX_ENTRIES};

/// Event store configuration
///
/// Without `log_dir` the log lives in memory and is lost on exit.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// Directory holding the JSON-lines log
    pub log_dir: Option<PathBuf>,

    /// Log file name inside `log_dir`
    #[serde(default = "default_file_name")]
    pub file_name: String,

    /// Entries retained; the oldest are dropped beyond this
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Records appended before the file is rewritten
    #[serde(default = "default_compact_after")]
    pub compact_after: usize,

    /// fsync after every write
    #[serde(default)]
    pub sync_writes: bool,
}

impl StoreConfig {
    pub fn file_config(&self) -> FileEventStoreConfig {
        FileEventStoreConfig::default()
            .with_max_entries(self.max_entries)
            .with_compact_after(self.compact_after)
            .with_sync_writes(self.sync_writes)
    }

    /// Validate store configuration
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_entries == 0 {
            return Err(ValidationError::MustBePositive("max_entries"));
        }
        if self.compact_after == 0 {
            return Err(ValidationError::MustBePositive("compact_after"));
        }
        let plain = !self.file_name.is_empty()
            && !self.file_name.contains(['/', '\\'])
            && self.file_name != "."
            && self.file_name != "..";
        if !plain {
            return Err(ValidationError::InvalidFileName);
        }
        Ok(())
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            file_name: default_file_name(),
            max_entries: default_max_entries(),
            compact_after: default_compact_after(),
            sync_writes: false,
        }
    }
}

fn default_file_name() -> String {
    "n8nEventLog.jsonl".to_string()
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_compact_after() -> usize {
    50_000
}
