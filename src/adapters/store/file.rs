//! File-backed event store.
//!
//! Appends one JSON line per [`LogRecord`] to `{log_dir}/{file_name}`:
//!
//! ```text
//! {"op":"append","sequence":1,"storedAt":"...","message":{...},"recipients":["..."]}
//! {"op":"confirm","messageId":"...","destination":"...","at":"..."}
//! ```
//!
//! A record is written before it is applied to the in-memory index, so a
//! successful call is durable. On open the file is replayed; an
//! unterminated last line left by a crash is cut off before the file is
//! reopened for append. After `compact_after` records the file is
//! rewritten from the retained entries through a temporary file and an
//! atomic rename.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::in_memory::DEFAULT_MAX_ENTRIES;
use super::log_index::{LogIndex, LogRecord};
use crate::domain::foundation::{DestinationId, ExecutionId, MessageId, Timestamp};
use crate::domain::logged::LoggedEvent;
use crate::domain::message::EventMessage;
use crate::ports::{EventQuery, EventStore, StorageError, StoreReceipt};

/// Configuration for the file store.
#[derive(Debug, Clone)]
pub struct FileEventStoreConfig {
    /// Maximum retained entries.
    pub max_entries: usize,
    /// Records appended before the file is compacted.
    pub compact_after: usize,
    /// Call `fsync` after every record.
    pub sync_writes: bool,
}

impl Default for FileEventStoreConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            compact_after: 50_000,
            sync_writes: false,
        }
    }
}

impl FileEventStoreConfig {
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    pub fn with_compact_after(mut self, records: usize) -> Self {
        self.compact_after = records;
        self
    }

    pub fn with_sync_writes(mut self, sync: bool) -> Self {
        self.sync_writes = sync;
        self
    }
}

struct FileState {
    index: LogIndex,
    file: Option<File>,
    records_since_compaction: usize,
    compactions: usize,
}

pub struct FileEventStore {
    path: PathBuf,
    config: FileEventStoreConfig,
    state: Mutex<FileState>,
}

impl FileEventStore {
    /// Opens (or creates) the log file and replays it.
    ///
    /// # Errors
    /// Returns `StorageError::Io` if the directory or file cannot be
    /// created or read.
    pub async fn open<P: AsRef<Path>>(
        log_dir: P,
        file_name: &str,
        config: FileEventStoreConfig,
    ) -> Result<Self, StorageError> {
        let log_dir = log_dir.as_ref();
        fs::create_dir_all(log_dir).await?;
        let path = log_dir.join(file_name);

        let mut index = LogIndex::new(config.max_entries);
        let mut replayed = 0usize;
        if fs::try_exists(&path).await? {
            let contents = fs::read(&path).await?;
            let mut complete_len = 0usize;
            for (line_no, chunk) in contents.split_inclusive(|b| *b == b'\n').enumerate() {
                if !chunk.ends_with(b"\n") {
                    break;
                }
                complete_len += chunk.len();
                if chunk.iter().all(u8::is_ascii_whitespace) {
                    continue;
                }
                match serde_json::from_slice::<LogRecord>(chunk) {
                    Ok(record) => {
                        index.apply(record);
                        replayed += 1;
                    }
                    Err(e) => warn!(
                        path = %path.display(),
                        line = line_no + 1,
                        error = %e,
                        "Skipping unreadable event log record"
                    ),
                }
            }

            // An unterminated tail was never acknowledged.
            if complete_len < contents.len() {
                warn!(
                    path = %path.display(),
                    bytes = contents.len() - complete_len,
                    "Truncating torn event log tail"
                );
                let file = OpenOptions::new().write(true).open(&path).await?;
                file.set_len(complete_len as u64).await?;
                file.sync_all().await?;
            }
        }

        info!(
            path = %path.display(),
            records = replayed,
            entries = index.len(),
            "Event log opened"
        );

        let store = Self {
            path,
            config,
            state: Mutex::new(FileState {
                index,
                file: None,
                records_since_compaction: replayed,
                compactions: 0,
            }),
        };

        {
            let mut state = store.state.lock().await;
            if state.records_since_compaction >= store.config.compact_after {
                store.compact(&mut state).await?;
            } else {
                state.file = Some(store.open_for_append().await?);
            }
        }

        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn open_for_append(&self) -> Result<File, StorageError> {
        Ok(OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?)
    }

    /// Writes one record. The caller applies it after this returns.
    async fn write_record(
        &self,
        state: &mut FileState,
        record: &LogRecord,
    ) -> Result<(), StorageError> {
        let mut line = serde_json::to_string(record)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        line.push('\n');

        let file = state.file.as_mut().ok_or(StorageError::Closed)?;
        file.write_all(line.as_bytes()).await?;
        if self.config.sync_writes {
            file.sync_data().await?;
        } else {
            file.flush().await?;
        }
        state.records_since_compaction += 1;
        Ok(())
    }

    async fn maybe_compact(&self, state: &mut FileState) -> Result<(), StorageError> {
        if state.records_since_compaction < self.config.compact_after {
            return Ok(());
        }
        self.compact(state).await
    }

    /// Rewrites the file with one snapshot record per retained entry.
    async fn compact(&self, state: &mut FileState) -> Result<(), StorageError> {
        let tmp_path = self.path.with_extension("compacting");
        let records = state.index.snapshot();

        let mut body = String::new();
        for record in &records {
            let line = serde_json::to_string(record)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            body.push_str(&line);
            body.push('\n');
        }

        if let Some(mut file) = state.file.take() {
            file.flush().await?;
        }

        let mut tmp = File::create(&tmp_path).await?;
        tmp.write_all(body.as_bytes()).await?;
        tmp.sync_all().await?;
        drop(tmp);
        fs::rename(&tmp_path, &self.path).await?;

        state.records_since_compaction = 0;
        state.compactions += 1;
        debug!(
            path = %self.path.display(),
            entries = records.len(),
            compactions = state.compactions,
            "Event log compacted"
        );

        state.file = Some(self.open_for_append().await?);
        Ok(())
    }

    async fn mutate(&self, record: LogRecord) -> Result<bool, StorageError> {
        let mut state = self.state.lock().await;
        if !state.index.would_change(&record)? {
            return Ok(false);
        }
        self.write_record(&mut state, &record).await?;
        let changed = state.index.apply(record) > 0;
        self.maybe_compact(&mut state).await?;
        Ok(changed)
    }
}

#[async_trait]
impl EventStore for FileEventStore {
    async fn append(
        &self,
        message: &EventMessage,
        recipients: &BTreeSet<DestinationId>,
    ) -> Result<StoreReceipt, StorageError> {
        let mut state = self.state.lock().await;
        if let Some(receipt) = state.index.existing_receipt(message.id()) {
            return Ok(receipt);
        }

        let record = state
            .index
            .append_record(message, recipients, Timestamp::now());
        self.write_record(&mut state, &record).await?;
        state.index.apply(record);
        let receipt = state
            .index
            .receipt(message.id())
            .ok_or(StorageError::MessageNotFound(message.id()))?;
        self.maybe_compact(&mut state).await?;
        Ok(receipt)
    }

    async fn get(&self, message_id: MessageId) -> Result<Option<LoggedEvent>, StorageError> {
        Ok(self.state.lock().await.index.get(message_id))
    }

    async fn query(&self, query: &EventQuery) -> Result<Vec<LoggedEvent>, StorageError> {
        Ok(self.state.lock().await.index.query(query))
    }

    async fn mark_confirmed(
        &self,
        message_id: MessageId,
        destination: DestinationId,
        at: Timestamp,
    ) -> Result<bool, StorageError> {
        self.mutate(LogRecord::Confirm {
            message_id,
            destination,
            at,
        })
        .await
    }

    async fn record_failure(
        &self,
        message_id: MessageId,
        destination: DestinationId,
        at: Timestamp,
        error: &str,
        abandon: bool,
    ) -> Result<bool, StorageError> {
        self.mutate(LogRecord::Failure {
            message_id,
            destination,
            at,
            error: error.to_string(),
            abandon,
        })
        .await
    }

    async fn mark_retrying(
        &self,
        message_id: MessageId,
        destination: DestinationId,
    ) -> Result<bool, StorageError> {
        self.mutate(LogRecord::Retry {
            message_id,
            destination,
        })
        .await
    }

    async fn forget_destination(&self, destination: DestinationId) -> Result<usize, StorageError> {
        let mut state = self.state.lock().await;
        let record = LogRecord::Forget { destination };
        if !state.index.would_change(&record)? {
            return Ok(0);
        }
        self.write_record(&mut state, &record).await?;
        let touched = state.index.apply(record);
        self.maybe_compact(&mut state).await?;
        Ok(touched)
    }

    async fn unfinished_executions(&self) -> Result<Vec<ExecutionId>, StorageError> {
        Ok(self.state.lock().await.index.unfinished_executions())
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if let Some(file) = state.file.as_mut() {
            file.flush().await?;
            file.sync_data().await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if let Some(mut file) = state.file.take() {
            file.flush().await?;
            file.sync_all().await?;
            info!(path = %self.path.display(), "Event log closed");
        }
        Ok(())
    }
}
