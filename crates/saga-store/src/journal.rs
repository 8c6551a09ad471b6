use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Result, StoreError};
use crate::log::{CorrelationId, Log, LogId, Outcome, SagaOutcome};
use crate::state::StoreState;
use crate::store::Store;

/// One line of the journal.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "kebab-case")]
enum JournalEntry {
    Logged {
        log: Log,
    },
    Acked {
        id: LogId,
        outcome: Outcome,
        at: DateTime<Utc>,
    },
    Closed {
        correlation_id: CorrelationId,
        outcome: SagaOutcome,
    },
}

struct Journal {
    state: StoreState,
    file: File,
    /// Length of the file up to the last entry that was synced.
    len: u64,
}

impl Journal {
    /// Append one entry and sync it to disk.
    ///
    /// Bytes beyond the last synced entry, left by an append that failed
    /// part way, are cut off first so that a new entry always starts a line.
    async fn append(&mut self, path: &Path, entry: &JournalEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        let on_disk = self.file.metadata().await.map_err(io_err)?.len();
        if on_disk > self.len {
            warn!(
                path = %path.display(),
                discarded = on_disk - self.len,
                "discarding unacknowledged journal bytes"
            );
            self.file.set_len(self.len).await.map_err(io_err)?;
        }

        if let Err(source) = self.write_line(&line).await {
            if let Err(truncate_error) = self.file.set_len(self.len).await {
                warn!(
                    path = %path.display(),
                    error = %truncate_error,
                    "failed to cut back journal after a failed append"
                );
            }
            return Err(io_err(source));
        }
        self.len += line.len() as u64;
        Ok(())
    }

    async fn write_line(&mut self, line: &[u8]) -> std::io::Result<()> {
        self.file.write_all(line).await?;
        self.file.flush().await?;
        self.file.sync_data().await
    }
}

/// Durable store backed by an append-only JSON-lines journal.
///
/// Each mutation is appended and synced to disk before it is applied in
/// memory and reported as successful. Opening an existing journal replays it.
/// A torn final line, left by a crash in the middle of a write, is discarded.
pub struct JournalStore {
    path: PathBuf,
    inner: Mutex<Journal>,
}

impl JournalStore {
    /// Open the journal at `path`, creating it if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Io` if the file cannot be read or opened, and
    /// `StoreError::CorruptJournal` if a line other than the last cannot be
    /// decoded.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(io_err(e)),
        };
        let (state, valid_len) = replay(&path, &contents)?;

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(io_err)?;
        if valid_len < contents.len() {
            warn!(
                path = %path.display(),
                discarded = contents.len() - valid_len,
                "discarding torn journal tail"
            );
            file.set_len(valid_len as u64).await.map_err(io_err)?;
        }

        debug!(path = %path.display(), "opened saga journal");
        Ok(Self {
            path,
            inner: Mutex::new(Journal {
                state,
                file,
                len: valid_len as u64,
            }),
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl std::fmt::Debug for JournalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JournalStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn replay(path: &Path, contents: &str) -> Result<(StoreState, usize)> {
    let mut state = StoreState::default();
    let mut offset = 0;

    for (index, line) in contents.split_inclusive('\n').enumerate() {
        // An unterminated line was never acknowledged to a caller.
        if !line.ends_with('\n') {
            break;
        }
        if line.trim().is_empty() {
            offset += line.len();
            continue;
        }
        let entry = match serde_json::from_str::<JournalEntry>(line.trim_end()) {
            Ok(entry) => entry,
            Err(source) => {
                return Err(StoreError::CorruptJournal {
                    path: path.to_path_buf(),
                    line: index + 1,
                    source,
                });
            }
        };
        match entry {
            JournalEntry::Logged { log } => state.insert(log)?,
            JournalEntry::Acked { id, outcome, at } => {
                state.ack(id, &outcome, at)?;
            }
            JournalEntry::Closed {
                correlation_id,
                outcome,
            } => {
                state.close(correlation_id, outcome);
            }
        }
        offset += line.len();
    }

    Ok((state, offset))
}

#[async_trait]
impl Store for JournalStore {
    async fn log(&self, log: Log) -> Result<()> {
        let mut journal = self.inner.lock().await;
        journal.state.check_insert(&log)?;
        let entry = JournalEntry::Logged { log: log.clone() };
        journal.append(&self.path, &entry).await?;
        journal.state.insert(log)
    }

    async fn ack(&self, id: LogId, outcome: Outcome) -> Result<()> {
        let mut journal = self.inner.lock().await;
        if !journal.state.ack_changes(id, &outcome)? {
            return Ok(());
        }
        let at = Utc::now();
        let entry = JournalEntry::Acked {
            id,
            outcome: outcome.clone(),
            at,
        };
        journal.append(&self.path, &entry).await?;
        journal.state.ack(id, &outcome, at)?;
        Ok(())
    }

    async fn unacknowledged_steps(&self, correlation_id: &CorrelationId) -> Result<Vec<Log>> {
        Ok(self.inner.lock().await.state.unacknowledged(correlation_id))
    }

    async fn uncommitted_sagas(&self) -> Result<Vec<Log>> {
        Ok(self.inner.lock().await.state.uncommitted())
    }

    async fn saga_steps(&self, correlation_id: &CorrelationId) -> Result<Vec<Log>> {
        Ok(self.inner.lock().await.state.saga_logs(correlation_id))
    }

    async fn close_saga(
        &self,
        correlation_id: &CorrelationId,
        outcome: SagaOutcome,
    ) -> Result<SagaOutcome> {
        let mut journal = self.inner.lock().await;
        if let Some(existing) = journal.state.outcome(correlation_id) {
            return Ok(existing);
        }
        let entry = JournalEntry::Closed {
            correlation_id: correlation_id.clone(),
            outcome,
        };
        journal.append(&self.path, &entry).await?;
        let (recorded, _) = journal.state.close(correlation_id.clone(), outcome);
        Ok(recorded)
    }

    async fn saga_outcome(&self, correlation_id: &CorrelationId) -> Result<Option<SagaOutcome>> {
        Ok(self.inner.lock().await.state.outcome(correlation_id))
    }
}
