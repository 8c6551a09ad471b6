use std::path::PathBuf;

use thiserror::Error;

use crate::log::LogId;

/// Error returned by [`Store`](crate::Store) operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StoreError {
    #[error("failed to access journal '{path}'")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode journal entry")]
    Serialization(#[from] serde_json::Error),

    #[error("journal '{path}' is corrupt at line {line}")]
    CorruptJournal {
        path: PathBuf,
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    #[error("log '{0}' already exists")]
    DuplicateLog(LogId),

    #[error("log '{0}' does not exist")]
    UnknownLog(LogId),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;
