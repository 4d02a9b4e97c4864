use std::path::PathBuf;

use thiserror::Error;

use crate::infra::writer::WriterError;

#[derive(Debug, Error)]
pub enum UserStoreError {
    #[error("user `{id}` not found")]
    UserNotFound { id: String },
    #[error("users file is corrupt at line {line}: {reason}")]
    Corrupt { line: usize, reason: String },
    #[error("save delay must be at least {min_ms}ms, got {delay_ms}ms")]
    InvalidDelay { delay_ms: u128, min_ms: u128 },
    #[error("user store is closed")]
    Closed,
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Writer(#[from] WriterError),
}

impl UserStoreError {
    pub(crate) fn corrupt(line: usize, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            line,
            reason: reason.into(),
        }
    }
}
