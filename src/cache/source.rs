use std::{io, path::Path};

use async_trait::async_trait;
use bytes::Bytes;

use crate::util::http_date::format_system_time;

/// Metadata and (possibly) contents of one file read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedFile {
    /// HTTP-date of the file's modification time.
    pub last_modified: String,
    /// Full contents, or empty when `last_modified` matched the caller's validator.
    pub content: Bytes,
}

/// Where the cache reads files from.
#[async_trait]
pub trait FileSource: Send + Sync {
    /// Stat `path` and read it unless its modification token equals
    /// `if_modified_since`.
    async fn load(&self, path: &Path, if_modified_since: &str) -> io::Result<LoadedFile>;
}

/// [`FileSource`] backed by the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct DiskFileSource;

#[async_trait]
impl FileSource for DiskFileSource {
    async fn load(&self, path: &Path, if_modified_since: &str) -> io::Result<LoadedFile> {
        let metadata = tokio::fs::metadata(path).await?;
        if metadata.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                "path is a directory",
            ));
        }
        let last_modified = format_system_time(metadata.modified()?);

        if last_modified == if_modified_since {
            return Ok(LoadedFile {
                last_modified,
                content: Bytes::new(),
            });
        }

        let content = tokio::fs::read(path).await?;
        Ok(LoadedFile {
            last_modified,
            content: Bytes::from(content),
        })
    }
}
