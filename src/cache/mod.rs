//! Conditional file cache.
//!
//! Serves site files with `Last-Modified` / `If-Modified-Since` handling and
//! keeps bodies in memory only while a path is hot:
//!
//! - [`ConditionalFileCache`] decides between a memory hit, a conditional disk
//!   read and a `304`.
//! - [`FileSource`] abstracts the filesystem so the decision logic can be
//!   driven deterministically.

mod config;
mod content_type;
mod file_cache;
mod source;

pub use config::FileCacheConfig;
pub use content_type::content_type_for;
pub use file_cache::{ConditionalFileCache, FileCacheError, FileResponse};
pub use source::{DiskFileSource, FileSource, LoadedFile};

pub(crate) mod metric_names {
    pub(crate) use super::file_cache::{
        METRIC_DISK_READ, METRIC_ENTRIES, METRIC_EVICT, METRIC_FAST_HIT, METRIC_PROMOTE,
    };
}
