//! Read-through file cache with conditional-GET semantics.
//!
//! File bodies are held in memory only while a path is being requested in a
//! burst. Each entry remembers when it was last read; a read landing within
//! the fast window of the previous one may be answered from memory, and the
//! first slow read afterwards drops the body again.
//!
//! Locking happens at two levels. The registry lock guards the path map and is
//! held across a disk read only while the very first entry for a path is being
//! created. After that, callers take the entry's own lock, which is held for the
//! whole decision including any disk read, so requests for one path serialize
//! while different paths proceed independently.

use std::{
    collections::HashMap,
    io,
    path::{Path, PathBuf},
    sync::Arc,
};

use bytes::Bytes;
use metrics::{counter, gauge};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::util::{Clock, SystemClock};

use super::{
    config::FileCacheConfig,
    content_type::content_type_for,
    source::{DiskFileSource, FileSource, LoadedFile},
};

const SOURCE: &str = "evex::cache";

pub(crate) const METRIC_FAST_HIT: &str = "evex_file_cache_fast_hit_total";
pub(crate) const METRIC_DISK_READ: &str = "evex_file_cache_disk_read_total";
pub(crate) const METRIC_EVICT: &str = "evex_file_cache_evict_total";
pub(crate) const METRIC_PROMOTE: &str = "evex_file_cache_promote_total";
pub(crate) const METRIC_ENTRIES: &str = "evex_file_cache_entries";

#[derive(Debug, Error)]
pub enum FileCacheError {
    #[error("`{path}` has no file extension")]
    InvalidPath { path: PathBuf },
    #[error("`{path}` does not exist")]
    NotFound { path: PathBuf },
    #[error("failed to read `{path}`: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FileCacheError {
    fn from_io(path: &Path, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::NotFound {
                path: path.to_path_buf(),
            }
        } else {
            Self::Io {
                path: path.to_path_buf(),
                source,
            }
        }
    }
}

/// Result of [`ConditionalFileCache::get_file`].
///
/// When `is_modified` is false the caller's validator is still current and
/// `content` is empty; answer with `304 Not Modified`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileResponse {
    pub content_type: String,
    pub content: Bytes,
    pub last_modified: String,
    pub is_modified: bool,
}

impl FileResponse {
    fn not_modified(content_type: &str, last_modified: &str) -> Self {
        Self {
            content_type: content_type.to_string(),
            content: Bytes::new(),
            last_modified: last_modified.to_string(),
            is_modified: false,
        }
    }

    fn from_loaded(content_type: &str, loaded: LoadedFile, if_modified_since: &str) -> Self {
        if loaded.last_modified == if_modified_since {
            return Self::not_modified(content_type, &loaded.last_modified);
        }
        Self {
            content_type: content_type.to_string(),
            content: loaded.content,
            last_modified: loaded.last_modified,
            is_modified: true,
        }
    }
}

#[derive(Debug)]
struct CacheEntry {
    content_type: String,
    /// Empty means "not held in memory", not "empty file".
    content: Bytes,
    last_modified: String,
    last_access_millis: i64,
}

pub struct ConditionalFileCache {
    config: FileCacheConfig,
    source: Arc<dyn FileSource>,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<PathBuf, Arc<Mutex<CacheEntry>>>>,
}

impl ConditionalFileCache {
    pub fn new(config: FileCacheConfig) -> Self {
        Self::with_source(config, Arc::new(DiskFileSource), Arc::new(SystemClock))
    }

    pub fn with_source(
        config: FileCacheConfig,
        source: Arc<dyn FileSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            source,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch `path`, honouring the client's `If-Modified-Since` validator.
    ///
    /// Pass an empty `if_modified_since` to always receive the body.
    pub async fn get_file(
        &self,
        path: &Path,
        if_modified_since: &str,
    ) -> Result<FileResponse, FileCacheError> {
        if path.extension().is_none() {
            return Err(FileCacheError::InvalidPath {
                path: path.to_path_buf(),
            });
        }

        let entry = {
            let mut registry = self.entries.lock().await;
            match registry.get(path) {
                Some(entry) => Arc::clone(entry),
                None => {
                    let loaded = self.read(path, if_modified_since).await?;
                    let content_type = content_type_for(path);
                    registry.insert(
                        path.to_path_buf(),
                        Arc::new(Mutex::new(CacheEntry {
                            content_type: content_type.clone(),
                            content: Bytes::new(),
                            last_modified: loaded.last_modified.clone(),
                            last_access_millis: self.clock.now_millis(),
                        })),
                    );
                    gauge!(METRIC_ENTRIES).set(registry.len() as f64);
                    return Ok(FileResponse::from_loaded(
                        &content_type,
                        loaded,
                        if_modified_since,
                    ));
                }
            }
        };

        let mut entry = entry.lock().await;
        let outcome = self.serve_entry(&mut entry, path, if_modified_since).await;
        entry.last_access_millis = self.clock.now_millis();
        outcome
    }

    async fn serve_entry(
        &self,
        entry: &mut CacheEntry,
        path: &Path,
        if_modified_since: &str,
    ) -> Result<FileResponse, FileCacheError> {
        let is_fast =
            self.clock.now_millis() - entry.last_access_millis < self.config.fast_window_millis();

        if is_fast && entry.last_modified == if_modified_since {
            counter!(METRIC_FAST_HIT).increment(1);
            return Ok(FileResponse::not_modified(
                &entry.content_type,
                &entry.last_modified,
            ));
        }

        if is_fast && !entry.content.is_empty() {
            counter!(METRIC_FAST_HIT).increment(1);
            return Ok(FileResponse {
                content_type: entry.content_type.clone(),
                content: entry.content.clone(),
                last_modified: entry.last_modified.clone(),
                is_modified: true,
            });
        }

        let loaded = self.read(path, if_modified_since).await?;

        if !is_fast && !entry.content.is_empty() {
            entry.content = Bytes::new();
            counter!(METRIC_EVICT).increment(1);
            debug!(target = SOURCE, path = %path.display(), "evicted cached body");
        }

        // Every disk read refreshes the validator, not only promotions.
        entry.last_modified.clone_from(&loaded.last_modified);

        if is_fast && entry.content.is_empty() && !loaded.content.is_empty() {
            entry.content = loaded.content.clone();
            counter!(METRIC_PROMOTE).increment(1);
            debug!(
                target = SOURCE,
                path = %path.display(),
                bytes = entry.content.len(),
                "promoted body into memory"
            );
        }

        Ok(FileResponse::from_loaded(
            &entry.content_type,
            loaded,
            if_modified_since,
        ))
    }

    async fn read(&self, path: &Path, if_modified_since: &str) -> Result<LoadedFile, FileCacheError> {
        counter!(METRIC_DISK_READ).increment(1);
        self.source
            .load(path, if_modified_since)
            .await
            .map_err(|err| FileCacheError::from_io(path, err))
    }

    /// Number of distinct paths ever served.
    pub async fn entry_count(&self) -> usize {
        self.entries.lock().await.len()
    }

    /// Size of the body currently held in memory for `path`, if it has an entry.
    pub async fn cached_bytes(&self, path: &Path) -> Option<usize> {
        let entry = self.entries.lock().await.get(path).cloned()?;
        let entry = entry.lock().await;
        Some(entry.content.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        Mutex as StdMutex,
        atomic::{AtomicUsize, Ordering},
    };
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::util::ManualClock;

    const FAST: i64 = 10;
    const SLOW: i64 = 500;
    const T1: &str = "Sun, 06 Nov 1994 08:49:37 GMT";
    const T2: &str = "Mon, 07 Nov 1994 08:49:37 GMT";

    /// In-memory source counting every load that reaches it.
    struct CountingSource {
        files: StdMutex<HashMap<PathBuf, (String, Bytes)>>,
        loads: AtomicUsize,
    }

    impl CountingSource {
        fn new() -> Self {
            Self {
                files: StdMutex::new(HashMap::new()),
                loads: AtomicUsize::new(0),
            }
        }

        fn put(&self, path: &str, modified: &str, body: &'static str) {
            self.files.lock().unwrap().insert(
                PathBuf::from(path),
                (modified.to_string(), Bytes::from_static(body.as_bytes())),
            );
        }

        fn loads(&self) -> usize {
            self.loads.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl FileSource for CountingSource {
        async fn load(&self, path: &Path, if_modified_since: &str) -> io::Result<LoadedFile> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            let files = self.files.lock().unwrap();
            let Some((modified, body)) = files.get(path) else {
                return Err(io::Error::new(io::ErrorKind::NotFound, "missing"));
            };
            let content = if modified == if_modified_since {
                Bytes::new()
            } else {
                body.clone()
            };
            Ok(LoadedFile {
                last_modified: modified.clone(),
                content,
            })
        }
    }

    fn fixture() -> (ConditionalFileCache, Arc<CountingSource>, Arc<ManualClock>) {
        let source = Arc::new(CountingSource::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let cache = ConditionalFileCache::with_source(
            FileCacheConfig {
                fast_window: Duration::from_millis(120),
            },
            source.clone(),
            clock.clone(),
        );
        (cache, source, clock)
    }

    #[tokio::test]
    async fn rejects_paths_without_extension() {
        let (cache, source, _) = fixture();
        let err = cache
            .get_file(Path::new("data/blog"), "")
            .await
            .expect_err("directory-like path");
        assert!(matches!(err, FileCacheError::InvalidPath { .. }));
        assert_eq!(source.loads(), 0);
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn missing_file_is_not_found_and_leaves_no_entry() {
        let (cache, _, _) = fixture();
        let err = cache
            .get_file(Path::new("nope.json"), "")
            .await
            .expect_err("missing");
        assert!(matches!(err, FileCacheError::NotFound { .. }));
        assert_eq!(cache.entry_count().await, 0);
    }

    #[tokio::test]
    async fn first_request_returns_body_without_caching_it() {
        let (cache, source, _) = fixture();
        source.put("a.json", T1, "{\"a\":1}");

        let res = cache.get_file(Path::new("a.json"), "").await.unwrap();
        assert!(res.is_modified);
        assert_eq!(res.content, Bytes::from_static(b"{\"a\":1}"));
        assert_eq!(res.last_modified, T1);
        assert_eq!(res.content_type, "application/json; charset=utf-8");
        assert_eq!(cache.entry_count().await, 1);
        assert_eq!(cache.cached_bytes(Path::new("a.json")).await, Some(0));
    }

    #[tokio::test]
    async fn first_request_with_current_validator_is_not_modified() {
        let (cache, source, _) = fixture();
        source.put("a.json", T1, "{}");

        let res = cache.get_file(Path::new("a.json"), T1).await.unwrap();
        assert!(!res.is_modified);
        assert!(res.content.is_empty());
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn fast_repeat_with_validator_skips_disk() {
        let (cache, source, clock) = fixture();
        source.put("a.json", T1, "{}");

        cache.get_file(Path::new("a.json"), "").await.unwrap();
        clock.advance(FAST);
        let res = cache.get_file(Path::new("a.json"), T1).await.unwrap();

        assert!(!res.is_modified);
        assert!(res.content.is_empty());
        assert_eq!(source.loads(), 1);
    }

    #[tokio::test]
    async fn fast_burst_promotes_then_serves_from_memory() {
        let (cache, source, clock) = fixture();
        source.put("post.mdhtml", T1, "<h1>post</h1>");
        let path = Path::new("post.mdhtml");

        cache.get_file(path, "").await.unwrap();
        clock.advance(FAST);
        let promoted = cache.get_file(path, "").await.unwrap();
        assert_eq!(source.loads(), 2);
        assert_eq!(cache.cached_bytes(path).await, Some(13));
        assert!(promoted.is_modified);

        for _ in 0..5 {
            clock.advance(FAST);
            let hot = cache.get_file(path, "").await.unwrap();
            assert_eq!(hot.content, Bytes::from_static(b"<h1>post</h1>"));
            assert!(hot.is_modified);
        }
        assert_eq!(source.loads(), 2);
    }

    #[tokio::test]
    async fn slow_read_evicts_body() {
        let (cache, source, clock) = fixture();
        source.put("post.mdhtml", T1, "<h1>post</h1>");
        let path = Path::new("post.mdhtml");

        cache.get_file(path, "").await.unwrap();
        clock.advance(FAST);
        cache.get_file(path, "").await.unwrap();
        assert_eq!(cache.cached_bytes(path).await, Some(13));

        clock.advance(SLOW);
        let res = cache.get_file(path, "").await.unwrap();
        assert!(res.is_modified);
        assert_eq!(res.content, Bytes::from_static(b"<h1>post</h1>"));
        assert_eq!(cache.cached_bytes(path).await, Some(0));
    }

    #[tokio::test]
    async fn slow_not_modified_still_evicts() {
        let (cache, source, clock) = fixture();
        source.put("post.mdhtml", T1, "<h1>post</h1>");
        let path = Path::new("post.mdhtml");

        cache.get_file(path, "").await.unwrap();
        clock.advance(FAST);
        cache.get_file(path, "").await.unwrap();

        clock.advance(SLOW);
        let res = cache.get_file(path, T1).await.unwrap();
        assert!(!res.is_modified);
        assert!(res.content.is_empty());
        assert_eq!(cache.cached_bytes(path).await, Some(0));
    }

    #[tokio::test]
    async fn changed_file_is_picked_up_after_slow_gap() {
        let (cache, source, clock) = fixture();
        source.put("a.json", T1, "old");

        cache.get_file(Path::new("a.json"), "").await.unwrap();
        source.put("a.json", T2, "new");
        clock.advance(SLOW);

        let res = cache.get_file(Path::new("a.json"), T1).await.unwrap();
        assert!(res.is_modified);
        assert_eq!(res.content, Bytes::from_static(b"new"));
        assert_eq!(res.last_modified, T2);
    }

    #[tokio::test]
    async fn warm_entry_is_idempotent() {
        let (cache, source, clock) = fixture();
        source.put("a.css", T1, "body{}");
        let path = Path::new("a.css");

        cache.get_file(path, "").await.unwrap();
        clock.advance(FAST);
        cache.get_file(path, "").await.unwrap();
        let reads = source.loads();

        clock.advance(FAST);
        let first = cache.get_file(path, "").await.unwrap();
        clock.advance(FAST);
        let second = cache.get_file(path, "").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.loads(), reads);
    }

    #[tokio::test]
    async fn errors_after_entry_exists_still_touch_access_time() {
        let (cache, source, clock) = fixture();
        source.put("a.json", T1, "{}");
        let path = Path::new("a.json");

        cache.get_file(path, "").await.unwrap();
        source.files.lock().unwrap().clear();

        clock.advance(SLOW);
        let err = cache.get_file(path, "").await.expect_err("file removed");
        assert!(matches!(err, FileCacheError::NotFound { .. }));

        // The failed read refreshed last access, so this repeat counts as fast
        // and the still-current validator is answered without disk access.
        clock.advance(FAST);
        let loads = source.loads();
        let res = cache.get_file(path, T1).await.unwrap();
        assert!(!res.is_modified);
        assert_eq!(source.loads(), loads);
    }

    #[tokio::test]
    async fn memory_is_released_once_bursts_end() {
        let (cache, source, clock) = fixture();
        let names = ["a.json", "b.json", "c.json"];
        for name in names {
            source.put(name, T1, "payload");
        }

        for name in names {
            cache.get_file(Path::new(name), "").await.unwrap();
            clock.advance(FAST);
            cache.get_file(Path::new(name), "").await.unwrap();
        }
        clock.advance(SLOW);
        for name in names {
            cache.get_file(Path::new(name), T1).await.unwrap();
        }

        for name in names {
            assert_eq!(cache.cached_bytes(Path::new(name)).await, Some(0));
        }
        assert_eq!(cache.entry_count().await, 3);
    }

    #[tokio::test]
    async fn concurrent_first_requests_create_one_entry() {
        let (cache, source, _) = fixture();
        source.put("a.json", T1, "{}");
        let cache = Arc::new(cache);

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            tasks.push(tokio::spawn(async move {
                cache.get_file(Path::new("a.json"), "").await.unwrap()
            }));
        }
        for task in tasks {
            let res = task.await.unwrap();
            assert_eq!(res.last_modified, T1);
        }
        assert_eq!(cache.entry_count().await, 1);
    }
}
