//! File cache configuration.

use std::time::Duration;

const DEFAULT_FAST_WINDOW_MS: u64 = 120;

/// Tuning for [`ConditionalFileCache`](super::ConditionalFileCache).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileCacheConfig {
    /// Requests for the same path closer together than this are "fast" and
    /// may be answered from memory.
    pub fast_window: Duration,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            fast_window: Duration::from_millis(DEFAULT_FAST_WINDOW_MS),
        }
    }
}

impl From<&crate::config::CacheSettings> for FileCacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            fast_window: settings.fast_window,
        }
    }
}

impl FileCacheConfig {
    pub(crate) fn fast_window_millis(&self) -> i64 {
        i64::try_from(self.fast_window.as_millis()).unwrap_or(i64::MAX)
    }
}
