//! Append-only request log kept next to the server.
//!
//! One line per recorded request:
//! `<unix_millis>|<request_id>|<status>|<method>|<path>|<query>|<elapsed>µs`.

use std::{path::Path, time::Duration};

use axum::http::{Method, StatusCode};
use tracing::warn;

use crate::util::Clock;

use super::writer::{SequentialFileWriter, WriteMode, WriterError};

const SOURCE: &str = "evex::access_log";

/// One finished request.
#[derive(Debug, Clone)]
pub struct AccessEntry<'a> {
    pub request_id: &'a str,
    pub status: StatusCode,
    pub method: &'a Method,
    pub path: &'a str,
    pub query: &'a str,
    pub elapsed: Duration,
}

pub struct AccessLog {
    writer: SequentialFileWriter,
}

impl AccessLog {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, WriterError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if let Err(source) = tokio::fs::create_dir_all(parent).await {
                return Err(WriterError::Open {
                    path: path.to_path_buf(),
                    source,
                });
            }
        }
        Ok(Self {
            writer: SequentialFileWriter::open(path).await?,
        })
    }

    pub fn path(&self) -> &Path {
        self.writer.path()
    }

    pub async fn record(&self, clock: &dyn Clock, entry: AccessEntry<'_>) {
        let line = format_line(clock.now_millis(), &entry);
        if let Err(err) = self.writer.submit(line, WriteMode::Append).await {
            warn!(target = SOURCE, error = %err, "dropped access log line");
        }
    }

    pub async fn close(&self) {
        self.writer.close().await;
    }
}

fn format_line(now_millis: i64, entry: &AccessEntry<'_>) -> String {
    format!(
        "{now_millis}|{}|{}|{}|{}|{}|{}µs\n",
        entry.request_id,
        entry.status.as_u16(),
        entry.method,
        entry.path,
        entry.query,
        entry.elapsed.as_micros()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::ManualClock;

    #[test]
    fn line_layout() {
        let entry = AccessEntry {
            request_id: "req-1",
            status: StatusCode::FORBIDDEN,
            method: &Method::GET,
            path: "/data/blog/red33m",
            query: "",
            elapsed: Duration::from_micros(420),
        };
        assert_eq!(
            format_line(1_700_000_000_000, &entry),
            "1700000000000|req-1|403|GET|/data/blog/red33m||420µs\n"
        );
    }

    #[tokio::test]
    async fn appends_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("logs").join("requests.log");
        let clock = ManualClock::new(5);

        let log = AccessLog::open(&path).await.expect("open");
        log.record(
            &clock,
            AccessEntry {
                request_id: "a",
                status: StatusCode::NOT_FOUND,
                method: &Method::GET,
                path: "/x.js",
                query: "",
                elapsed: Duration::ZERO,
            },
        )
        .await;
        log.close().await;

        let log = AccessLog::open(&path).await.expect("reopen");
        log.record(
            &clock,
            AccessEntry {
                request_id: "b",
                status: StatusCode::UNAUTHORIZED,
                method: &Method::POST,
                path: "/red33m",
                query: "v=1",
                elapsed: Duration::ZERO,
            },
        )
        .await;
        log.close().await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        assert_eq!(
            contents,
            "5|a|404|GET|/x.js||0µs\n5|b|401|POST|/red33m|v=1|0µs\n"
        );
    }
}
