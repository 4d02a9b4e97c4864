//! Turning [`FileResponse`]s into HTTP responses.

use std::path::Path;

use axum::{
    body::Body,
    http::{
        HeaderMap, HeaderName, HeaderValue, StatusCode,
        header::{
            CACHE_CONTROL, CONTENT_LENGTH, CONTENT_TYPE, DATE, IF_MODIFIED_SINCE, LAST_MODIFIED,
            X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS,
        },
    },
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::{
    application::error::HttpError,
    cache::{ConditionalFileCache, FileCacheError, FileResponse},
    util::http_date::http_date_now,
};

const SOURCE: &str = "evex::http::files";

/// Six months, for assets whose URLs change with every build.
pub const LONG_MAX_AGE_SECS: u64 = 60 * 60 * 24 * 30 * 6;

/// Serve `path` with `Cache-Control: public, no-cache`, answering `304` when
/// the request's `If-Modified-Since` is still current.
pub async fn serve_no_cache(
    cache: &ConditionalFileCache,
    path: &Path,
    request_headers: &HeaderMap,
) -> Response {
    let if_modified_since = request_headers
        .get(IF_MODIFIED_SINCE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");

    match cache.get_file(path, if_modified_since).await {
        Ok(file) => file_response(file, "public, no-cache", true),
        Err(err) => file_error(path, err),
    }
}

/// Serve `path` with a long public max-age. Validators are ignored.
pub async fn serve_max_cache(cache: &ConditionalFileCache, path: &Path) -> Response {
    match cache.get_file(path, "").await {
        Ok(file) => file_response(
            file,
            &format!("public, max-age={LONG_MAX_AGE_SECS}"),
            false,
        ),
        Err(err) => file_error(path, err),
    }
}

fn file_response(file: FileResponse, cache_control: &str, with_validator: bool) -> Response {
    let FileResponse {
        content_type,
        content,
        last_modified,
        is_modified,
    } = file;

    if !is_modified {
        let mut response = StatusCode::NOT_MODIFIED.into_response();
        let headers = response.headers_mut();
        set_header(headers, DATE, &http_date_now());
        set_header(headers, LAST_MODIFIED, &last_modified);
        set_header(headers, CACHE_CONTROL, cache_control);
        return response;
    }

    let length = content.len();
    let mut response = Response::new(Body::from(content));
    let headers = response.headers_mut();
    set_header(headers, DATE, &http_date_now());
    if with_validator {
        set_header(headers, LAST_MODIFIED, &last_modified);
    }
    set_header(headers, CACHE_CONTROL, cache_control);
    set_header(headers, CONTENT_TYPE, &content_type);
    headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    headers.insert(X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    response
}

fn file_error(path: &Path, err: FileCacheError) -> Response {
    if let FileCacheError::Io { .. } = err {
        error!(
            target = SOURCE,
            path = %path.display(),
            error = %err,
            "failed to serve file"
        );
    }
    HttpError::from(err).into_response()
}

fn set_header(headers: &mut HeaderMap, name: HeaderName, value: &str) {
    if let Ok(value) = HeaderValue::from_str(value) {
        headers.insert(name, value);
    }
}
