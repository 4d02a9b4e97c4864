use std::{sync::Arc, time::Instant};

use axum::{
    body::Body, extract::State, http::Request, middleware::Next, response::Response,
};
use tracing::{error, warn};
use uuid::Uuid;

use crate::{
    application::error::ErrorReport,
    infra::access_log::{AccessEntry, AccessLog},
    util::Clock,
};

use super::auth::VisitorContext;

#[derive(Clone)]
pub struct RequestContext {
    pub request_id: String,
}

pub async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let request_id = Uuid::new_v4().to_string();
    let ctx = RequestContext {
        request_id: request_id.clone(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();

    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let mut response = next.run(request).await;
    let status = response.status();

    if status.is_client_error() || status.is_server_error() {
        let elapsed_ms = start.elapsed().as_millis();
        let visitor = response
            .extensions()
            .get::<VisitorContext>()
            .map(|visitor| visitor.id.clone())
            .unwrap_or_default();
        let report = response.extensions_mut().remove::<ErrorReport>();
        let (source, messages) = match report {
            Some(report) => (report.source, report.messages),
            None => ("unknown", Vec::new()),
        };
        let detail = messages
            .first()
            .cloned()
            .unwrap_or_else(|| "no diagnostic available".to_string());

        if status.is_server_error() {
            error!(
                target = "evex::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                visitor = visitor,
                "request failed",
            );
        } else {
            warn!(
                target = "evex::http::response",
                status = status.as_u16(),
                method = %method,
                path = %uri.path(),
                query = uri.query().unwrap_or(""),
                elapsed_ms = elapsed_ms,
                source = source,
                detail = %detail,
                chain = ?messages,
                request_id = request_id,
                visitor = visitor,
                "client request error",
            );
        }
    }

    response
}

/// Which responses end up in the access log file.
#[derive(Clone)]
pub struct AccessPolicy {
    pub log: Arc<AccessLog>,
    pub min_status: u16,
    pub clock: Arc<dyn Clock>,
}

impl AccessPolicy {
    /// Same log, recording every response regardless of status.
    pub fn every_status(&self) -> Self {
        Self {
            min_status: 0,
            ..self.clone()
        }
    }
}

pub async fn log_access(
    State(policy): State<AccessPolicy>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let response = next.run(request).await;
    let status = response.status();

    if status.as_u16() >= policy.min_status {
        policy
            .log
            .record(
                policy.clock.as_ref(),
                AccessEntry {
                    request_id: &request_id,
                    status,
                    method: &method,
                    path: uri.path(),
                    query: uri.query().unwrap_or(""),
                    elapsed: start.elapsed(),
                },
            )
            .await;
    }

    response
}
