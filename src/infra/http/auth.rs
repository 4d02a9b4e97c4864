use axum::{
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header::AUTHORIZATION},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::application::error::HttpError;

use super::public::AppState;

const SOURCE: &str = "evex::http::auth";

/// The visitor behind an authorized request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorContext {
    pub id: String,
    pub unlocked: bool,
}

/// What the `Authorization` header holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Credential<'a> {
    Missing,
    NotBearer,
    Bearer(&'a str),
}

pub(crate) fn credential(headers: &HeaderMap) -> Credential<'_> {
    let Some(value) = headers.get(AUTHORIZATION) else {
        return Credential::Missing;
    };
    let Ok(raw) = value.to_str() else {
        return Credential::NotBearer;
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Credential::Missing;
    }
    match raw.strip_prefix("Bearer ") {
        Some(token) => Credential::Bearer(token.trim()),
        None => Credential::NotBearer,
    }
}

/// Admit only requests carrying the id of a known visitor.
pub async fn auth_guard(
    State(state): State<AppState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let id = match credential(request.headers()) {
        Credential::Missing => {
            return HttpError::new(
                SOURCE,
                StatusCode::UNAUTHORIZED,
                "missing auth",
                "request has no Authorization header",
            )
            .into_response();
        }
        Credential::NotBearer => {
            return HttpError::new(
                SOURCE,
                StatusCode::UNAUTHORIZED,
                "missing bearer",
                "Authorization header is not a bearer token",
            )
            .into_response();
        }
        Credential::Bearer(id) => id.to_string(),
    };

    let unlocked = match state.users.get_state(&id) {
        Ok(unlocked) => unlocked,
        Err(err) => {
            return HttpError::from_error(
                SOURCE,
                StatusCode::FORBIDDEN,
                "suspicious activity detected",
                &err,
            )
            .into_response();
        }
    };

    let visitor = VisitorContext { id, unlocked };
    request.extensions_mut().insert(visitor.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(visitor);
    response
}
