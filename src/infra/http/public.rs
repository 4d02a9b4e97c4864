use std::{path::PathBuf, sync::Arc};

use axum::{
    Extension, Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, Method, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
};

use crate::{
    application::{
        error::{AppError, HttpError},
        redeem::RedeemService,
    },
    cache::ConditionalFileCache,
    config::ContentSettings,
    users::{UserStore, UserStoreError},
};

use super::{
    auth::{Credential, VisitorContext, auth_guard, credential},
    files::{serve_max_cache, serve_no_cache},
    middleware::{AccessPolicy, log_access, log_responses, set_request_context},
};

const SOURCE: &str = "evex::http::public";

pub const SETUP_TOKEN: &str = "setup";
pub const VERSIONS_FILE: &str = "versions.json";
pub const INDEX_FILE: &str = "index.html";
pub const ARTICLE_EXTENSION: &str = ".mdhtml";
const RED33M_TIER: &str = "red33m";

pub const HEADER_VISITOR_ID: &str = "x-evex-id";
pub const HEADER_RED33M: &str = "x-evex-red33m";

#[derive(Clone)]
pub struct AppState {
    pub files: Arc<ConditionalFileCache>,
    pub users: Arc<UserStore>,
    pub redeem: Arc<RedeemService>,
    pub content: Arc<ContentSettings>,
    pub access: Option<AccessPolicy>,
}

pub fn build_router(state: AppState) -> Router {
    let guard = middleware::from_fn_with_state(state.clone(), auth_guard);

    let data_routes = Router::new()
        .route("/data/{content}/{visibility}", get(summary_data))
        .route("/data/{content}/{visibility}/{file}", get(article_body))
        .route_layer(guard.clone());

    // Redeem attempts are access-logged whatever their status, so this router
    // gets its own access layer instead of the site-wide one.
    let red33m_routes = Router::new()
        .route("/red33m", post(red33m))
        .route_layer(guard);

    let site_routes = Router::new()
        .route("/setup", get(setup))
        .route("/assets/{file}", get(asset))
        .merge(data_routes)
        .fallback(index);

    let (site_routes, red33m_routes) = match state.access.clone() {
        Some(policy) => (
            site_routes.layer(middleware::from_fn_with_state(policy.clone(), log_access)),
            red33m_routes.layer(middleware::from_fn_with_state(
                policy.every_status(),
                log_access,
            )),
        ),
        None => (site_routes, red33m_routes),
    };

    site_routes
        .merge(red33m_routes)
        .with_state(state)
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
}

async fn setup(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, AppError> {
    let token = match credential(&headers) {
        Credential::Bearer(token) if !token.is_empty() => token,
        _ => {
            return Ok(HttpError::new(
                SOURCE,
                StatusCode::FORBIDDEN,
                "suspicious activity detected",
                "setup without a bearer token",
            )
            .into_response());
        }
    };

    let versions = state.content.data_dir.join(VERSIONS_FILE);

    if token == SETUP_TOKEN {
        let id = state.users.add(false)?;
        let mut response = serve_no_cache(&state.files, &versions, &headers).await;
        if let Ok(value) = HeaderValue::from_str(&id) {
            response.headers_mut().insert(HEADER_VISITOR_ID, value);
        }
        response
            .headers_mut()
            .insert(HEADER_RED33M, HeaderValue::from_static("no"));
        return Ok(response);
    }

    let unlocked = match state.users.get_state(token) {
        Ok(unlocked) => unlocked,
        Err(UserStoreError::UserNotFound { .. }) => {
            return Ok(StatusCode::RESET_CONTENT.into_response());
        }
        Err(err) => return Err(err.into()),
    };

    let mut response = serve_no_cache(&state.files, &versions, &headers).await;
    response.headers_mut().insert(
        HEADER_RED33M,
        HeaderValue::from_static(if unlocked { "yes" } else { "no" }),
    );
    Ok(response)
}

async fn red33m(
    State(state): State<AppState>,
    Extension(visitor): Extension<VisitorContext>,
    body: String,
) -> Result<StatusCode, HttpError> {
    state
        .redeem
        .redeem(&visitor.id, visitor.unlocked, &body)
        .await?;
    Ok(StatusCode::OK)
}

async fn summary_data(
    State(state): State<AppState>,
    Extension(visitor): Extension<VisitorContext>,
    Path((content, visibility)): Path<(String, String)>,
    headers: HeaderMap,
) -> Response {
    if !is_safe_segment(&content) || visibility.contains('.') || !is_safe_segment(&visibility) {
        return not_found("malformed data path");
    }
    if hides_tier(&visibility, &visitor) {
        return not_found("locked visitor asked for red33m summary");
    }

    let path = data_path(&state, &content, &visibility).join(format!("{visibility}.json"));
    serve_no_cache(&state.files, &path, &headers).await
}

async fn article_body(
    State(state): State<AppState>,
    Extension(visitor): Extension<VisitorContext>,
    Path((content, visibility, file)): Path<(String, String, String)>,
    headers: HeaderMap,
) -> Response {
    if !is_safe_segment(&content) || !is_safe_segment(&visibility) || !is_safe_segment(&file) {
        return not_found("malformed article path");
    }
    if !file.ends_with(ARTICLE_EXTENSION) || hides_tier(&visibility, &visitor) {
        return not_found("article not available to visitor");
    }

    let path = data_path(&state, &content, &visibility).join(&file);
    serve_no_cache(&state.files, &path, &headers).await
}

async fn asset(State(state): State<AppState>, Path(file): Path<String>) -> Response {
    if !is_safe_segment(&file) {
        return not_found("malformed asset path");
    }
    let path = state.content.client_dir.join("assets").join(&file);
    serve_max_cache(&state.files, &path).await
}

async fn index(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET && method != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }
    // Anything that looks like a file name is a missing asset, not a page.
    if uri.path().contains('.') {
        return not_found("unknown file requested");
    }
    let path = state.content.client_dir.join(INDEX_FILE);
    serve_no_cache(&state.files, &path, &headers).await
}

fn data_path(state: &AppState, content: &str, visibility: &str) -> PathBuf {
    state.content.data_dir.join(content).join(visibility)
}

fn hides_tier(visibility: &str, visitor: &VisitorContext) -> bool {
    visibility.contains(RED33M_TIER) && !visitor.unlocked
}

fn is_safe_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment != "."
        && !segment.contains("..")
        && !segment.contains('/')
        && !segment.contains('\\')
}

fn not_found(detail: &'static str) -> Response {
    HttpError::new(SOURCE, StatusCode::NOT_FOUND, "File Not Found", detail).into_response()
}
