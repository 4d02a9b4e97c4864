use std::{fs, path::Path, sync::Arc, time::Duration};

use axum::{
    Router,
    body::Body,
    http::{
        Method, Request, StatusCode,
        header::{AUTHORIZATION, CACHE_CONTROL, CONTENT_TYPE, IF_MODIFIED_SINCE, LAST_MODIFIED},
    },
    response::Response,
};
use evex::{
    application::redeem::{RedeemService, hash_password},
    cache::{ConditionalFileCache, FileCacheConfig},
    config::ContentSettings,
    infra::{
        access_log::AccessLog,
        http::{AccessPolicy, AppState, HEADER_RED33M, HEADER_VISITOR_ID, build_router},
    },
    users::{StoreOptions, UserStore},
    util::ManualClock,
};
use http_body_util::BodyExt;
use tempfile::TempDir;
use tower::ServiceExt;

const PASSWORD: &str = "correct horse";

struct Site {
    dir: TempDir,
    router: Router,
    users: Arc<UserStore>,
    access_log: Option<Arc<AccessLog>>,
}

fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, contents).expect("write fixture");
}

async fn site(with_access_log: bool) -> Site {
    let dir = tempfile::tempdir().expect("tempdir");
    let root = dir.path();
    write(root, "client/index.html", "<html>evex</html>");
    write(root, "client/assets/app.js", "console.log(1)");
    write(root, "data/versions.json", r#"{"blog":3}"#);
    write(root, "data/blog/public/public.json", r#"["hello"]"#);
    write(root, "data/blog/public/hello.mdhtml", "<p>hello</p>");
    write(root, "data/blog/public/notes.txt", "nope");
    write(root, "data/blog/red33m/red33m.json", r#"["secret"]"#);

    let users = Arc::new(
        UserStore::open(
            root,
            StoreOptions::default().with_save_delay(Duration::from_millis(30)),
        )
        .await
        .expect("open store"),
    );
    let hash = hash_password(PASSWORD).expect("hash");
    let access_log = if with_access_log {
        Some(Arc::new(
            AccessLog::open(root.join("logs/access.log"))
                .await
                .expect("open access log"),
        ))
    } else {
        None
    };

    let state = AppState {
        files: Arc::new(ConditionalFileCache::new(FileCacheConfig::default())),
        users: users.clone(),
        redeem: Arc::new(RedeemService::new(Some(hash), users.clone())),
        content: Arc::new(ContentSettings {
            client_dir: root.join("client"),
            data_dir: root.join("data"),
        }),
        access: access_log.clone().map(|log| AccessPolicy {
            log,
            min_status: 400,
            clock: Arc::new(ManualClock::new(1_000)),
        }),
    };

    Site {
        router: build_router(state),
        dir,
        users,
        access_log,
    }
}

fn request(method: Method, uri: &str, bearer: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(body.to_string())).expect("request")
}

async fn send(site: &Site, request: Request<Body>) -> Response {
    site.router.clone().oneshot(request).await.expect("response")
}

async fn body_text(response: Response) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

async fn new_visitor(site: &Site) -> String {
    let response = send(site, request(Method::GET, "/setup", Some("setup"), "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    response.headers()[HEADER_VISITOR_ID]
        .to_str()
        .expect("ascii id")
        .to_string()
}

#[tokio::test]
async fn setup_issues_a_locked_visitor() {
    let site = site(false).await;

    let response = send(&site, request(Method::GET, "/setup", Some("setup"), "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[HEADER_RED33M], "no");
    assert_eq!(response.headers()[CACHE_CONTROL], "public, no-cache");
    let id = response.headers()[HEADER_VISITOR_ID]
        .to_str()
        .expect("ascii id")
        .to_string();
    assert_eq!(body_text(response).await, r#"{"blog":3}"#);

    assert!(!site.users.get_state(&id).expect("stored"));

    let returning = send(&site, request(Method::GET, "/setup", Some(&id), "")).await;
    assert_eq!(returning.status(), StatusCode::OK);
    assert_eq!(returning.headers()[HEADER_RED33M], "no");
    assert!(!returning.headers().contains_key(HEADER_VISITOR_ID));
}

#[tokio::test]
async fn setup_rejects_unknown_and_malformed_credentials() {
    let site = site(false).await;

    let unknown = send(&site, request(Method::GET, "/setup", Some("no-such-id"), "")).await;
    assert_eq!(unknown.status(), StatusCode::RESET_CONTENT);

    let missing = send(&site, request(Method::GET, "/setup", None, "")).await;
    assert_eq!(missing.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(missing).await, "suspicious activity detected");

    let basic = Request::builder()
        .uri("/setup")
        .header(AUTHORIZATION, "Basic abc")
        .body(Body::empty())
        .expect("request");
    assert_eq!(send(&site, basic).await.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn guarded_routes_check_the_bearer_id() {
    let site = site(false).await;

    let missing = send(&site, request(Method::GET, "/data/blog/public", None, "")).await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_text(missing).await, "missing auth");

    let basic = Request::builder()
        .uri("/data/blog/public")
        .header(AUTHORIZATION, "Basic abc")
        .body(Body::empty())
        .expect("request");
    let basic = send(&site, basic).await;
    assert_eq!(basic.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_text(basic).await, "missing bearer");

    let unknown = send(
        &site,
        request(Method::GET, "/data/blog/public", Some("stranger"), ""),
    )
    .await;
    assert_eq!(unknown.status(), StatusCode::FORBIDDEN);
    assert_eq!(body_text(unknown).await, "suspicious activity detected");
}

#[tokio::test]
async fn locked_visitors_only_see_public_tiers() {
    let site = site(false).await;
    let id = new_visitor(&site).await;

    let summary = send(
        &site,
        request(Method::GET, "/data/blog/public", Some(&id), ""),
    )
    .await;
    assert_eq!(summary.status(), StatusCode::OK);
    assert_eq!(
        summary.headers()[CONTENT_TYPE],
        "application/json; charset=utf-8"
    );
    assert_eq!(body_text(summary).await, r#"["hello"]"#);

    let hidden = send(
        &site,
        request(Method::GET, "/data/blog/red33m", Some(&id), ""),
    )
    .await;
    assert_eq!(hidden.status(), StatusCode::NOT_FOUND);

    let dotted = send(
        &site,
        request(Method::GET, "/data/blog/public.json", Some(&id), ""),
    )
    .await;
    assert_eq!(dotted.status(), StatusCode::NOT_FOUND);

    let article = send(
        &site,
        request(Method::GET, "/data/blog/public/hello.mdhtml", Some(&id), ""),
    )
    .await;
    assert_eq!(article.status(), StatusCode::OK);
    assert_eq!(body_text(article).await, "<p>hello</p>");

    let not_article = send(
        &site,
        request(Method::GET, "/data/blog/public/notes.txt", Some(&id), ""),
    )
    .await;
    assert_eq!(not_article.status(), StatusCode::NOT_FOUND);

    let escape = send(
        &site,
        request(Method::GET, "/data/blog/public/..mdhtml", Some(&id), ""),
    )
    .await;
    assert_eq!(escape.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn redeeming_the_password_unlocks_red33m() {
    let site = site(false).await;
    let id = new_visitor(&site).await;

    let empty = send(&site, request(Method::POST, "/red33m", Some(&id), "  ")).await;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(empty).await, "missing body");

    let wrong = send(&site, request(Method::POST, "/red33m", Some(&id), "guess")).await;
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_text(wrong).await, "invalid password");
    assert!(!site.users.get_state(&id).expect("known"));

    let right = send(&site, request(Method::POST, "/red33m", Some(&id), PASSWORD)).await;
    assert_eq!(right.status(), StatusCode::OK);
    assert!(site.users.get_state(&id).expect("known"));

    let again = send(&site, request(Method::POST, "/red33m", Some(&id), PASSWORD)).await;
    assert_eq!(again.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(again).await, "already logged in");

    let secret = send(
        &site,
        request(Method::GET, "/data/blog/red33m", Some(&id), ""),
    )
    .await;
    assert_eq!(secret.status(), StatusCode::OK);

    let setup = send(&site, request(Method::GET, "/setup", Some(&id), "")).await;
    assert_eq!(setup.headers()[HEADER_RED33M], "yes");
}

#[tokio::test]
async fn assets_are_cached_for_six_months() {
    let site = site(false).await;

    let response = send(&site, request(Method::GET, "/assets/app.js", None, "")).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers()[CACHE_CONTROL],
        "public, max-age=15552000"
    );
    assert!(
        response.headers()[CONTENT_TYPE]
            .to_str()
            .expect("ascii")
            .contains("javascript")
    );

    let validated = Request::builder()
        .uri("/assets/app.js")
        .header(IF_MODIFIED_SINCE, "Sun, 06 Nov 2050 08:49:37 GMT")
        .body(Body::empty())
        .expect("request");
    assert_eq!(send(&site, validated).await.status(), StatusCode::OK);

    let missing = send(&site, request(Method::GET, "/assets/gone.js", None, "")).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unknown_paths_fall_back_to_the_index() {
    let site = site(false).await;

    let page = send(&site, request(Method::GET, "/blog/some-post", None, "")).await;
    assert_eq!(page.status(), StatusCode::OK);
    let last_modified = page.headers()[LAST_MODIFIED].clone();
    assert_eq!(body_text(page).await, "<html>evex</html>");

    let revalidated = Request::builder()
        .uri("/")
        .header(IF_MODIFIED_SINCE, last_modified)
        .body(Body::empty())
        .expect("request");
    let revalidated = send(&site, revalidated).await;
    assert_eq!(revalidated.status(), StatusCode::NOT_MODIFIED);
    assert!(body_text(revalidated).await.is_empty());

    let file = send(&site, request(Method::GET, "/favicon.ico", None, "")).await;
    assert_eq!(file.status(), StatusCode::NOT_FOUND);

    let post = send(&site, request(Method::POST, "/anything", None, "")).await;
    assert_eq!(post.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn access_log_keeps_errors_and_every_redeem() {
    let site = site(true).await;
    let id = new_visitor(&site).await;

    send(&site, request(Method::GET, "/missing.js", None, "")).await;
    send(&site, request(Method::GET, "/data/blog/public", Some(&id), "")).await;
    send(&site, request(Method::POST, "/red33m", Some(&id), PASSWORD)).await;

    let log = site.access_log.as_ref().expect("access log enabled");
    log.close().await;
    site.users.close().await;

    let contents = fs::read_to_string(site.dir.path().join("logs/access.log")).expect("read log");
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 2, "unexpected access log: {contents}");

    let missing: Vec<&str> = lines[0].split('|').collect();
    assert_eq!(missing[0], "1000");
    assert_eq!(missing[2], "404");
    assert_eq!(missing[3], "GET");
    assert_eq!(missing[4], "/missing.js");

    let redeem: Vec<&str> = lines[1].split('|').collect();
    assert_eq!(redeem[2], "200");
    assert_eq!(redeem[3], "POST");
    assert_eq!(redeem[4], "/red33m");
    assert!(!redeem[1].is_empty(), "request id missing");
}
