mod auth;
mod files;
mod middleware;
mod public;

pub use auth::VisitorContext;
pub use files::{LONG_MAX_AGE_SECS, serve_max_cache, serve_no_cache};
pub use middleware::{AccessPolicy, RequestContext};
pub use public::{
    AppState, HEADER_RED33M, HEADER_VISITOR_ID, SETUP_TOKEN, VERSIONS_FILE, build_router,
};
