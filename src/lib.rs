//! Content server for a single site: conditional file serving with burst
//! caching, and a write-behind store of anonymous visitor records.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod users;
pub mod util;
