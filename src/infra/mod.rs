//! Infrastructure adapters and runtime bootstrap.

pub mod access_log;
pub mod error;
pub mod http;
pub mod telemetry;
pub mod writer;
