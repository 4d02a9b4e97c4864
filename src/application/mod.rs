//! Application services sitting between the HTTP layer and the stores.

pub mod error;
pub mod redeem;
