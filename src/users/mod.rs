//! Anonymous visitor records persisted to a flat `users.txt`.

mod codec;
mod error;
mod ids;
mod store;

pub use codec::{decode, encode};
pub use error::UserStoreError;
pub use ids::{IdGenerator, RandomIdGenerator};
pub use store::{
    DEFAULT_SAVE_DELAY, MIN_SAVE_DELAY, StoreOptions, USERS_FILE, UserStore,
};

pub(crate) use store::METRIC_SNAPSHOT;
