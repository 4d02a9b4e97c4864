//! Unlocking the red33m tier with the shared password.

use std::sync::Arc;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::users::{UserStore, UserStoreError};

const SOURCE: &str = "evex::redeem";

#[derive(Debug, Error)]
pub enum RedeemError {
    #[error("visitor is already unlocked")]
    AlreadyUnlocked,
    #[error("no password supplied")]
    MissingPassword,
    #[error("password does not match")]
    InvalidPassword,
    #[error("no red33m password is configured")]
    Disabled,
    #[error("stored password hash is unusable: {0}")]
    Hash(String),
    #[error(transparent)]
    Store(#[from] UserStoreError),
}

pub struct RedeemService {
    password_hash: Option<String>,
    users: Arc<UserStore>,
}

impl RedeemService {
    pub fn new(password_hash: Option<String>, users: Arc<UserStore>) -> Self {
        Self {
            password_hash,
            users,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.password_hash.is_some()
    }

    /// Check `password` and, when it matches, flip visitor `id` to unlocked.
    pub async fn redeem(
        &self,
        id: &str,
        already_unlocked: bool,
        password: &str,
    ) -> Result<(), RedeemError> {
        if already_unlocked {
            return Err(RedeemError::AlreadyUnlocked);
        }

        let password = password.trim();
        if password.is_empty() {
            return Err(RedeemError::MissingPassword);
        }

        let Some(hash) = self.password_hash.clone() else {
            return Err(RedeemError::Disabled);
        };

        let candidate = password.to_string();
        let matched = tokio::task::spawn_blocking(move || verify_password(&candidate, &hash))
            .await
            .map_err(|err| RedeemError::Hash(format!("verification task failed: {err}")))??;

        if !matched {
            warn!(target = SOURCE, visitor = %id, "rejected red33m password");
            return Err(RedeemError::InvalidPassword);
        }

        self.users.update(id, true)?;
        info!(target = SOURCE, visitor = %id, "visitor unlocked red33m content");
        Ok(())
    }
}

/// Hash `password` into an argon2id PHC string.
pub fn hash_password(password: &str) -> Result<String, RedeemError> {
    let salt = SaltString::encode_b64(Uuid::new_v4().as_bytes())
        .map_err(|err| RedeemError::Hash(err.to_string()))?;

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|err| RedeemError::Hash(err.to_string()))
}

fn verify_password(password: &str, hash: &str) -> Result<bool, RedeemError> {
    let parsed = PasswordHash::new(hash).map_err(|err| RedeemError::Hash(err.to_string()))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
