//! Per-user authorized keys.
//!
//! Keys are stored one record per `(user, key)` under
//! `users/{user}/keys/{fingerprint}`, so re-adding a key replaces its comment
//! instead of creating a duplicate.

use std::{fmt, sync::Arc};

use certplane_storage::StorageBackend;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    codec,
    error::Result,
    keys::{self, validate_name},
    public_key::{self, PublicKey},
};

/// A public key allowed to act as a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizedKey {
    /// The user the key belongs to.
    pub user: String,
    /// The key itself.
    pub key: PublicKey,
    /// Optional label from the `authorized_keys` line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// Formats as an `authorized_keys` line.
impl fmt::Display for AuthorizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.comment {
            Some(comment) => write!(f, "{} {comment}", self.key),
            None => write!(f, "{}", self.key),
        }
    }
}

/// Stores the set of keys authorized for each user.
pub struct UserKeyRegistry<B> {
    backend: Arc<B>,
}

impl<B> Clone for UserKeyRegistry<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend) }
    }
}

impl<B: StorageBackend> UserKeyRegistry<B> {
    /// Creates a registry over `backend`.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Adds `key` (an `authorized_keys` line) to `user`'s set.
    ///
    /// # Errors
    ///
    /// [`AccessError::InvalidName`](crate::AccessError::InvalidName) or
    /// [`AccessError::InvalidKey`](crate::AccessError::InvalidKey) before any
    /// write.
    #[tracing::instrument(skip(self, key))]
    pub async fn upsert_authorized_key(&self, user: &str, key: &str) -> Result<AuthorizedKey> {
        validate_name("user", user)?;
        let (key, comment) = public_key::parse_line(key)?;

        let record = AuthorizedKey { user: user.to_owned(), key, comment };
        let path = keys::user_key(user, &key.fingerprint_hex());
        self.backend.set(path.into_bytes(), codec::encode(&record)?).await?;

        info!(fingerprint = %key.fingerprint(), "authorized key added");
        Ok(record)
    }

    /// Returns all keys of `user`; empty for unknown users.
    #[tracing::instrument(skip(self))]
    pub async fn user_keys(&self, user: &str) -> Result<Vec<AuthorizedKey>> {
        validate_name("user", user)?;
        let keys: Vec<AuthorizedKey> =
            codec::list(&*self.backend, &keys::user_keys_prefix(user)).await?;
        debug!(count = keys.len(), "listed authorized keys");
        Ok(keys)
    }

    /// Removes `key` from `user`'s set; comments are ignored. Removing an
    /// absent key is not an error.
    #[tracing::instrument(skip(self, key))]
    pub async fn remove_authorized_key(&self, user: &str, key: &str) -> Result<()> {
        validate_name("user", user)?;
        let key = PublicKey::parse(key)?;

        self.backend.delete(keys::user_key(user, &key.fingerprint_hex()).as_bytes()).await?;
        info!(fingerprint = %key.fingerprint(), "authorized key removed");
        Ok(())
    }

    /// Removes every key of `user` and returns how many there were.
    #[tracing::instrument(skip(self))]
    pub async fn delete_user(&self, user: &str) -> Result<usize> {
        validate_name("user", user)?;
        let entries = self.backend.list_prefix(keys::user_keys_prefix(user).as_bytes()).await?;
        for entry in &entries {
            self.backend.delete(&entry.key).await?;
        }
        info!(removed = entries.len(), "user keys deleted");
        Ok(entries.len())
    }
}
