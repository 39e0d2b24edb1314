//! Ephemeral identities for browser sessions.
//!
//! Every session gets its own Ed25519 key pair and bearer token. The session
//! lives at `web/sessions/{id}`; a second entry at `web/users/{user}/{id}`
//! holding only the public key lets [`WebSessionRegistry::web_session_keys`]
//! answer with one prefix scan. Both entries carry the same TTL.

use std::{fmt, sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use certplane_storage::StorageBackend;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{
    codec,
    error::{AccessError, Result},
    keys::{self, validate_name},
    public_key::PublicKey,
    users::AuthorizedKey,
};

/// A live browser session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebSession {
    /// Random session identifier.
    pub id: String,
    /// Owning user.
    pub user: String,
    /// Public half of the session key pair.
    pub public_key: PublicKey,
    /// Base64 Ed25519 secret of the session key pair.
    pub private_key: Zeroizing<String>,
    /// Bearer token presented by the browser.
    pub bearer_token: Zeroizing<String>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// When the backend drops the session.
    pub expires_at: DateTime<Utc>,
}

impl fmt::Debug for WebSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSession")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("public_key", &self.public_key)
            .field("private_key", &"[redacted]")
            .field("bearer_token", &"[redacted]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Serialize, Deserialize)]
struct SessionKey {
    public_key: PublicKey,
}

/// Creates, looks up and destroys web sessions.
pub struct WebSessionRegistry<B> {
    backend: Arc<B>,
}

impl<B> Clone for WebSessionRegistry<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend) }
    }
}

impl<B: StorageBackend> WebSessionRegistry<B> {
    /// Creates a registry over `backend`.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Starts a session for `user` that expires after `ttl`.
    ///
    /// # Errors
    ///
    /// [`AccessError::InvalidName`] for a bad user name and
    /// [`AccessError::InvalidTtl`] for a TTL under one second.
    #[tracing::instrument(skip(self), fields(ttl = ?ttl))]
    pub async fn create_session(&self, user: &str, ttl: Duration) -> Result<WebSession> {
        validate_name("user", user)?;
        if ttl < Duration::from_secs(1) {
            return Err(AccessError::InvalidTtl(format!(
                "session ttl {ttl:?} must be at least one second"
            )));
        }

        let signing_key = SigningKey::generate(&mut OsRng);
        let now = Utc::now();
        let session = WebSession {
            id: codec::random_hex::<16>(),
            user: user.to_owned(),
            public_key: PublicKey::from_verifying_key(&signing_key.verifying_key()),
            private_key: Zeroizing::new(STANDARD.encode(signing_key.as_bytes())),
            bearer_token: Zeroizing::new(codec::random_hex::<32>()),
            created_at: now,
            expires_at: codec::deadline(now, ttl)?,
        };
        let index = SessionKey { public_key: session.public_key };

        // The index entry is written last and never exists without its session.
        let session_path = keys::web_session(&session.id);
        self.backend
            .set_with_ttl(session_path.clone().into_bytes(), codec::encode(&session)?, ttl)
            .await?;
        let path = keys::web_user_session(user, &session.id);
        let index = codec::encode(&index)?;
        if let Err(err) = self.backend.set_with_ttl(path.into_bytes(), index, ttl).await {
            if let Err(cleanup) = self.backend.delete(session_path.as_bytes()).await {
                warn!(error = %cleanup, "failed to discard unindexed web session");
            }
            return Err(err.into());
        }

        info!(session_id = %session.id, "web session created");
        Ok(session)
    }

    /// Public keys of `user`'s live sessions, as authorized keys.
    #[tracing::instrument(skip(self))]
    pub async fn web_session_keys(&self, user: &str) -> Result<Vec<AuthorizedKey>> {
        validate_name("user", user)?;
        let entries: Vec<SessionKey> =
            codec::list(&*self.backend, &keys::web_user_prefix(user)).await?;
        debug!(count = entries.len(), "listed web session keys");

        Ok(entries
            .into_iter()
            .map(|entry| AuthorizedKey {
                user: user.to_owned(),
                key: entry.public_key,
                comment: None,
            })
            .collect())
    }

    /// Returns a live session.
    ///
    /// # Errors
    ///
    /// [`AccessError::NotFound`] if it never existed, was destroyed or expired.
    #[tracing::instrument(skip(self))]
    pub async fn session(&self, id: &str) -> Result<WebSession> {
        validate_name("session id", id)?;
        codec::read(&*self.backend, &keys::web_session(id))
            .await?
            .ok_or_else(|| AccessError::not_found("web session", id))
    }

    /// Ends a session. Destroying an absent session is not an error.
    #[tracing::instrument(skip(self))]
    pub async fn destroy_session(&self, id: &str) -> Result<()> {
        validate_name("session id", id)?;
        let path = keys::web_session(id);
        let Some(session) = codec::read::<_, WebSession>(&*self.backend, &path).await? else {
            debug!("web session already gone");
            return Ok(());
        };

        self.backend.delete(keys::web_user_session(&session.user, id).as_bytes()).await?;
        self.backend.delete(path.as_bytes()).await?;
        info!("web session destroyed");
        Ok(())
    }
}
