//! Single-use provisioning tokens and the signing grants they turn into.
//!
//! A token is created by an operator and handed out of band to a new node.
//! Redeeming it writes a grant and then deletes the token record with
//! compare-and-delete, so of any number of concurrent redeemers exactly one
//! wins; losers discard their grant. The winner receives a
//! short-lived [`ProvisionGrant`], which the certificate authority consumes
//! the same way when it signs the node's first host certificate.

use std::{fmt, sync::Arc, time::Duration};

use certplane_storage::{StorageBackend, StorageError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    codec,
    config::AccessPointConfig,
    error::{AccessError, Result},
    keys,
    token::ProvisioningToken,
    types::Role,
};

const MIN_TOKEN_TTL: Duration = Duration::from_secs(1);

/// An outstanding provisioning token, as stored. Never contains the secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionToken {
    /// Hex SHA-256 of the full token; also its storage key.
    pub token_hash: String,
    /// Non-secret display prefix, e.g. `pt-1a2b3c4d`.
    pub prefix: String,
    /// Role the redeeming node will be allowed to join as.
    pub role: Role,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// After this instant the token can no longer be redeemed.
    pub expires_at: DateTime<Utc>,
}

/// Proof of a successful redemption.
///
/// Presented to [`CertificateAuthority::sign_host_certificate`] through
/// [`Authorization::Provisioned`]; the first signing consumes it.
///
/// [`CertificateAuthority::sign_host_certificate`]:
///     crate::CertificateAuthority::sign_host_certificate
/// [`Authorization::Provisioned`]: crate::Authorization::Provisioned
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisionGrant {
    id: String,
    role: Role,
    expires_at: DateTime<Utc>,
}

impl ProvisionGrant {
    /// Opaque grant identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The role the redeemed token was created for.
    #[must_use]
    pub fn role(&self) -> Role {
        self.role
    }

    /// When the grant lapses if unused.
    #[must_use]
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }
}

impl fmt::Debug for ProvisionGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProvisionGrant")
            .field("role", &self.role)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Issues and redeems provisioning tokens.
pub struct ProvisioningRegistry<B> {
    backend: Arc<B>,
    config: Arc<AccessPointConfig>,
}

impl<B> Clone for ProvisioningRegistry<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend), config: Arc::clone(&self.config) }
    }
}

impl<B: StorageBackend> ProvisioningRegistry<B> {
    /// Creates a registry over `backend`.
    pub fn new(backend: Arc<B>, config: Arc<AccessPointConfig>) -> Self {
        Self { backend, config }
    }

    /// Creates a token allowing one node to join as `role` within `ttl`.
    ///
    /// # Errors
    ///
    /// - [`AccessError::InvalidRole`] unless `role` is a machine role.
    /// - [`AccessError::InvalidTtl`] unless `ttl` is between one second and
    ///   the configured maximum.
    #[tracing::instrument(skip(self), fields(role = %role))]
    pub async fn create_token(&self, role: Role, ttl: Duration) -> Result<ProvisioningToken> {
        if !role.is_provisionable() {
            return Err(AccessError::InvalidRole(format!("{role} cannot be provisioned")));
        }
        let max = self.config.max_token_ttl();
        if ttl < MIN_TOKEN_TTL || ttl > max {
            return Err(AccessError::InvalidTtl(format!(
                "token ttl {ttl:?} must be between 1s and {max:?}"
            )));
        }

        let token = ProvisioningToken::generate();
        let now = Utc::now();
        let record = ProvisionToken {
            token_hash: token.hash_hex(),
            prefix: token.prefix().to_owned(),
            role,
            created_at: now,
            expires_at: codec::deadline(now, ttl)?,
        };

        let path = keys::token(&record.token_hash);
        self.backend.set_with_ttl(path.into_bytes(), codec::encode(&record)?, ttl).await?;

        info!(
            prefix = token.prefix(),
            expires_at = %record.expires_at,
            "provisioning token created"
        );
        Ok(token)
    }

    /// Redeems a token, consuming it.
    ///
    /// # Errors
    ///
    /// [`AccessError::TokenNotFound`] whether the token is malformed, unknown,
    /// expired, already redeemed or lost a concurrent race. Backend outages
    /// still surface as [`AccessError::Unavailable`].
    #[tracing::instrument(skip_all)]
    pub async fn redeem_token(&self, token: &str) -> Result<ProvisionGrant> {
        let Ok(token) = ProvisioningToken::parse(token) else {
            warn!("rejected malformed provisioning token");
            return Err(AccessError::TokenNotFound);
        };

        let path = keys::token(&token.hash_hex());
        let Some(stored) = self.backend.get(path.as_bytes()).await? else {
            warn!(prefix = token.prefix(), "rejected unknown provisioning token");
            return Err(AccessError::TokenNotFound);
        };
        let record: ProvisionToken = codec::decode(&path, &stored)?;

        let now = Utc::now();
        if record.expires_at <= now || !token.matches_hash_hex(&record.token_hash) {
            warn!(prefix = token.prefix(), "rejected expired provisioning token");
            return Err(AccessError::TokenNotFound);
        }

        // The grant is written before the token is spent, so a failed grant
        // write leaves the token redeemable.
        let ttl = self.config.provisioning_grant_ttl();
        let grant = ProvisionGrant {
            id: codec::random_hex::<16>(),
            role: record.role,
            expires_at: codec::deadline(now, ttl)?,
        };
        let grant_path = keys::grant(&grant.id);
        self.backend
            .set_with_ttl(grant_path.clone().into_bytes(), codec::encode(&grant)?, ttl)
            .await?;

        if let Err(err) = self.backend.compare_and_delete(path.as_bytes(), &stored).await {
            if let Err(cleanup) = self.backend.delete(grant_path.as_bytes()).await {
                warn!(error = %cleanup, "failed to discard unissued provisioning grant");
            }
            return match err {
                StorageError::Conflict => {
                    warn!(prefix = token.prefix(), "provisioning token already redeemed");
                    Err(AccessError::TokenNotFound)
                },
                err => Err(err.into()),
            };
        }

        info!(prefix = token.prefix(), role = %grant.role, "provisioning token redeemed");
        Ok(grant)
    }

    /// Lists outstanding tokens. Secrets are never stored, so none are returned.
    #[tracing::instrument(skip(self))]
    pub async fn tokens(&self) -> Result<Vec<ProvisionToken>> {
        let tokens: Vec<ProvisionToken> = codec::list(&*self.backend, keys::TOKENS_PREFIX).await?;
        debug!(count = tokens.len(), "listed provisioning tokens");
        Ok(tokens)
    }

    /// Revokes a token by the hash shown in [`tokens`](Self::tokens).
    /// Revoking an absent token is not an error.
    ///
    /// # Errors
    ///
    /// [`AccessError::InvalidName`] if `token_hash` is not a hex SHA-256.
    #[tracing::instrument(skip(self))]
    pub async fn delete_token(&self, token_hash: &str) -> Result<()> {
        if token_hash.len() != 64
            || !token_hash.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(AccessError::invalid_name("token hash", "expected 64 lowercase hex digits"));
        }
        self.backend.delete(keys::token(token_hash).as_bytes()).await?;
        info!("provisioning token revoked");
        Ok(())
    }

    /// Consumes `grant` for a host certificate in `role`.
    ///
    /// Any mismatch is `PermissionDenied`; a role mismatch leaves the grant
    /// unconsumed.
    pub(crate) async fn consume_grant(&self, grant: &ProvisionGrant, role: Role) -> Result<()> {
        if grant.role != role {
            return Err(AccessError::permission_denied(format!(
                "grant is for role {}, not {role}",
                grant.role
            )));
        }

        let path = keys::grant(&grant.id);
        let Some(stored) = self.backend.get(path.as_bytes()).await? else {
            return Err(AccessError::permission_denied("provisioning grant is unknown or used"));
        };
        let record: ProvisionGrant = codec::decode(&path, &stored)?;
        if record != *grant || record.expires_at <= Utc::now() {
            return Err(AccessError::permission_denied("provisioning grant does not match"));
        }

        match self.backend.compare_and_delete(path.as_bytes(), &stored).await {
            Ok(()) => Ok(()),
            Err(StorageError::Conflict) => {
                Err(AccessError::permission_denied("provisioning grant is unknown or used"))
            },
            Err(err) => Err(err.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use certplane_storage::MemoryBackend;
    use rstest::rstest;

    use super::*;
    use crate::{error::ErrorKind, testutil::test_config};

    fn registry() -> ProvisioningRegistry<MemoryBackend> {
        ProvisioningRegistry::new(Arc::new(MemoryBackend::new()), Arc::new(test_config()))
    }

    #[tokio::test]
    async fn create_then_redeem_once() {
        let registry = registry();
        let token = registry.create_token(Role::Node, Duration::from_secs(60)).await.unwrap();

        let grant = registry.redeem_token(token.expose_secret()).await.unwrap();
        assert_eq!(grant.role(), Role::Node);

        let again = registry.redeem_token(token.expose_secret()).await.unwrap_err();
        assert_eq!(again.kind(), ErrorKind::TokenNotFound);
    }

    #[rstest]
    #[case(Role::Admin)]
    #[case(Role::User)]
    #[case(Role::Web)]
    #[tokio::test]
    async fn only_machine_roles_are_provisionable(#[case] role: Role) {
        let err = registry().create_token(role, Duration::from_secs(60)).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidRole(_)), "{err}");
    }

    #[rstest]
    #[case(Duration::ZERO)]
    #[case(Duration::from_millis(999))]
    #[case(Duration::from_secs(25 * 60 * 60))]
    #[tokio::test]
    async fn ttl_bounds(#[case] ttl: Duration) {
        let err = registry().create_token(Role::Proxy, ttl).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidTtl(_)), "{err}");
    }

    #[tokio::test]
    async fn unknown_and_malformed_tokens_are_indistinguishable() {
        let registry = registry();
        let unknown = ProvisioningToken::generate();
        for input in [unknown.expose_secret(), "", "pt-short", "garbage"] {
            let err = registry.redeem_token(input).await.unwrap_err();
            assert_eq!(err.to_string(), AccessError::TokenNotFound.to_string());
        }
    }

    #[tokio::test]
    async fn expired_tokens_are_not_found() {
        let registry = registry();
        let token = registry.create_token(Role::Node, Duration::from_secs(1)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1100)).await;

        let err = registry.redeem_token(token.expose_secret()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenNotFound);
    }

    #[tokio::test]
    async fn listing_omits_secrets_and_revocation_is_idempotent() {
        let registry = registry();
        let token = registry.create_token(Role::Auth, Duration::from_secs(60)).await.unwrap();

        let listed = registry.tokens().await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].prefix, token.prefix());
        assert_eq!(listed[0].token_hash, token.hash_hex());
        let json = serde_json::to_string(&listed).unwrap();
        assert!(!json.contains(token.expose_secret()));

        registry.delete_token(&token.hash_hex()).await.unwrap();
        registry.delete_token(&token.hash_hex()).await.unwrap();
        assert!(registry.tokens().await.unwrap().is_empty());

        let err = registry.redeem_token(token.expose_secret()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TokenNotFound);

        assert!(registry.delete_token("../../authorities/host").await.is_err());
    }

    #[tokio::test]
    async fn grants_are_single_use_and_role_bound() {
        let registry = registry();
        let token = registry.create_token(Role::Node, Duration::from_secs(60)).await.unwrap();
        let grant = registry.redeem_token(token.expose_secret()).await.unwrap();

        let wrong_role = registry.consume_grant(&grant, Role::Auth).await.unwrap_err();
        assert_eq!(wrong_role.kind(), ErrorKind::PermissionDenied);

        registry.consume_grant(&grant, Role::Node).await.unwrap();
        let reused = registry.consume_grant(&grant, Role::Node).await.unwrap_err();
        assert_eq!(reused.kind(), ErrorKind::PermissionDenied);
    }

    #[tokio::test]
    async fn forged_grants_are_denied() {
        let registry = registry();
        let forged = ProvisionGrant {
            id: codec::random_hex::<16>(),
            role: Role::Node,
            expires_at: Utc::now() + chrono::TimeDelta::minutes(5),
        };
        let err = registry.consume_grant(&forged, Role::Node).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn grant_debug_hides_id() {
        let grant = ProvisionGrant {
            id: "secret-grant-id".into(),
            role: Role::Node,
            expires_at: Utc::now(),
        };
        assert!(!format!("{grant:?}").contains("secret-grant-id"));
    }
}
