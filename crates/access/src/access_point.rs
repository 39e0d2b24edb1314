//! The access point: one capability surface over every registry.
//!
//! Node agents and auth servers depend on [`AccessPoint`] only, usually as an
//! `Arc<dyn AccessPoint>`. [`BackendAccessPoint`] implements it by forwarding
//! each call to the registry that owns the data. It makes no authorization
//! decisions of its own.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use certplane_storage::{ConfigError, StorageBackend};

use crate::{
    authority::{Authorization, CertificateAuthority},
    certificate::{Certificate, HostCertificateRequest, SignedCertificate, UserCertificateRequest},
    config::AccessPointConfig,
    error::Result,
    presence::{PresenceRegistry, Server},
    provisioning::{ProvisionGrant, ProvisionToken, ProvisioningRegistry},
    public_key::PublicKey,
    remote::{RemoteCert, RemoteTrustRegistry},
    token::ProvisioningToken,
    types::{CertKind, Role},
    users::{AuthorizedKey, UserKeyRegistry},
    web::{WebSession, WebSessionRegistry},
};

/// Everything the rest of the cluster may ask of the access plane.
///
/// Implementations must translate backend failures into
/// [`AccessError`](crate::AccessError); raw storage errors never cross this
/// boundary.
#[async_trait]
pub trait AccessPoint: Send + Sync {
    // Presence

    /// Returns every live server.
    async fn servers(&self) -> Result<Vec<Server>>;

    /// Returns one live server.
    async fn server(&self, id: &str) -> Result<Server>;

    /// Registers or refreshes a server; `ttl` of zero means permanent.
    async fn upsert_server(&self, server: &Server, ttl: Duration) -> Result<()>;

    /// Removes a server registration.
    async fn deregister_server(&self, id: &str) -> Result<()>;

    // Certificate authorities

    /// Creates the `kind` authority if needed and returns its public key.
    async fn initialize_authority(&self, kind: CertKind) -> Result<PublicKey>;

    /// Returns the active public key of the `kind` authority.
    async fn ca_public_key(&self, kind: CertKind) -> Result<PublicKey>;

    /// Returns all public keys currently trusted for `kind` certificates.
    async fn ca_public_keys(&self, kind: CertKind) -> Result<Vec<PublicKey>>;

    /// Returns the active user authority public key.
    async fn user_ca_public_key(&self) -> Result<PublicKey> {
        self.ca_public_key(CertKind::User).await
    }

    /// Returns the active host authority public key.
    async fn host_ca_public_key(&self) -> Result<PublicKey> {
        self.ca_public_key(CertKind::Host).await
    }

    /// Signs a host certificate.
    async fn sign_host_certificate(
        &self,
        authorization: Authorization,
        request: HostCertificateRequest,
    ) -> Result<SignedCertificate>;

    /// Signs a user certificate.
    async fn sign_user_certificate(
        &self,
        authorization: Authorization,
        request: UserCertificateRequest,
    ) -> Result<SignedCertificate>;

    /// Rotates the `kind` authority and returns the new public key.
    async fn rotate_authority(&self, kind: CertKind) -> Result<PublicKey>;

    /// Verifies an encoded certificate issued by this cluster.
    async fn verify_certificate(&self, encoded: &str) -> Result<Certificate>;

    // Provisioning

    /// Creates a single-use provisioning token.
    async fn create_token(&self, role: Role, ttl: Duration) -> Result<ProvisioningToken>;

    /// Redeems a provisioning token.
    async fn redeem_token(&self, token: &str) -> Result<ProvisionGrant>;

    /// Lists outstanding provisioning tokens, without secrets.
    async fn tokens(&self) -> Result<Vec<ProvisionToken>>;

    /// Revokes a provisioning token by its hash.
    async fn delete_token(&self, token_hash: &str) -> Result<()>;

    // User keys

    /// Returns the authorized keys of `user`.
    async fn user_keys(&self, user: &str) -> Result<Vec<AuthorizedKey>>;

    /// Authorizes `key` for `user`.
    async fn upsert_authorized_key(&self, user: &str, key: &str) -> Result<AuthorizedKey>;

    /// Removes `key` from `user`.
    async fn remove_authorized_key(&self, user: &str, key: &str) -> Result<()>;

    /// Removes all keys of `user`, returning how many there were.
    async fn delete_user(&self, user: &str) -> Result<usize>;

    // Web sessions

    /// Starts a web session for `user`.
    async fn create_web_session(&self, user: &str, ttl: Duration) -> Result<WebSession>;

    /// Returns a live web session.
    async fn web_session(&self, id: &str) -> Result<WebSession>;

    /// Returns the public keys of `user`'s live web sessions.
    async fn web_session_keys(&self, user: &str) -> Result<Vec<AuthorizedKey>>;

    /// Ends a web session.
    async fn destroy_web_session(&self, id: &str) -> Result<()>;

    // Remote trust

    /// Lists trusted remote authorities, optionally filtered.
    async fn remote_certs(
        &self,
        kind: Option<CertKind>,
        fqdn: Option<&str>,
    ) -> Result<Vec<RemoteCert>>;

    /// Trusts a remote cluster's authority key.
    async fn add_remote_cert(&self, kind: CertKind, fqdn: &str, key: &str) -> Result<RemoteCert>;

    /// Revokes trust in a remote cluster's authority.
    async fn revoke_remote_cert(&self, kind: CertKind, fqdn: &str) -> Result<()>;

    /// Checks that the backing store is reachable.
    async fn health_check(&self) -> Result<()>;
}

/// [`AccessPoint`] over a [`StorageBackend`].
///
/// # Example
///
/// ```
/// use std::{sync::Arc, time::Duration};
///
/// use certplane_access::{AccessPoint, AccessPointConfig, BackendAccessPoint, CertKind, Role};
/// use certplane_storage::MemoryBackend;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = AccessPointConfig::builder().cluster_name("cluster-a").build()?;
/// let access: Arc<dyn AccessPoint> =
///     Arc::new(BackendAccessPoint::new(Arc::new(MemoryBackend::new()), config)?);
///
/// access.initialize_authority(CertKind::Host).await?;
/// let token = access.create_token(Role::Node, Duration::from_secs(600)).await?;
/// let grant = access.redeem_token(token.expose_secret()).await?;
/// assert_eq!(grant.role(), Role::Node);
/// # Ok(())
/// # }
/// ```
pub struct BackendAccessPoint<B> {
    backend: Arc<B>,
    config: Arc<AccessPointConfig>,
    authority: CertificateAuthority<B>,
    presence: PresenceRegistry<B>,
    provisioning: ProvisioningRegistry<B>,
    users: UserKeyRegistry<B>,
    web: WebSessionRegistry<B>,
    remote: RemoteTrustRegistry<B>,
}

impl<B> Clone for BackendAccessPoint<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: Arc::clone(&self.config),
            authority: self.authority.clone(),
            presence: self.presence.clone(),
            provisioning: self.provisioning.clone(),
            users: self.users.clone(),
            web: self.web.clone(),
            remote: self.remote.clone(),
        }
    }
}

impl<B: StorageBackend> BackendAccessPoint<B> {
    /// Wires every registry to `backend`.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if `config` does not validate, which can
    /// only happen for a deserialized configuration.
    pub fn new(
        backend: Arc<B>,
        config: AccessPointConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        let config = Arc::new(config);
        let provisioning = ProvisioningRegistry::new(Arc::clone(&backend), Arc::clone(&config));

        Ok(Self {
            authority: CertificateAuthority::new(
                Arc::clone(&backend),
                Arc::clone(&config),
                provisioning.clone(),
            ),
            presence: PresenceRegistry::new(Arc::clone(&backend)),
            users: UserKeyRegistry::new(Arc::clone(&backend)),
            web: WebSessionRegistry::new(Arc::clone(&backend)),
            remote: RemoteTrustRegistry::new(Arc::clone(&backend)),
            provisioning,
            backend,
            config,
        })
    }

    /// Returns the configuration in use.
    #[must_use]
    pub fn config(&self) -> &AccessPointConfig {
        &self.config
    }

    /// Returns the certificate authority manager.
    #[must_use]
    pub fn authority(&self) -> &CertificateAuthority<B> {
        &self.authority
    }

    /// Returns the presence registry.
    #[must_use]
    pub fn presence(&self) -> &PresenceRegistry<B> {
        &self.presence
    }

    /// Returns the provisioning registry.
    #[must_use]
    pub fn provisioning(&self) -> &ProvisioningRegistry<B> {
        &self.provisioning
    }

    /// Returns the user key registry.
    #[must_use]
    pub fn users(&self) -> &UserKeyRegistry<B> {
        &self.users
    }

    /// Returns the web session registry.
    #[must_use]
    pub fn web(&self) -> &WebSessionRegistry<B> {
        &self.web
    }

    /// Returns the remote trust registry.
    #[must_use]
    pub fn remote(&self) -> &RemoteTrustRegistry<B> {
        &self.remote
    }
}

#[async_trait]
impl<B: StorageBackend + 'static> AccessPoint for BackendAccessPoint<B> {
    async fn servers(&self) -> Result<Vec<Server>> {
        self.presence.servers().await
    }

    async fn server(&self, id: &str) -> Result<Server> {
        self.presence.server(id).await
    }

    async fn upsert_server(&self, server: &Server, ttl: Duration) -> Result<()> {
        self.presence.upsert_server(server, ttl).await
    }

    async fn deregister_server(&self, id: &str) -> Result<()> {
        self.presence.deregister_server(id).await
    }

    async fn initialize_authority(&self, kind: CertKind) -> Result<PublicKey> {
        self.authority.initialize(kind).await
    }

    async fn ca_public_key(&self, kind: CertKind) -> Result<PublicKey> {
        self.authority.ca_public_key(kind).await
    }

    async fn ca_public_keys(&self, kind: CertKind) -> Result<Vec<PublicKey>> {
        self.authority.ca_public_keys(kind).await
    }

    async fn sign_host_certificate(
        &self,
        authorization: Authorization,
        request: HostCertificateRequest,
    ) -> Result<SignedCertificate> {
        self.authority.sign_host_certificate(authorization, request).await
    }

    async fn sign_user_certificate(
        &self,
        authorization: Authorization,
        request: UserCertificateRequest,
    ) -> Result<SignedCertificate> {
        self.authority.sign_user_certificate(authorization, request).await
    }

    async fn rotate_authority(&self, kind: CertKind) -> Result<PublicKey> {
        self.authority.rotate(kind).await
    }

    async fn verify_certificate(&self, encoded: &str) -> Result<Certificate> {
        self.authority.verify_certificate(encoded).await
    }

    async fn create_token(&self, role: Role, ttl: Duration) -> Result<ProvisioningToken> {
        self.provisioning.create_token(role, ttl).await
    }

    async fn redeem_token(&self, token: &str) -> Result<ProvisionGrant> {
        self.provisioning.redeem_token(token).await
    }

    async fn tokens(&self) -> Result<Vec<ProvisionToken>> {
        self.provisioning.tokens().await
    }

    async fn delete_token(&self, token_hash: &str) -> Result<()> {
        self.provisioning.delete_token(token_hash).await
    }

    async fn user_keys(&self, user: &str) -> Result<Vec<AuthorizedKey>> {
        self.users.user_keys(user).await
    }

    async fn upsert_authorized_key(&self, user: &str, key: &str) -> Result<AuthorizedKey> {
        self.users.upsert_authorized_key(user, key).await
    }

    async fn remove_authorized_key(&self, user: &str, key: &str) -> Result<()> {
        self.users.remove_authorized_key(user, key).await
    }

    async fn delete_user(&self, user: &str) -> Result<usize> {
        self.users.delete_user(user).await
    }

    async fn create_web_session(&self, user: &str, ttl: Duration) -> Result<WebSession> {
        self.web.create_session(user, ttl).await
    }

    async fn web_session(&self, id: &str) -> Result<WebSession> {
        self.web.session(id).await
    }

    async fn web_session_keys(&self, user: &str) -> Result<Vec<AuthorizedKey>> {
        self.web.web_session_keys(user).await
    }

    async fn destroy_web_session(&self, id: &str) -> Result<()> {
        self.web.destroy_session(id).await
    }

    async fn remote_certs(
        &self,
        kind: Option<CertKind>,
        fqdn: Option<&str>,
    ) -> Result<Vec<RemoteCert>> {
        self.remote.remote_certs(kind, fqdn).await
    }

    async fn add_remote_cert(&self, kind: CertKind, fqdn: &str, key: &str) -> Result<RemoteCert> {
        self.remote.add_remote_cert(kind, fqdn, key).await
    }

    async fn revoke_remote_cert(&self, kind: CertKind, fqdn: &str) -> Result<()> {
        self.remote.revoke_remote_cert(kind, fqdn).await
    }

    #[tracing::instrument(skip(self))]
    async fn health_check(&self) -> Result<()> {
        Ok(self.backend.health_check().await?)
    }
}
