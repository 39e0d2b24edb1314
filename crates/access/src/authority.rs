//! Host and user certificate authorities.
//!
//! Each cluster has one authority per [`CertKind`], stored as a single record
//! at `authorities/{kind}`. The record carries the active Ed25519 key pair and,
//! after a rotation, the previous public key together with the instant it
//! stops being trusted. Every state change is one compare-and-set against the
//! bytes that were read, so concurrent rotations cannot both succeed.

use std::{sync::Arc, time::Duration};

use base64::{Engine, engine::general_purpose::STANDARD};
use bytes::Bytes;
use certplane_storage::{StorageBackend, StorageError};
use chrono::{DateTime, Utc};
use ed25519_dalek::{SECRET_KEY_LENGTH, SigningKey};
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::{
    certificate::{
        Certificate, HostCertificateRequest, SignedCertificate, UnverifiedCertificate,
        UserCertificateRequest,
    },
    codec,
    config::AccessPointConfig,
    error::{AccessError, Result},
    keys::{self, validate_name},
    provisioning::{ProvisionGrant, ProvisioningRegistry},
    public_key::PublicKey,
    types::{CertKind, Role},
};

/// What entitles a caller to have a certificate signed.
#[derive(Debug, Clone)]
pub enum Authorization {
    /// An already-trusted operator or auth server.
    Operator,
    /// A node that has just redeemed a provisioning token. Only valid for
    /// one host certificate in the grant's role.
    Provisioned(ProvisionGrant),
}

#[derive(Serialize, Deserialize)]
struct AuthorityRecord {
    kind: CertKind,
    cluster: String,
    created_at: DateTime<Utc>,
    active: ActiveKey,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    previous: Option<PreviousKey>,
}

#[derive(Serialize, Deserialize)]
struct ActiveKey {
    public_key: PublicKey,
    /// Base64 of the 32-byte Ed25519 secret.
    private_key: Zeroizing<String>,
    created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct PreviousKey {
    public_key: PublicKey,
    trusted_until: DateTime<Utc>,
}

impl ActiveKey {
    fn generate(now: DateTime<Utc>) -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self {
            public_key: PublicKey::from_verifying_key(&signing_key.verifying_key()),
            private_key: Zeroizing::new(STANDARD.encode(signing_key.as_bytes())),
            created_at: now,
        }
    }

    fn signing_key(&self) -> Result<SigningKey> {
        let corrupt = || AccessError::internal("authority private key is corrupt");

        let decoded =
            Zeroizing::new(STANDARD.decode(self.private_key.as_bytes()).map_err(|_| corrupt())?);
        let secret: Zeroizing<[u8; SECRET_KEY_LENGTH]> =
            Zeroizing::new(decoded.as_slice().try_into().map_err(|_| corrupt())?);
        Ok(SigningKey::from_bytes(&secret))
    }
}

impl AuthorityRecord {
    /// Public keys verifiers should accept at `now`, active key first.
    fn trusted_keys(&self, now: DateTime<Utc>) -> Vec<PublicKey> {
        let mut keys = vec![self.active.public_key];
        if let Some(previous) = &self.previous
            && previous.trusted_until > now
        {
            keys.push(previous.public_key);
        }
        keys
    }
}

/// Issues, rotates and verifies certificates for both authority kinds.
pub struct CertificateAuthority<B> {
    backend: Arc<B>,
    config: Arc<AccessPointConfig>,
    provisioning: ProvisioningRegistry<B>,
}

impl<B> Clone for CertificateAuthority<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            config: Arc::clone(&self.config),
            provisioning: self.provisioning.clone(),
        }
    }
}

impl<B: StorageBackend> CertificateAuthority<B> {
    /// Creates an authority manager. Grants issued by `provisioning` are
    /// accepted for host certificates.
    pub fn new(
        backend: Arc<B>,
        config: Arc<AccessPointConfig>,
        provisioning: ProvisioningRegistry<B>,
    ) -> Self {
        Self { backend, config, provisioning }
    }

    /// Creates the authority for `kind` if it does not exist yet and returns
    /// its active public key. Calling it again returns the existing key.
    #[tracing::instrument(skip(self), fields(kind = %kind))]
    pub async fn initialize(&self, kind: CertKind) -> Result<PublicKey> {
        let path = keys::authority(kind);
        if let Some(record) = codec::read::<_, AuthorityRecord>(&*self.backend, &path).await? {
            debug!("authority already initialized");
            return Ok(record.active.public_key);
        }

        let now = Utc::now();
        let record = AuthorityRecord {
            kind,
            cluster: self.config.cluster_name().to_owned(),
            created_at: now,
            active: ActiveKey::generate(now),
            previous: None,
        };
        let public_key = record.active.public_key;

        match self.backend.compare_and_set(path.as_bytes(), None, codec::encode(&record)?).await {
            Ok(()) => {
                info!(fingerprint = %public_key.fingerprint(), "certificate authority created");
                Ok(public_key)
            },
            // Another caller initialized it first; theirs is the authority.
            Err(StorageError::Conflict) => Ok(self.load(kind).await?.0.active.public_key),
            Err(err) => Err(err.into()),
        }
    }

    /// Returns the active public key of the `kind` authority.
    ///
    /// # Errors
    ///
    /// [`AccessError::NotInitialized`] if the authority does not exist.
    #[tracing::instrument(skip(self), fields(kind = %kind))]
    pub async fn ca_public_key(&self, kind: CertKind) -> Result<PublicKey> {
        let (record, _) = self.load(kind).await?;
        Ok(record.active.public_key)
    }

    /// Returns every public key that currently verifies `kind` certificates:
    /// the active key, then the previous key while its grace period runs.
    #[tracing::instrument(skip(self), fields(kind = %kind))]
    pub async fn ca_public_keys(&self, kind: CertKind) -> Result<Vec<PublicKey>> {
        let (record, _) = self.load(kind).await?;
        Ok(record.trusted_keys(Utc::now()))
    }

    /// Signs a host certificate.
    ///
    /// A [`Authorization::Provisioned`] grant is consumed by this call and
    /// must have been issued for `request.role`.
    ///
    /// # Errors
    ///
    /// - [`AccessError::InvalidName`], [`AccessError::InvalidRole`],
    ///   [`AccessError::InvalidKey`] or [`AccessError::InvalidValidity`] for a
    ///   malformed request, before anything is read.
    /// - [`AccessError::NotInitialized`] if the host authority is missing.
    /// - [`AccessError::PermissionDenied`] for a missing, forged, reused or
    ///   mismatched grant.
    #[tracing::instrument(
        skip(self, authorization, request),
        fields(node_id = %request.node_id, role = %request.role)
    )]
    pub async fn sign_host_certificate(
        &self,
        authorization: Authorization,
        request: HostCertificateRequest,
    ) -> Result<SignedCertificate> {
        validate_name("node id", &request.node_id)?;
        if !request.role.is_provisionable() {
            return Err(AccessError::InvalidRole(format!(
                "{} is not a host role",
                request.role
            )));
        }
        let subject_key = PublicKey::parse(&request.public_key)?;
        check_validity(request.validity, self.config.max_host_cert_validity())?;

        let (record, _) = self.load(CertKind::Host).await?;
        // A corrupt key must fail before the grant is spent.
        let signing_key = record.active.signing_key()?;

        if let Authorization::Provisioned(grant) = &authorization
            && let Err(err) = self.provisioning.consume_grant(grant, request.role).await
        {
            warn!(error = %err, "host certificate request denied");
            return Err(err);
        }

        let roles = vec![request.role];
        let signed = self.issue(
            &record,
            &signing_key,
            request.node_id,
            roles,
            subject_key,
            request.validity,
        )?;
        info!(serial = %signed.certificate.serial, "host certificate signed");
        Ok(signed)
    }

    /// Signs a user certificate. Only operators may request one.
    ///
    /// # Errors
    ///
    /// As [`sign_host_certificate`](Self::sign_host_certificate), and
    /// [`AccessError::PermissionDenied`] for any provisioning grant.
    #[tracing::instrument(skip(self, authorization, request), fields(user = %request.user))]
    pub async fn sign_user_certificate(
        &self,
        authorization: Authorization,
        request: UserCertificateRequest,
    ) -> Result<SignedCertificate> {
        validate_name("user", &request.user)?;
        if request.roles.is_empty() {
            return Err(AccessError::InvalidRole(
                "a user certificate needs at least one role".into(),
            ));
        }
        let subject_key = PublicKey::parse(&request.public_key)?;
        check_validity(request.validity, self.config.max_user_cert_validity())?;

        if !matches!(authorization, Authorization::Operator) {
            warn!("user certificate requested with a provisioning grant");
            return Err(AccessError::permission_denied(
                "user certificates require operator authorization",
            ));
        }

        let (record, _) = self.load(CertKind::User).await?;
        let signing_key = record.active.signing_key()?;

        let mut roles = request.roles;
        roles.sort_unstable();
        roles.dedup();

        let signed =
            self.issue(&record, &signing_key, request.user, roles, subject_key, request.validity)?;
        info!(serial = %signed.certificate.serial, "user certificate signed");
        Ok(signed)
    }

    /// Replaces the active key of the `kind` authority and returns the new
    /// public key. The old public key keeps verifying for the configured
    /// grace period, during which another rotation is refused.
    ///
    /// # Errors
    ///
    /// - [`AccessError::NotInitialized`] if the authority does not exist.
    /// - [`AccessError::RotationInProgress`] inside the grace period.
    /// - [`AccessError::Conflict`] if a concurrent rotation won.
    #[tracing::instrument(skip(self), fields(kind = %kind))]
    pub async fn rotate(&self, kind: CertKind) -> Result<PublicKey> {
        let (record, stored) = self.load(kind).await?;
        let now = Utc::now();

        if let Some(previous) = &record.previous
            && previous.trusted_until > now
        {
            warn!(until = %previous.trusted_until, "rotation refused during grace period");
            return Err(AccessError::RotationInProgress { kind, until: previous.trusted_until });
        }

        let rotated = AuthorityRecord {
            kind: record.kind,
            cluster: record.cluster,
            created_at: record.created_at,
            previous: Some(PreviousKey {
                public_key: record.active.public_key,
                trusted_until: codec::deadline(now, self.config.rotation_grace_period())?,
            }),
            active: ActiveKey::generate(now),
        };
        let public_key = rotated.active.public_key;

        let path = keys::authority(kind);
        let encoded = codec::encode(&rotated)?;
        self.backend.compare_and_set(path.as_bytes(), Some(&stored[..]), encoded).await?;

        info!(fingerprint = %public_key.fingerprint(), "certificate authority rotated");
        Ok(public_key)
    }

    /// Decodes and verifies an encoded certificate against the keys this
    /// cluster currently trusts for its kind.
    ///
    /// # Errors
    ///
    /// [`AccessError::InvalidCertificate`] if the encoding, cluster, signer,
    /// signature or validity window is wrong; [`AccessError::NotInitialized`]
    /// if the matching authority does not exist.
    #[tracing::instrument(skip_all)]
    pub async fn verify_certificate(&self, encoded: &str) -> Result<Certificate> {
        let unverified = UnverifiedCertificate::decode(encoded)?;
        let kind = unverified.certificate.kind;
        let (record, _) = self.load(kind).await?;
        let now = Utc::now();

        let certificate = &unverified.certificate;
        if certificate.cluster != record.cluster {
            return Err(AccessError::InvalidCertificate(format!(
                "issued by cluster {:?}",
                certificate.cluster
            )));
        }

        let signer = record
            .trusted_keys(now)
            .into_iter()
            .find(|key| key.fingerprint() == certificate.signing_key_fingerprint)
            .ok_or_else(|| {
                AccessError::InvalidCertificate("signed by an untrusted key".into())
            })?;
        if !unverified.verify_signature(&signer.verifying_key()?) {
            return Err(AccessError::InvalidCertificate("signature does not verify".into()));
        }
        if !certificate.is_valid_at(now) {
            return Err(AccessError::InvalidCertificate("outside its validity window".into()));
        }

        debug!(serial = %certificate.serial, "certificate verified");
        Ok(unverified.certificate)
    }

    async fn load(&self, kind: CertKind) -> Result<(AuthorityRecord, Bytes)> {
        let path = keys::authority(kind);
        let stored =
            self.backend.get(path.as_bytes()).await?.ok_or(AccessError::NotInitialized { kind })?;
        let record = codec::decode(&path, &stored)?;
        Ok((record, stored))
    }

    fn issue(
        &self,
        record: &AuthorityRecord,
        signing_key: &SigningKey,
        subject: String,
        roles: Vec<Role>,
        public_key: PublicKey,
        validity: Duration,
    ) -> Result<SignedCertificate> {
        let now = Utc::now();
        let certificate = Certificate {
            serial: codec::random_hex::<16>(),
            kind: record.kind,
            cluster: record.cluster.clone(),
            subject,
            roles,
            public_key,
            valid_after: now,
            valid_before: codec::deadline(now, validity)?,
            signing_key_fingerprint: record.active.public_key.fingerprint(),
        };
        certificate.sign(signing_key)
    }
}

fn check_validity(validity: Duration, max: Duration) -> Result<()> {
    if validity.is_zero() {
        return Err(AccessError::InvalidValidity("validity must be positive".into()));
    }
    if validity > max {
        return Err(AccessError::InvalidValidity(format!(
            "{validity:?} exceeds the maximum of {max:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use certplane_storage::MemoryBackend;

    use super::*;
    use crate::{error::ErrorKind, testutil};

    fn authority_with(config: AccessPointConfig) -> CertificateAuthority<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new());
        let config = Arc::new(config);
        let provisioning = ProvisioningRegistry::new(Arc::clone(&backend), Arc::clone(&config));
        CertificateAuthority::new(backend, config, provisioning)
    }

    fn authority() -> CertificateAuthority<MemoryBackend> {
        authority_with(testutil::test_config())
    }

    fn host_request(validity: Duration) -> HostCertificateRequest {
        HostCertificateRequest::builder()
            .node_id("node-1")
            .role(Role::Node)
            .public_key(testutil::generate_public_key())
            .validity(validity)
            .build()
    }

    #[tokio::test]
    async fn missing_authority_is_not_initialized() {
        let err = authority().ca_public_key(CertKind::Host).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotInitialized);
    }

    #[tokio::test]
    async fn initialize_is_idempotent_and_kinds_are_separate() {
        let authority = authority();
        let host = authority.initialize(CertKind::Host).await.unwrap();
        assert_eq!(authority.initialize(CertKind::Host).await.unwrap(), host);
        assert_eq!(authority.ca_public_key(CertKind::Host).await.unwrap(), host);

        let user = authority.initialize(CertKind::User).await.unwrap();
        assert_ne!(user, host);
    }

    #[tokio::test]
    async fn operator_signed_host_certificate_verifies() {
        let authority = authority();
        let ca = authority.initialize(CertKind::Host).await.unwrap();

        let signed = authority
            .sign_host_certificate(Authorization::Operator, host_request(Duration::from_secs(3600)))
            .await
            .unwrap();
        assert_eq!(signed.certificate.kind, CertKind::Host);
        assert_eq!(signed.certificate.roles, vec![Role::Node]);
        assert_eq!(signed.certificate.signing_key_fingerprint, ca.fingerprint());

        let verified = authority.verify_certificate(&signed.encoded).await.unwrap();
        assert_eq!(verified, signed.certificate);
    }

    #[tokio::test]
    async fn validation_precedes_initialization_check() {
        let authority = authority();
        let mut request = host_request(Duration::from_secs(60));
        request.public_key = "ssh-ed25519 nope".into();

        let err =
            authority.sign_host_certificate(Authorization::Operator, request).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidKey(_)), "{err}");
    }

    #[tokio::test]
    async fn validity_window_is_bounded() {
        let authority = authority();
        authority.initialize(CertKind::Host).await.unwrap();

        for validity in [Duration::ZERO, Duration::from_secs(31 * 24 * 60 * 60)] {
            let err = authority
                .sign_host_certificate(Authorization::Operator, host_request(validity))
                .await
                .unwrap_err();
            assert!(matches!(err, AccessError::InvalidValidity(_)), "{err}");
        }
    }

    #[tokio::test]
    async fn user_roles_are_required() {
        let authority = authority();
        let request = UserCertificateRequest::builder()
            .user("alice")
            .public_key(testutil::generate_public_key())
            .roles(vec![])
            .validity(Duration::from_secs(60))
            .build();
        let err =
            authority.sign_user_certificate(Authorization::Operator, request).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidRole(_)), "{err}");
    }

    #[tokio::test]
    async fn user_certificate_roles_are_deduplicated() {
        let authority = authority();
        authority.initialize(CertKind::User).await.unwrap();
        let request = UserCertificateRequest::builder()
            .user("alice")
            .public_key(testutil::generate_public_key())
            .roles(vec![Role::User, Role::Admin, Role::User])
            .validity(Duration::from_secs(60))
            .build();

        let signed =
            authority.sign_user_certificate(Authorization::Operator, request).await.unwrap();
        assert_eq!(signed.certificate.roles, vec![Role::Admin, Role::User]);
        assert_eq!(signed.certificate.subject, "alice");
    }

    #[tokio::test]
    async fn rotation_keeps_previous_key_during_grace() {
        let authority = authority();
        let old = authority.initialize(CertKind::User).await.unwrap();
        let new = authority.rotate(CertKind::User).await.unwrap();
        assert_ne!(old, new);

        assert_eq!(authority.ca_public_key(CertKind::User).await.unwrap(), new);
        assert_eq!(authority.ca_public_keys(CertKind::User).await.unwrap(), vec![new, old]);

        let err = authority.rotate(CertKind::User).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RotationInProgress);
    }

    #[tokio::test]
    async fn certificates_from_the_previous_key_verify_during_grace() {
        let authority = authority();
        authority.initialize(CertKind::Host).await.unwrap();
        let signed = authority
            .sign_host_certificate(Authorization::Operator, host_request(Duration::from_secs(60)))
            .await
            .unwrap();

        authority.rotate(CertKind::Host).await.unwrap();
        authority.verify_certificate(&signed.encoded).await.unwrap();
    }

    #[tokio::test]
    async fn zero_grace_period_drops_the_old_key_immediately() {
        let config = AccessPointConfig::builder()
            .cluster_name("test-cluster")
            .rotation_grace_period(Duration::ZERO)
            .build()
            .unwrap();
        let authority = authority_with(config);
        authority.initialize(CertKind::Host).await.unwrap();
        let signed = authority
            .sign_host_certificate(Authorization::Operator, host_request(Duration::from_secs(60)))
            .await
            .unwrap();

        authority.rotate(CertKind::Host).await.unwrap();
        assert_eq!(authority.ca_public_keys(CertKind::Host).await.unwrap().len(), 1);
        authority.rotate(CertKind::Host).await.unwrap();

        let err = authority.verify_certificate(&signed.encoded).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidCertificate(_)), "{err}");
    }

    #[tokio::test]
    async fn foreign_certificates_do_not_verify() {
        let ours = authority();
        let theirs = authority_with(
            AccessPointConfig::builder().cluster_name("other-cluster").build().unwrap(),
        );
        ours.initialize(CertKind::Host).await.unwrap();
        theirs.initialize(CertKind::Host).await.unwrap();

        let signed = theirs
            .sign_host_certificate(Authorization::Operator, host_request(Duration::from_secs(60)))
            .await
            .unwrap();
        let err = ours.verify_certificate(&signed.encoded).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidCertificate(_)), "{err}");
    }

    #[tokio::test]
    async fn host_certificates_need_a_machine_role() {
        let authority = authority();
        let mut request = host_request(Duration::from_secs(60));
        request.role = Role::Admin;
        let err =
            authority.sign_host_certificate(Authorization::Operator, request).await.unwrap_err();
        assert!(matches!(err, AccessError::InvalidRole(_)), "{err}");
    }

    #[tokio::test]
    async fn corrupt_authority_key_does_not_spend_the_grant() {
        let backend = Arc::new(MemoryBackend::new());
        let config = Arc::new(testutil::test_config());
        let provisioning = ProvisioningRegistry::new(Arc::clone(&backend), Arc::clone(&config));
        let tokens = ProvisioningRegistry::new(Arc::clone(&backend), Arc::clone(&config));
        let authority = CertificateAuthority::new(Arc::clone(&backend), config, provisioning);
        authority.initialize(CertKind::Host).await.unwrap();

        let token = tokens.create_token(Role::Node, Duration::from_secs(60)).await.unwrap();
        let grant = tokens.redeem_token(token.expose_secret()).await.unwrap();

        let path = keys::authority(CertKind::Host);
        let original = backend.get(path.as_bytes()).await.unwrap().unwrap();
        let mut record: AuthorityRecord = codec::decode(&path, &original).unwrap();
        record.active.private_key = Zeroizing::new("not base64!".into());
        backend.set(path.clone().into_bytes(), codec::encode(&record).unwrap()).await.unwrap();

        let err = authority
            .sign_host_certificate(
                Authorization::Provisioned(grant.clone()),
                host_request(Duration::from_secs(60)),
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal);

        backend.set(path.into_bytes(), original.to_vec()).await.unwrap();
        authority
            .sign_host_certificate(
                Authorization::Provisioned(grant),
                host_request(Duration::from_secs(60)),
            )
            .await
            .expect("grant survives the failed signing");
    }

    #[test]
    fn private_key_round_trips_through_the_record() {
        let active = ActiveKey::generate(Utc::now());
        let signing_key = active.signing_key().unwrap();
        assert_eq!(PublicKey::from_verifying_key(&signing_key.verifying_key()), active.public_key);
    }
}
