//! Trusted authorities of other clusters.
//!
//! Federation is an explicit allow-list: a remote cluster's host or user
//! authority key is trusted only while a record exists at
//! `remote/{kind}/{fqdn}`.

use std::sync::Arc;

use certplane_storage::StorageBackend;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    codec,
    error::Result,
    keys::{self, validate_name},
    public_key::PublicKey,
    types::CertKind,
};

/// A remote cluster's authority key trusted by this cluster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteCert {
    /// Which of the remote cluster's authorities this is.
    pub kind: CertKind,
    /// Identifier of the remote cluster.
    pub fqdn: String,
    /// The remote authority's public key.
    pub key: PublicKey,
    /// When trust was established.
    pub added_at: DateTime<Utc>,
}

/// Stores the federation allow-list.
pub struct RemoteTrustRegistry<B> {
    backend: Arc<B>,
}

impl<B> Clone for RemoteTrustRegistry<B> {
    fn clone(&self) -> Self {
        Self { backend: Arc::clone(&self.backend) }
    }
}

impl<B: StorageBackend> RemoteTrustRegistry<B> {
    /// Creates a registry over `backend`.
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    /// Trusts `key` as the `kind` authority of cluster `fqdn`, replacing any
    /// key trusted for that pair before.
    #[tracing::instrument(skip(self, key), fields(kind = %kind))]
    pub async fn add_remote_cert(
        &self,
        kind: CertKind,
        fqdn: &str,
        key: &str,
    ) -> Result<RemoteCert> {
        validate_name("fqdn", fqdn)?;
        let key = PublicKey::parse(key)?;

        let cert = RemoteCert { kind, fqdn: fqdn.to_owned(), key, added_at: Utc::now() };
        self.backend.set(keys::remote(kind, fqdn).into_bytes(), codec::encode(&cert)?).await?;

        info!(fingerprint = %key.fingerprint(), "remote authority trusted");
        Ok(cert)
    }

    /// Lists trusted remote authorities. Each filter left as `None` matches
    /// everything.
    #[tracing::instrument(skip(self))]
    pub async fn remote_certs(
        &self,
        kind: Option<CertKind>,
        fqdn: Option<&str>,
    ) -> Result<Vec<RemoteCert>> {
        if let Some(fqdn) = fqdn {
            validate_name("fqdn", fqdn)?;
        }

        let certs: Vec<RemoteCert> = match (kind, fqdn) {
            (Some(kind), Some(fqdn)) => {
                codec::read(&*self.backend, &keys::remote(kind, fqdn)).await?.into_iter().collect()
            },
            (Some(kind), None) => codec::list(&*self.backend, &keys::remote_prefix(kind)).await?,
            (None, fqdn) => {
                let all: Vec<RemoteCert> = codec::list(&*self.backend, keys::REMOTE_PREFIX).await?;
                all.into_iter().filter(|cert| fqdn.is_none_or(|fqdn| cert.fqdn == fqdn)).collect()
            },
        };

        debug!(count = certs.len(), "listed remote authorities");
        Ok(certs)
    }

    /// Stops trusting the `kind` authority of `fqdn`. Revoking an absent
    /// entry is not an error.
    #[tracing::instrument(skip(self), fields(kind = %kind))]
    pub async fn revoke_remote_cert(&self, kind: CertKind, fqdn: &str) -> Result<()> {
        validate_name("fqdn", fqdn)?;
        self.backend.delete(keys::remote(kind, fqdn).as_bytes()).await?;
        info!("remote authority revoked");
        Ok(())
    }
}
