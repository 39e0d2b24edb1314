//! Trust and access control plane for a certificate-authenticated cluster.
//!
//! Six registries share one [`StorageBackend`](certplane_storage::StorageBackend)
//! and are composed behind the [`AccessPoint`] trait:
//!
//! | Registry | Owns |
//! |----------|------|
//! | [`CertificateAuthority`] | host and user signing keys, issuance, rotation, verification |
//! | [`PresenceRegistry`] | TTL-bounded server heartbeats |
//! | [`ProvisioningRegistry`] | single-use join tokens and the grants they yield |
//! | [`UserKeyRegistry`] | per-user authorized keys |
//! | [`WebSessionRegistry`] | ephemeral browser session keys |
//! | [`RemoteTrustRegistry`] | authority keys of federated clusters |
//!
//! No registry caches state: every read goes to the backend, and the two
//! check-and-act operations (token redemption and CA rotation) are single
//! compare-and-delete or compare-and-set calls.
//!
//! # Joining a node
//!
//! ```
//! use std::{sync::Arc, time::Duration};
//!
//! use certplane_access::{
//!     AccessPoint, AccessPointConfig, Authorization, BackendAccessPoint, CertKind,
//!     HostCertificateRequest, Role, Server,
//! };
//! use certplane_storage::MemoryBackend;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! # let node_signing_key = ed25519_dalek::SigningKey::generate(&mut rand_core::OsRng);
//! # let node_key =
//! #     certplane_access::PublicKey::from_verifying_key(&node_signing_key.verifying_key());
//! let config = AccessPointConfig::builder().cluster_name("cluster-a").build()?;
//! let access = BackendAccessPoint::new(Arc::new(MemoryBackend::new()), config)?;
//! access.initialize_authority(CertKind::Host).await?;
//!
//! // An operator creates a token and hands it to the new node out of band.
//! let token = access.create_token(Role::Node, Duration::from_secs(600)).await?;
//!
//! // The node redeems it and spends the grant on its first certificate.
//! let grant = access.redeem_token(token.expose_secret()).await?;
//! let request = HostCertificateRequest::builder()
//!     .node_id("node-1")
//!     .role(grant.role())
//!     .public_key(node_key.to_string())
//!     .validity(Duration::from_secs(24 * 60 * 60))
//!     .build();
//! let cert = access.sign_host_certificate(Authorization::Provisioned(grant), request).await?;
//!
//! // From then on it heartbeats.
//! let server = Server::builder().id("node-1").addr("10.0.0.7:3022").role(Role::Node).build();
//! access.upsert_server(&server, Duration::from_secs(30)).await?;
//!
//! assert_eq!(access.verify_certificate(&cert.encoded).await?.subject, "node-1");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod access_point;
pub mod authority;
pub mod certificate;
mod codec;
pub mod config;
pub mod error;
pub mod keys;
pub mod presence;
pub mod provisioning;
pub mod public_key;
pub mod remote;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod token;
pub mod types;
pub mod users;
pub mod web;

pub use access_point::{AccessPoint, BackendAccessPoint};
pub use authority::{Authorization, CertificateAuthority};
pub use certificate::{
    Certificate, HostCertificateRequest, SignedCertificate, UserCertificateRequest,
};
pub use config::AccessPointConfig;
pub use error::{AccessError, ErrorKind, Result};
pub use presence::{PresenceRegistry, Server};
pub use provisioning::{ProvisionGrant, ProvisionToken, ProvisioningRegistry};
pub use public_key::PublicKey;
pub use remote::{RemoteCert, RemoteTrustRegistry};
pub use token::ProvisioningToken;
pub use types::{CertKind, Role};
pub use users::{AuthorizedKey, UserKeyRegistry};
pub use web::{WebSession, WebSessionRegistry};
