//! Certificates issued by the cluster authorities.
//!
//! A certificate is a JSON body signed with the authority's Ed25519 key. On
//! the wire it travels as `base64url(body) "." base64url(signature)`; the
//! signature covers the exact body bytes, so verifiers never re-serialize.

use std::time::Duration;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use ed25519_dalek::{SIGNATURE_LENGTH, Signature, Signer, SigningKey, VerifyingKey};
use serde::{Deserialize, Serialize};

use crate::{
    error::{AccessError, Result},
    public_key::PublicKey,
    types::{CertKind, Role},
};

/// The signed content of a certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Certificate {
    /// Random serial number (hex).
    pub serial: String,
    /// Which authority signed it.
    pub kind: CertKind,
    /// Cluster the authority belongs to.
    pub cluster: String,
    /// Node identifier (host) or user name (user).
    pub subject: String,
    /// Roles granted to the subject.
    pub roles: Vec<Role>,
    /// The key being vouched for.
    pub public_key: PublicKey,
    /// Start of the validity window (inclusive).
    pub valid_after: DateTime<Utc>,
    /// End of the validity window (exclusive).
    pub valid_before: DateTime<Utc>,
    /// Fingerprint of the authority key that produced the signature.
    pub signing_key_fingerprint: String,
}

impl Certificate {
    /// Returns `true` if `at` falls inside the validity window.
    #[must_use]
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        self.valid_after <= at && at < self.valid_before
    }

    pub(crate) fn sign(self, key: &SigningKey) -> Result<SignedCertificate> {
        let body = serde_json::to_vec(&self)?;
        let signature = key.sign(&body);
        let encoded = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&body),
            URL_SAFE_NO_PAD.encode(signature.to_bytes())
        );
        Ok(SignedCertificate { certificate: self, encoded })
    }
}

/// A certificate together with its transport encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedCertificate {
    /// The decoded body.
    pub certificate: Certificate,
    /// `base64url(body).base64url(signature)`.
    pub encoded: String,
}

/// An encoded certificate split into its parts, signature not yet checked.
pub(crate) struct UnverifiedCertificate {
    pub(crate) certificate: Certificate,
    body: Vec<u8>,
    signature: Signature,
}

impl UnverifiedCertificate {
    pub(crate) fn decode(encoded: &str) -> Result<Self> {
        let invalid = |reason: &str| AccessError::InvalidCertificate(reason.to_owned());

        let (body_b64, signature_b64) =
            encoded.split_once('.').ok_or_else(|| invalid("missing signature separator"))?;

        let body = URL_SAFE_NO_PAD.decode(body_b64).map_err(|_| invalid("body is not base64url"))?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| invalid("signature is not base64url"))?;
        let signature: [u8; SIGNATURE_LENGTH] =
            signature.try_into().map_err(|_| invalid("signature has the wrong length"))?;

        let certificate: Certificate = serde_json::from_slice(&body)
            .map_err(|err| AccessError::InvalidCertificate(format!("malformed body: {err}")))?;

        Ok(Self { certificate, body, signature: Signature::from_bytes(&signature) })
    }

    pub(crate) fn verify_signature(&self, key: &VerifyingKey) -> bool {
        key.verify_strict(&self.body, &self.signature).is_ok()
    }
}

/// Request for a host certificate.
#[derive(Debug, Clone, bon::Builder)]
pub struct HostCertificateRequest {
    /// Identifier of the node being certified.
    #[builder(into)]
    pub node_id: String,
    /// Role the node acts in; must be a machine role.
    pub role: Role,
    /// The node's public key in `authorized_keys` form.
    #[builder(into)]
    pub public_key: String,
    /// Requested validity, starting now.
    pub validity: Duration,
}

/// Request for a user certificate.
#[derive(Debug, Clone, bon::Builder)]
pub struct UserCertificateRequest {
    /// User being certified.
    #[builder(into)]
    pub user: String,
    /// The user's public key in `authorized_keys` form.
    #[builder(into)]
    pub public_key: String,
    /// Roles granted to the user.
    pub roles: Vec<Role>,
    /// Requested validity, starting now.
    pub validity: Duration,
}
