//! Ed25519 public keys in OpenSSH `authorized_keys` form.
//!
//! A key line looks like `ssh-ed25519 <base64 blob> [comment]`, where the blob
//! is the SSH wire encoding: a length-prefixed algorithm name followed by a
//! length-prefixed 32-byte point. Parsing validates every layer and rejects
//! anything malformed with [`AccessError::InvalidKey`].

use std::{fmt, str::FromStr};

use base64::{
    Engine,
    engine::general_purpose::{STANDARD, STANDARD_NO_PAD},
};
use ed25519_dalek::{PUBLIC_KEY_LENGTH, VerifyingKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AccessError, Result};

/// Algorithm tag of the only supported key type.
pub const ED25519_ALGORITHM: &str = "ssh-ed25519";

/// An Ed25519 public key.
///
/// Equality and hashing are over the key bytes only; comments belong to the
/// records that carry a key, not to the key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PublicKey {
    bytes: [u8; PUBLIC_KEY_LENGTH],
}

impl PublicKey {
    /// Parses an `authorized_keys` line, ignoring any trailing comment.
    ///
    /// # Errors
    ///
    /// Returns [`AccessError::InvalidKey`] for an unsupported algorithm, bad
    /// base64, a malformed wire blob, or bytes that are not a valid point.
    pub fn parse(line: &str) -> Result<Self> {
        parse_line(line).map(|(key, _)| key)
    }

    /// Wraps an existing verifying key.
    #[must_use]
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        Self { bytes: key.to_bytes() }
    }

    /// Returns the key as an `ed25519-dalek` verifying key.
    pub fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_bytes(&self.bytes)
            .map_err(|err| AccessError::InvalidKey(format!("not a valid ed25519 point: {err}")))
    }

    /// Returns the raw 32 key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; PUBLIC_KEY_LENGTH] {
        &self.bytes
    }

    /// The SSH wire encoding of this key.
    #[must_use]
    pub fn wire_blob(&self) -> Vec<u8> {
        let mut blob = Vec::with_capacity(4 + ED25519_ALGORITHM.len() + 4 + PUBLIC_KEY_LENGTH);
        put_string(&mut blob, ED25519_ALGORITHM.as_bytes());
        put_string(&mut blob, &self.bytes);
        blob
    }

    /// OpenSSH-style fingerprint: `SHA256:` followed by unpadded base64.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        format!("SHA256:{}", STANDARD_NO_PAD.encode(self.digest()))
    }

    /// Hex form of the fingerprint digest; safe to use as a path segment.
    #[must_use]
    pub fn fingerprint_hex(&self) -> String {
        hex::encode(self.digest())
    }

    fn digest(&self) -> [u8; 32] {
        Sha256::digest(self.wire_blob()).into()
    }
}

/// Parses a full line into a key and its optional comment.
pub(crate) fn parse_line(line: &str) -> Result<(PublicKey, Option<String>)> {
    let mut fields = line.split_whitespace();

    let algorithm =
        fields.next().ok_or_else(|| AccessError::InvalidKey("empty key line".into()))?;
    if algorithm != ED25519_ALGORITHM {
        return Err(AccessError::InvalidKey(format!("unsupported key type {algorithm:?}")));
    }

    let encoded =
        fields.next().ok_or_else(|| AccessError::InvalidKey("missing key material".into()))?;
    let blob = STANDARD
        .decode(encoded)
        .map_err(|err| AccessError::InvalidKey(format!("key material is not base64: {err}")))?;

    let bytes = parse_wire_blob(&blob)?;
    let key = PublicKey { bytes };
    key.verifying_key()?;

    let comment: Vec<&str> = fields.collect();
    let comment = (!comment.is_empty()).then(|| comment.join(" "));

    Ok((key, comment))
}

fn parse_wire_blob(blob: &[u8]) -> Result<[u8; PUBLIC_KEY_LENGTH]> {
    let (algorithm, rest) = take_string(blob)?;
    if algorithm != ED25519_ALGORITHM.as_bytes() {
        return Err(AccessError::InvalidKey("key blob algorithm does not match".into()));
    }

    let (point, rest) = take_string(rest)?;
    if !rest.is_empty() {
        return Err(AccessError::InvalidKey("trailing bytes after key blob".into()));
    }

    point.try_into().map_err(|_| {
        AccessError::InvalidKey(format!(
            "expected {PUBLIC_KEY_LENGTH} key bytes, got {}",
            point.len()
        ))
    })
}

fn take_string(input: &[u8]) -> Result<(&[u8], &[u8])> {
    let truncated = || AccessError::InvalidKey("truncated key blob".into());

    let (len, rest) = input.split_first_chunk::<4>().ok_or_else(truncated)?;
    let len = u32::from_be_bytes(*len) as usize;
    if rest.len() < len {
        return Err(truncated());
    }
    Ok(rest.split_at(len))
}

fn put_string(out: &mut Vec<u8>, data: &[u8]) {
    // Inputs are the fixed algorithm tag and a 32-byte key.
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{ED25519_ALGORITHM} {}", STANDARD.encode(self.wire_blob()))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PublicKey").field(&self.fingerprint()).finish()
    }
}

impl FromStr for PublicKey {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for PublicKey {
    type Error = AccessError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<PublicKey> for String {
    fn from(key: PublicKey) -> Self {
        key.to_string()
    }
}
