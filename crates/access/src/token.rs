//! Provisioning token secrets.
//!
//! A token is `pt-` followed by 64 hex characters (32 random bytes). Only the
//! SHA-256 of the full token is ever persisted; the short [`prefix`] is what
//! appears in logs and listings.
//!
//! [`prefix`]: ProvisioningToken::prefix

use std::{fmt, str::FromStr};

use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::AccessError;

/// Prefix of every provisioning token.
pub const TOKEN_PREFIX: &str = "pt-";

/// Length of the hex part (32 bytes = 64 hex chars).
pub const TOKEN_HEX_LEN: usize = 64;

/// Hex characters of the secret kept in [`ProvisioningToken::prefix`].
const DISPLAY_HEX_LEN: usize = 8;

/// A validated provisioning token.
///
/// The secret is zeroed on drop and never printed by `Debug`.
#[derive(Clone, PartialEq, Eq)]
pub struct ProvisioningToken(Zeroizing<String>);

impl ProvisioningToken {
    /// Generates a fresh random token.
    #[must_use]
    pub fn generate() -> Self {
        let bytes: Zeroizing<[u8; 32]> = Zeroizing::new(rand::rng().random());
        Self(Zeroizing::new(format!("{TOKEN_PREFIX}{}", hex::encode(&*bytes))))
    }

    /// Parses and validates a token string.
    ///
    /// # Errors
    ///
    /// Every malformed input is [`AccessError::TokenNotFound`]: a redeemer
    /// learns nothing from the shape of the rejection.
    pub fn parse(s: &str) -> Result<Self, AccessError> {
        let hex_part = s.strip_prefix(TOKEN_PREFIX).ok_or(AccessError::TokenNotFound)?;
        if hex_part.len() != TOKEN_HEX_LEN
            || !hex_part.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(AccessError::TokenNotFound);
        }
        Ok(Self(Zeroizing::new(s.to_owned())))
    }

    /// Returns the full secret.
    #[must_use]
    pub fn expose_secret(&self) -> &str {
        &self.0
    }

    /// Non-secret display form: `pt-` plus the first 8 hex characters.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.0[..TOKEN_PREFIX.len() + DISPLAY_HEX_LEN]
    }

    /// SHA-256 of the full token.
    #[must_use]
    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(self.0.as_bytes()).into()
    }

    /// Hex-encoded [`hash`](Self::hash), the storage key of the token record.
    #[must_use]
    pub fn hash_hex(&self) -> String {
        hex::encode(self.hash())
    }

    /// Constant-time comparison against a stored hex hash.
    #[must_use]
    pub fn matches_hash_hex(&self, stored: &str) -> bool {
        hex::decode(stored)
            .is_ok_and(|stored| self.hash().as_slice().ct_eq(stored.as_slice()).into())
    }
}

impl fmt::Debug for ProvisioningToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ProvisioningToken").field(&format_args!("{}...", self.prefix())).finish()
    }
}

impl FromStr for ProvisioningToken {
    type Err = AccessError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
