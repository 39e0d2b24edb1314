//! Backend path layout and path-segment validation.
//!
//! Every registry owns one subtree of the key space:
//!
//! ```text
//! authorities/{host|user}                 CA record
//! presence/servers/{id}                   Server (TTL)
//! provisioning/tokens/{sha256(token)}     ProvisionToken (TTL)
//! provisioning/grants/{grant_id}          grant record (TTL)
//! users/{user}/keys/{fingerprint_hex}     AuthorizedKey
//! web/sessions/{id}                       WebSession (TTL)
//! web/users/{user}/{id}                   per-user session key index (TTL)
//! remote/{host|user}/{fqdn}               RemoteCert
//! ```
//!
//! Names spliced into a path are validated by [`validate_name`] first, so a
//! prefix such as `users/bob/` can never match `users/bobby/...`.

use crate::{
    error::{AccessError, Result},
    types::CertKind,
};

/// Maximum length of a name used as a path segment, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Checks that `value` can be used as a single path segment.
///
/// Names must be non-empty, at most [`MAX_NAME_LEN`] bytes, and free of `/`
/// and control characters.
///
/// # Errors
///
/// Returns [`AccessError::InvalidName`] naming `field`.
pub fn validate_name(field: &'static str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(AccessError::invalid_name(field, "must not be empty"));
    }
    if value.len() > MAX_NAME_LEN {
        return Err(AccessError::invalid_name(
            field,
            format!("{} bytes exceeds the limit of {MAX_NAME_LEN}", value.len()),
        ));
    }
    if value.contains('/') {
        return Err(AccessError::invalid_name(field, "must not contain '/'"));
    }
    if value.chars().any(char::is_control) {
        return Err(AccessError::invalid_name(field, "must not contain control characters"));
    }
    Ok(())
}

pub(crate) fn authority(kind: CertKind) -> String {
    format!("authorities/{kind}")
}

pub(crate) const SERVERS_PREFIX: &str = "presence/servers/";

pub(crate) fn server(id: &str) -> String {
    format!("{SERVERS_PREFIX}{id}")
}

pub(crate) const TOKENS_PREFIX: &str = "provisioning/tokens/";

pub(crate) fn token(hash_hex: &str) -> String {
    format!("{TOKENS_PREFIX}{hash_hex}")
}

pub(crate) fn grant(id: &str) -> String {
    format!("provisioning/grants/{id}")
}

pub(crate) fn user_keys_prefix(user: &str) -> String {
    format!("users/{user}/keys/")
}

pub(crate) fn user_key(user: &str, fingerprint_hex: &str) -> String {
    format!("users/{user}/keys/{fingerprint_hex}")
}

pub(crate) fn web_session(id: &str) -> String {
    format!("web/sessions/{id}")
}

pub(crate) fn web_user_prefix(user: &str) -> String {
    format!("web/users/{user}/")
}

pub(crate) fn web_user_session(user: &str, id: &str) -> String {
    format!("web/users/{user}/{id}")
}

pub(crate) const REMOTE_PREFIX: &str = "remote/";

pub(crate) fn remote_prefix(kind: CertKind) -> String {
    format!("{REMOTE_PREFIX}{kind}/")
}

pub(crate) fn remote(kind: CertKind, fqdn: &str) -> String {
    format!("{REMOTE_PREFIX}{kind}/{fqdn}")
}
