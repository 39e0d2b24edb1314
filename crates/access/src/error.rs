//! Access plane error types.
//!
//! Every registry reports failures as an [`AccessError`]. Backend failures
//! never leak out raw: the [`From<StorageError>`] conversion translates them
//! into the domain taxonomy, and [`AccessError::kind`] collapses the variants
//! into the coarse [`ErrorKind`] callers branch on.

use std::fmt;

use certplane_storage::StorageError;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::CertKind;

/// Result type alias for access plane operations.
pub type Result<T> = std::result::Result<T, AccessError>;

/// Coarse classification of an [`AccessError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The addressed entity does not exist. Empty collections are not errors.
    NotFound,
    /// The certificate authority for the requested kind has not been created.
    NotInitialized,
    /// A malformed identifier, key, role, TTL or validity window, rejected
    /// before any backend call.
    InvalidInput,
    /// The caller lacks the capability for a signing or provisioning operation.
    PermissionDenied,
    /// A conditional write lost a race; the caller may retry.
    Conflict,
    /// A provisioning token could not be redeemed, for whatever reason.
    TokenNotFound,
    /// A CA rotation was requested while the previous one is still in its
    /// grace period.
    RotationInProgress,
    /// The backend could not be reached.
    Unavailable,
    /// Corrupt records or other conditions the caller cannot fix.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::NotInitialized => "not initialized",
            Self::InvalidInput => "invalid input",
            Self::PermissionDenied => "permission denied",
            Self::Conflict => "conflict",
            Self::TokenNotFound => "token not found",
            Self::RotationInProgress => "rotation in progress",
            Self::Unavailable => "unavailable",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// Errors returned by the registries and the access point.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`: new variants may be added in
/// future minor releases without a semver-breaking change. Match on
/// [`AccessError::kind`] when only the category matters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AccessError {
    /// The addressed entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// What was looked up (`"server"`, `"web session"`, ...).
        entity: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// No certificate authority of this kind exists yet.
    #[error("{kind} certificate authority is not initialized")]
    NotInitialized {
        /// Which authority is missing.
        kind: CertKind,
    },

    /// A TTL outside the accepted range.
    #[error("invalid ttl: {0}")]
    InvalidTtl(String),

    /// A server record with a malformed identifier or address.
    #[error("invalid server: {0}")]
    InvalidServer(String),

    /// Malformed public key material.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// An unknown role, or a role not allowed for the operation.
    #[error("invalid role: {0}")]
    InvalidRole(String),

    /// A name that cannot be used as a storage path segment.
    #[error("invalid {field}: {reason}")]
    InvalidName {
        /// Which argument carried the name.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// A certificate validity window that is empty or too long.
    #[error("invalid validity window: {0}")]
    InvalidValidity(String),

    /// A certificate that failed decoding or verification.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The caller is not allowed to perform the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// A conditional write lost against a concurrent update.
    #[error("conflict: the record changed concurrently")]
    Conflict,

    /// Redemption failed. Deliberately says nothing about why.
    #[error("provisioning token not found")]
    TokenNotFound,

    /// A rotation is still inside the previous rotation's grace period.
    #[error("{kind} certificate authority rotation in progress until {until}")]
    RotationInProgress {
        /// Which authority.
        kind: CertKind,
        /// When the previous key stops being trusted.
        until: DateTime<Utc>,
    },

    /// The backend could not be reached. Never retried internally.
    #[error("backend unavailable: {0}")]
    Unavailable(#[source] StorageError),

    /// An internal invariant did not hold.
    #[error("internal error: {0}")]
    Internal(String),

    /// A backend failure that is neither a conflict nor an outage, such as a
    /// corrupt record or a size limit.
    #[error("storage error: {0}")]
    Storage(#[source] StorageError),
}

impl AccessError {
    /// Creates a `NotFound` error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { entity, id: id.into() }
    }

    /// Creates an `InvalidName` error.
    #[must_use]
    pub fn invalid_name(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidName { field, reason: reason.into() }
    }

    /// Creates a `PermissionDenied` error.
    #[must_use]
    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied(reason.into())
    }

    /// Creates an `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns the category of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::NotInitialized { .. } => ErrorKind::NotInitialized,
            Self::InvalidTtl(_)
            | Self::InvalidServer(_)
            | Self::InvalidKey(_)
            | Self::InvalidRole(_)
            | Self::InvalidName { .. }
            | Self::InvalidValidity(_)
            | Self::InvalidCertificate(_) => ErrorKind::InvalidInput,
            Self::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Self::Conflict => ErrorKind::Conflict,
            Self::TokenNotFound => ErrorKind::TokenNotFound,
            Self::RotationInProgress { .. } => ErrorKind::RotationInProgress,
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Internal(_) | Self::Storage(_) => ErrorKind::Internal,
        }
    }

    /// Returns `true` if the backend could not be reached.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        self.kind() == ErrorKind::Unavailable
    }
}

impl From<StorageError> for AccessError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Conflict => Self::Conflict,
            err if err.is_transient() => Self::Unavailable(err),
            err => Self::Storage(err),
        }
    }
}

impl From<serde_json::Error> for AccessError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(StorageError::from(err))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(StorageError::Conflict, ErrorKind::Conflict)]
    #[case(StorageError::connection("refused"), ErrorKind::Unavailable)]
    #[case(StorageError::timeout(), ErrorKind::Unavailable)]
    #[case(StorageError::serialization("bad json"), ErrorKind::Internal)]
    #[case(StorageError::size_limit_exceeded("value", 10, 5), ErrorKind::Internal)]
    #[case(StorageError::not_found("k"), ErrorKind::Internal)]
    fn storage_errors_are_translated(#[case] err: StorageError, #[case] expected: ErrorKind) {
        assert_eq!(AccessError::from(err).kind(), expected);
    }

    #[test]
    fn invalid_input_variants_share_a_kind() {
        let errors = [
            AccessError::InvalidTtl("500ms".into()),
            AccessError::InvalidServer("addr".into()),
            AccessError::InvalidKey("b64".into()),
            AccessError::InvalidRole("root".into()),
            AccessError::invalid_name("user", "empty"),
            AccessError::InvalidValidity("zero".into()),
            AccessError::InvalidCertificate("signature".into()),
        ];
        for err in errors {
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{err}");
        }
    }

    #[test]
    fn token_not_found_is_opaque() {
        assert_eq!(AccessError::TokenNotFound.to_string(), "provisioning token not found");
    }

    #[test]
    fn unavailable_keeps_source() {
        let err = AccessError::from(StorageError::connection("down"));
        assert!(err.is_unavailable());
        assert!(std::error::Error::source(&err).is_some());
    }
}
