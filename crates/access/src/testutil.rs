//! Shared helpers for tests of the access plane.
//!
//! Feature-gated behind `testutil`; integration tests enable it through the
//! crate's own dev-dependency.
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use certplane_access::testutil::{generate_public_key, test_access_point};
//! ```

use std::sync::Arc;

use certplane_storage::MemoryBackend;
use ed25519_dalek::SigningKey;
use rand_core::OsRng;

use crate::{
    access_point::BackendAccessPoint, config::AccessPointConfig, presence::Server,
    public_key::PublicKey, types::Role,
};

/// Cluster name used by [`test_config`].
pub const TEST_CLUSTER: &str = "test-cluster";

/// A configuration with default lifetimes for [`TEST_CLUSTER`].
///
/// # Panics
///
/// Never in practice; the defaults always validate.
#[must_use]
pub fn test_config() -> AccessPointConfig {
    AccessPointConfig::builder().cluster_name(TEST_CLUSTER).build().expect("valid test config")
}

/// An access point over a fresh [`MemoryBackend`]. Needs a Tokio runtime.
///
/// # Panics
///
/// Never in practice; see [`test_config`].
#[must_use]
pub fn test_access_point() -> BackendAccessPoint<MemoryBackend> {
    BackendAccessPoint::new(Arc::new(MemoryBackend::new()), test_config())
        .expect("valid test access point")
}

/// A fresh Ed25519 key as an `authorized_keys` line, without comment.
#[must_use]
pub fn generate_public_key() -> String {
    let signing_key = SigningKey::generate(&mut OsRng);
    PublicKey::from_verifying_key(&signing_key.verifying_key()).to_string()
}

/// A node-role server named `id` at `10.0.0.1:3022`.
#[must_use]
pub fn sample_server(id: &str) -> Server {
    Server::builder()
        .id(id)
        .addr("10.0.0.1:3022")
        .hostname(format!("{id}.test"))
        .role(Role::Node)
        .build()
}

/// Assert that a [`Result`](crate::Result) failed with the given
/// [`ErrorKind`](crate::ErrorKind).
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use certplane_access::{AccessError, assert_error_kind};
///
/// let result: certplane_access::Result<()> = Err(AccessError::TokenNotFound);
/// assert_error_kind!(result, TokenNotFound);
/// ```
#[macro_export]
macro_rules! assert_error_kind {
    ($result:expr, $kind:ident) => {
        match &$result {
            Err(err) => assert_eq!(
                err.kind(),
                $crate::ErrorKind::$kind,
                "expected ErrorKind::{}, got: {err:?}",
                stringify!($kind),
            ),
            Ok(_) => panic!("expected ErrorKind::{}, got Ok", stringify!($kind)),
        }
    };
    ($result:expr, $kind:ident, $msg:expr) => {
        match &$result {
            Err(err) => assert_eq!(
                err.kind(),
                $crate::ErrorKind::$kind,
                "{}: expected ErrorKind::{}, got: {err:?}",
                $msg,
                stringify!($kind),
            ),
            Ok(_) => panic!("{}: expected ErrorKind::{}, got Ok", $msg, stringify!($kind)),
        }
    };
}
