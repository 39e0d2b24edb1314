//! Key-value storage abstraction for the certplane access plane.
//!
//! This crate provides the [`StorageBackend`] trait and related types that
//! every registry in `certplane-access` is written against: certificate
//! authorities, presence, provisioning tokens, user keys, web sessions and
//! remote trust all persist through the same small capability set.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Access Point                           │
//! │             (role-scoped facade over registries)            │
//! ├─────────────────────────────────────────────────────────────┤
//! │                       Registries                            │
//! │  CertificateAuthority │ Presence │ Provisioning │ Web │ ... │
//! │        (validation, path layout, TTL policy, crypto)        │
//! ├─────────────────────────────────────────────────────────────┤
//! │                   certplane-storage                         │
//! │                 StorageBackend trait                        │
//! │ (get, set, set_with_ttl, compare_and_set, compare_and_delete│
//! │              delete, list_prefix, health_check)             │
//! ├─────────────────────────────────────────────────────────────┤
//! │                     MemoryBackend                           │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use std::time::Duration;
//!
//! use certplane_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"users/alice/keys/1".to_vec(), b"ssh-ed25519 AAAA".to_vec()).await?;
//!     backend
//!         .set_with_ttl(b"presence/servers/n1".to_vec(), b"{}".to_vec(), Duration::from_secs(30))
//!         .await?;
//!
//!     let keys = backend.list_prefix(b"users/alice/").await?;
//!     assert_eq!(keys.len(), 1);
//!
//!     // Single-use values are consumed with compare-and-delete.
//!     backend.set(b"tokens/t1".to_vec(), b"node".to_vec()).await?;
//!     backend.compare_and_delete(b"tokens/t1", b"node").await?;
//!     assert!(backend.get(b"tokens/t1").await?.is_none());
//!
//!     Ok(())
//! }
//! ```
//!
//! # Implementing a Backend
//!
//! 1. Implement the [`StorageBackend`] trait
//! 2. Map backend-specific errors to [`StorageError`], using `Connection` or `Timeout` for
//!    unreachable stores so callers can classify them as transient
//! 3. Run the `conformance` suite (feature `testutil`) against it
//!
//! See the [`memory`] module source for a reference implementation.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` and `conformance` modules with shared test helpers,
//!   assertion macros and the backend conformance suite. Enable this in `[dev-dependencies]` for
//!   integration tests.

#![deny(unsafe_code)]

pub mod backend;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod conformance;
pub mod error;
pub mod memory;
pub mod size_limits;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used)]
pub mod testutil;
pub mod types;

// Re-export primary types at crate root for convenience
pub use backend::StorageBackend;
pub use error::{BoxError, ConfigError, StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use size_limits::{
    DEFAULT_MAX_KEY_SIZE, DEFAULT_MAX_VALUE_SIZE, SizeLimits, validate_key_size, validate_sizes,
};
pub use types::KeyValue;
