//! Storage backend trait definition.
//!
//! This module defines the [`StorageBackend`] trait, the capability set every
//! registry in the access plane is written against. Any concrete store
//! (in-memory, replicated, disk-backed) implements this set; nothing above it
//! depends on a particular implementation.
//!
//! # Design Philosophy
//!
//! - **Keys and values are bytes**: no assumptions about serialization format
//! - **Async by default**: all operations are async for non-blocking I/O
//! - **Single-key atomicity**: each call is atomic on its own key; there are no multi-key
//!   transactions
//! - **TTL is backend-enforced**: expired entries are invisible to reads and listings as soon as
//!   their deadline passes, whether or not they have been reclaimed yet
//!
//! Domain logic (validation, TTL policy, path layout) lives in the registries
//! built on top of this trait, not in the storage backends.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

#[cfg(doc)]
use crate::StorageError;
use crate::{error::StorageResult, types::KeyValue};

/// Abstract storage backend for key-value operations.
///
/// Backends are expected to be thread-safe (`Send + Sync`) and support
/// concurrent operations from many independent callers.
///
/// # Key Operations
///
/// | Method | Description |
/// |--------|-------------|
/// | [`get`](StorageBackend::get) | Retrieve a single value by key |
/// | [`set`](StorageBackend::set) | Store a key-value pair permanently |
/// | [`set_with_ttl`](StorageBackend::set_with_ttl) | Store with automatic expiration |
/// | [`compare_and_set`](StorageBackend::compare_and_set) | Atomic compare-and-swap |
/// | [`compare_and_delete`](StorageBackend::compare_and_delete) | Atomic compare-and-delete |
/// | [`delete`](StorageBackend::delete) | Remove a key (idempotent) |
/// | [`list_prefix`](StorageBackend::list_prefix) | All live entries under a prefix |
/// | [`health_check`](StorageBackend::health_check) | Verify backend availability |
///
/// # Example
///
/// ```
/// use bytes::Bytes;
/// use certplane_storage::{MemoryBackend, StorageBackend};
///
/// # tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(async {
/// let backend = MemoryBackend::new();
///
/// backend.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();
/// let value = backend.get(b"key").await.unwrap();
/// assert_eq!(value, Some(Bytes::from("value")));
/// # });
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Retrieves a value by key.
    ///
    /// # Returns
    ///
    /// - `Ok(Some(bytes))` if the key exists and has not expired
    /// - `Ok(None)` if the key doesn't exist or its TTL has elapsed
    /// - `Err(...)` on storage errors
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>>;

    /// Stores a key-value pair permanently.
    ///
    /// If the key already exists, its value is overwritten and any TTL it
    /// carried is cleared.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()>;

    /// Stores a key-value pair with automatic expiration.
    ///
    /// Overwrites any existing value and replaces its TTL. The entry becomes
    /// invisible to [`get`](StorageBackend::get) and
    /// [`list_prefix`](StorageBackend::list_prefix) once `ttl` has elapsed, and
    /// is reclaimed eventually.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()>;

    /// Atomically sets a key's value if it matches the expected current value.
    ///
    /// # Semantics
    ///
    /// - **`expected: None`**: insert-if-absent. Succeeds only when the key does not exist (or has
    ///   expired).
    /// - **`expected: Some(value)`**: update-if-unchanged. Succeeds only when the current value is
    ///   a byte-for-byte match of `value`.
    ///
    /// On success the new value is stored and any existing TTL on the key is
    /// cleared. A key whose TTL has elapsed is treated as absent.
    ///
    /// # Errors
    ///
    /// - [`StorageError::Conflict`] if the precondition does not hold. `Conflict` is not transient
    ///   and is never retried by the backend; callers decide what a lost race means.
    /// - [`StorageError::SizeLimitExceeded`] if `key` or `new_value` is too large.
    #[must_use = "compare-and-set may fail with a conflict and errors must be handled"]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()>;

    /// Atomically deletes a key if its current value matches `expected`.
    ///
    /// This is the primitive behind single-use credentials: of many callers
    /// racing to delete the same value, exactly one succeeds and every other
    /// caller observes [`StorageError::Conflict`].
    ///
    /// An absent or expired key is a `Conflict`, not a success: the caller
    /// asked to remove a specific value and that value is not there.
    #[must_use = "compare-and-delete may fail with a conflict and errors must be handled"]
    async fn compare_and_delete(&self, key: &[u8], expected: &[u8]) -> StorageResult<()>;

    /// Deletes a key.
    ///
    /// If the key doesn't exist, this is a no-op (returns `Ok(())`).
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn delete(&self, key: &[u8]) -> StorageResult<()>;

    /// Retrieves all live key-value pairs whose key starts with `prefix`.
    ///
    /// Results are returned in key order. Expired entries are omitted. The
    /// listing is a best-effort snapshot: it is consistent per key, not
    /// linearizable across the whole prefix.
    #[must_use = "storage operations may fail and errors must be handled"]
    async fn list_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>>;

    /// Checks that the backend is reachable and able to serve requests.
    ///
    /// # Errors
    ///
    /// Returns a transient error ([`StorageError::is_transient`]) when the
    /// backend cannot be reached.
    #[must_use = "health check results indicate backend availability and must be inspected"]
    async fn health_check(&self) -> StorageResult<()>;
}
