//! In-memory storage backend implementation.
//!
//! This module provides [`MemoryBackend`], an in-memory implementation of
//! [`StorageBackend`] suitable for tests, development and single-process
//! deployments.
//!
//! # Features
//!
//! - **Thread-safe**: Uses [`parking_lot::RwLock`] for concurrent access
//! - **Ordered storage**: Keys are stored in a [`BTreeMap`] for efficient prefix scans
//! - **TTL support**: Expired keys are invisible immediately; a background task reclaims them
//! - **Size limits**: Optional [`SizeLimits`] checked on every write
//!
//! # Example
//!
//! ```
//! use certplane_storage::{MemoryBackend, StorageBackend};
//!
//! #[tokio::main]
//! async fn main() {
//!     let backend = MemoryBackend::new();
//!
//!     backend.set(b"greeting".to_vec(), b"hello".to_vec()).await.unwrap();
//!     let value = backend.get(b"greeting").await.unwrap();
//!
//!     assert_eq!(value.unwrap().as_ref(), b"hello");
//! }
//! ```
//!
//! # Limitations
//!
//! - Data is not persisted; all data is lost when the process exits
//! - No replication or distributed features
//! - Reclamation runs every second, but expiry itself is exact: reads check the deadline

use std::{
    collections::BTreeMap,
    ops::Bound,
    sync::Arc,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::RwLock;
use tokio::{select, sync::watch, time::sleep};

use crate::{
    backend::StorageBackend,
    error::{StorageError, StorageResult},
    size_limits::{SizeLimits, validate_key_size, validate_sizes},
    types::KeyValue,
};

/// How often the background task reclaims expired entries.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(1);

/// Holds the shutdown signal sender. When dropped, the watch channel
/// closes and the cleanup task exits.
struct ShutdownGuard {
    shutdown_tx: watch::Sender<()>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        // Sending is a best-effort signal; the receiver may already be gone.
        let _ = self.shutdown_tx.send(());
    }
}

/// In-memory storage backend using [`BTreeMap`].
///
/// # Cloning
///
/// `MemoryBackend` is cheaply cloneable via [`Arc`]. All clones share the
/// same underlying data store.
///
/// # Shutdown
///
/// The background TTL cleanup task holds no reference to the shutdown guard,
/// only the receiving end of its watch channel. When the last clone drops the
/// guard, the sender is dropped and the task exits. You can also call
/// [`shutdown`](Self::shutdown) to stop it explicitly.
///
/// # Runtime
///
/// [`new`](Self::new) spawns the cleanup task and therefore must be called
/// from within a Tokio runtime.
#[derive(Clone)]
pub struct MemoryBackend {
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
    ttl_data: Arc<RwLock<BTreeMap<Vec<u8>, Instant>>>,
    limits: SizeLimits,
    shutdown_guard: Arc<ShutdownGuard>,
}

impl MemoryBackend {
    /// Creates a new in-memory storage backend with default size limits.
    pub fn new() -> Self {
        Self::with_limits(SizeLimits::default())
    }

    /// Creates a new in-memory storage backend with the given size limits.
    pub fn with_limits(limits: SizeLimits) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(());
        let backend = Self {
            data: Arc::new(RwLock::new(BTreeMap::new())),
            ttl_data: Arc::new(RwLock::new(BTreeMap::new())),
            limits,
            shutdown_guard: Arc::new(ShutdownGuard { shutdown_tx }),
        };

        // The task owns only the maps, not the guard, so dropping the last
        // handle closes the channel and ends the loop.
        let data = Arc::clone(&backend.data);
        let ttl_data = Arc::clone(&backend.ttl_data);
        tokio::spawn(async move {
            cleanup_expired_keys(data, ttl_data, shutdown_rx).await;
        });

        backend
    }

    /// Explicitly signals the background TTL cleanup task to stop.
    ///
    /// Expiry is still enforced on reads after shutdown; only reclamation of
    /// the underlying memory stops.
    pub fn shutdown(&self) {
        let _ = self.shutdown_guard.shutdown_tx.send(());
    }

    /// Returns the size limits enforced by this backend.
    #[must_use]
    pub fn limits(&self) -> SizeLimits {
        self.limits
    }

    /// Number of physically stored entries, including expired ones that have
    /// not been reclaimed yet.
    #[must_use]
    pub fn stored_len(&self) -> usize {
        self.data.read().len()
    }

    /// Checks if a key has expired.
    fn is_expired(&self, key: &[u8]) -> bool {
        let ttl_guard = self.ttl_data.read();
        ttl_guard.get(key).is_some_and(|expiry| *expiry <= Instant::now())
    }

    /// Returns the live value for `key` while the caller holds the data lock.
    fn live_value(&self, data: &BTreeMap<Vec<u8>, Bytes>, key: &[u8]) -> Option<Bytes> {
        if self.is_expired(key) { None } else { data.get(key).cloned() }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task to reclaim expired keys.
///
/// Runs every [`CLEANUP_INTERVAL`] until the shutdown signal is received or
/// the sender is dropped.
async fn cleanup_expired_keys(
    data: Arc<RwLock<BTreeMap<Vec<u8>, Bytes>>>,
    ttl_data: Arc<RwLock<BTreeMap<Vec<u8>, Instant>>>,
    mut shutdown_rx: watch::Receiver<()>,
) {
    loop {
        select! {
            _ = sleep(CLEANUP_INTERVAL) => {}
            _ = shutdown_rx.changed() => {
                return;
            }
        }

        let now = Instant::now();
        let expired_keys: Vec<Vec<u8>> = {
            let ttl_guard = ttl_data.read();
            ttl_guard
                .iter()
                .filter(|(_, expiry)| **expiry <= now)
                .map(|(key, _)| key.clone())
                .collect()
        };

        if expired_keys.is_empty() {
            continue;
        }

        // Lock order is always data -> ttl_data.
        let mut data_guard = data.write();
        let mut ttl_guard = ttl_data.write();
        for key in expired_keys {
            // A concurrent write may have refreshed the TTL since the scan.
            if ttl_guard.get(&key).is_some_and(|expiry| *expiry <= now) {
                data_guard.remove(&key);
                ttl_guard.remove(&key);
            }
        }
        tracing::trace!(remaining = data_guard.len(), "reclaimed expired keys");
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn get(&self, key: &[u8]) -> StorageResult<Option<Bytes>> {
        let data = self.data.read();
        Ok(self.live_value(&data, key))
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len(), value_len = value.len()))]
    async fn set(&self, key: Vec<u8>, value: Vec<u8>) -> StorageResult<()> {
        validate_sizes(&key, &value, &self.limits)?;

        let mut data = self.data.write();
        let mut ttl_guard = self.ttl_data.write();
        ttl_guard.remove(&key);
        data.insert(key, Bytes::from(value));

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len(), ttl_ms = ttl.as_millis()))]
    async fn set_with_ttl(&self, key: Vec<u8>, value: Vec<u8>, ttl: Duration) -> StorageResult<()> {
        validate_sizes(&key, &value, &self.limits)?;

        let expiry = Instant::now().checked_add(ttl).ok_or_else(|| {
            StorageError::internal(format!("ttl of {}s overflows the clock", ttl.as_secs()))
        })?;

        let mut data = self.data.write();
        let mut ttl_data = self.ttl_data.write();
        data.insert(key.clone(), Bytes::from(value));
        ttl_data.insert(key, expiry);

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn compare_and_set(
        &self,
        key: &[u8],
        expected: Option<&[u8]>,
        new_value: Vec<u8>,
    ) -> StorageResult<()> {
        validate_sizes(key, &new_value, &self.limits)?;

        let mut data = self.data.write();
        let current = self.live_value(&data, key);

        let matches = match (expected, &current) {
            (None, None) => true,
            (Some(exp), Some(cur)) => exp == &cur[..],
            _ => false,
        };

        if !matches {
            return Err(StorageError::Conflict);
        }

        data.insert(key.to_vec(), Bytes::from(new_value));

        // Clear any existing TTL on this key
        let mut ttl_guard = self.ttl_data.write();
        ttl_guard.remove(key);

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn compare_and_delete(&self, key: &[u8], expected: &[u8]) -> StorageResult<()> {
        validate_key_size(key, &self.limits)?;

        let mut data = self.data.write();
        match self.live_value(&data, key) {
            Some(current) if current.as_ref() == expected => {
                data.remove(key);
                let mut ttl_guard = self.ttl_data.write();
                ttl_guard.remove(key);
                Ok(())
            },
            _ => Err(StorageError::Conflict),
        }
    }

    #[tracing::instrument(skip_all, fields(key_len = key.len()))]
    async fn delete(&self, key: &[u8]) -> StorageResult<()> {
        validate_key_size(key, &self.limits)?;

        let mut data = self.data.write();
        data.remove(key);

        let mut ttl_guard = self.ttl_data.write();
        ttl_guard.remove(key);

        Ok(())
    }

    #[tracing::instrument(skip_all, fields(prefix_len = prefix.len()))]
    async fn list_prefix(&self, prefix: &[u8]) -> StorageResult<Vec<KeyValue>> {
        validate_key_size(prefix, &self.limits)?;

        let data = self.data.read();
        let results = data
            .range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(|(key, _)| key.starts_with(prefix))
            .filter(|(key, _)| !self.is_expired(key))
            .map(|(k, v)| KeyValue::new(Bytes::copy_from_slice(k), v.clone()))
            .collect();

        Ok(results)
    }

    #[tracing::instrument(skip_all)]
    async fn health_check(&self) -> StorageResult<()> {
        // Acquiring the read lock proves we're not deadlocked
        let _unused = self.data.read();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_basic_operations() {
        let backend = MemoryBackend::new();

        backend.set(b"key1".to_vec(), b"value1".to_vec()).await.unwrap();
        let value = backend.get(b"key1").await.unwrap();
        assert_eq!(value, Some(Bytes::from("value1")));

        backend.delete(b"key1").await.unwrap();
        let value = backend.get(b"key1").await.unwrap();
        assert_eq!(value, None);
    }

    #[tokio::test]
    async fn test_list_prefix_is_bounded_and_ordered() {
        let backend = MemoryBackend::new();

        backend.set(b"users/bob/keys/2".to_vec(), b"2".to_vec()).await.unwrap();
        backend.set(b"users/bob/keys/1".to_vec(), b"1".to_vec()).await.unwrap();
        backend.set(b"users/bobby/keys/1".to_vec(), b"x".to_vec()).await.unwrap();
        backend.set(b"users/alice/keys/1".to_vec(), b"y".to_vec()).await.unwrap();

        let listed = backend.list_prefix(b"users/bob/").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].key, Bytes::from("users/bob/keys/1"));
        assert_eq!(listed[1].key, Bytes::from("users/bob/keys/2"));
    }

    #[tokio::test]
    async fn test_list_prefix_skips_expired() {
        let backend = MemoryBackend::new();

        backend.set(b"p/a".to_vec(), b"1".to_vec()).await.unwrap();
        backend.set_with_ttl(b"p/b".to_vec(), b"2".to_vec(), Duration::ZERO).await.unwrap();

        let listed = backend.list_prefix(b"p/").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].key, Bytes::from("p/a"));
    }

    #[tokio::test]
    async fn test_ttl() {
        let backend = MemoryBackend::new();

        backend
            .set_with_ttl(b"temp".to_vec(), b"value".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();

        assert!(backend.get(b"temp").await.unwrap().is_some());

        tokio::time::sleep(Duration::from_millis(1100)).await;

        assert_eq!(backend.get(b"temp").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_overwrite_clears_ttl() {
        let backend = MemoryBackend::new();

        backend
            .set_with_ttl(b"key".to_vec(), b"temp".to_vec(), Duration::from_secs(1))
            .await
            .unwrap();
        backend.set(b"key".to_vec(), b"permanent".to_vec()).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1500)).await;

        let value = backend.get(b"key").await.unwrap();
        assert_eq!(value, Some(Bytes::from("permanent")));
    }

    #[tokio::test]
    async fn test_refresh_extends_ttl() {
        let backend = MemoryBackend::new();

        backend
            .set_with_ttl(b"hb".to_vec(), b"1".to_vec(), Duration::from_millis(300))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        backend.set_with_ttl(b"hb".to_vec(), b"2".to_vec(), Duration::from_secs(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;

        assert_eq!(backend.get(b"hb").await.unwrap(), Some(Bytes::from("2")));
    }

    #[tokio::test]
    async fn test_cleanup_task_exits_when_last_clone_drops() {
        let backend = MemoryBackend::new();
        let clone = backend.clone();
        let data = Arc::downgrade(&backend.data);

        drop(backend);
        drop(clone);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(data.upgrade().is_none(), "cleanup task still holds the map");
    }

    #[tokio::test]
    async fn test_clone_shares_data() {
        let backend1 = MemoryBackend::new();
        let backend2 = backend1.clone();

        backend1.set(b"key".to_vec(), b"value".to_vec()).await.unwrap();

        let value = backend2.get(b"key").await.unwrap();
        assert_eq!(value, Some(Bytes::from("value")));
    }

    #[tokio::test]
    async fn test_compare_and_set_conflict() {
        let backend = MemoryBackend::new();
        backend.set(b"key".to_vec(), b"value1".to_vec()).await.unwrap();

        let result =
            backend.compare_and_set(b"key", Some(b"wrong".as_slice()), b"value2".to_vec()).await;
        assert!(matches!(result, Err(StorageError::Conflict)));

        let value = backend.get(b"key").await.unwrap();
        assert_eq!(value, Some(Bytes::from("value1")));
    }

    #[tokio::test]
    async fn test_compare_and_set_insert_if_absent_on_expired_key() {
        let backend = MemoryBackend::new();
        backend.set_with_ttl(b"key".to_vec(), b"old".to_vec(), Duration::ZERO).await.unwrap();

        backend.compare_and_set(b"key", None, b"new".to_vec()).await.unwrap();
        assert_eq!(backend.get(b"key").await.unwrap(), Some(Bytes::from("new")));
    }

    #[tokio::test]
    async fn test_compare_and_delete() {
        let backend = MemoryBackend::new();
        backend.set(b"token".to_vec(), b"v1".to_vec()).await.unwrap();

        let wrong = backend.compare_and_delete(b"token", b"v2").await;
        assert!(matches!(wrong, Err(StorageError::Conflict)));
        assert!(backend.get(b"token").await.unwrap().is_some());

        backend.compare_and_delete(b"token", b"v1").await.unwrap();
        assert_eq!(backend.get(b"token").await.unwrap(), None);

        let again = backend.compare_and_delete(b"token", b"v1").await;
        assert!(matches!(again, Err(StorageError::Conflict)));
    }

    #[tokio::test]
    async fn test_compare_and_delete_expired_is_conflict() {
        let backend = MemoryBackend::new();
        backend.set_with_ttl(b"token".to_vec(), b"v".to_vec(), Duration::ZERO).await.unwrap();

        let result = backend.compare_and_delete(b"token", b"v").await;
        assert!(matches!(result, Err(StorageError::Conflict)));
    }

    #[tokio::test]
    async fn test_size_limits_enforced() {
        let backend = MemoryBackend::with_limits(SizeLimits::new(8, 4).unwrap());

        let long_key = backend.set(b"123456789".to_vec(), b"v".to_vec()).await;
        assert!(matches!(long_key, Err(StorageError::SizeLimitExceeded { kind: "key", .. })));

        let long_value = backend.set(b"k".to_vec(), b"12345".to_vec()).await;
        assert!(matches!(long_value, Err(StorageError::SizeLimitExceeded { kind: "value", .. })));

        assert_eq!(backend.stored_len(), 0);
    }

    #[tokio::test]
    async fn test_cleanup_reclaims_expired_entries() {
        let backend = MemoryBackend::new();
        backend
            .set_with_ttl(b"gone".to_vec(), b"v".to_vec(), Duration::from_millis(100))
            .await
            .unwrap();
        assert_eq!(backend.stored_len(), 1);

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert_eq!(backend.stored_len(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_stops_cleanup_task() {
        let backend = MemoryBackend::new();
        backend
            .set_with_ttl(b"ttl_key".to_vec(), b"value".to_vec(), Duration::from_millis(100))
            .await
            .unwrap();

        backend.shutdown();
        sleep(Duration::from_millis(1500)).await;

        // Logically expired, physically retained.
        assert_eq!(backend.get(b"ttl_key").await.unwrap(), None);
        assert_eq!(backend.stored_len(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let backend = MemoryBackend::new();
        assert!(backend.health_check().await.is_ok());
    }

    mod proptests {
        use proptest::prelude::*;

        use super::*;

        fn arb_keys() -> impl Strategy<Value = Vec<Vec<u8>>> {
            proptest::collection::vec(proptest::collection::vec(any::<u8>(), 1..12), 0..30)
        }

        proptest! {
            /// Every key returned by `list_prefix` starts with the prefix, and
            /// every stored key with the prefix is returned.
            #[test]
            fn list_prefix_matches_filter(
                keys in arb_keys(),
                prefix in proptest::collection::vec(any::<u8>(), 0..3),
            ) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                    .expect("runtime");

                rt.block_on(async {
                    let backend = MemoryBackend::new();
                    for key in &keys {
                        backend.set(key.clone(), b"v".to_vec()).await.unwrap();
                    }

                    let listed = backend.list_prefix(&prefix).await.unwrap();
                    let mut expected: Vec<Vec<u8>> =
                        keys.iter().filter(|k| k.starts_with(&prefix)).cloned().collect();
                    expected.sort();
                    expected.dedup();

                    let got: Vec<Vec<u8>> = listed.iter().map(|kv| kv.key.to_vec()).collect();
                    prop_assert_eq!(got, expected);
                    Ok(())
                })?;
            }
        }
    }
}
