//! Conformance test suite for [`StorageBackend`] implementations.
//!
//! Every backend runs the same suite to show it honors the trait contract
//! the registries depend on: prefix listings, TTL invisibility, and the two
//! conditional writes.
//!
//! # Usage
//!
//! ```no_run
//! use certplane_storage::{MemoryBackend, conformance};
//!
//! #[tokio::test]
//! async fn crud_get_returns_none_for_missing_key() {
//!     conformance::crud_get_returns_none_for_missing_key(&MemoryBackend::new()).await;
//! }
//! ```
//!
//! # Test Categories
//!
//! | Category | Contract aspect |
//! |----------|-----------------|
//! | CRUD | Basic get/set/delete semantics |
//! | Prefix | `list_prefix` ordering and boundaries |
//! | TTL | `set_with_ttl` expiration and refresh |
//! | CAS | `compare_and_set` preconditions |
//! | CAD | `compare_and_delete` preconditions |
//! | Concurrent | Exactly-one-winner races |
//! | Error semantics | `Ok(None)` vs errors, idempotent delete, size limits |

use std::{sync::Arc, time::Duration};

use bytes::Bytes;

use crate::{assert_storage_error, backend::StorageBackend, error::StorageError};

// ============================================================================
// CRUD
// ============================================================================

/// `get` on a nonexistent key returns `Ok(None)`.
pub async fn crud_get_returns_none_for_missing_key<B: StorageBackend>(backend: &B) {
    let result = backend.get(b"nonexistent").await;
    assert!(result.is_ok(), "get should not error on missing key: {result:?}");
    assert_eq!(result.expect("checked above"), None, "missing key should return None");
}

/// `set` then `get` round-trips the value.
pub async fn crud_set_then_get_returns_value<B: StorageBackend>(backend: &B) {
    backend.set(b"k1".to_vec(), b"v1".to_vec()).await.expect("set should succeed");
    let val = backend.get(b"k1").await.expect("get should succeed");
    assert_eq!(val, Some(Bytes::from("v1")));
}

/// `set` on an existing key overwrites the value.
pub async fn crud_set_overwrites_existing<B: StorageBackend>(backend: &B) {
    backend.set(b"k1".to_vec(), b"original".to_vec()).await.expect("set");
    backend.set(b"k1".to_vec(), b"updated".to_vec()).await.expect("overwrite");
    let val = backend.get(b"k1").await.expect("get");
    assert_eq!(val, Some(Bytes::from("updated")));
}

/// `delete` removes a previously-set key.
pub async fn crud_delete_removes_key<B: StorageBackend>(backend: &B) {
    backend.set(b"k2".to_vec(), b"val".to_vec()).await.expect("set");
    backend.delete(b"k2").await.expect("delete");
    let val = backend.get(b"k2").await.expect("get after delete");
    assert_eq!(val, None, "key should be gone after delete");
}

/// Keys are byte-level distinct: `"key"` and `"key\x00"` are different.
pub async fn crud_keys_are_byte_distinct<B: StorageBackend>(backend: &B) {
    backend.set(b"key".to_vec(), b"a".to_vec()).await.expect("set key");
    backend.set(b"key\x00".to_vec(), b"b".to_vec()).await.expect("set key+null");
    assert_eq!(backend.get(b"key").await.expect("get key"), Some(Bytes::from("a")));
    assert_eq!(backend.get(b"key\x00").await.expect("get key+null"), Some(Bytes::from("b")));
}

/// A value at the configured default limit round-trips.
pub async fn crud_large_value_roundtrip<B: StorageBackend>(backend: &B) {
    let big = vec![0xCDu8; crate::DEFAULT_MAX_VALUE_SIZE];
    backend.set(b"big".to_vec(), big.clone()).await.expect("set large value");
    let val = backend.get(b"big").await.expect("get large value");
    assert_eq!(val, Some(Bytes::from(big)));
}

// ============================================================================
// Prefix listings
// ============================================================================

/// `list_prefix` returns results in key order.
pub async fn prefix_results_are_ordered<B: StorageBackend>(backend: &B) {
    for key in [b"r/c", b"r/a", b"r/b"] {
        backend.set(key.to_vec(), b"v".to_vec()).await.expect("set");
    }
    let results = backend.list_prefix(b"r/").await.expect("list_prefix");
    let keys: Vec<&[u8]> = results.iter().map(|kv| kv.key.as_ref()).collect();
    assert_eq!(keys, vec![b"r/a".as_slice(), b"r/b", b"r/c"], "listing must be sorted");
}

/// `list_prefix` does not leak sibling keys that share a textual prefix.
pub async fn prefix_excludes_siblings<B: StorageBackend>(backend: &B) {
    backend.set(b"users/bob/keys/a".to_vec(), b"1".to_vec()).await.expect("set");
    backend.set(b"users/bobby/keys/a".to_vec(), b"2".to_vec()).await.expect("set");
    backend.set(b"users/bo".to_vec(), b"3".to_vec()).await.expect("set");

    let results = backend.list_prefix(b"users/bob/").await.expect("list_prefix");
    let keys: Vec<&[u8]> = results.iter().map(|kv| kv.key.as_ref()).collect();
    assert_eq!(keys, vec![b"users/bob/keys/a".as_slice()]);
}

/// `list_prefix` with no matches returns an empty vec.
pub async fn prefix_empty_returns_empty<B: StorageBackend>(backend: &B) {
    backend.set(b"x/a".to_vec(), b"v".to_vec()).await.expect("set");
    let results = backend.list_prefix(b"y/").await.expect("list_prefix");
    assert!(results.is_empty(), "unmatched prefix should list nothing");
}

// ============================================================================
// TTL
// ============================================================================

/// A key set with a short TTL expires.
pub async fn ttl_key_expires<B: StorageBackend>(backend: &B) {
    backend
        .set_with_ttl(b"ttl/a".to_vec(), b"ephemeral".to_vec(), Duration::from_millis(50))
        .await
        .expect("set_with_ttl");

    let before = backend.get(b"ttl/a").await.expect("get before expiry");
    assert!(before.is_some(), "key should exist before TTL expires");

    tokio::time::sleep(Duration::from_millis(150)).await;

    let after = backend.get(b"ttl/a").await.expect("get after expiry");
    assert_eq!(after, None, "key should be expired after TTL");
}

/// A zero-duration TTL means the key is immediately expired.
pub async fn ttl_zero_is_immediately_expired<B: StorageBackend>(backend: &B) {
    backend
        .set_with_ttl(b"ttl/zero".to_vec(), b"gone".to_vec(), Duration::ZERO)
        .await
        .expect("set_with_ttl zero");
    let val = backend.get(b"ttl/zero").await.expect("get");
    assert_eq!(val, None, "zero-TTL key should be immediately expired");
}

/// Overwriting a TTL key with a plain `set` clears the TTL.
pub async fn ttl_overwrite_clears_ttl<B: StorageBackend>(backend: &B) {
    backend
        .set_with_ttl(b"ttl/ow".to_vec(), b"temp".to_vec(), Duration::from_millis(50))
        .await
        .expect("set_with_ttl");
    backend.set(b"ttl/ow".to_vec(), b"permanent".to_vec()).await.expect("set overwrite");

    tokio::time::sleep(Duration::from_millis(150)).await;

    let val = backend.get(b"ttl/ow").await.expect("get after original TTL");
    assert_eq!(val, Some(Bytes::from("permanent")), "plain set should make the key permanent");
}

/// Re-setting with a TTL replaces the deadline rather than keeping the old one.
pub async fn ttl_refresh_replaces_deadline<B: StorageBackend>(backend: &B) {
    backend
        .set_with_ttl(b"ttl/hb".to_vec(), b"1".to_vec(), Duration::from_millis(100))
        .await
        .expect("first heartbeat");
    backend
        .set_with_ttl(b"ttl/hb".to_vec(), b"2".to_vec(), Duration::from_secs(10))
        .await
        .expect("second heartbeat");

    tokio::time::sleep(Duration::from_millis(200)).await;

    let val = backend.get(b"ttl/hb").await.expect("get");
    assert_eq!(val, Some(Bytes::from("2")), "refresh must extend the deadline");
}

/// Expired keys do not appear in prefix listings.
pub async fn ttl_expired_keys_excluded_from_listing<B: StorageBackend>(backend: &B) {
    backend.set(b"tr/a".to_vec(), b"permanent".to_vec()).await.expect("set");
    backend
        .set_with_ttl(b"tr/b".to_vec(), b"temp".to_vec(), Duration::from_millis(50))
        .await
        .expect("set_with_ttl");
    backend.set(b"tr/c".to_vec(), b"permanent".to_vec()).await.expect("set");

    tokio::time::sleep(Duration::from_millis(150)).await;

    let results = backend.list_prefix(b"tr/").await.expect("list_prefix");
    let keys: Vec<&[u8]> = results.iter().map(|kv| kv.key.as_ref()).collect();
    assert_eq!(keys, vec![b"tr/a".as_slice(), b"tr/c"], "expired key must not be listed");
}

// ============================================================================
// CAS
// ============================================================================

/// `compare_and_set` with `expected: None` succeeds on an absent key.
pub async fn cas_insert_if_absent<B: StorageBackend>(backend: &B) {
    let result = backend.compare_and_set(b"cas/new", None, b"created".to_vec()).await;
    assert!(result.is_ok(), "CAS insert-if-absent should succeed: {result:?}");
    assert_eq!(backend.get(b"cas/new").await.expect("get"), Some(Bytes::from("created")));
}

/// `compare_and_set` with `expected: None` fails if the key exists.
pub async fn cas_insert_if_absent_fails_when_key_exists<B: StorageBackend>(backend: &B) {
    backend.set(b"cas/exists".to_vec(), b"val".to_vec()).await.expect("set");
    let result = backend.compare_and_set(b"cas/exists", None, b"nope".to_vec()).await;
    assert_storage_error!(result, Conflict, "CAS insert on existing key should conflict");
}

/// `compare_and_set` with a matching expected value succeeds.
pub async fn cas_update_with_matching_value<B: StorageBackend>(backend: &B) {
    backend.set(b"cas/upd".to_vec(), b"v1".to_vec()).await.expect("set");
    backend
        .compare_and_set(b"cas/upd", Some(b"v1"), b"v2".to_vec())
        .await
        .expect("CAS with matching value should succeed");
    assert_eq!(backend.get(b"cas/upd").await.expect("get"), Some(Bytes::from("v2")));
}

/// `compare_and_set` with a mismatched expected value returns `Conflict`.
pub async fn cas_update_with_mismatched_value<B: StorageBackend>(backend: &B) {
    backend.set(b"cas/mm".to_vec(), b"actual".to_vec()).await.expect("set");
    let result = backend.compare_and_set(b"cas/mm", Some(b"wrong"), b"nope".to_vec()).await;
    assert_storage_error!(result, Conflict, "CAS mismatch should return Conflict");
    assert_eq!(backend.get(b"cas/mm").await.expect("get"), Some(Bytes::from("actual")));
}

// ============================================================================
// CAD
// ============================================================================

/// `compare_and_delete` with a matching value removes the key.
pub async fn cad_matching_value_deletes<B: StorageBackend>(backend: &B) {
    backend.set(b"cad/k".to_vec(), b"v".to_vec()).await.expect("set");
    backend.compare_and_delete(b"cad/k", b"v").await.expect("CAD should succeed");
    assert_eq!(backend.get(b"cad/k").await.expect("get"), None);
}

/// `compare_and_delete` with a mismatched value leaves the key in place.
pub async fn cad_mismatched_value_conflicts<B: StorageBackend>(backend: &B) {
    backend.set(b"cad/mm".to_vec(), b"actual".to_vec()).await.expect("set");
    let result = backend.compare_and_delete(b"cad/mm", b"other").await;
    assert_storage_error!(result, Conflict, "CAD mismatch should return Conflict");
    assert_eq!(backend.get(b"cad/mm").await.expect("get"), Some(Bytes::from("actual")));
}

/// `compare_and_delete` on an absent key is a `Conflict`, not a success.
pub async fn cad_absent_key_conflicts<B: StorageBackend>(backend: &B) {
    let result = backend.compare_and_delete(b"cad/absent", b"v").await;
    assert_storage_error!(result, Conflict, "CAD on absent key should return Conflict");
}

// ============================================================================
// Concurrent access
// ============================================================================

/// Concurrent sets to different keys all succeed.
pub async fn concurrent_sets_to_different_keys<B: StorageBackend + 'static>(backend: Arc<B>) {
    let mut handles = Vec::new();
    for i in 0u32..50 {
        let backend = Arc::clone(&backend);
        let key = format!("conc/{i:04}").into_bytes();
        let value = format!("val/{i}").into_bytes();
        handles.push(tokio::spawn(async move {
            backend.set(key, value).await.expect("concurrent set");
        }));
    }
    for handle in handles {
        handle.await.expect("task join");
    }

    let listed = backend.list_prefix(b"conc/").await.expect("list_prefix");
    assert_eq!(listed.len(), 50, "all concurrent sets should be visible");
}

/// Concurrent CAS on the same key: exactly one writer wins.
pub async fn concurrent_cas_exactly_one_winner<B: StorageBackend + 'static>(backend: Arc<B>) {
    backend.compare_and_set(b"ccas/k", None, b"v0".to_vec()).await.expect("initial CAS");

    let mut handles = Vec::new();
    for i in 0u32..10 {
        let backend = Arc::clone(&backend);
        let new_val = format!("writer-{i}").into_bytes();
        handles.push(tokio::spawn(async move {
            backend.compare_and_set(b"ccas/k", Some(b"v0"), new_val).await
        }));
    }

    let mut successes = 0u32;
    let mut conflicts = 0u32;
    for handle in handles {
        match handle.await.expect("task join") {
            Ok(()) => successes += 1,
            Err(StorageError::Conflict) => conflicts += 1,
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }

    assert_eq!(successes, 1, "exactly one CAS writer should win");
    assert_eq!(conflicts, 9, "remaining writers should get Conflict");
}

/// Concurrent CAD on the same value: exactly one deleter wins.
pub async fn concurrent_cad_exactly_one_winner<B: StorageBackend + 'static>(backend: Arc<B>) {
    backend.set(b"ccad/k".to_vec(), b"once".to_vec()).await.expect("set");

    let mut handles = Vec::new();
    for _ in 0..20 {
        let backend = Arc::clone(&backend);
        handles.push(tokio::spawn(
            async move { backend.compare_and_delete(b"ccad/k", b"once").await },
        ));
    }

    let mut successes = 0u32;
    for handle in handles {
        match handle.await.expect("task join") {
            Ok(()) => successes += 1,
            Err(StorageError::Conflict) => {},
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    }

    assert_eq!(successes, 1, "exactly one CAD caller should win");
}

// ============================================================================
// Error semantics
// ============================================================================

/// `health_check` succeeds on a healthy backend.
pub async fn health_check_succeeds<B: StorageBackend>(backend: &B) {
    backend.health_check().await.expect("fresh backend should be healthy");
}

/// `get` on a deleted key returns `None`, not a `NotFound` error.
pub async fn get_deleted_key_returns_none_not_error<B: StorageBackend>(backend: &B) {
    backend.set(b"err/del".to_vec(), b"v".to_vec()).await.expect("set");
    backend.delete(b"err/del").await.expect("delete");
    let result = backend.get(b"err/del").await;
    assert!(result.is_ok(), "get after delete should be Ok, not error: {result:?}");
    assert_eq!(result.expect("checked above"), None);
}

/// Double delete is idempotent.
pub async fn idempotent_delete<B: StorageBackend>(backend: &B) {
    backend.set(b"err/idem".to_vec(), b"v".to_vec()).await.expect("set");
    backend.delete(b"err/idem").await.expect("first delete");
    backend.delete(b"err/idem").await.expect("second delete should be noop");
    assert_eq!(backend.get(b"err/idem").await.expect("get"), None);
}

/// Oversized values are rejected before they are stored.
pub async fn oversized_value_is_rejected<B: StorageBackend>(backend: &B) {
    let too_big = vec![0u8; crate::DEFAULT_MAX_VALUE_SIZE + 1];
    let result = backend.set(b"err/big".to_vec(), too_big).await;
    assert_storage_error!(result, SizeLimitExceeded, "oversized value should be rejected");
    assert_eq!(backend.get(b"err/big").await.expect("get"), None);
}

// ============================================================================
// Convenience runner
// ============================================================================

/// Run the full conformance suite against the given backend.
///
/// ```no_run
/// use std::sync::Arc;
///
/// use certplane_storage::{MemoryBackend, conformance};
///
/// #[tokio::test]
/// async fn memory_backend_conformance() {
///     conformance::run_all(Arc::new(MemoryBackend::new())).await;
/// }
/// ```
pub async fn run_all<B: StorageBackend + 'static>(backend: Arc<B>) {
    // CRUD
    crud_get_returns_none_for_missing_key(backend.as_ref()).await;
    crud_set_then_get_returns_value(backend.as_ref()).await;
    crud_set_overwrites_existing(backend.as_ref()).await;
    crud_delete_removes_key(backend.as_ref()).await;
    crud_keys_are_byte_distinct(backend.as_ref()).await;
    crud_large_value_roundtrip(backend.as_ref()).await;

    // Prefix
    prefix_results_are_ordered(backend.as_ref()).await;
    prefix_excludes_siblings(backend.as_ref()).await;
    prefix_empty_returns_empty(backend.as_ref()).await;

    // TTL
    ttl_key_expires(backend.as_ref()).await;
    ttl_zero_is_immediately_expired(backend.as_ref()).await;
    ttl_overwrite_clears_ttl(backend.as_ref()).await;
    ttl_refresh_replaces_deadline(backend.as_ref()).await;
    ttl_expired_keys_excluded_from_listing(backend.as_ref()).await;

    // CAS
    cas_insert_if_absent(backend.as_ref()).await;
    cas_insert_if_absent_fails_when_key_exists(backend.as_ref()).await;
    cas_update_with_matching_value(backend.as_ref()).await;
    cas_update_with_mismatched_value(backend.as_ref()).await;

    // CAD
    cad_matching_value_deletes(backend.as_ref()).await;
    cad_mismatched_value_conflicts(backend.as_ref()).await;
    cad_absent_key_conflicts(backend.as_ref()).await;

    // Concurrent
    concurrent_sets_to_different_keys(Arc::clone(&backend)).await;
    concurrent_cas_exactly_one_winner(Arc::clone(&backend)).await;
    concurrent_cad_exactly_one_winner(Arc::clone(&backend)).await;

    // Error semantics
    health_check_succeeds(backend.as_ref()).await;
    get_deleted_key_returns_none_not_error(backend.as_ref()).await;
    idempotent_delete(backend.as_ref()).await;
    oversized_value_is_rejected(backend.as_ref()).await;
}
