//! Shared test utilities for storage backend testing.
//!
//! This module provides helpers for building keys, pre-populating backends,
//! and asserting on [`StorageResult`] values. It is feature-gated behind
//! `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! certplane-storage = { path = "../storage", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use certplane_storage::testutil::{make_key, populated_backend};
//! ```

use crate::{
    StorageBackend,
    error::{StorageError, StorageResult},
    memory::MemoryBackend,
};

/// Create a deterministic test key from a prefix and index.
///
/// Produces keys like `"prefix/000042"` (zero-padded to 6 digits) encoded
/// as UTF-8 bytes, so lexicographic ordering matches numeric ordering.
#[must_use]
pub fn make_key(prefix: &str, idx: usize) -> Vec<u8> {
    format!("{prefix}/{idx:06}").into_bytes()
}

/// Create a test value of the given size filled with `0xAB` bytes.
#[must_use]
pub fn make_value(size: usize) -> Vec<u8> {
    vec![0xAB; size]
}

/// Create a test value tagged with a task ID and sequence number.
///
/// Produces values like `"task3-val42"`. Useful in concurrent tests to
/// identify which task wrote which value.
#[must_use]
pub fn make_tagged_value(task: usize, seq: usize) -> Vec<u8> {
    format!("task{task}-val{seq}").into_bytes()
}

/// Create a [`MemoryBackend`] pre-populated with `count` keys under `prefix`.
///
/// # Panics
///
/// Panics if any `set` operation fails.
pub async fn populated_backend(prefix: &str, count: usize, value_size: usize) -> MemoryBackend {
    let backend = MemoryBackend::new();
    let value = make_value(value_size);
    for i in 0..count {
        backend.set(make_key(prefix, i), value.clone()).await.expect("populate set failed");
    }
    backend
}

/// Assert that a [`StorageResult`] is an error of the given [`StorageError`]
/// variant.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use certplane_storage::{assert_storage_error, error::{StorageError, StorageResult}};
///
/// let result: StorageResult<()> = Err(StorageError::Conflict);
/// assert_storage_error!(result, Conflict);
/// ```
#[macro_export]
macro_rules! assert_storage_error {
    ($result:expr, $variant:ident) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::$variant { .. })),
            "expected StorageError::{}, got: {:?}",
            stringify!($variant),
            $result,
        );
    };
    ($result:expr, $variant:ident, $msg:expr) => {
        assert!(
            matches!($result, Err($crate::error::StorageError::$variant { .. })),
            "{}: expected StorageError::{}, got: {:?}",
            $msg,
            stringify!($variant),
            $result,
        );
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::Conflict`].
#[macro_export]
macro_rules! assert_conflict {
    ($result:expr) => {
        $crate::assert_storage_error!($result, Conflict)
    };
    ($result:expr, $msg:expr) => {
        $crate::assert_storage_error!($result, Conflict, $msg)
    };
}

/// Assert that a [`StorageResult`] is a [`StorageError::NotFound`].
#[macro_export]
macro_rules! assert_not_found {
    ($result:expr) => {
        $crate::assert_storage_error!($result, NotFound)
    };
    ($result:expr, $msg:expr) => {
        $crate::assert_storage_error!($result, NotFound, $msg)
    };
}

/// Assert that a [`StorageResult`] is `Ok`, returning the inner value.
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use certplane_storage::{assert_storage_ok, error::StorageResult};
///
/// let result: StorageResult<i32> = Ok(42);
/// let value = assert_storage_ok!(result);
/// assert_eq!(value, 42);
/// ```
#[macro_export]
macro_rules! assert_storage_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got StorageError: {e:?}"),
        }
    };
    ($result:expr, $msg:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("{}: expected Ok, got StorageError: {e:?}", $msg),
        }
    };
}

/// Returns `true` if the result is a [`StorageError::Conflict`].
pub fn is_conflict<T>(result: &StorageResult<T>) -> bool {
    matches!(result, Err(StorageError::Conflict))
}
