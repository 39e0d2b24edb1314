//! JSON record encoding and small shared helpers.

use std::time::Duration;

use certplane_storage::{StorageBackend, StorageError};
use chrono::{DateTime, TimeDelta, Utc};
use rand::Rng;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{AccessError, Result};

pub(crate) fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

/// Decodes a stored record, naming the path in the error so corrupt entries
/// can be found.
pub(crate) fn decode<T: DeserializeOwned>(path: &str, bytes: &[u8]) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|err| {
        AccessError::Storage(StorageError::serialization_with_source(
            format!("corrupt record at {path}"),
            err,
        ))
    })
}

/// Reads and decodes a single record; `None` if absent or expired.
pub(crate) async fn read<B, T>(backend: &B, path: &str) -> Result<Option<T>>
where
    B: StorageBackend,
    T: DeserializeOwned,
{
    match backend.get(path.as_bytes()).await? {
        Some(bytes) => decode(path, &bytes).map(Some),
        None => Ok(None),
    }
}

/// Lists and decodes every live record under `prefix`, in key order.
pub(crate) async fn list<B, T>(backend: &B, prefix: &str) -> Result<Vec<T>>
where
    B: StorageBackend,
    T: DeserializeOwned,
{
    backend
        .list_prefix(prefix.as_bytes())
        .await?
        .iter()
        .map(|kv| decode(kv.key_str().unwrap_or(prefix), &kv.value))
        .collect()
}

/// `now + ttl` as a wall-clock deadline.
pub(crate) fn deadline(now: DateTime<Utc>, ttl: Duration) -> Result<DateTime<Utc>> {
    TimeDelta::from_std(ttl)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .ok_or_else(|| AccessError::internal(format!("duration {ttl:?} is out of range")))
}

/// Hex-encoded random bytes for identifiers and bearer secrets.
pub(crate) fn random_hex<const N: usize>() -> String {
    let bytes: [u8; N] = rand::rng().random();
    hex::encode(bytes)
}
