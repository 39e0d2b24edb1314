//! Common types used across storage operations.

use bytes::Bytes;

/// Key-value pair returned from prefix listings.
///
/// # Examples
///
/// ```
/// use bytes::Bytes;
/// use certplane_storage::KeyValue;
///
/// let kv = KeyValue::new(Bytes::from("presence/servers/node-1"), Bytes::from("{}"));
/// assert_eq!(kv.key_str(), Some("presence/servers/node-1"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    /// The key identifying this entry.
    pub key: Bytes,

    /// The value stored at this key.
    pub value: Bytes,
}

impl KeyValue {
    /// Creates a new key-value pair.
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }

    /// Returns the key as UTF-8, if it is valid UTF-8.
    ///
    /// Paths written by the registries are always UTF-8; `None` means the
    /// entry was written by something else.
    #[must_use]
    pub fn key_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.key).ok()
    }
}
