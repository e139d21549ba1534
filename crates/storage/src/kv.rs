//! Namespaced key-value storage abstraction
//!
//! Backends store raw bytes. Encoding of typed records is done by callers
//! (see [`crate::SystemStore`]), so memory backends never serialize.

use async_trait::async_trait;
use bytes::Bytes;
use std::fmt::{Debug, Display};

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur in storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Storage backend error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Invalid value format
    #[error("Invalid value format: {0}")]
    InvalidValue(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A write-once record already holds a different value
    #[error("Record {0} is already set")]
    AlreadySet(String),
}

/// A key in the storage system
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StorageKey(pub Bytes);

impl StorageKey {
    /// Create a new storage key from bytes
    pub fn new(key: impl Into<Bytes>) -> Self {
        Self(key.into())
    }

    /// Get the raw bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl Display for StorageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "0x{}", hex::encode(&self.0)),
        }
    }
}

impl From<&str> for StorageKey {
    fn from(key: &str) -> Self {
        Self(Bytes::copy_from_slice(key.as_bytes()))
    }
}

impl From<String> for StorageKey {
    fn from(key: String) -> Self {
        Self(Bytes::from(key))
    }
}

/// A namespace for organizing data
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageNamespace(String);

impl StorageNamespace {
    /// Create a new storage namespace
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get the namespace as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for StorageNamespace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Durable key-value storage.
///
/// A successful `put` must survive a process restart.
#[async_trait]
pub trait KeyValueStorage: Clone + Debug + Send + Sync + 'static {
    /// Read a value
    async fn get(&self, namespace: &StorageNamespace, key: &StorageKey)
    -> StorageResult<Option<Bytes>>;

    /// Write a value, replacing any previous one
    async fn put(
        &self,
        namespace: &StorageNamespace,
        key: &StorageKey,
        value: Bytes,
    ) -> StorageResult<()>;

    /// Delete a value; deleting a missing key is not an error
    async fn delete(&self, namespace: &StorageNamespace, key: &StorageKey) -> StorageResult<()>;

    /// Flush pending writes before shutdown
    async fn shutdown(&self) -> StorageResult<()> {
        Ok(())
    }
}
