//! Driven port for the key-value blob store.

use async_trait::async_trait;

use super::define_port_error;

define_port_error! {
    /// Errors raised by blob store adapters.
    pub enum BlobStoreError {
        /// No blob is stored under the key.
        NotFound { key: String } => "blob not found: {key}",
        /// The key is not a valid relative storage key.
        InvalidKey { key: String } => "invalid blob key: {key}",
        /// Storage backend failed.
        Io { message: String } => "blob store failed: {message}",
    }
}

/// Port for blob get, put, and delete.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read the blob stored under `key`.
    async fn get(&self, key: &str) -> Result<Vec<u8>, BlobStoreError>;

    /// Store `bytes` under `key`, replacing any existing blob.
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<(), BlobStoreError>;

    /// Remove the blob under `key`. Missing blobs are not an error.
    async fn delete(&self, key: &str) -> Result<(), BlobStoreError>;

    /// Public URL for `key`.
    fn public_url(&self, key: &str) -> String;
}
