//! Streaming byte-store abstraction.
//!
//! Every backend stores opaque payloads addressed by a flat key. Callers
//! never learn which backend they talk to except through [`StorageProvider::kind`]
//! (for logs) and [`StorageProvider::full_path`] (local backend only).

pub mod local;
pub mod s3;
pub mod webdav;

use crate::config::StorageConfig;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::{io, path::PathBuf, pin::Pin, sync::Arc};
use thiserror::Error;

pub use local::LocalStorage;
pub use s3::S3Storage;
pub use webdav::WebDavStorage;

/// A boxed stream of payload bytes, used for both directions.
pub type ByteStream = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

const MAX_KEY_LEN: usize = 255;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object `{0}` not found")]
    NotFound(String),
    #[error("invalid storage key `{0}`")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("S3 error: {0}")]
    S3(Box<dyn std::error::Error + Send + Sync>),
    #[error("WebDAV {method} `{key}` failed with status {status}")]
    WebDav {
        method: &'static str,
        key: String,
        status: u16,
    },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
    #[error("storage configuration error: {0}")]
    Config(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[async_trait]
pub trait StorageProvider: Send + Sync {
    /// Short backend name for logs ("local", "s3", "webdav").
    fn kind(&self) -> &'static str;

    /// Stream `body` into the object at `key`, returning the bytes written.
    ///
    /// A failed save may leave a partial object behind on remote backends;
    /// callers follow up with [`delete`](Self::delete), which is idempotent.
    async fn save(&self, key: &str, body: ByteStream) -> StorageResult<u64>;

    /// Open the object for streaming reads. A missing key is [`StorageError::NotFound`].
    async fn open(&self, key: &str) -> StorageResult<ByteStream>;

    /// Remove the object. Deleting a missing key succeeds.
    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Filesystem path of the object when the backend exposes one.
    fn full_path(&self, _key: &str) -> Option<PathBuf> {
        None
    }
}

/// Build the backend selected by configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn StorageProvider>> {
    let provider: Arc<dyn StorageProvider> = match config {
        StorageConfig::Local { path } => Arc::new(LocalStorage::new(path).await?),
        StorageConfig::S3(s3) => Arc::new(S3Storage::new(s3).await?),
        StorageConfig::WebDav(dav) => Arc::new(WebDavStorage::new(dav)?),
    };
    tracing::info!(backend = provider.kind(), "storage backend initialized");
    Ok(provider)
}

/// Reject keys that could escape the backend namespace.
///
/// Keys are flat: no separators, no `..`, no control characters.
pub(crate) fn ensure_key_safe(key: &str) -> StorageResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.contains("..")
        || key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'/' || b == b'\\');
    if invalid {
        return Err(StorageError::InvalidKey(key.to_string()));
    }
    Ok(())
}
