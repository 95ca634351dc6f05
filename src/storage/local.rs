//! Local filesystem backend.
//!
//! Payloads are sharded beneath `base_path/{shard}/{shard}/{key}` where the
//! shards are the first two bytes of MD5(key). Writes go to a temp file in
//! the target directory, are fsynced, then renamed into place.

use super::{ByteStream, StorageError, StorageProvider, StorageResult, ensure_key_safe};
use async_trait::async_trait;
use futures::StreamExt;
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    /// Create the backend, making sure `base_path` exists.
    pub async fn new(base_path: impl Into<PathBuf>) -> StorageResult<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).await?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Two-level shard identifiers for a key (00–ff each).
    fn shards(key: &str) -> (String, String) {
        let digest = md5::compute(key.as_bytes());
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    /// Fully-qualified payload path. Parent directories may not exist yet.
    fn object_path(&self, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::shards(key);
        let mut path = self.base_path.clone();
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    /// Remove now-empty shard directories up to (not including) the base path.
    async fn prune_empty_dirs(&self, start: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(&self.base_path) && current != self.base_path {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }

    async fn write_stream(file: &mut File, mut body: ByteStream) -> io::Result<u64> {
        let mut written: u64 = 0;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            written += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        Ok(written)
    }
}

#[async_trait]
impl StorageProvider for LocalStorage {
    fn kind(&self) -> &'static str {
        "local"
    }

    async fn save(&self, key: &str, body: ByteStream) -> StorageResult<u64> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        let parent = file_path.parent().map(Path::to_path_buf).ok_or_else(|| {
            StorageError::Io(io::Error::new(
                ErrorKind::Other,
                "object path missing parent directory",
            ))
        })?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let written = match Self::write_stream(&mut file, body).await {
            Ok(written) => written,
            Err(err) => {
                drop(file);
                let _ = fs::remove_file(&tmp_path).await;
                self.prune_empty_dirs(&parent).await;
                return Err(StorageError::Io(err));
            }
        };
        drop(file);

        if let Err(err) = fs::rename(&tmp_path, &file_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StorageError::Io(err));
        }

        debug!(key, written, path = %file_path.display(), "stored local object");
        Ok(written)
    }

    async fn open(&self, key: &str) -> StorageResult<ByteStream> {
        ensure_key_safe(key)?;
        let file = File::open(self.object_path(key)).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StorageError::NotFound(key.to_string())
            } else {
                StorageError::Io(err)
            }
        })?;
        Ok(Box::pin(ReaderStream::new(file)))
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let file_path = self.object_path(key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StorageError::Io(err)),
        }
        if let Some(parent) = file_path.parent() {
            self.prune_empty_dirs(parent).await;
        }
        Ok(())
    }

    fn full_path(&self, key: &str) -> Option<PathBuf> {
        ensure_key_safe(key).ok()?;
        Some(self.object_path(key))
    }
}
