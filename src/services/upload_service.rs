//! Upload pipeline: size-capped streaming into storage, scan policy,
//! access-code assignment and metadata persistence.
//!
//! Once the payload has been written, any later failure deletes it again,
//! so a stored object always has a row and vice versa.

use crate::{
    config::AppConfig,
    crypto,
    errors::AppError,
    models::file::{FileObject, ScanStatus},
    services::{
        file_repository::{FileRepository, NewFile},
        scanner::{ScanVerdict, Scanner},
    },
    storage::{ByteStream, StorageProvider},
};
use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};
use uuid::Uuid;

const MAX_FILENAME_LEN: usize = 255;
const MAX_HASH_LEN: usize = 128;

/// Key material metadata for an end-to-end encrypted upload.
#[derive(Debug, Clone)]
pub struct EncryptionParams {
    /// Base64 KDF salt.
    pub salt: String,
    pub verification_hash: String,
}

pub struct UploadRequest {
    pub filename: String,
    pub original_size: i64,
    pub encryption: Option<EncryptionParams>,
    /// Requested lifetime in seconds.
    pub expires_in: Option<i64>,
    pub download_once: bool,
    /// `Content-Length` of the request, when the client sent one.
    pub declared_length: Option<u64>,
    pub body: ByteStream,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadReceipt {
    pub access_code: String,
    pub url_path: String,
}

impl From<&FileObject> for UploadReceipt {
    fn from(file: &FileObject) -> Self {
        Self {
            access_code: file.access_code.clone(),
            url_path: format!("/download/{}", file.access_code),
        }
    }
}

#[derive(Debug, Clone)]
pub struct UploadPolicy {
    pub max_bytes: u64,
    pub default_ttl: Duration,
    pub max_ttl: Duration,
    pub scan_skip_ttl: Duration,
}

impl UploadPolicy {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            max_bytes: config.max_upload_bytes(),
            default_ttl: config.default_ttl,
            max_ttl: config.max_ttl,
            scan_skip_ttl: config.scan_skip_ttl,
        }
    }

    /// Absent or non-positive values fall back to the default; larger
    /// values are clamped to the maximum.
    pub fn resolve_ttl(&self, expires_in: Option<i64>) -> Duration {
        match expires_in {
            Some(secs) if secs > 0 => Duration::from_secs(secs as u64).min(self.max_ttl),
            _ => self.default_ttl.min(self.max_ttl),
        }
    }
}

#[derive(Clone)]
pub struct UploadService {
    storage: Arc<dyn StorageProvider>,
    repo: FileRepository,
    scanner: Option<Arc<dyn Scanner>>,
    policy: UploadPolicy,
}

impl UploadService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        repo: FileRepository,
        scanner: Option<Arc<dyn Scanner>>,
        policy: UploadPolicy,
    ) -> Self {
        Self {
            storage,
            repo,
            scanner,
            policy,
        }
    }

    /// Run the pipeline on its own task.
    ///
    /// If the client disconnects, the handler future is dropped but the
    /// pipeline keeps running, sees the body stream fail and cleans up.
    pub async fn upload(&self, request: UploadRequest) -> Result<FileObject, AppError> {
        let service = self.clone();
        tokio::spawn(async move { service.process(request).await })
            .await
            .map_err(|err| AppError::internal(format!("upload task failed: {}", err)))?
    }

    async fn process(&self, request: UploadRequest) -> Result<FileObject, AppError> {
        let UploadRequest {
            filename,
            original_size,
            encryption,
            expires_in,
            download_once,
            declared_length,
            body,
        } = request;

        let filename = sanitize_filename(&filename)?;
        if original_size < 0 {
            return Err(AppError::validation("X-File-Original-Size must not be negative"));
        }
        let encryption = encryption.map(validate_encryption).transpose()?;

        let limit = self.policy.max_bytes;
        if declared_length.is_some_and(|len| len > limit) {
            return Err(AppError::TooLarge { limit_bytes: limit });
        }

        let ttl = self.policy.resolve_ttl(expires_in);
        let id = Uuid::new_v4();
        let storage_key = id.to_string();

        let exceeded = Arc::new(AtomicBool::new(false));
        let limited = limit_stream(body, limit, exceeded.clone());
        let size_bytes = match self.storage.save(&storage_key, limited).await {
            Ok(written) => written,
            Err(err) => {
                self.discard(&storage_key).await;
                if exceeded.load(Ordering::SeqCst) {
                    tracing::warn!(limit_bytes = limit, "upload exceeded size limit");
                    return Err(AppError::TooLarge { limit_bytes: limit });
                }
                tracing::error!(
                    key = %storage_key,
                    backend = self.storage.kind(),
                    error = %err,
                    "upload interrupted or storage write failed"
                );
                return Err(err.into());
            }
        };

        let (scan_status, scan_result) = self
            .scan_policy(&storage_key, encryption.is_some(), ttl)
            .await;

        let now = Utc::now();
        let expires_at = now
            + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::days(7));
        let (encryption_salt, verification_hash) = match encryption {
            Some(params) => (Some(params.salt), Some(params.verification_hash)),
            None => (None, None),
        };
        let new_file = NewFile {
            id,
            filename,
            size_bytes: size_bytes as i64,
            original_size_bytes: original_size,
            is_encrypted: encryption_salt.is_some(),
            encryption_salt,
            verification_hash,
            download_once,
            storage_key: storage_key.clone(),
            expires_at,
            created_at: now,
            scan_status,
            scan_result,
        };

        match self.repo.insert_with_unique_code(&new_file).await {
            Ok(file) => {
                tracing::info!(
                    code = %file.access_code,
                    file_id = %file.id,
                    size_bytes = file.size_bytes,
                    encrypted = file.is_encrypted,
                    download_once = file.download_once,
                    scan_status = file.scan_status.as_str(),
                    "upload stored"
                );
                Ok(file)
            }
            Err(err) => {
                self.discard(&storage_key).await;
                Err(err.into())
            }
        }
    }

    async fn scan_policy(&self, key: &str, encrypted: bool, ttl: Duration) -> (ScanStatus, String) {
        if encrypted {
            return (
                ScanStatus::Clean,
                "end-to-end encrypted, not scanned by server".into(),
            );
        }
        if ttl < self.policy.scan_skip_ttl {
            tracing::info!(key, "short-lived file, skipping scan");
            return (ScanStatus::Skipped, "short-lived file, scan skipped".into());
        }
        let Some(scanner) = &self.scanner else {
            return (ScanStatus::Skipped, "scanner unavailable".into());
        };

        let stream = match self.storage.open(key).await {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(key, backend = self.storage.kind(), error = %err, "could not reopen upload for scanning");
                return (ScanStatus::Error, "stored file could not be read for scanning".into());
            }
        };
        match scanner.scan(stream).await {
            ScanVerdict::Clean(detail) => (ScanStatus::Clean, detail),
            ScanVerdict::Infected(name) => (ScanStatus::Infected, name),
            ScanVerdict::Error(detail) => (ScanStatus::Error, detail),
        }
    }

    async fn discard(&self, key: &str) {
        if let Err(err) = self.storage.delete(key).await {
            tracing::error!(key, backend = self.storage.kind(), error = %err, "could not remove orphaned upload");
        }
    }
}

/// Fail the stream as soon as more than `limit` bytes have passed through.
fn limit_stream(body: ByteStream, limit: u64, exceeded: Arc<AtomicBool>) -> ByteStream {
    let mut seen: u64 = 0;
    Box::pin(body.map(move |chunk| {
        let chunk = chunk?;
        seen = seen.saturating_add(chunk.len() as u64);
        if seen > limit {
            exceeded.store(true, Ordering::SeqCst);
            return Err(io::Error::other(format!(
                "upload exceeds limit of {} bytes",
                limit
            )));
        }
        Ok(chunk)
    }))
}

fn sanitize_filename(raw: &str) -> Result<String, AppError> {
    let name = raw
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(raw)
        .trim()
        .chars()
        .filter(|c| !c.is_control())
        .collect::<String>();
    if name.is_empty() || name == "." || name == ".." {
        return Err(AppError::validation("invalid or missing file name (X-File-Name)"));
    }
    if name.len() <= MAX_FILENAME_LEN {
        return Ok(name);
    }
    let mut end = MAX_FILENAME_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    Ok(name[..end].to_string())
}

fn validate_encryption(params: EncryptionParams) -> Result<EncryptionParams, AppError> {
    crypto::decode_salt(&params.salt)
        .map_err(|err| AppError::validation(format!("invalid X-File-Salt: {}", err)))?;
    let hash = params.verification_hash.trim().to_ascii_lowercase();
    if hash.is_empty()
        || hash.len() > MAX_HASH_LEN
        || !hash.bytes().all(|b| b.is_ascii_hexdigit())
    {
        return Err(AppError::validation(
            "X-File-Verification-Hash must be a hex digest",
        ));
    }
    Ok(EncryptionParams {
        salt: params.salt.trim().to_string(),
        verification_hash: hash,
    })
}
