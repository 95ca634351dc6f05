//! Represents an uploaded file and its lifecycle state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Outcome of the malware scan recorded for a file.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum ScanStatus {
    Pending,
    Clean,
    Infected,
    Error,
    Skipped,
}

impl ScanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScanStatus::Pending => "pending",
            ScanStatus::Clean => "clean",
            ScanStatus::Infected => "infected",
            ScanStatus::Error => "error",
            ScanStatus::Skipped => "skipped",
        }
    }
}

/// A single shared file.
///
/// The row stores metadata only; the payload lives in the configured
/// storage backend under `storage_key`. Secrets and backend locators are
/// never serialized.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FileObject {
    /// Opaque identifier, also the default storage key.
    #[serde(skip_serializing)]
    pub id: Uuid,

    /// Short human-facing code, unique among live rows.
    pub access_code: String,

    /// Original filename as supplied by the uploader.
    pub filename: String,

    /// Stored size in bytes (ciphertext size for encrypted uploads).
    pub size_bytes: i64,

    /// Plaintext size declared by the uploader.
    pub original_size_bytes: i64,

    pub is_encrypted: bool,

    /// Base64 KDF salt, present for encrypted uploads.
    pub encryption_salt: Option<String>,

    /// Password proof derived client-side from password and salt.
    #[serde(skip_serializing)]
    pub verification_hash: Option<String>,

    /// Burn-after-read flag.
    pub download_once: bool,

    /// Backend-specific locator.
    #[serde(skip_serializing)]
    pub storage_key: String,

    pub expires_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,

    pub scan_status: ScanStatus,

    /// Clean message, virus name, or skip/error reason.
    pub scan_result: String,

    /// Set once a burn-after-read download has claimed the file.
    #[serde(skip_serializing)]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl FileObject {
    /// Preview is limited to plaintext, non-infected, reusable files.
    pub fn is_previewable(&self) -> bool {
        !self.is_encrypted && !self.download_once && self.scan_status != ScanStatus::Infected
    }
}

/// Entry of the public listing; exposes only non-sensitive columns.
#[derive(Serialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PublicFile {
    pub access_code: String,
    pub filename: String,
    pub size_bytes: i64,
    pub expires_at: DateTime<Utc>,
    pub is_encrypted: bool,
}
