//! Metadata persistence for files and abuse reports.
//!
//! All lifecycle transitions that must not race are single SQL statements:
//! code reservation is a conditional insert and the burn-after-read claim
//! is a conditional update.

use crate::{
    models::{
        file::{FileObject, PublicFile, ScanStatus},
        report::ReportRecord,
    },
    services::access_code,
};
use chrono::{DateTime, Utc};
use sqlx::{QueryBuilder, SqlitePool, sqlite::Sqlite};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

const FILE_COLUMNS: &str = "id, access_code, filename, size_bytes, original_size_bytes, \
     is_encrypted, encryption_salt, verification_hash, download_once, storage_key, \
     expires_at, created_at, scan_status, scan_result, consumed_at";

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("no free access code after {0} attempts")]
    CodeSpaceExhausted(usize),
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Everything needed to insert a file row except its access code.
#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: Uuid,
    pub filename: String,
    pub size_bytes: i64,
    pub original_size_bytes: i64,
    pub is_encrypted: bool,
    pub encryption_salt: Option<String>,
    pub verification_hash: Option<String>,
    pub download_once: bool,
    pub storage_key: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub scan_status: ScanStatus,
    pub scan_result: String,
}

#[derive(Clone)]
pub struct FileRepository {
    db: Arc<SqlitePool>,
}

impl FileRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.db
    }

    /// Insert `file` under a freshly generated access code.
    pub async fn insert_with_unique_code(&self, file: &NewFile) -> RepositoryResult<FileObject> {
        self.insert_with_codes(file, access_code::generate).await
    }

    /// Insert `file`, drawing candidate codes from `next_code` until one is free.
    pub async fn insert_with_codes<F>(
        &self,
        file: &NewFile,
        mut next_code: F,
    ) -> RepositoryResult<FileObject>
    where
        F: FnMut() -> String,
    {
        for attempt in 1..=access_code::MAX_ATTEMPTS {
            let code = next_code();
            if let Some(row) = self.try_insert(file, &code).await? {
                return Ok(row);
            }
            tracing::debug!(attempt, "access code collision");
        }
        Err(RepositoryError::CodeSpaceExhausted(access_code::MAX_ATTEMPTS))
    }

    /// Insert with `code` unless an unexpired row already holds it.
    ///
    /// Claimed rows keep their code reserved until they are deleted so a
    /// released claim can never produce two live rows with one code.
    async fn try_insert(&self, file: &NewFile, code: &str) -> sqlx::Result<Option<FileObject>> {
        let sql = format!(
            "INSERT INTO files ({cols})
             SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, NULL
             WHERE NOT EXISTS (
                 SELECT 1 FROM files WHERE access_code = ? AND expires_at > ?
             )
             RETURNING {cols}",
            cols = FILE_COLUMNS
        );
        sqlx::query_as::<_, FileObject>(&sql)
            .bind(file.id)
            .bind(code)
            .bind(&file.filename)
            .bind(file.size_bytes)
            .bind(file.original_size_bytes)
            .bind(file.is_encrypted)
            .bind(&file.encryption_salt)
            .bind(&file.verification_hash)
            .bind(file.download_once)
            .bind(&file.storage_key)
            .bind(file.expires_at)
            .bind(file.created_at)
            .bind(file.scan_status)
            .bind(&file.scan_result)
            .bind(code)
            .bind(file.created_at)
            .fetch_optional(&*self.db)
            .await
    }

    /// Live row for `code`: not expired and not claimed.
    pub async fn find_live_by_code(
        &self,
        code: &str,
        now: DateTime<Utc>,
    ) -> sqlx::Result<Option<FileObject>> {
        let sql = format!(
            "SELECT {} FROM files
             WHERE access_code = ? AND expires_at > ? AND consumed_at IS NULL",
            FILE_COLUMNS
        );
        sqlx::query_as::<_, FileObject>(&sql)
            .bind(code)
            .bind(now)
            .fetch_optional(&*self.db)
            .await
    }

    pub async fn find_by_id(&self, id: Uuid) -> sqlx::Result<Option<FileObject>> {
        let sql = format!("SELECT {} FROM files WHERE id = ?", FILE_COLUMNS);
        sqlx::query_as::<_, FileObject>(&sql)
            .bind(id)
            .fetch_optional(&*self.db)
            .await
    }

    /// Claim a burn-after-read file for a single download.
    ///
    /// Returns `false` when another download claimed it first or it expired.
    pub async fn claim_once(&self, id: Uuid, now: DateTime<Utc>) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET consumed_at = ?
             WHERE id = ? AND consumed_at IS NULL AND expires_at > ?",
        )
        .bind(now)
        .bind(id)
        .bind(now)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Undo a claim after an interrupted download.
    pub async fn release_claim(&self, id: Uuid) -> sqlx::Result<bool> {
        let result = sqlx::query("UPDATE files SET consumed_at = NULL WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Refresh a held claim so the stale-claim sweep leaves an active download alone.
    pub async fn touch_claim(&self, id: Uuid, now: DateTime<Utc>) -> sqlx::Result<bool> {
        let result = sqlx::query(
            "UPDATE files SET consumed_at = ? WHERE id = ? AND consumed_at IS NOT NULL",
        )
        .bind(now)
        .bind(id)
        .execute(&*self.db)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn delete(&self, id: Uuid) -> sqlx::Result<bool> {
        let result = sqlx::query("DELETE FROM files WHERE id = ?")
            .bind(id)
            .execute(&*self.db)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    /// One batch of rows the reaper should collect, ordered by id.
    ///
    /// A row is reapable when it has expired or when its burn claim is older
    /// than `stale_claim_before`. `after` is the id cursor from the previous
    /// batch.
    pub async fn list_reapable(
        &self,
        now: DateTime<Utc>,
        stale_claim_before: DateTime<Utc>,
        after: Option<Uuid>,
        limit: u32,
    ) -> sqlx::Result<Vec<FileObject>> {
        let mut builder = QueryBuilder::<Sqlite>::new("SELECT ");
        builder.push(FILE_COLUMNS);
        builder.push(" FROM files WHERE (expires_at <= ");
        builder.push_bind(now);
        builder.push(" OR (consumed_at IS NOT NULL AND consumed_at <= ");
        builder.push_bind(stale_claim_before);
        builder.push("))");

        if let Some(cursor) = after {
            builder.push(" AND id > ");
            builder.push_bind(cursor);
        }

        builder.push(" ORDER BY id ASC LIMIT ");
        builder.push_bind(i64::from(limit.max(1)));

        builder.build_query_as().fetch_all(&*self.db).await
    }

    /// Newest live, unencrypted, reusable files.
    pub async fn list_public(
        &self,
        now: DateTime<Utc>,
        limit: u32,
    ) -> sqlx::Result<Vec<PublicFile>> {
        sqlx::query_as::<_, PublicFile>(
            "SELECT access_code, filename, size_bytes, expires_at, is_encrypted
             FROM files
             WHERE expires_at > ? AND consumed_at IS NULL
               AND is_encrypted = 0 AND download_once = 0
             ORDER BY created_at DESC
             LIMIT ?",
        )
        .bind(now)
        .bind(i64::from(limit))
        .fetch_all(&*self.db)
        .await
    }

    pub async fn insert_report(
        &self,
        access_code: &str,
        reason: &str,
        reporter_ip: &str,
        now: DateTime<Utc>,
    ) -> sqlx::Result<ReportRecord> {
        sqlx::query_as::<_, ReportRecord>(
            "INSERT INTO reports (id, access_code, reason, reporter_ip, created_at)
             VALUES (?, ?, ?, ?, ?)
             RETURNING id, access_code, reason, reporter_ip, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(access_code)
        .bind(reason)
        .bind(reporter_ip)
        .bind(now)
        .fetch_one(&*self.db)
        .await
    }

    pub async fn count_reports(&self, access_code: &str) -> sqlx::Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM reports WHERE access_code = ?")
            .bind(access_code)
            .fetch_one(&*self.db)
            .await
    }
}
