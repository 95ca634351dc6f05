//! Download pipeline and the read-only file endpoints.
//!
//! Lookups only ever see live rows (unexpired, unclaimed), so expiry is
//! enforced here whether or not the reaper has run. Burn-after-read files
//! are claimed before their payload is opened; the claim turns into a
//! scheduled deletion once the whole body has been streamed and is released
//! if streaming stops early.

use crate::{
    errors::AppError,
    models::{
        file::{FileObject, PublicFile, ScanStatus},
        report::ReportRecord,
    },
    services::{access_code, burn_scheduler::BurnScheduler, file_repository::FileRepository},
    storage::{ByteStream, StorageError, StorageProvider},
};
use base64::{Engine as _, engine::general_purpose};
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt};
use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use std::{
    io,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use tokio_util::sync::{CancellationToken, DropGuard};
use uuid::Uuid;

const PUBLIC_LISTING_LIMIT: u32 = 20;
const DEFAULT_CLAIM_HEARTBEAT: Duration = Duration::from_secs(60);
const MAX_REASON_LEN: usize = 1000;

/// RFC 5987 `attr-char` without the optional punctuation.
const FILENAME_ESCAPE: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// How the client asked for the payload.
#[derive(Debug, Clone)]
pub enum DownloadAuth {
    /// Plain `GET`, no proof supplied.
    Anonymous,
    /// `POST` carrying the verification hash.
    VerificationHash(String),
}

pub struct Download {
    pub file: FileObject,
    pub body: ByteStream,
}

pub struct Preview {
    pub file: FileObject,
    pub content_type: &'static str,
    pub bytes: Bytes,
}

#[derive(Clone)]
pub struct DownloadService {
    storage: Arc<dyn StorageProvider>,
    repo: FileRepository,
    burn: BurnScheduler,
    preview_max_bytes: u64,
    claim_heartbeat: Duration,
}

impl DownloadService {
    pub fn new(
        storage: Arc<dyn StorageProvider>,
        repo: FileRepository,
        burn: BurnScheduler,
        preview_max_bytes: u64,
    ) -> Self {
        Self {
            storage,
            repo,
            burn,
            preview_max_bytes,
            claim_heartbeat: DEFAULT_CLAIM_HEARTBEAT,
        }
    }

    /// How often a streaming burn-after-read download refreshes its claim.
    /// Must stay well below the reaper's stale-claim age.
    pub fn with_claim_heartbeat(mut self, every: Duration) -> Self {
        self.claim_heartbeat = every.max(Duration::from_millis(1));
        self
    }

    async fn live(&self, code: &str) -> Result<FileObject, AppError> {
        let code = access_code::normalize(code);
        if !access_code::is_well_formed(&code) {
            return Err(AppError::NotFound);
        }
        self.repo
            .find_live_by_code(&code, Utc::now())
            .await?
            .ok_or(AppError::NotFound)
    }

    pub async fn metadata(&self, code: &str) -> Result<FileObject, AppError> {
        self.live(code).await
    }

    pub async fn public_files(&self) -> Result<Vec<PublicFile>, AppError> {
        Ok(self
            .repo
            .list_public(Utc::now(), PUBLIC_LISTING_LIMIT)
            .await?)
    }

    pub async fn download(&self, code: &str, auth: DownloadAuth) -> Result<Download, AppError> {
        let file = self.live(code).await?;

        if file.is_encrypted {
            let DownloadAuth::VerificationHash(supplied) = &auth else {
                return Err(AppError::MethodNotAllowed(
                    "encrypted files must be downloaded with POST and a verification hash".into(),
                ));
            };
            let expected = file.verification_hash.as_deref().unwrap_or_default();
            let supplied = supplied.trim().to_ascii_lowercase();
            if expected.is_empty() || !constant_time_eq(&supplied, expected) {
                tracing::warn!(code = %file.access_code, "verification hash mismatch");
                return Err(AppError::AuthFailure);
            }
        }

        if file.download_once && !self.repo.claim_once(file.id, Utc::now()).await? {
            tracing::info!(code = %file.access_code, "burn-after-read file already claimed");
            return Err(AppError::NotFound);
        }

        let stream = match self.storage.open(&file.storage_key).await {
            Ok(stream) => stream,
            Err(err) => {
                if file.download_once {
                    self.release(file.id).await;
                }
                return Err(self.open_failed(&file, err));
            }
        };

        tracing::info!(
            code = %file.access_code,
            size_bytes = file.size_bytes,
            download_once = file.download_once,
            "download started"
        );

        let body: ByteStream = if file.download_once {
            Box::pin(BurnOnComplete::new(
                stream,
                &file,
                self.repo.clone(),
                self.burn.clone(),
                self.claim_heartbeat,
            ))
        } else {
            stream
        };
        Ok(Download { file, body })
    }

    pub async fn preview(&self, code: &str) -> Result<Preview, AppError> {
        let file = self.live(code).await?;
        if !file.is_previewable() {
            let reason = if file.is_encrypted {
                "encrypted files cannot be previewed on the server"
            } else if file.scan_status == ScanStatus::Infected {
                "a threat was detected, preview is disabled for this file"
            } else {
                "burn-after-read files cannot be previewed"
            };
            return Err(AppError::Forbidden(reason.into()));
        }
        let limit = self.preview_max_bytes;
        if file.size_bytes < 0 || file.size_bytes as u64 > limit {
            return Err(AppError::TooLarge { limit_bytes: limit });
        }

        let mut stream = self
            .storage
            .open(&file.storage_key)
            .await
            .map_err(|err| self.open_failed(&file, err))?;
        let mut buffer = BytesMut::with_capacity(file.size_bytes as usize);
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(StorageError::from)?;
            if (buffer.len() + chunk.len()) as u64 > limit {
                return Err(AppError::TooLarge { limit_bytes: limit });
            }
            buffer.extend_from_slice(&chunk);
        }

        let bytes = buffer.freeze();
        Ok(Preview {
            content_type: sniff_content_type(&bytes),
            file,
            bytes,
        })
    }

    pub async fn preview_data_uri(&self, code: &str) -> Result<String, AppError> {
        let preview = self.preview(code).await?;
        Ok(format!(
            "data:{};base64,{}",
            preview.content_type.replace(' ', ""),
            general_purpose::STANDARD.encode(&preview.bytes)
        ))
    }

    pub async fn report(
        &self,
        code: &str,
        reason: &str,
        reporter_ip: &str,
    ) -> Result<ReportRecord, AppError> {
        let code = access_code::normalize(code);
        if code.is_empty() {
            return Err(AppError::validation("accessCode is required"));
        }
        let reason: String = reason.trim().chars().take(MAX_REASON_LEN).collect();
        let report = self
            .repo
            .insert_report(&code, &reason, reporter_ip, Utc::now())
            .await?;
        tracing::info!(code = %report.access_code, ip = %reporter_ip, reason = %report.reason, "abuse report received");
        Ok(report)
    }

    async fn release(&self, id: Uuid) {
        if let Err(err) = self.repo.release_claim(id).await {
            tracing::error!(file_id = %id, error = %err, "could not release download claim");
        }
    }

    fn open_failed(&self, file: &FileObject, err: StorageError) -> AppError {
        tracing::error!(
            file_id = %file.id,
            backend = self.storage.kind(),
            error = %err,
            "could not open stored file"
        );
        match err {
            StorageError::NotFound(_) => AppError::NotFound,
            other => AppError::Storage(other),
        }
    }
}

/// `attachment` or `inline` disposition with an RFC 5987 encoded filename.
pub fn content_disposition(kind: &str, filename: &str) -> String {
    format!(
        "{}; filename*=UTF-8''{}",
        kind,
        utf8_percent_encode(filename, FILENAME_ESCAPE)
    )
}

/// Compare without short-circuiting on the first differing byte.
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Best-effort content type from leading bytes.
pub fn sniff_content_type(bytes: &[u8]) -> &'static str {
    const SIGNATURES: &[(&[u8], &str)] = &[
        (b"\x89PNG\r\n\x1a\n", "image/png"),
        (b"\xff\xd8\xff", "image/jpeg"),
        (b"GIF87a", "image/gif"),
        (b"GIF89a", "image/gif"),
        (b"BM", "image/bmp"),
        (b"%PDF-", "application/pdf"),
        (b"PK\x03\x04", "application/zip"),
        (b"\x1f\x8b\x08", "application/x-gzip"),
        (b"ID3", "audio/mpeg"),
        (b"OggS", "application/ogg"),
        (b"\x1aE\xdf\xa3", "video/webm"),
    ];
    if let Some(mime) = SIGNATURES
        .iter()
        .find(|(magic, _)| bytes.starts_with(magic))
        .map(|&(_, mime)| mime)
    {
        return mime;
    }
    if bytes.len() >= 12 && &bytes[..4] == b"RIFF" {
        match &bytes[8..12] {
            b"WEBP" => return "image/webp",
            b"WAVE" => return "audio/wave",
            _ => {}
        }
    }
    if bytes.len() >= 12 && &bytes[4..8] == b"ftyp" {
        return "video/mp4";
    }

    let head = &bytes[..bytes.len().min(512)];
    let text = match std::str::from_utf8(head) {
        Ok(text) => Some(text),
        // a multi-byte character cut at the sniff boundary
        Err(err) if err.error_len().is_none() => std::str::from_utf8(&head[..err.valid_up_to()]).ok(),
        Err(_) => None,
    };
    match text {
        Some(text) if !text.contains('\0') => {
            let lead = text.trim_start().to_ascii_lowercase();
            if lead.starts_with("<!doctype html") || lead.starts_with("<html") {
                "text/html; charset=utf-8"
            } else if lead.starts_with("<?xml") {
                "text/xml; charset=utf-8"
            } else {
                "text/plain; charset=utf-8"
            }
        }
        _ => "application/octet-stream",
    }
}

/// Response body for burn-after-read files.
///
/// Hands the file to the burn scheduler once every byte has been yielded
/// (or the inner stream ends). Dropped or failed early, it releases the
/// claim so the recipient can retry. While it is alive a heartbeat task
/// keeps the claim fresh, so slow transfers are not mistaken for
/// abandoned ones.
struct BurnOnComplete {
    inner: ByteStream,
    claim: Option<Claim>,
    expected: u64,
    sent: u64,
}

struct Claim {
    file_id: Uuid,
    storage_key: String,
    repo: FileRepository,
    burn: BurnScheduler,
    _heartbeat: DropGuard,
}

impl BurnOnComplete {
    fn new(
        inner: ByteStream,
        file: &FileObject,
        repo: FileRepository,
        burn: BurnScheduler,
        heartbeat: Duration,
    ) -> Self {
        let stop = CancellationToken::new();
        tokio::spawn(keep_claim_fresh(repo.clone(), file.id, heartbeat, stop.clone()));
        Self {
            inner,
            claim: Some(Claim {
                file_id: file.id,
                storage_key: file.storage_key.clone(),
                repo,
                burn,
                _heartbeat: stop.drop_guard(),
            }),
            expected: file.size_bytes.max(0) as u64,
            sent: 0,
        }
    }

    fn complete(&mut self) {
        if let Some(claim) = self.claim.take() {
            // The last chunk is yielded before hyper flushes it to the socket;
            // the scheduler's grace delay covers the bytes still in flight.
            claim.burn.schedule(claim.file_id, &claim.storage_key);
        }
    }
}

async fn keep_claim_fresh(repo: FileRepository, file_id: Uuid, every: Duration, stop: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = stop.cancelled() => return,
            _ = ticker.tick() => {
                match repo.touch_claim(file_id, Utc::now()).await {
                    Ok(true) => tracing::trace!(file_id = %file_id, "download claim refreshed"),
                    Ok(false) => return,
                    Err(err) => tracing::warn!(file_id = %file_id, error = %err, "could not refresh download claim"),
                }
            }
        }
    }
}

impl Stream for BurnOnComplete {
    type Item = io::Result<Bytes>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = &mut *self;
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                this.sent += chunk.len() as u64;
                if this.sent >= this.expected {
                    this.complete();
                }
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(Some(Err(err))) => {
                // Drop releases the claim.
                if let Some(claim) = this.claim.take() {
                    claim.release();
                }
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(None) => {
                this.complete();
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl Claim {
    fn release(self) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(file_id = %self.file_id, "no runtime to release claim, leaving it to the reaper");
            return;
        };
        handle.spawn(async move {
            match self.repo.release_claim(self.file_id).await {
                Ok(_) => tracing::info!(file_id = %self.file_id, "download interrupted, claim released"),
                Err(err) => tracing::error!(file_id = %self.file_id, error = %err, "could not release download claim"),
            }
        });
    }
}

impl Drop for BurnOnComplete {
    fn drop(&mut self) {
        if let Some(claim) = self.claim.take() {
            claim.release();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        crypto, db,
        services::{file_repository::tests::new_file, file_repository::NewFile},
        storage::LocalStorage,
    };
    use chrono::Duration as ChronoDuration;
    use futures::{TryStreamExt, stream};

    struct Harness {
        service: DownloadService,
        repo: FileRepository,
        storage: Arc<LocalStorage>,
        burn: BurnScheduler,
        _dir: tempfile::TempDir,
    }

    async fn harness() -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(LocalStorage::new(dir.path()).await.unwrap());
        let repo = FileRepository::new(Arc::new(db::memory_pool().await.unwrap()));
        let (burn, _) = BurnScheduler::spawn(
            storage.clone(),
            repo.clone(),
            Duration::from_millis(20),
            CancellationToken::new(),
        );
        let service = DownloadService::new(storage.clone(), repo.clone(), burn.clone(), 64)
            .with_claim_heartbeat(Duration::from_millis(20));
        Harness {
            service,
            repo,
            storage,
            burn,
            _dir: dir,
        }
    }

    async fn put(h: &Harness, mut file: NewFile, data: &'static [u8]) -> FileObject {
        let body: ByteStream = Box::pin(stream::iter(vec![Ok::<_, io::Error>(Bytes::from_static(data))]));
        file.size_bytes = h.storage.save(&file.storage_key, body).await.unwrap() as i64;
        h.repo.insert_with_unique_code(&file).await.unwrap()
    }

    async fn collect(body: ByteStream) -> Vec<u8> {
        let chunks: Vec<Bytes> = body.try_collect().await.unwrap();
        chunks.concat()
    }

    fn encrypted(password: &str) -> (NewFile, String) {
        let salt = crypto::generate_salt();
        let hash = crypto::verification_hash(password, &salt);
        let mut file = new_file(ChronoDuration::hours(1));
        file.is_encrypted = true;
        file.encryption_salt = Some(crypto::encode_salt(&salt));
        file.verification_hash = Some(hash.clone());
        (file, hash)
    }

    #[test]
    fn disposition_is_percent_encoded() {
        assert_eq!(
            content_disposition("attachment", "my report (final).pdf"),
            "attachment; filename*=UTF-8''my%20report%20%28final%29.pdf"
        );
        assert_eq!(
            content_disposition("inline", "日本.txt"),
            "inline; filename*=UTF-8''%E6%97%A5%E6%9C%AC.txt"
        );
    }

    #[test]
    fn constant_time_comparison() {
        assert!(constant_time_eq("abc", "abc"));
        assert!(!constant_time_eq("abc", "abd"));
        assert!(!constant_time_eq("abc", "abcd"));
    }

    #[test]
    fn sniffing() {
        assert_eq!(sniff_content_type(b"\x89PNG\r\n\x1a\nrest"), "image/png");
        assert_eq!(sniff_content_type(b"%PDF-1.7"), "application/pdf");
        assert_eq!(sniff_content_type(b"RIFF\0\0\0\0WEBPVP8 "), "image/webp");
        assert_eq!(sniff_content_type(b"hello world"), "text/plain; charset=utf-8");
        assert_eq!(sniff_content_type(b"  <!DOCTYPE html><p>"), "text/html; charset=utf-8");
        assert_eq!(sniff_content_type(b"\x00\x01\x02\xff"), "application/octet-stream");
        assert_eq!(sniff_content_type(b""), "text/plain; charset=utf-8");
    }

    #[tokio::test]
    async fn plain_download_streams_payload() {
        let h = harness().await;
        let file = put(&h, new_file(ChronoDuration::hours(1)), b"hello world").await;
        let download = h
            .service
            .download(&file.access_code.to_lowercase(), DownloadAuth::Anonymous)
            .await
            .unwrap();
        assert_eq!(download.file.id, file.id);
        assert_eq!(collect(download.body).await, b"hello world");
    }

    #[tokio::test]
    async fn expired_file_is_not_found_without_reaper() {
        let h = harness().await;
        let file = put(&h, new_file(ChronoDuration::seconds(-1)), b"old").await;
        assert!(matches!(
            h.service.download(&file.access_code, DownloadAuth::Anonymous).await,
            Err(AppError::NotFound)
        ));
        assert!(matches!(
            h.service.metadata(&file.access_code).await,
            Err(AppError::NotFound)
        ));
    }

    #[tokio::test]
    async fn encrypted_download_requires_matching_hash() {
        let h = harness().await;
        let (new, hash) = encrypted("secret");
        let file = put(&h, new, b"ciphertext").await;

        assert!(matches!(
            h.service.download(&file.access_code, DownloadAuth::Anonymous).await,
            Err(AppError::MethodNotAllowed(_))
        ));
        assert!(matches!(
            h.service
                .download(&file.access_code, DownloadAuth::VerificationHash("00".repeat(32)))
                .await,
            Err(AppError::AuthFailure)
        ));
        let download = h
            .service
            .download(&file.access_code, DownloadAuth::VerificationHash(hash))
            .await
            .unwrap();
        assert_eq!(collect(download.body).await, b"ciphertext");
    }

    #[tokio::test]
    async fn wrong_hash_has_no_side_effects_on_burn_files() {
        let h = harness().await;
        let (mut new, hash) = encrypted("secret");
        new.download_once = true;
        let file = put(&h, new, b"ciphertext").await;

        for _ in 0..3 {
            assert!(matches!(
                h.service
                    .download(&file.access_code, DownloadAuth::VerificationHash("ff".into()))
                    .await,
                Err(AppError::AuthFailure)
            ));
        }
        let download = h
            .service
            .download(&file.access_code, DownloadAuth::VerificationHash(hash))
            .await
            .unwrap();
        assert_eq!(collect(download.body).await, b"ciphertext");
    }

    #[tokio::test]
    async fn burn_after_read_serves_once() {
        let h = harness().await;
        let mut new = new_file(ChronoDuration::hours(1));
        new.download_once = true;
        let file = put(&h, new, b"only once").await;

        let download = h
            .service
            .download(&file.access_code, DownloadAuth::Anonymous)
            .await
            .unwrap();
        assert!(matches!(
            h.service.download(&file.access_code, DownloadAuth::Anonymous).await,
            Err(AppError::NotFound)
        ));
        assert_eq!(collect(download.body).await, b"only once");

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(h.burn.pending(), 0);
        assert!(h.repo.find_by_id(file.id).await.unwrap().is_none());
        assert!(!h.storage.full_path(&file.storage_key).unwrap().exists());
    }

    #[tokio::test]
    async fn concurrent_burn_downloads_serve_at_most_once() {
        let h = harness().await;
        let mut new = new_file(ChronoDuration::hours(1));
        new.download_once = true;
        let file = put(&h, new, b"race").await;

        let attempts = (0..8).map(|_| {
            let service = h.service.clone();
            let code = file.access_code.clone();
            tokio::spawn(async move { service.download(&code, DownloadAuth::Anonymous).await })
        });
        let mut served = 0;
        for attempt in attempts.collect::<Vec<_>>() {
            match attempt.await.unwrap() {
                Ok(download) => {
                    served += 1;
                    collect(download.body).await;
                }
                Err(err) => assert!(matches!(err, AppError::NotFound)),
            }
        }
        assert_eq!(served, 1);
    }

    #[tokio::test]
    async fn interrupted_burn_download_can_be_retried() {
        let h = harness().await;
        let mut new = new_file(ChronoDuration::hours(1));
        new.download_once = true;
        let file = put(&h, new, b"partial please").await;

        let download = h
            .service
            .download(&file.access_code, DownloadAuth::Anonymous)
            .await
            .unwrap();
        drop(download);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(h.burn.pending(), 0);
        let retry = h
            .service
            .download(&file.access_code, DownloadAuth::Anonymous)
            .await
            .unwrap();
        assert_eq!(collect(retry.body).await, b"partial please");
    }

    #[tokio::test]
    async fn streaming_burn_download_keeps_its_claim_fresh() {
        let h = harness().await;
        let mut new = new_file(ChronoDuration::hours(1));
        new.download_once = true;
        let file = put(&h, new, b"slow reader").await;

        let download = h
            .service
            .download(&file.access_code, DownloadAuth::Anonymous)
            .await
            .unwrap();
        let claimed_at = h.repo.find_by_id(file.id).await.unwrap().unwrap().consumed_at.unwrap();

        // the client stalls for longer than the stale-claim age used below
        tokio::time::sleep(Duration::from_millis(150)).await;
        let now = Utc::now();
        let stale_before = now - ChronoDuration::milliseconds(100);
        let row = h.repo.find_by_id(file.id).await.unwrap().unwrap();
        assert!(row.consumed_at.unwrap() > claimed_at);
        let reapable = h.repo.list_reapable(now, stale_before, None, 10).await.unwrap();
        assert!(reapable.iter().all(|r| r.id != file.id));

        assert_eq!(collect(download.body).await, b"slow reader");
    }

    #[tokio::test]
    async fn preview_policy() {
        let h = harness().await;
        let plain = put(&h, new_file(ChronoDuration::hours(1)), b"%PDF-1.4 tiny").await;
        let preview = h.service.preview(&plain.access_code).await.unwrap();
        assert_eq!(preview.content_type, "application/pdf");
        assert_eq!(&preview.bytes[..], b"%PDF-1.4 tiny");
        let uri = h.service.preview_data_uri(&plain.access_code).await.unwrap();
        assert!(uri.starts_with("data:application/pdf;base64,"));

        let (new, _) = encrypted("pw");
        let enc = put(&h, new, b"cipher").await;
        assert!(matches!(
            h.service.preview(&enc.access_code).await,
            Err(AppError::Forbidden(_))
        ));

        let mut new = new_file(ChronoDuration::hours(1));
        new.scan_status = ScanStatus::Infected;
        let infected = put(&h, new, b"EICAR").await;
        assert!(matches!(
            h.service.preview(&infected.access_code).await,
            Err(AppError::Forbidden(_))
        ));
        // infected files stay downloadable
        assert!(
            h.service
                .download(&infected.access_code, DownloadAuth::Anonymous)
                .await
                .is_ok()
        );

        let mut new = new_file(ChronoDuration::hours(1));
        new.download_once = true;
        let once = put(&h, new, b"secret").await;
        assert!(matches!(
            h.service.preview(&once.access_code).await,
            Err(AppError::Forbidden(_))
        ));

        let big = put(&h, new_file(ChronoDuration::hours(1)), &[b'a'; 100]).await;
        assert!(matches!(
            h.service.preview(&big.access_code).await,
            Err(AppError::TooLarge { limit_bytes: 64 })
        ));
    }

    #[tokio::test]
    async fn reports_are_recorded() {
        let h = harness().await;
        let report = h.service.report(" abc234 ", "phishing", "10.1.2.3").await.unwrap();
        assert_eq!(report.access_code, "ABC234");
        assert!(matches!(
            h.service.report("  ", "x", "10.1.2.3").await,
            Err(AppError::Validation(_))
        ));
    }
}
