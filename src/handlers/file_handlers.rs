//! HTTP handlers for uploads, downloads, previews and metadata.
//! Payloads are streamed in both directions; only the preview flows buffer,
//! and they are capped by `preview_max_bytes`.

use crate::{
    errors::AppError,
    models::file::{FileObject, PublicFile},
    services::{
        download_service::{Download, DownloadAuth, content_disposition},
        upload_service::{EncryptionParams, UploadReceipt, UploadRequest},
    },
    state::AppState,
    storage::ByteStream,
};
use axum::{
    Json,
    body::{Body, Bytes},
    extract::{Path, State},
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use futures::StreamExt;
use percent_encoding::percent_decode_str;
use serde::{Deserialize, Serialize};
use std::io;

/// Body of `POST /data/{code}`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyRequest {
    pub verification_hash: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataUriResponse {
    pub data_uri: String,
}

/// `POST /api/v1/uploads/stream-complete`
///
/// The raw request body is the payload (ciphertext for encrypted uploads);
/// everything else travels in `X-File-*` headers.
pub async fn upload_file(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Body,
) -> Result<impl IntoResponse, AppError> {
    let filename = header_str(&headers, "x-file-name")
        .and_then(decode_filename)
        .filter(|name| !name.trim().is_empty())
        .ok_or_else(|| AppError::validation("invalid or missing file name (X-File-Name)"))?;

    let original_size = header_str(&headers, "x-file-original-size")
        .and_then(|v| v.trim().parse::<i64>().ok())
        .ok_or_else(|| {
            AppError::validation("invalid or missing original file size (X-File-Original-Size)")
        })?;

    let encryption = if header_bool(&headers, "x-file-encrypted") {
        Some(EncryptionParams {
            salt: header_str(&headers, "x-file-salt").unwrap_or_default().to_string(),
            verification_hash: header_str(&headers, "x-file-verification-hash")
                .unwrap_or_default()
                .to_string(),
        })
    } else {
        None
    };

    let expires_in = header_str(&headers, "x-file-expires-in").and_then(|v| v.trim().parse().ok());
    let declared_length = header_str(&headers, header::CONTENT_LENGTH.as_str())
        .and_then(|v| v.trim().parse::<u64>().ok());

    let stream: ByteStream = Box::pin(
        body.into_data_stream()
            .map(|chunk| chunk.map_err(io::Error::other)),
    );

    let file = state
        .upload
        .upload(UploadRequest {
            filename,
            original_size,
            encryption,
            expires_in,
            download_once: header_bool(&headers, "x-file-download-once"),
            declared_length,
            body: stream,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(UploadReceipt::from(&file))))
}

/// `GET /data/{code}`: download of a plaintext file.
pub async fn download_file(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let download = state.download.download(&code, DownloadAuth::Anonymous).await?;
    download_response(download)
}

/// `POST /data/{code}`: download guarded by the verification hash.
pub async fn download_file_verified(
    State(state): State<AppState>,
    Path(code): Path<String>,
    body: Bytes,
) -> Result<Response, AppError> {
    // a bodyless POST is a plain download; encrypted files still need the hash
    let auth = if body.iter().all(u8::is_ascii_whitespace) {
        DownloadAuth::Anonymous
    } else {
        let request: VerifyRequest = serde_json::from_slice(&body)
            .map_err(|_| AppError::validation("invalid verification request"))?;
        DownloadAuth::VerificationHash(request.verification_hash)
    };
    let download = state.download.download(&code, auth).await?;
    download_response(download)
}

/// `GET /api/v1/files/meta/{code}`
pub async fn file_metadata(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<FileObject>, AppError> {
    Ok(Json(state.download.metadata(&code).await?))
}

/// `GET /api/v1/files/public`
pub async fn public_files(State(state): State<AppState>) -> Result<Json<Vec<PublicFile>>, AppError> {
    Ok(Json(state.download.public_files().await?))
}

/// `GET /api/v1/preview/{code}`
pub async fn preview_file(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Response, AppError> {
    let preview = state.download.preview(&code).await?;

    let mut response = Response::new(Body::from(preview.bytes));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(preview.content_type),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        disposition_header("inline", &preview.file.filename)?,
    );
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    Ok(response)
}

/// `GET /api/v1/preview/data-uri/{code}`
pub async fn preview_data_uri(
    State(state): State<AppState>,
    Path(code): Path<String>,
) -> Result<Json<DataUriResponse>, AppError> {
    let data_uri = state.download.preview_data_uri(&code).await?;
    Ok(Json(DataUriResponse { data_uri }))
}

fn download_response(download: Download) -> Result<Response, AppError> {
    let Download { file, body } = download;
    let mut response = Response::new(Body::from_stream(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    headers.insert(
        header::CONTENT_LENGTH,
        HeaderValue::from(file.size_bytes.max(0) as u64),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        disposition_header("attachment", &file.filename)?,
    );
    Ok(response)
}

fn disposition_header(kind: &str, filename: &str) -> Result<HeaderValue, AppError> {
    HeaderValue::from_str(&content_disposition(kind, filename))
        .map_err(|err| AppError::internal(format!("invalid content disposition: {}", err)))
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// `true`/`1` enable a flag; anything else, including absence, disables it.
fn header_bool(headers: &HeaderMap, name: &str) -> bool {
    header_str(headers, name).is_some_and(parse_bool)
}

fn parse_bool(raw: &str) -> bool {
    let raw = raw.trim();
    raw == "1" || raw.eq_ignore_ascii_case("true")
}

/// Decode a query-style escaped filename (`+` is a space).
fn decode_filename(raw: &str) -> Option<String> {
    let raw = raw.replace('+', " ");
    percent_decode_str(&raw)
        .decode_utf8()
        .ok()
        .map(|name| name.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_decoding() {
        assert_eq!(decode_filename("report.pdf").as_deref(), Some("report.pdf"));
        assert_eq!(
            decode_filename("my%20file+v2.txt").as_deref(),
            Some("my file v2.txt")
        );
        assert_eq!(
            decode_filename("%E6%97%A5%E6%9C%AC.txt").as_deref(),
            Some("日本.txt")
        );
        assert_eq!(decode_filename("%2B1.txt").as_deref(), Some("+1.txt"));
        assert!(decode_filename("%FF%FE").is_none());
    }

    #[test]
    fn bool_headers() {
        assert!(parse_bool("true"));
        assert!(parse_bool("TRUE"));
        assert!(parse_bool("1"));
        assert!(!parse_bool("0"));
        assert!(!parse_bool("false"));
        assert!(!parse_bool("yes"));
        assert!(!header_bool(&HeaderMap::new(), "x-file-encrypted"));
    }
}
