//! WebDAV backend.
//!
//! Objects are plain resources directly below the configured collection URL.
//! Uploads are streamed with a chunked `PUT`, downloads with a streaming `GET`.

use super::{ByteStream, StorageError, StorageProvider, StorageResult, ensure_key_safe};
use crate::config::WebDavConfig;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use std::{
    io,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};
use tracing::instrument;

#[derive(Clone)]
pub struct WebDavStorage {
    http: Client,
    base_url: Url,
    username: Option<String>,
    password: Option<String>,
}

impl std::fmt::Debug for WebDavStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebDavStorage")
            .field("base_url", &self.base_url.as_str())
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl WebDavStorage {
    pub fn new(config: &WebDavConfig) -> StorageResult<Self> {
        // Without the trailing slash `Url::join` would replace the last segment.
        let raw = if config.url.ends_with('/') {
            config.url.clone()
        } else {
            format!("{}/", config.url)
        };
        let base_url = Url::parse(&raw)
            .map_err(|err| StorageError::Config(format!("invalid WebDAV URL `{}`: {}", raw, err)))?;
        Ok(Self {
            http: Client::new(),
            base_url,
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    fn url(&self, key: &str) -> StorageResult<Url> {
        self.base_url
            .join(key)
            .map_err(|err| StorageError::InvalidKey(format!("{}: {}", key, err)))
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.username {
            Some(user) => req.basic_auth(user, self.password.as_deref()),
            None => req,
        }
    }
}

#[async_trait]
impl StorageProvider for WebDavStorage {
    fn kind(&self) -> &'static str {
        "webdav"
    }

    #[instrument(skip(self, body), fields(backend = "webdav"))]
    async fn save(&self, key: &str, body: ByteStream) -> StorageResult<u64> {
        ensure_key_safe(key)?;
        let written = Arc::new(AtomicU64::new(0));
        let counter = written.clone();
        let counted = body.map(move |chunk| {
            if let Ok(bytes) = &chunk {
                counter.fetch_add(bytes.len() as u64, Ordering::Relaxed);
            }
            chunk
        });

        let response = self
            .authorize(self.http.put(self.url(key)?))
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(reqwest::Body::wrap_stream(counted))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(StorageError::WebDav {
                method: "PUT",
                key: key.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(written.load(Ordering::Relaxed))
    }

    #[instrument(skip(self), fields(backend = "webdav"))]
    async fn open(&self, key: &str) -> StorageResult<ByteStream> {
        ensure_key_safe(key)?;
        let response = self
            .authorize(self.http.get(self.url(key)?))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(key.to_string())),
            status if status.is_success() => Ok(Box::pin(
                response
                    .bytes_stream()
                    .map(|chunk| chunk.map_err(io::Error::other)),
            )),
            status => Err(StorageError::WebDav {
                method: "GET",
                key: key.to_string(),
                status: status.as_u16(),
            }),
        }
    }

    #[instrument(skip(self), fields(backend = "webdav"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        let response = self
            .authorize(self.http.delete(self.url(key)?))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(()),
            status if status.is_success() => Ok(()),
            status => Err(StorageError::WebDav {
                method: "DELETE",
                key: key.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}
