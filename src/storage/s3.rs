//! S3-compatible backend using the AWS SDK.
//!
//! `PutObject` needs a known content length, so `save` buffers the whole
//! body in memory before sending it. Uploads are bounded by the configured
//! maximum upload size, which is the memory ceiling for this backend.

use super::{ByteStream, StorageError, StorageProvider, StorageResult, ensure_key_safe};
use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{Client, error::SdkError};
use bytes::BytesMut;
use futures::StreamExt;
use tokio_util::io::ReaderStream;
use tracing::instrument;

pub struct S3Storage {
    client: Client,
    bucket: String,
    prefix: Option<String>,
}

impl std::fmt::Debug for S3Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3Storage")
            .field("bucket", &self.bucket)
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

impl S3Storage {
    pub async fn new(config: &S3Config) -> StorageResult<Self> {
        if config.bucket.trim().is_empty() {
            return Err(StorageError::Config("s3 bucket must not be empty".into()));
        }
        if config.access_key_id.is_some() != config.secret_access_key.is_some() {
            return Err(StorageError::Config(
                "s3 config requires both access_key_id and secret_access_key when either is set"
                    .into(),
            ));
        }

        let region = config
            .region
            .clone()
            .unwrap_or_else(|| "us-east-1".to_string());
        let mut builder = match (&config.access_key_id, &config.secret_access_key) {
            (Some(key_id), Some(secret)) => aws_sdk_s3::config::Builder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(aws_config::Region::new(region))
                .credentials_provider(aws_sdk_s3::config::Credentials::new(
                    key_id.clone(),
                    secret.clone(),
                    None,
                    None,
                    "tempdrop-config",
                )),
            _ => {
                let shared = aws_config::defaults(BehaviorVersion::latest())
                    .region(aws_config::Region::new(region))
                    .load()
                    .await;
                aws_sdk_s3::config::Builder::from(&shared)
            }
        };

        if let Some(endpoint) = &config.endpoint {
            let lower = endpoint.to_ascii_lowercase();
            let endpoint = if lower.starts_with("http://") || lower.starts_with("https://") {
                endpoint.clone()
            } else {
                format!("http://{}", endpoint)
            };
            builder = builder.endpoint_url(endpoint);
        }
        if config.use_path_style {
            builder = builder.force_path_style(true);
        }

        Ok(Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
            prefix: config
                .prefix
                .as_ref()
                .map(|p| p.trim_end_matches('/').to_string())
                .filter(|p| !p.is_empty()),
        })
    }

    fn full_key(&self, key: &str) -> String {
        match &self.prefix {
            Some(prefix) => format!("{}/{}", prefix, key),
            None => key.to_string(),
        }
    }
}

fn is_not_found<E>(err: &SdkError<E>) -> bool {
    matches!(err, SdkError::ServiceError(service_err) if service_err.raw().status().as_u16() == 404)
}

fn sdk_error<E>(err: SdkError<E>) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::S3(Box::new(err))
}

#[async_trait]
impl StorageProvider for S3Storage {
    fn kind(&self) -> &'static str {
        "s3"
    }

    #[instrument(skip(self, body), fields(backend = "s3"))]
    async fn save(&self, key: &str, mut body: ByteStream) -> StorageResult<u64> {
        ensure_key_safe(key)?;
        let mut buffer = BytesMut::new();
        while let Some(chunk) = body.next().await {
            buffer.extend_from_slice(&chunk?);
        }
        let written = buffer.len() as u64;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .content_type("application/octet-stream")
            .body(buffer.freeze().into())
            .send()
            .await
            .map_err(sdk_error)?;
        Ok(written)
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn open(&self, key: &str) -> StorageResult<ByteStream> {
        ensure_key_safe(key)?;
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|err| {
                if is_not_found(&err) {
                    StorageError::NotFound(key.to_string())
                } else {
                    sdk_error(err)
                }
            })?;

        Ok(Box::pin(ReaderStream::new(output.body.into_async_read())))
    }

    #[instrument(skip(self), fields(backend = "s3"))]
    async fn delete(&self, key: &str) -> StorageResult<()> {
        ensure_key_safe(key)?;
        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(()),
            Err(err) if is_not_found(&err) => Ok(()),
            Err(err) => Err(sdk_error(err)),
        }
    }
}
