//! Common test utilities and fixtures.

use axum::{
    Router,
    body::Body,
    extract::ConnectInfo,
    http::{HeaderMap, Request, StatusCode},
};
use bytes::Bytes;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tempdrop::{
    config::{AppConfig, StorageConfig},
    db,
    routes::routes::routes,
    services::{burn_scheduler::BurnScheduler, file_repository::FileRepository},
    state::AppState,
    storage,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

/// A test server wrapper with all dependencies.
/// Note: #[allow(dead_code)] because each test file compiles common/ separately.
#[allow(dead_code)]
pub struct TestServer {
    pub router: Router,
    pub state: AppState,
    pub shutdown: CancellationToken,
    _temp_dir: TempDir,
}

#[allow(dead_code)]
impl TestServer {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Create a test server with custom config modifications.
    pub async fn with_config<F>(modifier: F) -> Self
    where
        F: FnOnce(&mut AppConfig),
    {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp directory");
        let mut config = AppConfig {
            storage: StorageConfig::Local {
                path: temp_dir.path().join("files"),
            },
            burn_grace: Duration::from_millis(50),
            max_upload_size_mb: 1,
            preview_max_bytes: 64 * 1024,
            ..Default::default()
        };
        config.rate_limit.requests = 1000;
        modifier(&mut config);

        let pool = db::memory_pool().await.expect("Failed to open database");
        let repo = FileRepository::new(Arc::new(pool));
        let storage = storage::from_config(&config.storage)
            .await
            .expect("Failed to create storage backend");
        let shutdown = CancellationToken::new();
        let (burn, _) = BurnScheduler::spawn(
            storage.clone(),
            repo.clone(),
            config.burn_grace,
            shutdown.clone(),
        );

        let state = AppState::new(config, repo, storage, None, burn);
        let router = routes(state.clone());

        Self {
            router,
            state,
            shutdown,
            _temp_dir: temp_dir,
        }
    }

    /// Send a request as if it came from `peer`.
    pub async fn send_from(&self, peer: SocketAddr, mut req: Request<Body>) -> TestResponse {
        req.extensions_mut().insert(ConnectInfo(peer));
        let response = self
            .router
            .clone()
            .oneshot(req)
            .await
            .expect("router is infallible");
        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("Failed to read body");
        TestResponse {
            status,
            headers,
            body,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> TestResponse {
        self.send_from(default_peer(), req).await
    }

    /// Upload `data` with the given extra headers; returns the access code on success.
    pub async fn upload(&self, name: &str, data: &[u8], headers: &[(&str, &str)]) -> TestResponse {
        self.send(upload_request(name, data, headers)).await
    }

    pub async fn upload_ok(&self, name: &str, data: &[u8], headers: &[(&str, &str)]) -> String {
        let response = self.upload(name, data, headers).await;
        assert_eq!(response.status, StatusCode::CREATED, "{:?}", response.json());
        response.json()["accessCode"]
            .as_str()
            .expect("accessCode in response")
            .to_string()
    }

    pub async fn get(&self, uri: &str) -> TestResponse {
        self.send(Request::get(uri).body(Body::empty()).unwrap()).await
    }

    pub async fn post_json(&self, uri: &str, body: serde_json::Value) -> TestResponse {
        self.send(
            Request::post(uri)
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[allow(dead_code)]
pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[allow(dead_code)]
impl TestResponse {
    pub fn json(&self) -> serde_json::Value {
        serde_json::from_slice(&self.body).unwrap_or(serde_json::Value::Null)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

#[allow(dead_code)]
pub fn default_peer() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 40000))
}

/// Build a streaming upload request with `X-File-Name` percent-encoded.
#[allow(dead_code)]
pub fn upload_request(name: &str, data: &[u8], headers: &[(&str, &str)]) -> Request<Body> {
    let encoded = percent_encoding::utf8_percent_encode(name, percent_encoding::NON_ALPHANUMERIC)
        .to_string();
    let original_size = data.len().to_string();
    let mut builder = Request::post("/api/v1/uploads/stream-complete")
        .header("x-file-name", encoded)
        .header("content-length", data.len().to_string());
    if !headers
        .iter()
        .any(|(name, _)| name.eq_ignore_ascii_case("x-file-original-size"))
    {
        builder = builder.header("x-file-original-size", original_size);
    }
    for (name, value) in headers {
        builder = builder.header(*name, *value);
    }
    builder.body(Body::from(data.to_vec())).unwrap()
}
