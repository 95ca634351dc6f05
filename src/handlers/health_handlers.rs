//! Health & readiness handlers.
//!
//! - GET /healthz  -> simple liveness ("ok")
//! - GET /readyz   -> readiness that checks the database and a storage round trip

use crate::{
    state::AppState,
    storage::{ByteStream, StorageProvider},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use bytes::Bytes;
use futures::{TryStreamExt, stream};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

const PROBE: &[u8] = b"readyz";

/// `GET /healthz`
///
/// Liveness probe. Never performs I/O.
pub async fn healthz() -> impl IntoResponse {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok".into(),
        }),
    )
}

/// `GET /readyz`
///
/// Readiness probe that:
/// 1. Runs `SELECT 1` against SQLite.
/// 2. Saves, reads back and deletes a probe object through the configured
///    storage backend.
///
/// HTTP 200 when all checks pass, HTTP 503 when any check fails.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(state.repo.pool())
        .await
    {
        Ok(1) => CheckStatus::ok(),
        Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
        Err(e) => CheckStatus::failed(format!("error: {}", e)),
    };
    let storage = storage_check(state.storage.as_ref()).await;

    let overall_ok = sqlite.ok && storage.ok;
    let mut checks = HashMap::new();
    checks.insert("sqlite", sqlite);
    checks.insert(state.storage.kind(), storage);

    let body = ReadyResponse {
        status: if overall_ok { "ok" } else { "error" }.into(),
        checks,
    };
    let status = if overall_ok {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn storage_check(storage: &dyn StorageProvider) -> CheckStatus {
    let key = format!(".readyz-{}", Uuid::new_v4());
    let body: ByteStream = Box::pin(stream::iter([Ok::<_, std::io::Error>(
        Bytes::from_static(PROBE),
    )]));

    let result = match storage.save(&key, body).await {
        Ok(_) => match storage.open(&key).await {
            Ok(stream) => match stream.try_collect::<Vec<Bytes>>().await {
                Ok(chunks) if chunks.concat() == PROBE => CheckStatus::ok(),
                Ok(_) => CheckStatus::failed("probe content mismatch".into()),
                Err(e) => CheckStatus::failed(format!("could not read probe: {}", e)),
            },
            Err(e) => CheckStatus::failed(format!("could not open probe: {}", e)),
        },
        Err(e) => CheckStatus::failed(format!("could not write probe: {}", e)),
    };

    match storage.delete(&key).await {
        Err(e) if result.ok => CheckStatus {
            ok: true,
            error: Some(format!("could not remove probe: {}", e)),
        },
        _ => result,
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: String,
    checks: HashMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    error: Option<String>,
}

impl CheckStatus {
    fn ok() -> Self {
        Self { ok: true, error: None }
    }

    fn failed(error: String) -> Self {
        Self {
            ok: false,
            error: Some(error),
        }
    }
}
