//! Defines the HTTP surface.
//!
//! ## Structure
//! - **API endpoints** (`/api/v1`)
//!   - `POST /uploads/stream-complete` : streaming upload (rate-limited)
//!   - `POST /report`                  : abuse report (rate-limited)
//!   - `GET  /files/meta/{code}`       : file metadata
//!   - `GET  /files/public`            : recent public files
//!   - `GET  /preview/{code}`          : inline preview
//!   - `GET  /preview/data-uri/{code}` : preview as a data URI
//!
//! - **Download**
//!   - `GET  /data/{code}` : plaintext download
//!   - `POST /data/{code}` : download with verification hash
//!
//! - **Health**: `GET /healthz`, `GET /readyz`

use crate::{
    handlers::{
        file_handlers::{
            download_file, download_file_verified, file_metadata, preview_data_uri, preview_file,
            public_files, upload_file,
        },
        health_handlers::{healthz, readyz},
        report_handlers::report_file,
    },
    services::rate_limiter::rate_limit_middleware,
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    http::{HeaderName, HeaderValue, Method, header},
    middleware,
    routing::{get, post},
};
use std::time::Duration;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

const CORS_ALLOWED_HEADERS: &[&str] = &[
    "origin",
    "content-type",
    "x-requested-with",
    "x-file-name",
    "x-file-original-size",
    "x-file-encrypted",
    "x-file-salt",
    "x-file-verification-hash",
    "x-file-expires-in",
    "x-file-download-once",
];

/// Build the application router with its state attached.
pub fn routes(state: AppState) -> Router {
    // Only the write endpoints are rate-limited.
    let limited = Router::new()
        .route(
            "/uploads/stream-complete",
            // the upload pipeline enforces its own size limit while streaming
            post(upload_file).layer(DefaultBodyLimit::disable()),
        )
        .route("/report", post(report_file))
        .route_layer(middleware::from_fn_with_state(
            state.limiter.clone(),
            rate_limit_middleware,
        ));

    let api = Router::new()
        .merge(limited)
        .route("/files/meta/{code}", get(file_metadata))
        .route("/files/public", get(public_files))
        .route("/preview/{code}", get(preview_file))
        .route("/preview/data-uri/{code}", get(preview_data_uri));

    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/data/{code}", get(download_file).post(download_file_verified))
        .nest("/api/v1", api);

    if let Some(cors) = cors_layer(&state.config.cors_allowed_origins) {
        router = router.layer(cors);
    }

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// CORS for the configured frontend origins; `None` when no origin is allowed.
///
/// A `*` entry allows any origin. Browsers reject credentialed wildcard
/// responses, so credentials are only allowed for an explicit origin list.
fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let wildcard = origins.iter().any(|origin| origin.trim() == "*");
    let allow_origin = if wildcard {
        tracing::info!("CORS enabled for any origin");
        AllowOrigin::any()
    } else {
        let origins: Vec<HeaderValue> = origins
            .iter()
            .filter_map(|origin| match HeaderValue::from_str(origin.trim()) {
                Ok(value) => Some(value),
                Err(_) => {
                    tracing::warn!(origin = %origin, "ignoring invalid CORS origin");
                    None
                }
            })
            .collect();
        if origins.is_empty() {
            return None;
        }
        tracing::info!(origins = ?origins, "CORS enabled");
        AllowOrigin::list(origins)
    };

    Some(
        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(
                CORS_ALLOWED_HEADERS
                    .iter()
                    .map(|name| HeaderName::from_static(*name))
                    .collect::<Vec<_>>(),
            )
            .expose_headers([header::CONTENT_LENGTH, header::CONTENT_DISPOSITION])
            .allow_credentials(!wildcard)
            .max_age(Duration::from_secs(12 * 60 * 60)),
    )
}
