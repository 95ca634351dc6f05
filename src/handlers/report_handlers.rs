//! Abuse reports.

use crate::{errors::AppError, services::rate_limiter::ClientIp, state::AppState};
use axum::{Json, body::Bytes, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    pub access_code: String,
    #[serde(default)]
    pub reason: String,
}

/// `POST /api/v1/report`
pub async fn report_file(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let request: ReportRequest = serde_json::from_slice(&body)
        .map_err(|_| AppError::validation("invalid report request"))?;

    state
        .download
        .report(&request.access_code, &request.reason, &ip)
        .await?;

    Ok((
        StatusCode::OK,
        Json(json!({ "message": "report received, thank you" })),
    ))
}
