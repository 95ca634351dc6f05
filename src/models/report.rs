//! Abuse report filed against an access code.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Append-only abuse report. Has no lifecycle of its own.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug)]
#[serde(rename_all = "camelCase")]
pub struct ReportRecord {
    pub id: Uuid,
    pub access_code: String,
    pub reason: String,
    #[serde(skip_serializing)]
    pub reporter_ip: String,
    pub created_at: DateTime<Utc>,
}
