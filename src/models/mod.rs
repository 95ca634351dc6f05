//! Core data models for the ephemeral file-transfer service.
//!
//! These entities map cleanly to database tables via `sqlx::FromRow` and
//! serialize as camelCase JSON via `serde`.

pub mod file;
pub mod report;
