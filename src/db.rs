//! SQLite pool bootstrap and schema migrations.

use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    migrate::Migrator,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::{path::Path, str::FromStr};

static MIGRATOR: Migrator = sqlx::migrate!("./migrations");

/// Open (and create if missing) the database at `url`.
///
/// For file-backed URLs the parent directory is created first.
pub async fn connect(url: &str) -> Result<SqlitePool> {
    tracing::debug!(url, "connecting to sqlite");
    let db_path = url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .trim_start_matches("file:");
    let db_path = db_path.split('?').next().unwrap_or(db_path);
    if !db_path.is_empty() && db_path != ":memory:" {
        if let Some(parent) = Path::new(db_path).parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating database directory {:?}", parent))?;
                tracing::info!("Created missing directory {:?}", parent);
            }
        }
    }

    let options = SqliteConnectOptions::from_str(url)
        .with_context(|| format!("parsing database url `{}`", url))?
        .create_if_missing(true);
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("connecting to {}", url))
}

/// Apply the embedded migrations.
pub async fn migrate(pool: &SqlitePool) -> Result<()> {
    MIGRATOR
        .run(pool)
        .await
        .context("running database migrations")?;
    tracing::info!("database migrations applied");
    Ok(())
}

/// Single-connection in-memory database with the schema applied.
///
/// The connection is pinned so the database outlives idle periods.
pub async fn memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    migrate(&pool).await?;
    Ok(pool)
}
