//! SQLite connection pool for the archive database.
//!
//! The archive, the live store and the sync metadata share one database
//! file. WAL mode lets `warc status` read while a daemon is exporting.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::config::Config;

pub async fn connect(config: &Config) -> Result<SqlitePool> {
    connect_path(&config.db.path).await
}

pub async fn connect_path(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .with_context(|| format!("Failed to open archive database {}", db_path.display()))?;

    Ok(pool)
}

/// Connect and make sure the schema exists.
pub async fn open(config: &Config) -> Result<SqlitePool> {
    let pool = connect(config).await?;
    crate::migrate::apply(&pool).await?;
    Ok(pool)
}
