use anyhow::Result;
use sqlx::SqlitePool;

use crate::config::Config;
use crate::db;

pub async fn run_migrations(config: &Config) -> Result<()> {
    let pool = db::connect(config).await?;
    apply(&pool).await?;
    pool.close().await;
    Ok(())
}

/// Create every table and index. Idempotent.
pub async fn apply(pool: &SqlitePool) -> Result<()> {
    // Archive: one row per snapshot, payload without file bytes
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshots (
            id TEXT PRIMARY KEY,
            origin TEXT NOT NULL,
            day TEXT NOT NULL,
            created INTEGER NOT NULL,
            modified INTEGER NOT NULL,
            type TEXT NOT NULL,
            payload BLOB NOT NULL,
            digest TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS snapshot_files (
            snapshot_id TEXT NOT NULL,
            name TEXT NOT NULL,
            content BLOB NOT NULL,
            PRIMARY KEY (snapshot_id, name),
            FOREIGN KEY (snapshot_id) REFERENCES snapshots(id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Sync cursors, one row per engine
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS sync_cursors (
            engine TEXT PRIMARY KEY CHECK (engine IN ('export', 'import', 'restore')),
            body TEXT NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Live workflow store
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workitems (
            id TEXT PRIMARY KEY,
            type TEXT NOT NULL,
            snapshot_id TEXT,
            payload BLOB NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS live_snapshots (
            id TEXT PRIMARY KEY,
            origin TEXT NOT NULL,
            payload BLOB NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Deprecated blob-workitem content, read during legacy migration only
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS legacy_blobs (
            origin_ref TEXT NOT NULL,
            file_name TEXT NOT NULL,
            content BLOB NOT NULL,
            PRIMARY KEY (origin_ref, file_name)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_day ON snapshots(day, id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_origin ON snapshots(origin, created)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_snapshots_created ON snapshots(created)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_live_snapshots_origin ON live_snapshots(origin, id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
