//! SQLite-backed [`ArchiveStore`], [`LiveStore`] and [`LegacyContentResolver`].
//!
//! The archive keeps one `snapshots` row per snapshot (content-free XML
//! payload, day bucket, digest) and the file bytes in `snapshot_files`, so
//! `load_snapshot(id, false)` never touches binary content. Each engine's
//! cursor is a JSON row of `sync_cursors`, written independently of the
//! other engines' rows.

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{Row, SqlitePool};

use workitem_archive_core::codec;
use workitem_archive_core::errors::{ArchiveError, Result};
use workitem_archive_core::models::{
    Document, ExportCursor, ImportCursor, Metadata, RestoreCursor, Snapshot,
};
use workitem_archive_core::snapshot_id;
use workitem_archive_core::snapshot_manager::LegacyContentResolver;
use workitem_archive_core::store::{ArchiveStore, LiveStore, TimeRange};

fn db_err(e: sqlx::Error) -> ArchiveError {
    ArchiveError::storage(format!("sqlite: {}", e))
}

fn day_key(day: NaiveDate) -> String {
    day.format("%Y-%m-%d").to_string()
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

/// SQLite implementation of the [`ArchiveStore`] trait.
pub struct SqliteArchiveStore {
    pool: SqlitePool,
}

impl SqliteArchiveStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Number of archived snapshots.
    pub async fn count(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM snapshots")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn save_cursor<T: Serialize>(&self, engine: &str, cursor: &T) -> Result<()> {
        let body = serde_json::to_string(cursor)
            .map_err(|e| ArchiveError::storage(format!("{} cursor: {}", engine, e)))?;
        sqlx::query(
            r#"
            INSERT INTO sync_cursors (engine, body, updated_at) VALUES (?, ?, ?)
            ON CONFLICT(engine) DO UPDATE SET body = excluded.body, updated_at = excluded.updated_at
            "#,
        )
        .bind(engine)
        .bind(&body)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}

#[async_trait]
impl ArchiveStore for SqliteArchiveStore {
    async fn load_snapshot(&self, id: &str, with_content: bool) -> Result<Option<Snapshot>> {
        let payload: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT payload FROM snapshots WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        let Some(payload) = payload else {
            return Ok(None);
        };
        let mut snapshot = codec::decode(&payload)?;

        if with_content {
            let rows = sqlx::query("SELECT name, content FROM snapshot_files WHERE snapshot_id = ?")
                .bind(id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;
            for row in rows {
                let name: String = row.get("name");
                if let Some(file) = snapshot.files.get_mut(&name) {
                    file.content = row.get("content");
                }
            }
        }
        Ok(Some(snapshot))
    }

    async fn snapshot_ids_by_day(&self, day: NaiveDate) -> Result<Vec<String>> {
        sqlx::query_scalar("SELECT id FROM snapshots WHERE day = ? ORDER BY id")
            .bind(day_key(day))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn snapshot_ids_by_origin(
        &self,
        origin: &str,
        range: TimeRange,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<String>> {
        let sql = if reverse {
            "SELECT id FROM snapshots WHERE origin = ? AND created >= ? AND created <= ? \
             ORDER BY id DESC LIMIT ?"
        } else {
            "SELECT id FROM snapshots WHERE origin = ? AND created >= ? AND created <= ? \
             ORDER BY id ASC LIMIT ?"
        };
        sqlx::query_scalar(sql)
            .bind(origin)
            .bind(range.from.unwrap_or(i64::MIN))
            .bind(range.to.unwrap_or(i64::MAX))
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn exists_snapshot(&self, id: &str) -> Result<bool> {
        sqlx::query_scalar("SELECT COUNT(*) > 0 FROM snapshots WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn earliest_created(&self) -> Result<Option<i64>> {
        sqlx::query_scalar("SELECT MIN(created) FROM snapshots")
            .fetch_one(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let digest = codec::digest(snapshot)?;
        let existing: Option<String> =
            sqlx::query_scalar("SELECT digest FROM snapshots WHERE id = ?")
                .bind(&snapshot.id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        match existing {
            Some(ref d) if *d == digest => return Ok(()),
            Some(_) => return Err(ArchiveError::DuplicateKey(snapshot.id.clone())),
            None => {}
        }

        let created = snapshot.created.timestamp_millis();
        let payload = codec::encode(snapshot, false)?;
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            r#"
            INSERT INTO snapshots (id, origin, day, created, modified, type, payload, digest)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&snapshot.id)
        .bind(&snapshot.origin_id)
        .bind(day_key(snapshot_id::day_of(created)))
        .bind(created)
        .bind(snapshot.modified_millis())
        .bind(&snapshot.doc_type)
        .bind(&payload)
        .bind(&digest)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        for (name, file) in &snapshot.files {
            if file.content.is_empty() {
                continue;
            }
            sqlx::query("INSERT INTO snapshot_files (snapshot_id, name, content) VALUES (?, ?, ?)")
                .bind(&snapshot.id)
                .bind(name)
                .bind(&file.content)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    async fn load_metadata(&self) -> Result<Metadata> {
        let rows = sqlx::query("SELECT engine, body FROM sync_cursors")
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        let mut metadata = Metadata::default();
        for row in rows {
            let engine: String = row.get("engine");
            let body: String = row.get("body");
            match engine.as_str() {
                "export" => metadata.export = parse_cursor(&engine, &body)?,
                "import" => metadata.import = parse_cursor(&engine, &body)?,
                "restore" => metadata.restore = parse_cursor(&engine, &body)?,
                other => {
                    return Err(ArchiveError::data_integrity(format!(
                        "unknown sync cursor '{}'",
                        other
                    )))
                }
            }
        }
        Ok(metadata)
    }

    async fn save_export_cursor(&self, cursor: &ExportCursor) -> Result<()> {
        self.save_cursor("export", cursor).await
    }

    async fn save_import_cursor(&self, cursor: &ImportCursor) -> Result<()> {
        self.save_cursor("import", cursor).await
    }

    async fn save_restore_cursor(&self, cursor: &RestoreCursor) -> Result<()> {
        self.save_cursor("restore", cursor).await
    }
}

fn parse_cursor<T: DeserializeOwned>(engine: &str, body: &str) -> Result<T> {
    serde_json::from_str(body)
        .map_err(|e| ArchiveError::data_integrity(format!("{} cursor: {}", engine, e)))
}

/// SQLite implementation of the live workflow store.
///
/// Documents and live snapshots are stored as full XML payloads; live
/// snapshots never appear in the archive tables.
pub struct SqliteLiveStore {
    pool: SqlitePool,
}

impl SqliteLiveStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LiveStore for SqliteLiveStore {
    async fn load_document(&self, id: &str) -> Result<Option<Document>> {
        let payload: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT payload FROM workitems WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        payload.map(|p| codec::decode_document(&p)).transpose()
    }

    async fn save_document(&self, doc: &Document) -> Result<()> {
        let payload = codec::encode_document(doc)?;
        sqlx::query(
            r#"
            INSERT INTO workitems (id, type, snapshot_id, payload, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                type = excluded.type,
                snapshot_id = excluded.snapshot_id,
                payload = excluded.payload,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.doc_type)
        .bind(&doc.snapshot_id)
        .bind(&payload)
        .bind(doc.modified.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_snapshot(&self, id: &str) -> Result<Option<Snapshot>> {
        let payload: Option<Vec<u8>> =
            sqlx::query_scalar("SELECT payload FROM live_snapshots WHERE id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;
        payload.map(|p| codec::decode(&p)).transpose()
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let payload = codec::encode(snapshot, true)?;
        sqlx::query(
            "INSERT INTO live_snapshots (id, origin, payload) VALUES (?, ?, ?) \
             ON CONFLICT(id) DO NOTHING",
        )
        .bind(&snapshot.id)
        .bind(&snapshot.origin_id)
        .bind(&payload)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn delete_snapshot(&self, id: &str) -> Result<()> {
        sqlx::query("DELETE FROM live_snapshots WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn snapshot_ids_for_origin(
        &self,
        origin: &str,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<String>> {
        let sql = if reverse {
            "SELECT id FROM live_snapshots WHERE origin = ? ORDER BY id DESC LIMIT ?"
        } else {
            "SELECT id FROM live_snapshots WHERE origin = ? ORDER BY id ASC LIMIT ?"
        };
        sqlx::query_scalar(sql)
            .bind(origin)
            .bind(sql_limit(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }
}

/// Reads file content of migrated blob workitems from `legacy_blobs`.
pub struct SqliteLegacyResolver {
    pool: SqlitePool,
}

impl SqliteLegacyResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LegacyContentResolver for SqliteLegacyResolver {
    async fn resolve(&self, origin_id: &str, file_name: &str) -> Result<Option<Vec<u8>>> {
        sqlx::query_scalar("SELECT content FROM legacy_blobs WHERE origin_ref = ? AND file_name = ?")
            .bind(origin_id)
            .bind(file_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }
}
