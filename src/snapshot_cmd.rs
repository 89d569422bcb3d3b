//! `warc snapshot <file.xml>`: ingest a workitem document.
//!
//! The document is run through the [`SnapshotManager`] against the SQLite
//! live store, saved there with its files stripped to placeholders, and the
//! new snapshot (with full content) is written to the archive.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};

use workitem_archive_core::codec;
use workitem_archive_core::control::SystemClock;
use workitem_archive_core::snapshot_manager::SnapshotManager;
use workitem_archive_core::store::ArchiveStore;

use crate::config::Config;
use crate::db;
use crate::sqlite_store::{SqliteArchiveStore, SqliteLegacyResolver, SqliteLiveStore};

pub async fn run_snapshot(config: &Config, path: &Path) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    let mut doc = codec::decode_document(&bytes)
        .with_context(|| format!("Failed to parse document: {}", path.display()))?;

    let pool = db::open(config).await?;
    let manager = SnapshotManager::new(
        Arc::new(SqliteLiveStore::new(pool.clone())),
        Arc::new(SystemClock),
    )
    .with_legacy_resolver(Arc::new(SqliteLegacyResolver::new(pool.clone())));
    let archive = SqliteArchiveStore::new(pool.clone());

    let snapshot = manager.persist(&mut doc).await?;

    println!("snapshot {}", doc.id);
    println!("  type: {}", doc.doc_type);
    match snapshot {
        Some(snapshot) => {
            archive.save_snapshot(&snapshot).await?;
            println!("  snapshot: {}", snapshot.id);
            println!("  files: {}", snapshot.files.len());
            println!("  bytes: {}", snapshot.content_size());
            for name in snapshot.missing_files() {
                println!("  missing content: {}", name);
            }
        }
        None => println!("  snapshot: skipped"),
    }
    println!("ok");

    pool.close().await;
    Ok(())
}
