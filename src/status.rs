//! `warc status` and `warc reset`.

use anyhow::Result;
use clap::ValueEnum;

use workitem_archive_core::models::{ExportCursor, ImportCursor, RestoreCursor};
use workitem_archive_core::store::ArchiveStore;

use crate::config::Config;
use crate::sync::open_archive;

/// Cursor group cleared by `warc reset`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CursorGroup {
    Export,
    Import,
    Restore,
}

impl CursorGroup {
    fn name(self) -> &'static str {
        match self {
            CursorGroup::Export => "export",
            CursorGroup::Import => "import",
            CursorGroup::Restore => "restore",
        }
    }
}

pub async fn run_status(config: &Config) -> Result<()> {
    let store = open_archive(config).await?;
    let meta = store.load_metadata().await?;

    println!("status {}", config.db.path.display());
    println!("  snapshots: {}", store.count().await?);
    for (name, value) in meta.entries() {
        println!("  {}: {}", name, value);
    }
    for option in &meta.restore.options {
        println!("  restore.filter: {}={}", option.item_name, option.regex);
    }
    if meta.restore.is_pending() {
        println!("  restore: pending");
    }
    Ok(())
}

pub async fn run_reset(config: &Config, group: CursorGroup) -> Result<()> {
    let store = open_archive(config).await?;
    match group {
        CursorGroup::Export => store.save_export_cursor(&ExportCursor::default()).await?,
        CursorGroup::Import => store.save_import_cursor(&ImportCursor::default()).await?,
        CursorGroup::Restore => store.save_restore_cursor(&RestoreCursor::default()).await?,
    }
    println!("reset {}", group.name());
    println!("ok");
    Ok(())
}
