//! Storage abstraction for the archive and the live workflow store.
//!
//! The [`ArchiveStore`] trait defines everything the sync engines need from
//! the durable snapshot archive; [`LiveStore`] is the mutable workflow store
//! the [`SnapshotManager`](crate::snapshot_manager::SnapshotManager) writes
//! to. Both are pluggable (SQLite in the binary crate, in-memory here).
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::errors::Result;
use crate::models::{Document, ExportCursor, ImportCursor, Metadata, RestoreCursor, Snapshot};

/// Bounds for an origin-ordered scan. Both ends are inclusive creation
/// timestamps (ms); `None` leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimeRange {
    pub from: Option<i64>,
    pub to: Option<i64>,
}

impl TimeRange {
    pub fn unbounded() -> Self {
        Self::default()
    }

    pub fn between(from: i64, to: i64) -> Self {
        Self {
            from: Some(from),
            to: Some(to),
        }
    }

    pub fn contains(&self, millis: i64) -> bool {
        self.from.map_or(true, |f| millis >= f) && self.to.map_or(true, |t| millis <= t)
    }
}

/// The durable snapshot archive.
///
/// Rows are partitioned by creation day and clustered by snapshot id, so
/// both "all snapshots created on day D" and "all snapshots of origin X in
/// time order" are range scans.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`load_snapshot`](ArchiveStore::load_snapshot) | Point lookup, optionally without file bytes |
/// | [`snapshot_ids_by_day`](ArchiveStore::snapshot_ids_by_day) | Day-bucket scan, ascending ids |
/// | [`snapshot_ids_by_origin`](ArchiveStore::snapshot_ids_by_origin) | Origin-ordered scan within a time range |
/// | [`exists_snapshot`](ArchiveStore::exists_snapshot) | Existence check |
/// | [`earliest_created`](ArchiveStore::earliest_created) | Lower bound for day scans |
/// | [`save_snapshot`](ArchiveStore::save_snapshot) | Insert; identical re-save is a no-op |
/// | [`load_metadata`](ArchiveStore::load_metadata) | All sync cursors |
/// | [`save_export_cursor`](ArchiveStore::save_export_cursor) and friends | Persist one engine's cursor group |
#[async_trait]
pub trait ArchiveStore: Send + Sync {
    /// Load a snapshot. With `with_content = false` files carry no bytes.
    /// Returns `Ok(None)` when the id is unknown.
    async fn load_snapshot(&self, id: &str, with_content: bool) -> Result<Option<Snapshot>>;

    /// Ids of all snapshots created on `day`, ascending.
    async fn snapshot_ids_by_day(&self, day: NaiveDate) -> Result<Vec<String>>;

    /// Ids of the snapshots of `origin` created within `range`, ascending
    /// (or descending with `reverse`), at most `limit` of them.
    async fn snapshot_ids_by_origin(
        &self,
        origin: &str,
        range: TimeRange,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<String>>;

    async fn exists_snapshot(&self, id: &str) -> Result<bool>;

    /// Creation time (ms) of the oldest archived snapshot, if any. Lets a
    /// scan starting from a zero cursor skip the empty days before it.
    async fn earliest_created(&self) -> Result<Option<i64>>;

    /// Store a snapshot.
    ///
    /// Saving content identical to an existing row is a no-op.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::DuplicateKey`](crate::errors::ArchiveError::DuplicateKey)
    /// when a row with the same id holds different content.
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    /// The singleton metadata record (default values when never saved).
    async fn load_metadata(&self) -> Result<Metadata>;

    /// Persist one engine's cursor group, leaving the other groups untouched.
    async fn save_export_cursor(&self, cursor: &ExportCursor) -> Result<()>;

    async fn save_import_cursor(&self, cursor: &ImportCursor) -> Result<()>;

    async fn save_restore_cursor(&self, cursor: &RestoreCursor) -> Result<()>;
}

/// The live workflow store: mutable origin documents plus the current
/// snapshot of each.
#[async_trait]
pub trait LiveStore: Send + Sync {
    async fn load_document(&self, id: &str) -> Result<Option<Document>>;

    async fn save_document(&self, doc: &Document) -> Result<()>;

    async fn load_snapshot(&self, id: &str) -> Result<Option<Snapshot>>;

    /// Persist a snapshot. Live snapshots are immutable and excluded from
    /// search indices.
    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()>;

    async fn delete_snapshot(&self, id: &str) -> Result<()>;

    /// Ids of the live snapshots of `origin`, ascending (or descending with
    /// `reverse`), at most `limit` of them.
    async fn snapshot_ids_for_origin(
        &self,
        origin: &str,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<String>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_range_bounds_are_inclusive() {
        let range = TimeRange::between(10, 20);
        assert!(range.contains(10));
        assert!(range.contains(20));
        assert!(!range.contains(9));
        assert!(!range.contains(21));
        assert!(TimeRange::unbounded().contains(i64::MIN));
    }
}
