//! In-memory [`ArchiveStore`] and [`LiveStore`] implementations for tests
//! and embedding.
//!
//! Uses `BTreeMap`s behind `std::sync::RwLock`; ids are kept in sorted
//! order so day and origin scans are plain filtered iterations.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::codec;
use crate::errors::{ArchiveError, Result};
use crate::models::{Document, ExportCursor, ImportCursor, Metadata, RestoreCursor, Snapshot};
use crate::snapshot_id;

use super::{ArchiveStore, LiveStore, TimeRange};

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| ArchiveError::storage("in-memory store lock poisoned"))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| ArchiveError::storage("in-memory store lock poisoned"))
}

fn select_ids<'a>(
    ids: impl Iterator<Item = &'a String>,
    limit: usize,
    reverse: bool,
) -> Vec<String> {
    let mut ids: Vec<String> = ids.cloned().collect();
    if reverse {
        ids.reverse();
    }
    ids.truncate(limit);
    ids
}

struct StoredSnapshot {
    snapshot: Snapshot,
    digest: String,
}

/// In-memory archive.
pub struct InMemoryArchiveStore {
    snapshots: RwLock<BTreeMap<String, StoredSnapshot>>,
    metadata: RwLock<Metadata>,
}

impl InMemoryArchiveStore {
    pub fn new() -> Self {
        Self {
            snapshots: RwLock::new(BTreeMap::new()),
            metadata: RwLock::new(Metadata::default()),
        }
    }

    /// Number of archived snapshots.
    pub fn len(&self) -> usize {
        self.snapshots.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryArchiveStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ArchiveStore for InMemoryArchiveStore {
    async fn load_snapshot(&self, id: &str, with_content: bool) -> Result<Option<Snapshot>> {
        let snapshots = read(&self.snapshots)?;
        Ok(snapshots.get(id).map(|stored| {
            if with_content {
                stored.snapshot.clone()
            } else {
                stored.snapshot.without_content()
            }
        }))
    }

    async fn snapshot_ids_by_day(&self, day: NaiveDate) -> Result<Vec<String>> {
        let snapshots = read(&self.snapshots)?;
        Ok(snapshots
            .values()
            .filter(|s| snapshot_id::day_of(s.snapshot.created.timestamp_millis()) == day)
            .map(|s| s.snapshot.id.clone())
            .collect())
    }

    async fn snapshot_ids_by_origin(
        &self,
        origin: &str,
        range: TimeRange,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<String>> {
        let snapshots = read(&self.snapshots)?;
        let ids = snapshots
            .values()
            .filter(|s| s.snapshot.origin_id == origin)
            .filter(|s| range.contains(s.snapshot.created.timestamp_millis()))
            .map(|s| &s.snapshot.id);
        Ok(select_ids(ids, limit, reverse))
    }

    async fn exists_snapshot(&self, id: &str) -> Result<bool> {
        Ok(read(&self.snapshots)?.contains_key(id))
    }

    async fn earliest_created(&self) -> Result<Option<i64>> {
        Ok(read(&self.snapshots)?
            .values()
            .map(|s| s.snapshot.created.timestamp_millis())
            .min())
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        let digest = codec::digest(snapshot)?;
        let mut snapshots = write(&self.snapshots)?;
        if let Some(existing) = snapshots.get(&snapshot.id) {
            if existing.digest == digest {
                return Ok(());
            }
            return Err(ArchiveError::DuplicateKey(snapshot.id.clone()));
        }
        snapshots.insert(
            snapshot.id.clone(),
            StoredSnapshot {
                snapshot: snapshot.clone(),
                digest,
            },
        );
        Ok(())
    }

    async fn load_metadata(&self) -> Result<Metadata> {
        Ok(read(&self.metadata)?.clone())
    }

    async fn save_export_cursor(&self, cursor: &ExportCursor) -> Result<()> {
        write(&self.metadata)?.export = cursor.clone();
        Ok(())
    }

    async fn save_import_cursor(&self, cursor: &ImportCursor) -> Result<()> {
        write(&self.metadata)?.import = cursor.clone();
        Ok(())
    }

    async fn save_restore_cursor(&self, cursor: &RestoreCursor) -> Result<()> {
        write(&self.metadata)?.restore = cursor.clone();
        Ok(())
    }
}

/// In-memory live workflow store.
pub struct InMemoryLiveStore {
    documents: RwLock<BTreeMap<String, Document>>,
    snapshots: RwLock<BTreeMap<String, Snapshot>>,
}

impl InMemoryLiveStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            snapshots: RwLock::new(BTreeMap::new()),
        }
    }
}

impl Default for InMemoryLiveStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LiveStore for InMemoryLiveStore {
    async fn load_document(&self, id: &str) -> Result<Option<Document>> {
        Ok(read(&self.documents)?.get(id).cloned())
    }

    async fn save_document(&self, doc: &Document) -> Result<()> {
        write(&self.documents)?.insert(doc.id.clone(), doc.clone());
        Ok(())
    }

    async fn load_snapshot(&self, id: &str) -> Result<Option<Snapshot>> {
        Ok(read(&self.snapshots)?.get(id).cloned())
    }

    async fn save_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        write(&self.snapshots)?.insert(snapshot.id.clone(), snapshot.clone());
        Ok(())
    }

    async fn delete_snapshot(&self, id: &str) -> Result<()> {
        write(&self.snapshots)?.remove(id);
        Ok(())
    }

    async fn snapshot_ids_for_origin(
        &self,
        origin: &str,
        limit: usize,
        reverse: bool,
    ) -> Result<Vec<String>> {
        let snapshots = read(&self.snapshots)?;
        let ids = snapshots
            .values()
            .filter(|s| s.origin_id == origin)
            .map(|s| &s.id);
        Ok(select_ids(ids, limit, reverse))
    }
}
