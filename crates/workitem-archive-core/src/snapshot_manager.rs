//! Snapshot creation and pruning for live documents.
//!
//! Every time the workflow layer persists a [`Document`], [`SnapshotManager::on_persist`]
//! takes an immutable copy of it. File bytes move into the snapshot; the
//! live document keeps a one-byte placeholder per file and a reference to
//! its current snapshot (`$snapshotID`). Older live snapshots of the same
//! origin are pruned so exactly one remains; the archive keeps them all.
//!
//! ```text
//! Document ──on_persist──▶ Snapshot (full content) ──▶ LiveStore
//!    │                          │
//!    └─ files → placeholders    └─ returned to caller → ArchiveStore
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::control::Clock;
use crate::errors::{ArchiveError, Result};
use crate::models::{Document, Snapshot, SNAPSHOT_TYPE_PREFIX};
use crate::snapshot_id;
use crate::store::LiveStore;

/// Legacy blob-workitem type. Documents of this type must never be snapshotted.
pub const LEGACY_BLOB_TYPE: &str = "workitemlob";

/// Model definitions are versioned elsewhere and never snapshotted.
pub const MODEL_TYPE: &str = "model";

/// Secondary content source for documents migrated from the legacy blob
/// format. Consulted only when neither the document nor its previous
/// snapshot holds the bytes of a file.
#[async_trait]
pub trait LegacyContentResolver: Send + Sync {
    async fn resolve(&self, origin_id: &str, file_name: &str) -> Result<Option<Vec<u8>>>;
}

pub struct SnapshotManager {
    live: Arc<dyn LiveStore>,
    clock: Arc<dyn Clock>,
    legacy: Option<Arc<dyn LegacyContentResolver>>,
}

impl SnapshotManager {
    pub fn new(live: Arc<dyn LiveStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            live,
            clock,
            legacy: None,
        }
    }

    pub fn with_legacy_resolver(mut self, resolver: Arc<dyn LegacyContentResolver>) -> Self {
        self.legacy = Some(resolver);
        self
    }

    /// Snapshot `doc` before it is saved.
    ///
    /// On success the document's files are replaced by placeholders and its
    /// `snapshot_id` points at the new snapshot, which is already stored in
    /// the live store and returned for archiving. Returns `Ok(None)` for
    /// documents that are never snapshotted (snapshots themselves, models).
    ///
    /// # Errors
    ///
    /// - [`ArchiveError::InvalidDataKind`] for the legacy blob type.
    /// - [`ArchiveError::InvariantViolation`] when the document id is empty.
    pub async fn on_persist(&self, doc: &mut Document) -> Result<Option<Snapshot>> {
        if doc.doc_type == LEGACY_BLOB_TYPE {
            return Err(ArchiveError::InvalidDataKind(format!(
                "documents of type '{}' cannot be snapshotted",
                LEGACY_BLOB_TYPE
            )));
        }
        if doc.doc_type.starts_with(SNAPSHOT_TYPE_PREFIX) || doc.doc_type == MODEL_TYPE {
            return Ok(None);
        }
        if doc.id.is_empty() {
            return Err(ArchiveError::invariant("cannot snapshot a document without id"));
        }

        let previous = self.previous_snapshot(&doc.id).await?;
        let (_, millis) = snapshot_id::next_after(
            &doc.id,
            previous.as_ref().map(|s| s.id.as_str()),
            self.clock.now_millis(),
        )?;

        let mut snapshot = Snapshot::of(doc, millis);
        self.fill_missing_content(&mut snapshot, previous.as_ref()).await;

        for file in doc.files.values_mut() {
            *file = file.stripped();
        }
        doc.snapshot_id = Some(snapshot.id.clone());

        self.prune(&doc.id, &snapshot.id).await?;
        self.live.save_snapshot(&snapshot).await?;

        debug!(snapshot = %snapshot.id, files = snapshot.files.len(), "snapshot created");
        Ok(Some(snapshot))
    }

    /// [`on_persist`](Self::on_persist) followed by saving the document.
    pub async fn persist(&self, doc: &mut Document) -> Result<Option<Snapshot>> {
        let snapshot = self.on_persist(doc).await?;
        self.live.save_document(doc).await?;
        Ok(snapshot)
    }

    async fn previous_snapshot(&self, origin: &str) -> Result<Option<Snapshot>> {
        let ids = self.live.snapshot_ids_for_origin(origin, 1, true).await?;
        match ids.first() {
            Some(id) => self.live.load_snapshot(id).await,
            None => Ok(None),
        }
    }

    async fn fill_missing_content(&self, snapshot: &mut Snapshot, previous: Option<&Snapshot>) {
        for (name, file) in snapshot.files.iter_mut() {
            if !file.is_placeholder() {
                continue;
            }
            let carried = previous
                .and_then(|p| p.files.get(name))
                .filter(|f| !f.is_placeholder());
            if let Some(prev) = carried {
                file.content = prev.content.clone();
                continue;
            }

            file.content.clear();
            file.missing_content = true;
            let Some(ref legacy) = self.legacy else {
                warn!(snapshot = %snapshot.id, file = %name, "missing file content");
                continue;
            };
            match legacy.resolve(&snapshot.origin_id, name).await {
                Ok(Some(bytes)) if !bytes.is_empty() => {
                    debug!(snapshot = %snapshot.id, file = %name, "content resolved from legacy store");
                    file.content = bytes;
                    file.missing_content = false;
                }
                Ok(_) => {
                    warn!(snapshot = %snapshot.id, file = %name, "missing file content");
                }
                Err(e) => {
                    warn!(snapshot = %snapshot.id, file = %name, error = %e, "legacy content lookup failed");
                }
            }
        }
    }

    /// Delete every live snapshot of `origin` older than `current`.
    async fn prune(&self, origin: &str, current: &str) -> Result<()> {
        if origin.is_empty() {
            return Err(ArchiveError::invariant("cannot prune snapshots without origin"));
        }
        let ids = self
            .live
            .snapshot_ids_for_origin(origin, usize::MAX, false)
            .await?;
        for id in ids.iter().filter(|id| id.as_str() < current) {
            self.live.delete_snapshot(id).await?;
        }
        Ok(())
    }
}
