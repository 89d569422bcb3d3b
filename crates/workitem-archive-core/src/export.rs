//! Export: archive → file transport.
//!
//! Each run walks the archive day by day from the persisted syncpoint
//! (`export.point`) up to today. For every snapshot id found in a day
//! bucket, only the latest snapshot of its origin is eligible, and it is
//! written to `<yyyy>/<MM>/<origin>.xml` when its modification time is
//! strictly after the syncpoint the run started from.
//!
//! Progress is checkpointed every `checkpoint_every` scanned ids and at
//! every day boundary, so a run that fails part way resumes close to where
//! it stopped. Re-sending a file is harmless (the transport overwrites).

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::codec;
use crate::control::Clock;
use crate::errors::{ArchiveError, Result};
use crate::models::ExportCursor;
use crate::resolve::LatestResolver;
use crate::settings::SyncSettings;
use crate::snapshot_id;
use crate::store::ArchiveStore;
use crate::transport::FileTransport;

/// Summary of one export run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportReport {
    /// Day buckets scanned.
    pub days: u64,
    /// Snapshot ids seen in those buckets.
    pub scanned: u64,
    pub exported: u64,
    pub bytes: u64,
    /// Syncpoint after the run.
    pub point: i64,
}

pub struct ExportEngine {
    store: Arc<dyn ArchiveStore>,
    transport: Arc<dyn FileTransport>,
    clock: Arc<dyn Clock>,
    settings: SyncSettings,
}

impl ExportEngine {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        transport: Arc<dyn FileTransport>,
        clock: Arc<dyn Clock>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            transport,
            clock,
            settings,
        }
    }

    /// Run one export pass.
    ///
    /// # Errors
    ///
    /// Any store or transport failure ends the run. The export error
    /// counter and the last good syncpoint are persisted before the error
    /// is returned.
    pub async fn run(&self) -> Result<ExportReport> {
        let mut cursor = self.store.load_metadata().await?.export;
        let now = self.clock.now_millis();
        if cursor.point > now {
            warn!(
                topic = "export",
                point = cursor.point,
                now,
                "syncpoint is in the future, clamping to now"
            );
            cursor.point = now;
        }
        let start_point = cursor.point;
        info!(
            topic = "export",
            point = start_point,
            transport = %self.transport.describe(),
            "export started"
        );

        let mut report = ExportReport {
            point: start_point,
            ..ExportReport::default()
        };
        match self.scan(&mut cursor, start_point, now, &mut report).await {
            Ok(()) => {
                report.point = cursor.point;
                info!(
                    topic = "export",
                    exported = report.exported,
                    count = cursor.count,
                    point = cursor.point,
                    "export finished"
                );
                Ok(report)
            }
            Err(e) => {
                cursor.errors += 1;
                error!(
                    topic = "export",
                    error = %e,
                    exported = report.exported,
                    point = cursor.point,
                    "export aborted"
                );
                if let Err(save_err) = self.store.save_export_cursor(&cursor).await {
                    error!(topic = "export", error = %save_err, "failed to checkpoint after abort");
                }
                Err(e)
            }
        }
    }

    async fn scan(
        &self,
        cursor: &mut ExportCursor,
        start_point: i64,
        now: i64,
        report: &mut ExportReport,
    ) -> Result<()> {
        let today = snapshot_id::day_of(now);
        let mut day = snapshot_id::day_of(start_point);
        match self.store.earliest_created().await? {
            Some(earliest) => day = day.max(snapshot_id::day_of(earliest)),
            None => {
                debug!(topic = "export", "archive is empty");
                return Ok(());
            }
        }

        let mut resolver = LatestResolver::new(self.store.as_ref());
        let mut seen = start_point;
        let mut since_checkpoint = 0u64;

        while day <= today {
            let ids = self.store.snapshot_ids_by_day(day).await?;
            debug!(topic = "export", %day, snapshots = ids.len(), "scanning day");

            for id in &ids {
                report.scanned += 1;
                since_checkpoint += 1;

                if resolver.is_latest(id).await? {
                    if let Some(modified) = self.export_one(id, start_point, cursor, report).await? {
                        seen = seen.max(modified);
                    }
                }

                if since_checkpoint >= self.settings.checkpoint_every {
                    cursor.point = seen;
                    self.store.save_export_cursor(cursor).await?;
                    since_checkpoint = 0;
                }
            }

            report.days += 1;
            cursor.point = seen;
            self.store.save_export_cursor(cursor).await?;
            day = snapshot_id::next_day(day);
        }
        Ok(())
    }

    /// Push the snapshot when it is newer than the syncpoint. Returns its
    /// modification time when it was sent.
    async fn export_one(
        &self,
        id: &str,
        start_point: i64,
        cursor: &mut ExportCursor,
        report: &mut ExportReport,
    ) -> Result<Option<i64>> {
        let snapshot = self
            .store
            .load_snapshot(id, true)
            .await?
            .ok_or_else(|| ArchiveError::NotFound(id.to_string()))?;
        let modified = snapshot.modified_millis();
        if modified <= start_point {
            return Ok(None);
        }

        let payload = codec::encode(&snapshot, true)?;
        let path = snapshot_id::remote_path(&snapshot.origin_id, snapshot.created);
        self.transport.put(&path, &payload).await?;

        cursor.count += 1;
        cursor.size += payload.len() as u64;
        report.exported += 1;
        report.bytes += payload.len() as u64;
        debug!(topic = "export", snapshot = %id, %path, "exported");
        Ok(Some(modified))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::control::ManualClock;
    use crate::models::{Document, FileData, Snapshot};
    use crate::store::memory::InMemoryArchiveStore;
    use crate::transport::InMemoryTransport;

    const DAY: i64 = 86_400_000;
    // 2023-05-02T04:00:00Z
    const T0: i64 = 1_683_000_000_000;

    struct Fixture {
        store: Arc<InMemoryArchiveStore>,
        transport: Arc<InMemoryTransport>,
        clock: Arc<ManualClock>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(InMemoryArchiveStore::new()),
                transport: Arc::new(InMemoryTransport::new()),
                clock: Arc::new(ManualClock::new(T0 + 3 * DAY)),
            }
        }

        fn engine(&self, checkpoint_every: u64) -> ExportEngine {
            let settings = SyncSettings {
                checkpoint_every,
                ..SyncSettings::default()
            };
            ExportEngine::new(
                self.store.clone(),
                self.transport.clone(),
                self.clock.clone(),
                settings,
            )
        }

        async fn archive(&self, origin: &str, millis: i64) -> Snapshot {
            let mut doc = Document::new(origin, "invoice");
            doc.add_file("a.txt", FileData::new("text/plain", origin.as_bytes().to_vec()));
            let snap = Snapshot::of(&doc, millis);
            self.store.save_snapshot(&snap).await.unwrap();
            snap
        }
    }

    #[tokio::test]
    async fn exports_each_origin_once() {
        let fx = Fixture::new();
        fx.archive("A", T0).await;
        fx.archive("B", T0 + DAY).await;

        let report = fx.engine(100).run().await.unwrap();
        assert_eq!(report.exported, 2);
        assert_eq!(
            fx.transport.paths(),
            vec!["2023/05/A.xml".to_string(), "2023/05/B.xml".to_string()]
        );
        let meta = fx.store.load_metadata().await.unwrap();
        assert_eq!(meta.export.count, 2);
        assert_eq!(meta.export.point, T0 + DAY);
        assert!(meta.export.size > 0);
    }

    #[tokio::test]
    async fn latest_of_same_day_wins() {
        let fx = Fixture::new();
        fx.archive("O", T0).await;
        fx.archive("O", T0 + 1_000).await;
        let t3 = fx.archive("O", T0 + 2_000).await;

        let report = fx.engine(100).run().await.unwrap();
        assert_eq!(report.exported, 1);
        assert_eq!(report.scanned, 3);
        assert_eq!(fx.transport.writes(), 1);

        let payload = fx.transport.get("2023/05/O.xml").await.unwrap();
        assert_eq!(codec::decode(&payload).unwrap().id, t3.id);
    }

    #[tokio::test]
    async fn second_run_without_new_data_is_a_no_op() {
        let fx = Fixture::new();
        fx.archive("A", T0).await;
        fx.archive("B", T0 + 5).await;

        let engine = fx.engine(100);
        engine.run().await.unwrap();
        let first = fx.store.load_metadata().await.unwrap();

        let report = engine.run().await.unwrap();
        let second = fx.store.load_metadata().await.unwrap();
        assert_eq!(report.exported, 0);
        assert_eq!(first.export, second.export);
        assert_eq!(fx.transport.writes(), 2);
    }

    #[tokio::test]
    async fn new_snapshot_after_run_is_exported_next_time() {
        let fx = Fixture::new();
        fx.archive("A", T0).await;
        let engine = fx.engine(100);
        engine.run().await.unwrap();

        let newer = fx.archive("A", T0 + 2 * DAY).await;
        let report = engine.run().await.unwrap();
        assert_eq!(report.exported, 1);
        let payload = fx.transport.get("2023/05/A.xml").await.unwrap();
        assert_eq!(codec::decode(&payload).unwrap().id, newer.id);
        assert_eq!(fx.store.load_metadata().await.unwrap().export.count, 2);
    }

    #[tokio::test]
    async fn future_syncpoint_is_clamped() {
        let fx = Fixture::new();
        fx.archive("A", T0).await;
        let cursor = ExportCursor {
            point: T0 + 100 * DAY,
            ..ExportCursor::default()
        };
        fx.store.save_export_cursor(&cursor).await.unwrap();

        let report = fx.engine(100).run().await.unwrap();
        assert_eq!(report.exported, 0);
        let meta = fx.store.load_metadata().await.unwrap();
        assert_eq!(meta.export.point, fx.clock.now_millis());
    }

    struct FailingTransport {
        inner: InMemoryTransport,
        fail_from: usize,
    }

    #[async_trait]
    impl FileTransport for FailingTransport {
        fn describe(&self) -> String {
            "failing".into()
        }

        async fn put(&self, path: &str, payload: &[u8]) -> Result<()> {
            if self.inner.writes() as usize >= self.fail_from {
                return Err(ArchiveError::transport("connection reset"));
            }
            self.inner.put(path, payload).await
        }

        async fn get(&self, path: &str) -> Result<Vec<u8>> {
            self.inner.get(path).await
        }

        async fn list_dirs(&self, path: &str) -> Result<Vec<String>> {
            self.inner.list_dirs(path).await
        }

        async fn list_files(&self, path: &str) -> Result<Vec<String>> {
            self.inner.list_files(path).await
        }
    }

    #[tokio::test]
    async fn transport_failure_keeps_checkpointed_progress() {
        let fx = Fixture::new();
        fx.archive("A", T0).await;
        fx.archive("B", T0 + DAY).await;

        let engine = ExportEngine::new(
            fx.store.clone(),
            Arc::new(FailingTransport {
                inner: InMemoryTransport::new(),
                fail_from: 1,
            }),
            fx.clock.clone(),
            SyncSettings {
                checkpoint_every: 1,
                ..SyncSettings::default()
            },
        );
        let err = engine.run().await.unwrap_err();
        assert!(matches!(err, ArchiveError::Transport(_)));

        let meta = fx.store.load_metadata().await.unwrap();
        assert_eq!(meta.export.count, 1);
        assert_eq!(meta.export.errors, 1);
        assert_eq!(meta.export.point, T0);

        // A healthy transport picks up where the failed run stopped.
        let report = fx.engine(100).run().await.unwrap();
        assert_eq!(report.exported, 1);
        assert_eq!(fx.transport.paths(), vec!["2023/05/B.xml".to_string()]);
    }

    #[tokio::test]
    async fn empty_archive_exports_nothing() {
        let fx = Fixture::new();
        let report = fx.engine(100).run().await.unwrap();
        assert_eq!(report, ExportReport::default());
    }
}
