//! Restore: archive → live workflow system.
//!
//! A restore window `[from, to]` is opened with [`RestoreEngine::start_window`]
//! and then consumed by periodic [`RestoreEngine::tick`] calls, each
//! scanning a bounded number of day buckets (`restore_days_per_tick`).
//! Per snapshot id:
//!
//! 1. resolve the latest snapshot of its origin created inside the window;
//!    skip unless it is this id,
//! 2. skip when the live system already holds exactly that id,
//! 3. apply the item filters on the content-free snapshot,
//! 4. push the full snapshot to the live system.
//!
//! Per-snapshot failures are counted in `restore.errors` and skipped. Once
//! `restore.point` passes `to` the tick reports [`TickOutcome::Done`].

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec;
use crate::control::{CancelFlag, TickOutcome};
use crate::errors::{ArchiveError, Result};
use crate::filter::{self, SnapshotFilter};
use crate::models::{FilterOption, RestoreCursor};
use crate::resolve::LatestResolver;
use crate::settings::SyncSettings;
use crate::snapshot_id;
use crate::store::{ArchiveStore, TimeRange};
use crate::transport::RemoteWorkflow;

/// Summary of one restore tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreTick {
    pub days: u64,
    pub restored: u64,
    /// Not latest in window, already present remotely, or filtered out.
    pub skipped: u64,
    pub errors: u64,
    pub outcome: TickOutcome,
}

impl RestoreTick {
    fn new() -> Self {
        Self {
            days: 0,
            restored: 0,
            skipped: 0,
            errors: 0,
            outcome: TickOutcome::Continue,
        }
    }
}

enum Restored {
    Pushed(u64),
    Skipped,
}

pub struct RestoreEngine {
    store: Arc<dyn ArchiveStore>,
    remote: Arc<dyn RemoteWorkflow>,
    settings: SyncSettings,
}

impl RestoreEngine {
    pub fn new(
        store: Arc<dyn ArchiveStore>,
        remote: Arc<dyn RemoteWorkflow>,
        settings: SyncSettings,
    ) -> Self {
        Self {
            store,
            remote,
            settings,
        }
    }

    /// Open a new restore window, replacing any previous one and resetting
    /// the restore counters.
    ///
    /// # Errors
    ///
    /// [`ArchiveError::Configuration`] when `from > to` or a filter regex
    /// does not compile.
    pub async fn start_window(&self, from: i64, to: i64, options: Vec<FilterOption>) -> Result<()> {
        if from > to {
            return Err(ArchiveError::configuration(format!(
                "restore window is empty: from {} > to {}",
                from, to
            )));
        }
        filter::compile(&options)?;

        let window = RestoreCursor {
            from,
            to,
            point: from,
            count: 0,
            size: 0,
            errors: 0,
            options,
        };
        self.store.save_restore_cursor(&window).await?;
        info!(topic = "restore", from, to, "restore window opened");
        Ok(())
    }

    /// Whether a window is open and not yet consumed.
    pub async fn is_pending(&self) -> Result<bool> {
        Ok(self.store.load_metadata().await?.restore.is_pending())
    }

    /// Scan the next day bucket(s) of the open window.
    ///
    /// A cancelled tick stops after the current snapshot without
    /// checkpointing the partial day; that day is rescanned next time.
    pub async fn tick(&self, cancel: &CancelFlag) -> Result<RestoreTick> {
        let mut window = self.store.load_metadata().await?.restore;
        let mut tick = RestoreTick::new();
        if !window.is_pending() {
            tick.outcome = TickOutcome::Done;
            return Ok(tick);
        }

        let filters = filter::compile(&window.options)?;
        let range = TimeRange::between(window.from, window.to);
        let mut resolver = LatestResolver::within(self.store.as_ref(), range);

        for _ in 0..self.settings.restore_days_per_tick {
            if !window.is_pending() {
                break;
            }
            let day = snapshot_id::day_of(window.point);
            let ids = self.store.snapshot_ids_by_day(day).await?;
            debug!(topic = "restore", %day, snapshots = ids.len(), "scanning day");

            let mut cursor = window.clone();
            for id in &ids {
                if cancel.is_cancelled() {
                    info!(topic = "restore", point = window.point, "restore cancelled");
                    return Ok(tick);
                }
                match self.restore_one(id, &mut resolver, &filters).await {
                    Ok(Restored::Pushed(size)) => {
                        cursor.count += 1;
                        cursor.size += size;
                        tick.restored += 1;
                    }
                    Ok(Restored::Skipped) => tick.skipped += 1,
                    Err(e @ ArchiveError::InvariantViolation(_)) => return Err(e),
                    Err(e) => {
                        warn!(topic = "restore", snapshot = %id, error = %e, "restore failed");
                        cursor.errors += 1;
                        tick.errors += 1;
                    }
                }
            }

            cursor.point = snapshot_id::start_of_day(snapshot_id::next_day(day));
            self.store.save_restore_cursor(&cursor).await?;
            window = cursor;
            tick.days += 1;
        }

        if !window.is_pending() {
            info!(
                topic = "restore",
                count = window.count,
                errors = window.errors,
                "restore window complete"
            );
            tick.outcome = TickOutcome::Done;
        }
        Ok(tick)
    }

    async fn restore_one(
        &self,
        id: &str,
        resolver: &mut LatestResolver<'_>,
        filters: &[SnapshotFilter],
    ) -> Result<Restored> {
        if !resolver.is_latest(id).await? {
            return Ok(Restored::Skipped);
        }
        let origin = snapshot_id::origin_of(id)?;

        match self.remote.current_snapshot_id(origin).await {
            Ok(Some(current)) if current == id => {
                debug!(topic = "restore", snapshot = %id, "already up to date");
                return Ok(Restored::Skipped);
            }
            Ok(_) => {}
            Err(e) => {
                debug!(topic = "restore", %origin, error = %e, "remote lookup failed, treating as absent");
            }
        }

        if !filters.is_empty() {
            let light = self
                .store
                .load_snapshot(id, false)
                .await?
                .ok_or_else(|| ArchiveError::NotFound(id.to_string()))?;
            if !filter::accepts(filters, &light) {
                debug!(topic = "restore", snapshot = %id, "filtered out");
                return Ok(Restored::Skipped);
            }
        }

        let snapshot = self
            .store
            .load_snapshot(id, true)
            .await?
            .ok_or_else(|| ArchiveError::NotFound(id.to_string()))?;
        let payload = codec::encode(&snapshot, true)?;
        self.remote.restore_snapshot(&payload).await?;
        debug!(topic = "restore", snapshot = %id, "restored");
        Ok(Restored::Pushed(payload.len() as u64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    use crate::models::{Document, Snapshot};
    use crate::store::memory::InMemoryArchiveStore;
    use crate::transport::InMemoryWorkflow;

    const DAY: i64 = 86_400_000;
    const T0: i64 = 1_683_000_000_000;

    async fn archive(store: &InMemoryArchiveStore, origin: &str, doc_type: &str, millis: i64) -> Snapshot {
        let snap = Snapshot::of(&Document::new(origin, doc_type), millis);
        store.save_snapshot(&snap).await.unwrap();
        snap
    }

    fn window() -> (i64, i64) {
        let first = snapshot_id::day_of(T0);
        let last = snapshot_id::day_of(T0 + 2 * DAY);
        (snapshot_id::start_of_day(first), snapshot_id::end_of_day(last))
    }

    fn engine(store: &Arc<InMemoryArchiveStore>, remote: Arc<dyn RemoteWorkflow>) -> RestoreEngine {
        RestoreEngine::new(store.clone(), remote, SyncSettings::default())
    }

    async fn drain(engine: &RestoreEngine) -> Vec<RestoreTick> {
        let cancel = CancelFlag::new();
        let mut ticks = Vec::new();
        loop {
            let tick = engine.tick(&cancel).await.unwrap();
            let done = tick.outcome == TickOutcome::Done;
            ticks.push(tick);
            if done {
                return ticks;
            }
        }
    }

    #[tokio::test]
    async fn restores_one_day_per_tick_until_done() {
        let store = Arc::new(InMemoryArchiveStore::new());
        let remote = Arc::new(InMemoryWorkflow::new());
        archive(&store, "A", "invoice", T0).await;
        archive(&store, "B", "invoice", T0 + DAY).await;

        let engine = engine(&store, remote.clone());
        let (from, to) = window();
        engine.start_window(from, to, Vec::new()).await.unwrap();

        let ticks = drain(&engine).await;
        assert_eq!(ticks.len(), 3);
        assert_eq!(ticks[0].restored, 1);
        assert_eq!(ticks[0].outcome, TickOutcome::Continue);
        assert_eq!(ticks[2].outcome, TickOutcome::Done);
        assert_eq!(remote.restored().len(), 2);

        let meta = store.load_metadata().await.unwrap();
        assert_eq!(meta.restore.count, 2);
        assert!(meta.restore.point > to);
        assert!(!engine.is_pending().await.unwrap());

        // Consumed window: further ticks are terminal no-ops.
        let tick = engine.tick(&CancelFlag::new()).await.unwrap();
        assert_eq!(tick.outcome, TickOutcome::Done);
        assert_eq!(tick.days, 0);
    }

    #[tokio::test]
    async fn latest_within_window_wins() {
        let store = Arc::new(InMemoryArchiveStore::new());
        let remote = Arc::new(InMemoryWorkflow::new());
        archive(&store, "O", "invoice", T0).await;
        let in_window = archive(&store, "O", "invoice", T0 + DAY).await;
        // Outside the window: must not shadow the in-window version.
        archive(&store, "O", "invoice", T0 + 10 * DAY).await;

        let engine = engine(&store, remote.clone());
        let (from, to) = window();
        engine.start_window(from, to, Vec::new()).await.unwrap();
        drain(&engine).await;
        assert_eq!(remote.restored(), vec![in_window.id]);
    }

    #[tokio::test]
    async fn snapshot_already_live_is_skipped() {
        let store = Arc::new(InMemoryArchiveStore::new());
        let remote = Arc::new(InMemoryWorkflow::new());
        let snap = archive(&store, "A", "invoice", T0).await;
        remote.set_current("A", &snap.id);

        let engine = engine(&store, remote.clone());
        let (from, to) = window();
        engine.start_window(from, to, Vec::new()).await.unwrap();
        let ticks = drain(&engine).await;
        assert!(remote.restored().is_empty());
        assert_eq!(ticks[0].skipped, 1);
    }

    #[tokio::test]
    async fn type_filter_selects_invoices() {
        let store = Arc::new(InMemoryArchiveStore::new());
        let remote = Arc::new(InMemoryWorkflow::new());
        let invoice = archive(&store, "INV", "invoice", T0).await;
        archive(&store, "ORD", "order", T0 + 1).await;

        let engine = engine(&store, remote.clone());
        let (from, to) = window();
        let options = vec![FilterOption {
            item_name: "type".into(),
            regex: "^invoice$".into(),
        }];
        engine.start_window(from, to, options).await.unwrap();
        drain(&engine).await;
        assert_eq!(remote.restored(), vec![invoice.id]);
    }

    #[tokio::test]
    async fn invalid_window_or_filter_is_rejected() {
        let store = Arc::new(InMemoryArchiveStore::new());
        let engine = engine(&store, Arc::new(InMemoryWorkflow::new()));
        assert!(matches!(
            engine.start_window(10, 5, Vec::new()).await,
            Err(ArchiveError::Configuration(_))
        ));
        let bad = vec![FilterOption {
            item_name: "type".into(),
            regex: "[".into(),
        }];
        assert!(engine.start_window(0, 5, bad).await.is_err());
        assert!(!engine.is_pending().await.unwrap());
    }

    struct FlakyWorkflow {
        inner: InMemoryWorkflow,
    }

    #[async_trait]
    impl RemoteWorkflow for FlakyWorkflow {
        async fn current_snapshot_id(&self, _origin: &str) -> Result<Option<String>> {
            Err(ArchiveError::transport("503 Service Unavailable"))
        }

        async fn restore_snapshot(&self, payload: &[u8]) -> Result<()> {
            let snap = codec::decode(payload)?;
            if snap.origin_id == "BROKEN" {
                return Err(ArchiveError::transport("500 Internal Server Error"));
            }
            self.inner.restore_snapshot(payload).await
        }
    }

    #[tokio::test]
    async fn per_snapshot_failures_are_counted_and_skipped() {
        let store = Arc::new(InMemoryArchiveStore::new());
        archive(&store, "BROKEN", "invoice", T0).await;
        let ok = archive(&store, "OK", "invoice", T0 + 1).await;

        let remote = Arc::new(FlakyWorkflow {
            inner: InMemoryWorkflow::new(),
        });
        let engine = engine(&store, remote.clone());
        let (from, to) = window();
        engine.start_window(from, to, Vec::new()).await.unwrap();
        drain(&engine).await;

        assert_eq!(remote.inner.restored(), vec![ok.id]);
        let meta = store.load_metadata().await.unwrap();
        assert_eq!(meta.restore.errors, 1);
        assert_eq!(meta.restore.count, 1);
    }

    #[tokio::test]
    async fn cancelled_tick_does_not_advance() {
        let store = Arc::new(InMemoryArchiveStore::new());
        archive(&store, "A", "invoice", T0).await;
        let engine = engine(&store, Arc::new(InMemoryWorkflow::new()));
        let (from, to) = window();
        engine.start_window(from, to, Vec::new()).await.unwrap();

        let cancel = CancelFlag::new();
        cancel.cancel();
        let tick = engine.tick(&cancel).await.unwrap();
        assert_eq!(tick.days, 0);
        assert_eq!(store.load_metadata().await.unwrap().restore.point, from);
    }

    #[tokio::test]
    async fn several_days_per_tick() {
        let store = Arc::new(InMemoryArchiveStore::new());
        let remote = Arc::new(InMemoryWorkflow::new());
        archive(&store, "A", "invoice", T0).await;
        let engine = RestoreEngine::new(
            store.clone(),
            remote,
            SyncSettings {
                restore_days_per_tick: 7,
                ..SyncSettings::default()
            },
        );
        let (from, to) = window();
        engine.start_window(from, to, Vec::new()).await.unwrap();
        let tick = engine.tick(&CancelFlag::new()).await.unwrap();
        assert_eq!(tick.days, 3);
        assert_eq!(tick.outcome, TickOutcome::Done);
    }
}
