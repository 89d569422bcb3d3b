//! SQLite archive and live store behaviour against a temporary database.

use chrono::NaiveDate;
use sqlx::SqlitePool;
use tempfile::TempDir;

use workitem_archive::db;
use workitem_archive::migrate;
use workitem_archive::sqlite_store::{SqliteArchiveStore, SqliteLegacyResolver, SqliteLiveStore};
use workitem_archive_core::errors::ArchiveError;
use workitem_archive_core::models::{
    Document, ExportCursor, FileData, FilterOption, ImportCursor, ItemValue, Metadata,
    RestoreCursor, Snapshot,
};
use workitem_archive_core::snapshot_manager::LegacyContentResolver;
use workitem_archive_core::store::{ArchiveStore, LiveStore, TimeRange};

// 2023-05-02T04:00:00Z
const T0: i64 = 1_683_000_000_000;
const DAY: i64 = 86_400_000;

async fn open_pool(tmp: &TempDir) -> SqlitePool {
    let pool = db::connect_path(&tmp.path().join("archive.sqlite"))
        .await
        .unwrap();
    migrate::apply(&pool).await.unwrap();
    pool
}

fn snapshot(origin: &str, millis: i64, body: &[u8]) -> Snapshot {
    let mut doc = Document::new(origin, "invoice");
    doc.set_item("subject", ItemValue::Text(format!("{} subject", origin)));
    doc.add_file("scan.pdf", FileData::new("application/pdf", body.to_vec()));
    Snapshot::of(&doc, millis)
}

#[tokio::test]
async fn snapshot_round_trips_with_and_without_content() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteArchiveStore::new(open_pool(&tmp).await);
    let s = snapshot("ABC123", T0, b"%PDF-1.4");
    store.save_snapshot(&s).await.unwrap();

    let full = store.load_snapshot(&s.id, true).await.unwrap().unwrap();
    assert_eq!(full, s);

    let light = store.load_snapshot(&s.id, false).await.unwrap().unwrap();
    assert!(light.files["scan.pdf"].content.is_empty());
    assert_eq!(light.files["scan.pdf"].content_type, "application/pdf");
    assert_eq!(light.items, s.items);

    assert!(store.load_snapshot("ABC123-0000000000001", true).await.unwrap().is_none());
}

#[tokio::test]
async fn save_is_idempotent_and_detects_conflicts() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteArchiveStore::new(open_pool(&tmp).await);
    let s = snapshot("ABC123", T0, b"one");
    store.save_snapshot(&s).await.unwrap();
    store.save_snapshot(&s).await.unwrap();
    assert_eq!(store.count().await.unwrap(), 1);

    let conflicting = snapshot("ABC123", T0, b"two");
    let err = store.save_snapshot(&conflicting).await.unwrap_err();
    assert!(matches!(err, ArchiveError::DuplicateKey(ref id) if *id == s.id));
    assert!(store.exists_snapshot(&s.id).await.unwrap());
}

#[tokio::test]
async fn day_buckets_and_origin_ranges() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteArchiveStore::new(open_pool(&tmp).await);
    for s in [
        snapshot("A", T0, b"a1"),
        snapshot("A", T0 + 1_000, b"a2"),
        snapshot("B", T0 + 500, b"b1"),
        snapshot("A", T0 + DAY, b"a3"),
    ] {
        store.save_snapshot(&s).await.unwrap();
    }

    let day = NaiveDate::from_ymd_opt(2023, 5, 2).unwrap();
    let ids = store.snapshot_ids_by_day(day).await.unwrap();
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    let latest = store
        .snapshot_ids_by_origin("A", TimeRange::unbounded(), 1, true)
        .await
        .unwrap();
    assert_eq!(latest, vec![workitem_archive_core::snapshot_id::make("A", T0 + DAY)]);

    let first_day = store
        .snapshot_ids_by_origin("A", TimeRange::between(T0, T0 + DAY - 1), 10, true)
        .await
        .unwrap();
    assert_eq!(first_day.len(), 2);
    assert!(first_day[0] > first_day[1]);

    assert_eq!(store.earliest_created().await.unwrap(), Some(T0));
}

#[tokio::test]
async fn empty_archive_has_no_earliest() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteArchiveStore::new(open_pool(&tmp).await);
    assert_eq!(store.earliest_created().await.unwrap(), None);
}

#[tokio::test]
async fn cursors_persist_across_connections() {
    let tmp = TempDir::new().unwrap();
    {
        let store = SqliteArchiveStore::new(open_pool(&tmp).await);
        assert_eq!(store.load_metadata().await.unwrap(), Metadata::default());

        let mut export = ExportCursor {
            point: T0,
            count: 3,
            ..ExportCursor::default()
        };
        store.save_export_cursor(&export).await.unwrap();
        export.count = 4;
        store.save_export_cursor(&export).await.unwrap();
        store
            .save_restore_cursor(&RestoreCursor {
                from: T0,
                to: T0 + DAY,
                point: T0,
                options: vec![FilterOption {
                    item_name: "type".into(),
                    regex: "^invoice$".into(),
                }],
                ..RestoreCursor::default()
            })
            .await
            .unwrap();
    }

    let store = SqliteArchiveStore::new(open_pool(&tmp).await);
    let meta = store.load_metadata().await.unwrap();
    assert_eq!(meta.export.count, 4);
    assert_eq!(meta.import, ImportCursor::default());
    assert_eq!(meta.restore.options[0].regex, "^invoice$");
    assert!(meta.restore.is_pending());
}

#[tokio::test]
async fn saving_one_cursor_leaves_the_others() {
    let tmp = TempDir::new().unwrap();
    let store = SqliteArchiveStore::new(open_pool(&tmp).await);
    let stale = store.load_metadata().await.unwrap();

    store
        .save_restore_cursor(&RestoreCursor {
            from: T0,
            to: T0 + DAY,
            point: T0 + DAY,
            count: 2,
            ..RestoreCursor::default()
        })
        .await
        .unwrap();
    // An engine holding an older view writes back only its own group.
    let mut export = stale.export;
    export.count = 1;
    store.save_export_cursor(&export).await.unwrap();

    let meta = store.load_metadata().await.unwrap();
    assert_eq!(meta.export.count, 1);
    assert_eq!(meta.restore.count, 2);
    assert_eq!(meta.restore.point, T0 + DAY);
}

#[tokio::test]
async fn live_store_documents_and_snapshots() {
    let tmp = TempDir::new().unwrap();
    let live = SqliteLiveStore::new(open_pool(&tmp).await);

    let mut doc = Document::new("ABC123", "invoice");
    doc.set_item("amount", ItemValue::Integer(42));
    doc.snapshot_id = Some("ABC123-1683000000000".into());
    live.save_document(&doc).await.unwrap();
    let loaded = live.load_document("ABC123").await.unwrap().unwrap();
    assert_eq!(loaded.snapshot_id, doc.snapshot_id);
    assert_eq!(loaded.items["amount"], vec![ItemValue::Integer(42)]);

    for millis in [T0, T0 + 1, T0 + 2] {
        live.save_snapshot(&snapshot("ABC123", millis, b"x")).await.unwrap();
    }
    live.save_snapshot(&snapshot("OTHER", T0, b"y")).await.unwrap();

    let newest = live.snapshot_ids_for_origin("ABC123", 1, true).await.unwrap();
    assert_eq!(newest, vec!["ABC123-1683000000002".to_string()]);
    let oldest = live.snapshot_ids_for_origin("ABC123", 2, false).await.unwrap();
    assert_eq!(oldest[0], "ABC123-1683000000000");

    live.delete_snapshot("ABC123-1683000000000").await.unwrap();
    assert!(live.load_snapshot("ABC123-1683000000000").await.unwrap().is_none());
    let kept = live.load_snapshot("ABC123-1683000000002").await.unwrap().unwrap();
    assert_eq!(kept.files["scan.pdf"].content, b"x");
}

#[tokio::test]
async fn legacy_resolver_reads_blob_table() {
    let tmp = TempDir::new().unwrap();
    let pool = open_pool(&tmp).await;
    sqlx::query("INSERT INTO legacy_blobs (origin_ref, file_name, content) VALUES (?, ?, ?)")
        .bind("ABC123")
        .bind("scan.pdf")
        .bind(b"legacy".to_vec())
        .execute(&pool)
        .await
        .unwrap();

    let resolver = SqliteLegacyResolver::new(pool);
    assert_eq!(
        resolver.resolve("ABC123", "scan.pdf").await.unwrap(),
        Some(b"legacy".to_vec())
    );
    assert_eq!(resolver.resolve("ABC123", "other.pdf").await.unwrap(), None);
}
