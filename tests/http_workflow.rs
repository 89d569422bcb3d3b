//! `HttpWorkflowClient` and restore against a mock workflow API.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use tempfile::TempDir;

use workitem_archive::config::RestoreConfig;
use workitem_archive::db;
use workitem_archive::migrate;
use workitem_archive::restore_client::HttpWorkflowClient;
use workitem_archive::sqlite_store::SqliteArchiveStore;
use workitem_archive_core::codec;
use workitem_archive_core::control::{CancelFlag, TickOutcome};
use workitem_archive_core::errors::ArchiveError;
use workitem_archive_core::models::{Document, FileData, Snapshot};
use workitem_archive_core::restore::RestoreEngine;
use workitem_archive_core::settings::SyncSettings;
use workitem_archive_core::snapshot_id;
use workitem_archive_core::store::ArchiveStore;
use workitem_archive_core::transport::RemoteWorkflow;

const T0: i64 = 1_683_000_000_000;

#[derive(Clone, Default)]
struct MockWorkflow {
    current: Arc<Mutex<HashMap<String, String>>>,
    restored: Arc<Mutex<Vec<String>>>,
    auth: Arc<Mutex<Vec<String>>>,
    reject: Arc<Mutex<bool>>,
}

async fn current_snapshot(
    State(mock): State<MockWorkflow>,
    Path(origin): Path<String>,
) -> Result<String, StatusCode> {
    mock.current
        .lock()
        .unwrap()
        .get(&origin)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

async fn restore_snapshot(
    State(mock): State<MockWorkflow>,
    headers: HeaderMap,
    body: Bytes,
) -> StatusCode {
    if let Some(auth) = headers.get(header::AUTHORIZATION) {
        mock.auth
            .lock()
            .unwrap()
            .push(auth.to_str().unwrap().to_string());
    }
    if *mock.reject.lock().unwrap() {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    let Ok(snapshot) = codec::decode(&body) else {
        return StatusCode::BAD_REQUEST;
    };
    mock.current
        .lock()
        .unwrap()
        .insert(snapshot.origin_id.clone(), snapshot.id.clone());
    mock.restored.lock().unwrap().push(snapshot.id);
    StatusCode::NO_CONTENT
}

async fn spawn_mock(mock: MockWorkflow) -> String {
    let app = Router::new()
        .route("/api/snapshot/{origin}", get(current_snapshot))
        .route("/api/snapshot", post(restore_snapshot))
        .with_state(mock);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{}/api/", addr)
}

fn client(api_url: &str, user: Option<&str>) -> HttpWorkflowClient {
    HttpWorkflowClient::from_config(&RestoreConfig {
        api_url: api_url.to_string(),
        user: user.map(str::to_string),
        password: Some("secret".into()),
        timeout_secs: 5,
    })
    .unwrap()
}

fn snapshot(origin: &str, millis: i64) -> Snapshot {
    let mut doc = Document::new(origin, "invoice");
    doc.add_file("scan.pdf", FileData::new("application/pdf", b"%PDF".to_vec()));
    Snapshot::of(&doc, millis)
}

#[tokio::test]
async fn current_snapshot_lookup() {
    let mock = MockWorkflow::default();
    mock.current
        .lock()
        .unwrap()
        .insert("ABC123".into(), "ABC123-1683000000000".into());
    mock.current.lock().unwrap().insert("BLANK".into(), "  \n".into());
    let client = client(&spawn_mock(mock).await, None);

    assert_eq!(
        client.current_snapshot_id("ABC123").await.unwrap().as_deref(),
        Some("ABC123-1683000000000")
    );
    assert_eq!(client.current_snapshot_id("UNKNOWN").await.unwrap(), None);
    assert_eq!(client.current_snapshot_id("BLANK").await.unwrap(), None);
}

#[tokio::test]
async fn restore_posts_xml_with_basic_auth() {
    let mock = MockWorkflow::default();
    let client = client(&spawn_mock(mock.clone()).await, Some("admin"));

    let payload = codec::encode(&snapshot("ABC123", T0), true).unwrap();
    client.restore_snapshot(&payload).await.unwrap();

    assert_eq!(*mock.restored.lock().unwrap(), vec!["ABC123-1683000000000".to_string()]);
    assert_eq!(*mock.auth.lock().unwrap(), vec!["Basic YWRtaW46c2VjcmV0".to_string()]);
}

#[tokio::test]
async fn server_errors_are_transport_errors() {
    let mock = MockWorkflow::default();
    *mock.reject.lock().unwrap() = true;
    let client = client(&spawn_mock(mock).await, None);

    let payload = codec::encode(&snapshot("ABC123", T0), true).unwrap();
    let err = client.restore_snapshot(&payload).await.unwrap_err();
    assert!(matches!(err, ArchiveError::Transport(_)));
}

#[tokio::test]
async fn unreachable_api_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/api", listener.local_addr().unwrap());
    drop(listener);

    let err = client(&url, None).current_snapshot_id("ABC123").await.unwrap_err();
    assert!(matches!(err, ArchiveError::Transport(_)));
}

#[tokio::test]
async fn restore_window_over_http_skips_live_snapshots() {
    let tmp = TempDir::new().unwrap();
    let pool = db::connect_path(&tmp.path().join("a.sqlite")).await.unwrap();
    migrate::apply(&pool).await.unwrap();
    let store = Arc::new(SqliteArchiveStore::new(pool));
    store.save_snapshot(&snapshot("A", T0)).await.unwrap();
    store.save_snapshot(&snapshot("B", T0 + 1)).await.unwrap();

    let mock = MockWorkflow::default();
    mock.current
        .lock()
        .unwrap()
        .insert("B".into(), snapshot_id::make("B", T0 + 1));
    let remote = Arc::new(client(&spawn_mock(mock.clone()).await, None));

    let engine = RestoreEngine::new(store.clone(), remote, SyncSettings::default());
    let day = snapshot_id::day_of(T0);
    engine
        .start_window(
            snapshot_id::start_of_day(day),
            snapshot_id::end_of_day(day),
            Vec::new(),
        )
        .await
        .unwrap();
    let tick = engine.tick(&CancelFlag::new()).await.unwrap();

    assert_eq!(tick.outcome, TickOutcome::Done);
    assert_eq!(tick.restored, 1);
    assert_eq!(tick.skipped, 1);
    assert_eq!(*mock.restored.lock().unwrap(), vec![snapshot_id::make("A", T0)]);
    assert_eq!(store.load_metadata().await.unwrap().restore.count, 1);
}
