//! Engine commands: `warc export`, `warc import`, `warc restore`, `warc run`.
//!
//! Each command opens the archive database, builds the backends named in
//! the config and drives one of the core engines. Results are printed to
//! stdout; progress and failures go through `tracing`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::{info, warn};

use workitem_archive_core::control::{CancelFlag, SystemClock, TickOutcome};
use workitem_archive_core::export::ExportEngine;
use workitem_archive_core::filter;
use workitem_archive_core::import::ImportEngine;
use workitem_archive_core::restore::RestoreEngine;
use workitem_archive_core::snapshot_id;
use workitem_archive_core::store::ArchiveStore;
use workitem_archive_core::transport::{FileTransport, RemoteWorkflow};

use crate::config::{Config, TransportKind};
use crate::db;
use crate::restore_client::HttpWorkflowClient;
use crate::scheduler::{ExportJob, ImportJob, JobRegistry, JobStatus, RestoreJob};
use crate::sqlite_store::SqliteArchiveStore;
use crate::transport_fs::FsTransport;
use crate::transport_ftp::FtpTransport;
use crate::transport_s3::S3Transport;

pub async fn open_archive(config: &Config) -> Result<Arc<SqliteArchiveStore>> {
    let pool = db::open(config).await?;
    Ok(Arc::new(SqliteArchiveStore::new(pool)))
}

/// Build the configured [`FileTransport`].
pub fn open_transport(config: &Config) -> Result<Arc<dyn FileTransport>> {
    let transport = config.transport()?;
    let opened: Arc<dyn FileTransport> = match transport.kind {
        TransportKind::Fs => Arc::new(FsTransport::new(&transport.root)),
        TransportKind::Ftp => Arc::new(FtpTransport::from_config(transport)?),
        TransportKind::S3 => Arc::new(S3Transport::from_config(transport)?),
    };
    Ok(opened)
}

pub fn open_remote(config: &Config) -> Result<Arc<dyn RemoteWorkflow>> {
    Ok(Arc::new(HttpWorkflowClient::from_config(config.restore()?)?))
}

/// Raise `cancel` on Ctrl-C. Abort the returned task once the work is done.
fn cancel_on_ctrl_c(cancel: &CancelFlag) -> tokio::task::JoinHandle<()> {
    let cancel = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling");
            cancel.cancel();
        }
    })
}

pub async fn run_export(config: &Config) -> Result<()> {
    let transport = open_transport(config)?;
    let store = open_archive(config).await?;
    let engine = ExportEngine::new(
        store,
        transport.clone(),
        Arc::new(SystemClock),
        config.sync.clone(),
    );

    let report = engine.run().await.context("export failed")?;

    println!("export {}", transport.describe());
    println!("  days scanned: {}", report.days);
    println!("  snapshots scanned: {}", report.scanned);
    println!("  exported: {}", report.exported);
    println!("  bytes: {}", report.bytes);
    println!("  point: {}", report.point);
    println!("ok");
    Ok(())
}

/// Run one import as the `import` job, so it never overlaps another
/// import started through the same registry.
pub async fn run_import(config: &Config) -> Result<()> {
    let transport = open_transport(config)?;
    let store = open_archive(config).await?;
    let job = Arc::new(ImportJob::new(ImportEngine::new(store, transport.clone())));

    let registry = JobRegistry::new();
    registry.start("import", None, job.clone()).await;
    let status = tokio::select! {
        status = registry.wait("import") => status,
        Ok(()) = tokio::signal::ctrl_c() => {
            warn!("interrupt received, cancelling");
            registry.stop("import").await;
            registry.wait("import").await
        }
    };
    if let JobStatus::Failed(message) = status {
        anyhow::bail!("import failed: {}", message);
    }
    let report = job
        .take_report()
        .context("import ended without a report")?;

    println!("import {}", transport.describe());
    println!("  directories: {}", report.directories);
    println!("  files: {}", report.files);
    println!("  imported: {}", report.imported);
    println!("  already archived: {}", report.skipped);
    println!("  errors: {}", report.errors);
    println!("  bytes: {}", report.bytes);
    println!("{}", if report.cancelled { "cancelled" } else { "ok" });
    Ok(())
}

fn parse_day(value: &str, flag: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("{} must be YYYY-MM-DD, got '{}'", flag, value))
}

/// Open a restore window over whole days and tick it until consumed.
pub async fn run_restore(config: &Config, from: &str, to: &str, filters: &[String]) -> Result<()> {
    let from_day = parse_day(from, "--from")?;
    let to_day = parse_day(to, "--to")?;
    let options = filters
        .iter()
        .map(|f| filter::parse_option(f))
        .collect::<Result<Vec<_>, _>>()?;

    let remote = open_remote(config)?;
    let store = open_archive(config).await?;
    let engine = RestoreEngine::new(store, remote, config.sync.clone());
    engine
        .start_window(
            snapshot_id::start_of_day(from_day),
            snapshot_id::end_of_day(to_day),
            options,
        )
        .await?;

    let cancel = CancelFlag::new();
    let watcher = cancel_on_ctrl_c(&cancel);
    let (mut days, mut restored, mut skipped, mut errors) = (0, 0, 0, 0);
    let result = loop {
        let tick = match engine.tick(&cancel).await {
            Ok(tick) => tick,
            Err(e) => break Err(e),
        };
        days += tick.days;
        restored += tick.restored;
        skipped += tick.skipped;
        errors += tick.errors;
        if tick.outcome == TickOutcome::Done || cancel.is_cancelled() {
            break Ok(());
        }
    };
    watcher.abort();
    result.context("restore failed")?;

    println!("restore {}..{}", from_day, to_day);
    println!("  days scanned: {}", days);
    println!("  restored: {}", restored);
    println!("  skipped: {}", skipped);
    println!("  errors: {}", errors);
    println!("{}", if cancel.is_cancelled() { "cancelled" } else { "ok" });
    Ok(())
}

/// Schedule recurring export and resume an unfinished restore window
/// until Ctrl-C.
pub async fn run_daemon(config: &Config) -> Result<()> {
    let transport = open_transport(config)?;
    let store = open_archive(config).await?;
    let registry = JobRegistry::new();

    let export = ExportEngine::new(
        store.clone(),
        transport.clone(),
        Arc::new(SystemClock),
        config.sync.clone(),
    );
    registry
        .start(
            "export",
            Some(Duration::from_secs(config.sync.export_interval_secs)),
            Arc::new(ExportJob(export)),
        )
        .await;
    info!(
        transport = %transport.describe(),
        interval_secs = config.sync.export_interval_secs,
        "export scheduled"
    );

    let meta = store.load_metadata().await?;
    if meta.restore.is_pending() {
        match open_remote(config) {
            Ok(remote) => {
                let restore = RestoreEngine::new(store.clone(), remote, config.sync.clone());
                registry
                    .start(
                        "restore",
                        Some(Duration::from_secs(config.sync.restore_interval_secs)),
                        Arc::new(RestoreJob(restore)),
                    )
                    .await;
                info!(point = meta.restore.point, to = meta.restore.to, "restore resumed");
            }
            Err(e) => warn!(error = %e, "pending restore window not resumed"),
        }
    }

    println!("running (Ctrl-C to stop)");
    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for Ctrl-C")?;
    registry.stop_all().await;

    println!("export: {:?}", registry.status("export").await);
    println!("restore: {:?}", registry.status("restore").await);
    println!("ok");
    Ok(())
}
