//! Recurring job scheduler.
//!
//! A [`JobRegistry`] runs at most one task per job name. Each task calls
//! [`Job::tick`] immediately and then once per interval until the job
//! reports [`TickOutcome::Done`], fails, or is stopped. Stopping raises the
//! job's [`CancelFlag`] (polled by the engines) and interrupts the sleep
//! between ticks.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::{error, info};

use workitem_archive_core::control::{CancelFlag, TickOutcome};
use workitem_archive_core::export::ExportEngine;
use workitem_archive_core::import::{ImportEngine, ImportReport};
use workitem_archive_core::restore::RestoreEngine;

#[async_trait]
pub trait Job: Send + Sync {
    async fn tick(&self, cancel: &CancelFlag) -> anyhow::Result<TickOutcome>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobStatus {
    Idle,
    Running,
    Finished,
    Failed(String),
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Idle | JobStatus::Running)
    }
}

struct JobHandle {
    cancel: CancelFlag,
    wake: Arc<Notify>,
    status: watch::Receiver<JobStatus>,
    task: Option<JoinHandle<()>>,
}

impl JobHandle {
    fn interrupt(&self) {
        self.cancel.cancel();
        self.wake.notify_one();
    }

    async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                error!(error = %e, "job task aborted");
            }
        }
    }
}

/// Final status once the task's sender is gone.
async fn settled(mut status: watch::Receiver<JobStatus>) -> JobStatus {
    let result = status
        .wait_for(JobStatus::is_terminal)
        .await
        .map(|s| s.clone());
    match result {
        Ok(s) => s,
        Err(_) => {
            let last = status.borrow().clone();
            if last.is_terminal() {
                last
            } else {
                JobStatus::Failed("job task ended without a status".to_string())
            }
        }
    }
}

#[derive(Default)]
pub struct JobRegistry {
    jobs: tokio::sync::Mutex<HashMap<String, JobHandle>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start `job` under `name`, first stopping a live job of the same name.
    ///
    /// With `interval == None` the job ticks once.
    pub async fn start(&self, name: &str, interval: Option<Duration>, job: Arc<dyn Job>) {
        let mut jobs = self.jobs.lock().await;
        if let Some(mut previous) = jobs.remove(name) {
            previous.interrupt();
            previous.join().await;
            info!(job = name, "previous job replaced");
        }

        let cancel = CancelFlag::new();
        let wake = Arc::new(Notify::new());
        let (tx, rx) = watch::channel(JobStatus::Running);
        let task = tokio::spawn(run_job(
            name.to_string(),
            interval,
            job,
            cancel.clone(),
            wake.clone(),
            tx,
        ));
        jobs.insert(
            name.to_string(),
            JobHandle {
                cancel,
                wake,
                status: rx,
                task: Some(task),
            },
        );
    }

    /// Cancel the job and wait for its task to end.
    pub async fn stop(&self, name: &str) {
        let mut jobs = self.jobs.lock().await;
        if let Some(handle) = jobs.get_mut(name) {
            handle.interrupt();
            handle.join().await;
        }
    }

    pub async fn stop_all(&self) {
        let mut jobs = self.jobs.lock().await;
        for handle in jobs.values() {
            handle.interrupt();
        }
        for handle in jobs.values_mut() {
            handle.join().await;
        }
    }

    /// Wait for the job to end on its own and return its final status.
    /// Does not block `stop` or `status` calls meanwhile.
    pub async fn wait(&self, name: &str) -> JobStatus {
        let status = {
            let jobs = self.jobs.lock().await;
            match jobs.get(name) {
                Some(handle) => handle.status.clone(),
                None => return JobStatus::Idle,
            }
        };
        settled(status).await
    }

    pub async fn status(&self, name: &str) -> JobStatus {
        let jobs = self.jobs.lock().await;
        jobs.get(name)
            .map(|h| h.status.borrow().clone())
            .unwrap_or(JobStatus::Idle)
    }
}

async fn run_job(
    name: String,
    interval: Option<Duration>,
    job: Arc<dyn Job>,
    cancel: CancelFlag,
    wake: Arc<Notify>,
    status: watch::Sender<JobStatus>,
) {
    loop {
        if cancel.is_cancelled() {
            status.send_replace(JobStatus::Cancelled);
            return;
        }
        match job.tick(&cancel).await {
            Ok(TickOutcome::Continue) => {}
            Ok(TickOutcome::Done) => {
                let end = if cancel.is_cancelled() {
                    JobStatus::Cancelled
                } else {
                    JobStatus::Finished
                };
                status.send_replace(end);
                info!(job = %name, "job finished");
                return;
            }
            Err(e) => {
                let message = format!("{:#}", e);
                error!(job = %name, error = %message, "job failed");
                status.send_replace(JobStatus::Failed(message));
                return;
            }
        }

        let Some(interval) = interval else {
            status.send_replace(JobStatus::Finished);
            return;
        };
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = wake.notified() => {}
        }
    }
}

// ============ Engine jobs ============

/// Recurring export; never finishes on its own.
pub struct ExportJob(pub ExportEngine);

#[async_trait]
impl Job for ExportJob {
    async fn tick(&self, _cancel: &CancelFlag) -> anyhow::Result<TickOutcome> {
        let report = self.0.run().await?;
        info!(
            topic = "export",
            exported = report.exported,
            bytes = report.bytes,
            point = report.point,
            "export tick"
        );
        Ok(TickOutcome::Continue)
    }
}

/// One-shot import. The report of the run is kept for the caller.
pub struct ImportJob {
    engine: ImportEngine,
    report: Mutex<Option<ImportReport>>,
}

impl ImportJob {
    pub fn new(engine: ImportEngine) -> Self {
        Self {
            engine,
            report: Mutex::new(None),
        }
    }

    /// Report of the finished run, if it got that far.
    pub fn take_report(&self) -> Option<ImportReport> {
        self.report.lock().ok().and_then(|mut report| report.take())
    }
}

#[async_trait]
impl Job for ImportJob {
    async fn tick(&self, cancel: &CancelFlag) -> anyhow::Result<TickOutcome> {
        let report = self.engine.run(cancel).await?;
        info!(
            topic = "import",
            imported = report.imported,
            errors = report.errors,
            cancelled = report.cancelled,
            "import tick"
        );
        if let Ok(mut slot) = self.report.lock() {
            *slot = Some(report);
        }
        Ok(TickOutcome::Done)
    }
}

/// Consumes the open restore window, a bounded number of days per tick.
pub struct RestoreJob(pub RestoreEngine);

#[async_trait]
impl Job for RestoreJob {
    async fn tick(&self, cancel: &CancelFlag) -> anyhow::Result<TickOutcome> {
        let tick = self.0.tick(cancel).await?;
        info!(
            topic = "restore",
            days = tick.days,
            restored = tick.restored,
            errors = tick.errors,
            "restore tick"
        );
        Ok(tick.outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingJob {
        ticks: AtomicU32,
        done_after: u32,
    }

    impl CountingJob {
        fn new(done_after: u32) -> Arc<Self> {
            Arc::new(Self {
                ticks: AtomicU32::new(0),
                done_after,
            })
        }
    }

    #[async_trait]
    impl Job for CountingJob {
        async fn tick(&self, _cancel: &CancelFlag) -> anyhow::Result<TickOutcome> {
            let n = self.ticks.fetch_add(1, Ordering::SeqCst) + 1;
            if n >= self.done_after {
                Ok(TickOutcome::Done)
            } else {
                Ok(TickOutcome::Continue)
            }
        }
    }

    struct FailingJob;

    #[async_trait]
    impl Job for FailingJob {
        async fn tick(&self, _cancel: &CancelFlag) -> anyhow::Result<TickOutcome> {
            anyhow::bail!("transport unreachable")
        }
    }

    #[tokio::test]
    async fn job_ticks_until_done() {
        let registry = JobRegistry::new();
        let job = CountingJob::new(3);
        registry
            .start("restore", Some(Duration::from_millis(5)), job.clone())
            .await;
        assert_eq!(registry.wait("restore").await, JobStatus::Finished);
        assert_eq!(job.ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn one_shot_job_ticks_once() {
        let registry = JobRegistry::new();
        let job = CountingJob::new(u32::MAX);
        registry.start("import", None, job.clone()).await;
        assert_eq!(registry.wait("import").await, JobStatus::Finished);
        assert_eq!(job.ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stop_interrupts_the_sleep() {
        let registry = JobRegistry::new();
        let job = CountingJob::new(u32::MAX);
        registry
            .start("export", Some(Duration::from_secs(3600)), job.clone())
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.status("export").await, JobStatus::Running);

        tokio::time::timeout(Duration::from_secs(5), registry.stop("export"))
            .await
            .expect("stop should not wait for the interval");
        assert_eq!(registry.status("export").await, JobStatus::Cancelled);
        assert_eq!(job.ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_is_recorded() {
        let registry = JobRegistry::new();
        registry
            .start("export", Some(Duration::from_millis(5)), Arc::new(FailingJob))
            .await;
        match registry.wait("export").await {
            JobStatus::Failed(msg) => assert!(msg.contains("transport unreachable")),
            other => panic!("expected failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn restart_replaces_running_job() {
        let registry = JobRegistry::new();
        let first = CountingJob::new(u32::MAX);
        registry
            .start("export", Some(Duration::from_secs(3600)), first.clone())
            .await;
        let second = CountingJob::new(1);
        registry
            .start("export", Some(Duration::from_secs(3600)), second.clone())
            .await;

        assert_eq!(registry.wait("export").await, JobStatus::Finished);
        assert!(first.ticks.load(Ordering::SeqCst) <= 1);
        assert_eq!(second.ticks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn import_job_runs_once_and_keeps_its_report() {
        use workitem_archive_core::codec;
        use workitem_archive_core::models::{Document, Snapshot};
        use workitem_archive_core::store::memory::InMemoryArchiveStore;
        use workitem_archive_core::transport::{FileTransport, InMemoryTransport};

        let store = Arc::new(InMemoryArchiveStore::new());
        let transport = Arc::new(InMemoryTransport::new());
        let snapshot = Snapshot::of(&Document::new("A", "invoice"), 1_683_000_000_000);
        transport
            .put("2023/05/A.xml", &codec::encode(&snapshot, true).unwrap())
            .await
            .unwrap();

        let registry = JobRegistry::new();
        let job = Arc::new(ImportJob::new(ImportEngine::new(store.clone(), transport)));
        registry.start("import", None, job.clone()).await;
        assert_eq!(registry.wait("import").await, JobStatus::Finished);

        let report = job.take_report().unwrap();
        assert_eq!(report.imported, 1);
        assert!(!report.cancelled);
        assert!(job.take_report().is_none());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn unknown_job_is_idle() {
        let registry = JobRegistry::new();
        assert_eq!(registry.status("restore").await, JobStatus::Idle);
        assert_eq!(registry.wait("restore").await, JobStatus::Idle);
    }
}
