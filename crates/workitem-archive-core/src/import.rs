//! Import: file transport → archive.
//!
//! A one-shot job that walks the remote `<yyyy>/<MM>/` tree and archives
//! every snapshot file not already present. A malformed or unreadable file
//! is counted in `import.errors` and skipped; it never blocks the rest of
//! the batch. The import cursor is checkpointed after every month directory.
//!
//! Cancellation is cooperative: the [`CancelFlag`] is polled after every
//! file and every directory. A cancelled run leaves the cursor at the last
//! checkpoint. Snapshots it saved past that checkpoint are found again by
//! the next run and counted then, since their modification time is after
//! the checkpointed `import.point`.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::codec;
use crate::control::CancelFlag;
use crate::errors::Result;
use crate::models::ImportCursor;
use crate::store::ArchiveStore;
use crate::transport::FileTransport;

/// Summary of one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImportReport {
    pub directories: u64,
    pub files: u64,
    pub imported: u64,
    /// Files whose snapshot was already archived.
    pub skipped: u64,
    pub errors: u64,
    pub bytes: u64,
    pub cancelled: bool,
}

enum FileOutcome {
    Imported { size: u64, modified: i64 },
    AlreadyPresent,
}

pub struct ImportEngine {
    store: Arc<dyn ArchiveStore>,
    transport: Arc<dyn FileTransport>,
}

impl ImportEngine {
    pub fn new(store: Arc<dyn ArchiveStore>, transport: Arc<dyn FileTransport>) -> Self {
        Self { store, transport }
    }

    pub async fn run(&self, cancel: &CancelFlag) -> Result<ImportReport> {
        let mut cursor = self.store.load_metadata().await?.import;
        let checkpoint = cursor.point;
        let mut report = ImportReport::default();
        info!(topic = "import", source = %self.transport.describe(), "import started");

        let years = self.transport.list_dirs("").await?;
        'years: for year in years.iter().filter(|y| is_bucket(y, 4)) {
            let months = match self.transport.list_dirs(year).await {
                Ok(months) => months,
                Err(e) if e.is_item_recoverable() => {
                    warn!(topic = "import", dir = %year, error = %e, "cannot list year");
                    report.errors += 1;
                    cursor.errors += 1;
                    self.store.save_import_cursor(&cursor).await?;
                    continue;
                }
                Err(e) => return Err(e),
            };

            for month in months.iter().filter(|m| is_bucket(m, 2)) {
                if cancel.is_cancelled() {
                    report.cancelled = true;
                    break 'years;
                }
                let dir = format!("{}/{}", year, month);
                let mut dir_cursor = cursor.clone();
                let finished = self
                    .import_dir(&dir, checkpoint, &mut dir_cursor, &mut report, cancel)
                    .await?;
                if !finished {
                    report.cancelled = true;
                    break 'years;
                }
                self.store.save_import_cursor(&dir_cursor).await?;
                cursor = dir_cursor;
                report.directories += 1;
                debug!(topic = "import", %dir, count = cursor.count, "directory checkpointed");
            }

            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
        }

        if report.cancelled {
            info!(topic = "import", imported = report.imported, "import cancelled");
        } else {
            info!(
                topic = "import",
                imported = report.imported,
                skipped = report.skipped,
                errors = report.errors,
                point = cursor.point,
                "import finished"
            );
        }
        Ok(report)
    }

    /// Import every file of one month directory into `cursor`. Returns
    /// `false` when cancelled part way.
    ///
    /// An already archived snapshot modified after `checkpoint` was saved by
    /// a cancelled run and is counted as imported.
    async fn import_dir(
        &self,
        dir: &str,
        checkpoint: i64,
        cursor: &mut ImportCursor,
        report: &mut ImportReport,
        cancel: &CancelFlag,
    ) -> Result<bool> {
        let files = match self.transport.list_files(dir).await {
            Ok(files) => files,
            Err(e) if e.is_item_recoverable() => {
                warn!(topic = "import", %dir, error = %e, "cannot list directory");
                report.errors += 1;
                cursor.errors += 1;
                return Ok(true);
            }
            Err(e) => return Err(e),
        };

        for name in files.iter().filter(|f| f.ends_with(".xml")) {
            let path = format!("{}/{}", dir, name);
            report.files += 1;
            match self.import_file(&path, checkpoint).await {
                Ok(FileOutcome::Imported { size, modified }) => {
                    cursor.count += 1;
                    cursor.size += size;
                    cursor.point = cursor.point.max(modified);
                    report.imported += 1;
                    report.bytes += size;
                }
                Ok(FileOutcome::AlreadyPresent) => report.skipped += 1,
                Err(e) if e.is_item_recoverable() => {
                    warn!(topic = "import", %path, error = %e, "skipping file");
                    cursor.errors += 1;
                    report.errors += 1;
                }
                Err(e) => return Err(e),
            }
            if cancel.is_cancelled() {
                return Ok(false);
            }
        }
        Ok(true)
    }

    async fn import_file(&self, path: &str, checkpoint: i64) -> Result<FileOutcome> {
        let bytes = self.transport.get(path).await?;
        let snapshot = codec::decode(&bytes)?;
        let imported = FileOutcome::Imported {
            size: bytes.len() as u64,
            modified: snapshot.modified_millis(),
        };
        if self.store.exists_snapshot(&snapshot.id).await? {
            if snapshot.modified_millis() > checkpoint {
                debug!(
                    topic = "import",
                    snapshot = %snapshot.id,
                    %path,
                    "counting snapshot saved by a cancelled run"
                );
                return Ok(imported);
            }
            return Ok(FileOutcome::AlreadyPresent);
        }
        self.store.save_snapshot(&snapshot).await?;
        debug!(topic = "import", snapshot = %snapshot.id, %path, "imported");
        Ok(imported)
    }
}

/// `yyyy` / `MM` directory names.
fn is_bucket(name: &str, width: usize) -> bool {
    name.len() == width && name.bytes().all(|b| b.is_ascii_digit())
}
