//! Remote collaborators the sync engines talk to.
//!
//! [`FileTransport`] is the directory-structured remote store used by
//! export and import (`<root>/<yyyy>/<MM>/<origin>.xml`); [`RemoteWorkflow`]
//! is the live workflow system restore pushes into. Paths handed to a
//! transport are relative to its configured root and use `/` separators.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::codec;
use crate::errors::{ArchiveError, Result};

#[async_trait]
pub trait FileTransport: Send + Sync {
    /// Short label for logs (e.g. `"fs:/mnt/archive"`).
    fn describe(&self) -> String;

    /// Write `payload` to `path`, creating parent directories and
    /// overwriting an existing file.
    async fn put(&self, path: &str, payload: &[u8]) -> Result<()>;

    /// Read the file at `path`.
    async fn get(&self, path: &str) -> Result<Vec<u8>>;

    /// Names of the sub-directories of `path` (`""` is the root), sorted.
    async fn list_dirs(&self, path: &str) -> Result<Vec<String>>;

    /// Names of the files directly inside `path`, sorted.
    async fn list_files(&self, path: &str) -> Result<Vec<String>>;
}

#[async_trait]
pub trait RemoteWorkflow: Send + Sync {
    /// The snapshot id the live system currently holds for `origin`, or
    /// `None` when the origin is unknown there.
    async fn current_snapshot_id(&self, origin: &str) -> Result<Option<String>>;

    /// Push a snapshot (with full file content) into the live system.
    async fn restore_snapshot(&self, payload: &[u8]) -> Result<()>;
}

fn poisoned() -> ArchiveError {
    ArchiveError::storage("in-memory transport lock poisoned")
}

/// Flat in-memory [`FileTransport`]; directories are implied by the `/`
/// separated keys.
#[derive(Default)]
pub struct InMemoryTransport {
    files: RwLock<BTreeMap<String, Vec<u8>>>,
    writes: AtomicU64,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `put` calls served, including overwrites.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// All stored paths, sorted.
    pub fn paths(&self) -> Vec<String> {
        self.files
            .read()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn children(&self, path: &str, dirs: bool) -> Result<Vec<String>> {
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path.trim_end_matches('/'))
        };
        let files = self.files.read().map_err(|_| poisoned())?;
        let mut names = BTreeSet::new();
        for key in files.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            match (rest.split_once('/'), dirs) {
                (Some((dir, _)), true) => {
                    names.insert(dir.to_string());
                }
                (None, false) => {
                    names.insert(rest.to_string());
                }
                _ => {}
            }
        }
        Ok(names.into_iter().collect())
    }
}

#[async_trait]
impl FileTransport for InMemoryTransport {
    fn describe(&self) -> String {
        "memory".to_string()
    }

    async fn put(&self, path: &str, payload: &[u8]) -> Result<()> {
        self.files
            .write()
            .map_err(|_| poisoned())?
            .insert(path.to_string(), payload.to_vec());
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        self.files
            .read()
            .map_err(|_| poisoned())?
            .get(path)
            .cloned()
            .ok_or_else(|| ArchiveError::NotFound(path.to_string()))
    }

    async fn list_dirs(&self, path: &str) -> Result<Vec<String>> {
        self.children(path, true)
    }

    async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.children(path, false)
    }
}

/// In-memory [`RemoteWorkflow`]: remembers the current snapshot id of
/// every origin it received.
#[derive(Default)]
pub struct InMemoryWorkflow {
    current: RwLock<BTreeMap<String, String>>,
    restored: RwLock<Vec<String>>,
}

impl InMemoryWorkflow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pretend the live system already holds `snapshot_id` for `origin`.
    pub fn set_current(&self, origin: &str, snapshot_id: &str) {
        if let Ok(mut current) = self.current.write() {
            current.insert(origin.to_string(), snapshot_id.to_string());
        }
    }

    /// Snapshot ids restored so far, in call order.
    pub fn restored(&self) -> Vec<String> {
        self.restored.read().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RemoteWorkflow for InMemoryWorkflow {
    async fn current_snapshot_id(&self, origin: &str) -> Result<Option<String>> {
        Ok(self.current.read().map_err(|_| poisoned())?.get(origin).cloned())
    }

    async fn restore_snapshot(&self, payload: &[u8]) -> Result<()> {
        let snapshot = codec::decode(payload)?;
        self.current
            .write()
            .map_err(|_| poisoned())?
            .insert(snapshot.origin_id.clone(), snapshot.id.clone());
        self.restored.write().map_err(|_| poisoned())?.push(snapshot.id);
        Ok(())
    }
}
