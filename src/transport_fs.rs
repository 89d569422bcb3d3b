//! Directory-tree [`FileTransport`] rooted at a local or mounted path.
//!
//! Typically the root is an FTP share mounted into the filesystem. Writes
//! go to a hidden temp file next to the target and are renamed into place,
//! so a reader never sees a half-written snapshot. Listing a directory that
//! does not exist yields an empty list.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use workitem_archive_core::errors::{ArchiveError, Result};
use workitem_archive_core::transport::FileTransport;

pub struct FsTransport {
    root: PathBuf,
}

impl FsTransport {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Resolve a relative `/`-separated path below the root.
    fn resolve(&self, path: &str) -> Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(ArchiveError::transport(format!(
                "path '{}' escapes the transport root",
                path
            )));
        }
        Ok(self.root.join(relative))
    }

    async fn list(&self, path: &str, dirs: bool) -> Result<Vec<String>> {
        let dir = self.resolve(path)?;
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(io_err(&dir, e)),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|e| io_err(&dir, e))? {
            let name = entry.file_name().to_string_lossy().to_string();
            if name.starts_with('.') {
                continue;
            }
            let file_type = entry.file_type().await.map_err(|e| io_err(&dir, e))?;
            if (dirs && file_type.is_dir()) || (!dirs && file_type.is_file()) {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

fn io_err(path: &Path, e: std::io::Error) -> ArchiveError {
    if e.kind() == ErrorKind::NotFound {
        ArchiveError::NotFound(path.display().to_string())
    } else {
        ArchiveError::transport(format!("{}: {}", path.display(), e))
    }
}

#[async_trait]
impl FileTransport for FsTransport {
    fn describe(&self) -> String {
        format!("fs:{}", self.root.display())
    }

    async fn put(&self, path: &str, payload: &[u8]) -> Result<()> {
        let target = self.resolve(path)?;
        let parent = target
            .parent()
            .ok_or_else(|| ArchiveError::transport(format!("path '{}' has no parent", path)))?;
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err(parent, e))?;

        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| ArchiveError::transport(format!("path '{}' has no file name", path)))?;
        let tmp = parent.join(format!(".{}.tmp", file_name));
        tokio::fs::write(&tmp, payload)
            .await
            .map_err(|e| io_err(&tmp, e))?;
        tokio::fs::rename(&tmp, &target)
            .await
            .map_err(|e| io_err(&target, e))?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.resolve(path)?;
        tokio::fs::read(&target)
            .await
            .map_err(|e| io_err(&target, e))
    }

    async fn list_dirs(&self, path: &str) -> Result<Vec<String>> {
        self.list(path, true).await
    }

    async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.list(path, false).await
    }
}
