//! TOML configuration.
//!
//! ```toml
//! [db]
//! path = "./data/archive.sqlite"
//!
//! [transport]
//! kind = "ftp"                # or "fs", "s3"
//! root = "/archive"
//! host = "ftp.example.com"
//! user = "archive"
//! password = "secret"
//!
//! [restore]
//! api_url = "https://workflow.example.com/api"
//! user = "admin"
//! password = "secret"
//!
//! [sync]
//! checkpoint_every = 100
//! export_interval_secs = 3600
//! restore_interval_secs = 60
//! restore_days_per_tick = 1
//!
//! [logging]
//! format = "pretty"
//! filter = "workitem_archive=info"
//! ```
//!
//! `[transport]` and `[restore]` are optional; commands that need them
//! fail with a configuration error before doing any work.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use workitem_archive_core::errors::ArchiveError;
use workitem_archive_core::settings::SyncSettings;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub transport: Option<TransportConfig>,
    #[serde(default)]
    pub restore: Option<RestoreConfig>,
    #[serde(default)]
    pub sync: SyncSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Fs,
    Ftp,
    S3,
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransportConfig {
    pub kind: TransportKind,
    /// Directory (fs, ftp) or key prefix (s3) holding the `<yyyy>/<MM>/` tree.
    #[serde(default)]
    pub root: String,
    #[serde(default)]
    pub host: Option<String>,
    /// FTP control port, 21 when unset.
    #[serde(default)]
    pub port: Option<u16>,
    /// Upgrade the FTP session with AUTH TLS before login.
    #[serde(default = "default_tls")]
    pub tls: bool,
    /// Extra PEM CA certificates trusted for FTPS.
    #[serde(default)]
    pub ca_file: Option<PathBuf>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub bucket: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for S3-compatible services (MinIO, LocalStack).
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_tls() -> bool {
    true
}

fn is_blank(value: &Option<String>) -> bool {
    value.as_deref().map_or(true, |v| v.trim().is_empty())
}

impl TransportConfig {
    /// Check the settings the configured backend needs.
    pub fn validate(&self) -> Result<(), ArchiveError> {
        match self.kind {
            TransportKind::Fs if self.root.trim().is_empty() => Err(ArchiveError::configuration(
                "transport.root must be set for the fs transport",
            )),
            TransportKind::Ftp if is_blank(&self.host) => Err(ArchiveError::configuration(
                "transport.host must be set for the ftp transport",
            )),
            TransportKind::Ftp if is_blank(&self.user) => Err(ArchiveError::configuration(
                "transport.user must be set for the ftp transport",
            )),
            TransportKind::S3 if is_blank(&self.bucket) => Err(ArchiveError::configuration(
                "transport.bucket must be set for the s3 transport",
            )),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RestoreConfig {
    pub api_url: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_filter")]
    pub filter: String,
}

fn default_filter() -> String {
    "workitem_archive=info,workitem_archive_core=info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_filter(),
        }
    }
}

impl Config {
    /// The `[transport]` section, required by export and import.
    pub fn transport(&self) -> Result<&TransportConfig, ArchiveError> {
        self.transport
            .as_ref()
            .ok_or_else(|| ArchiveError::configuration("missing [transport] section"))
    }

    /// The `[restore]` section, required by restore.
    pub fn restore(&self) -> Result<&RestoreConfig, ArchiveError> {
        self.restore
            .as_ref()
            .ok_or_else(|| ArchiveError::configuration("missing [restore] section"))
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    config.sync.validate()?;

    if let Some(ref transport) = config.transport {
        transport.validate()?;
    }

    if let Some(ref restore) = config.restore {
        if !restore.api_url.starts_with("http://") && !restore.api_url.starts_with("https://") {
            bail!("restore.api_url must be an http(s) URL");
        }
    }

    Ok(config)
}
