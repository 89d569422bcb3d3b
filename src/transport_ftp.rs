//! FTP / FTPS [`FileTransport`].
//!
//! Uses suppaftp's blocking client on tokio's blocking pool. One control
//! connection is kept open between calls and re-established after any
//! failure. With `tls = true` (the default) the session is upgraded with
//! `AUTH TLS` before login, trusting the webpki roots plus an optional
//! `ca_file`.
//!
//! Listings use `NLST`, which does not tell files from directories: names
//! with an extension are files, the rest are directories. Uploads go to a
//! `.<name>.part` file that is renamed over the target.
//!
//! # Configuration
//!
//! ```toml
//! [transport]
//! kind = "ftp"
//! host = "ftp.example.com"
//! port = 21
//! user = "archive"
//! password = "secret"
//! root = "/archive"
//! tls = true
//! # ca_file = "/etc/ssl/private-ca.pem"
//! ```

use std::fs::File;
use std::io::{BufReader, Cursor};
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rustls::{ClientConfig, RootCertStore};
use suppaftp::types::FileType;
use suppaftp::{FtpError, Mode, RustlsConnector, RustlsFtpStream};
use tracing::{debug, warn};

use workitem_archive_core::errors::{ArchiveError, Result};
use workitem_archive_core::transport::FileTransport;

use crate::config::TransportConfig;

const DEFAULT_PORT: u16 = 21;

struct FtpSettings {
    host: String,
    port: u16,
    user: String,
    password: String,
    tls: bool,
    ca_file: Option<PathBuf>,
    timeout: Duration,
}

pub struct FtpTransport {
    settings: Arc<FtpSettings>,
    /// Remote directory holding the `<yyyy>/<MM>/` tree, without a
    /// trailing slash. Empty means the login directory.
    root: String,
    session: Arc<Mutex<Option<RustlsFtpStream>>>,
}

impl FtpTransport {
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let host = required(&config.host, "transport.host must be set for the ftp transport")?;
        let user = required(&config.user, "transport.user must be set for the ftp transport")?;
        let root = config.root.trim();
        let root = if root == "/" {
            root.to_string()
        } else {
            root.trim_end_matches('/').to_string()
        };
        Ok(Self {
            settings: Arc::new(FtpSettings {
                host,
                port: config.port.unwrap_or(DEFAULT_PORT),
                user,
                password: config.password.clone().unwrap_or_default(),
                tls: config.tls,
                ca_file: config.ca_file.clone(),
                timeout: Duration::from_secs(config.timeout_secs),
            }),
            root,
            session: Arc::new(Mutex::new(None)),
        })
    }

    /// Remote path of `path` (relative, `/`-separated) below the root.
    fn remote_path(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        match (self.root.as_str(), path.is_empty()) {
            (root, true) => root.to_string(),
            ("", false) => path.to_string(),
            ("/", false) => format!("/{}", path),
            (root, false) => format!("{}/{}", root, path),
        }
    }

    /// Run `op` on the shared session, connecting first when needed. A
    /// failed operation drops the session.
    async fn with_session<T, F>(&self, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut RustlsFtpStream) -> std::result::Result<T, FtpError> + Send + 'static,
    {
        let settings = self.settings.clone();
        let session = self.session.clone();
        tokio::task::spawn_blocking(move || {
            let mut slot = session
                .lock()
                .map_err(|_| ArchiveError::transport("ftp session lock poisoned"))?;
            let mut stream = match slot.take() {
                Some(stream) => stream,
                None => settings.connect()?,
            };
            match op(&mut stream) {
                Ok(value) => {
                    *slot = Some(stream);
                    Ok(value)
                }
                Err(e) => {
                    warn!(host = %settings.host, error = %e, "ftp operation failed, dropping session");
                    Err(ftp_err(&settings.host, e))
                }
            }
        })
        .await
        .map_err(|e| ArchiveError::transport(format!("ftp task failed: {}", e)))?
    }

    async fn list(&self, path: &str, dirs: bool) -> Result<Vec<String>> {
        let dir = self.remote_path(path);
        let entries = self
            .with_session(move |stream| {
                let target = (!dir.is_empty()).then_some(dir.as_str());
                stream.nlst(target)
            })
            .await?;

        let mut names: Vec<String> = entries
            .iter()
            .filter_map(|entry| entry.trim_end_matches('/').rsplit('/').next())
            .filter(|name| !name.is_empty() && !name.starts_with('.'))
            .filter(|name| is_file_name(name) != dirs)
            .map(str::to_string)
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }
}

impl FtpSettings {
    fn connect(&self) -> Result<RustlsFtpStream> {
        let addr = self.address()?;
        let mut stream = RustlsFtpStream::connect_timeout(addr, self.timeout)
            .map_err(|e| ftp_err(&self.host, e))?;
        stream
            .get_ref()
            .set_read_timeout(Some(self.timeout))
            .map_err(|e| ArchiveError::transport(format!("ftp {}: {}", self.host, e)))?;

        if self.tls {
            let connector = RustlsConnector::from(Arc::new(self.tls_config()?));
            stream = stream
                .into_secure(connector, &self.host)
                .map_err(|e| ftp_err(&self.host, e))?;
        }
        stream
            .login(self.user.as_str(), self.password.as_str())
            .map_err(|e| ftp_err(&self.host, e))?;
        stream.set_mode(Mode::Passive);
        stream
            .transfer_type(FileType::Binary)
            .map_err(|e| ftp_err(&self.host, e))?;
        debug!(host = %self.host, port = self.port, tls = self.tls, "ftp session opened");
        Ok(stream)
    }

    fn address(&self) -> Result<SocketAddr> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| ArchiveError::transport(format!("ftp {}: {}", self.host, e)))?
            .next()
            .ok_or_else(|| ArchiveError::transport(format!("ftp {}: no address", self.host)))
    }

    fn tls_config(&self) -> Result<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
        if let Some(ref path) = self.ca_file {
            let file = File::open(path).map_err(|e| {
                ArchiveError::configuration(format!("transport.ca_file {}: {}", path.display(), e))
            })?;
            for cert in rustls_pemfile::certs(&mut BufReader::new(file)) {
                let cert = cert.map_err(|e| {
                    ArchiveError::configuration(format!("transport.ca_file {}: {}", path.display(), e))
                })?;
                roots.add(cert).map_err(|e| {
                    ArchiveError::configuration(format!("transport.ca_file {}: {}", path.display(), e))
                })?;
            }
        }

        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider)
            .with_safe_default_protocol_versions()
            .map_err(|e| ArchiveError::configuration(format!("tls: {}", e)))?
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(config)
    }
}

fn required(value: &Option<String>, message: &str) -> Result<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ArchiveError::configuration(message))
}

fn ftp_err(host: &str, e: FtpError) -> ArchiveError {
    ArchiveError::transport(format!("ftp {}: {}", host, e))
}

/// `NLST` entries with an extension are files.
fn is_file_name(name: &str) -> bool {
    name.rfind('.').is_some_and(|dot| dot > 0 && dot + 1 < name.len())
}

/// Split a remote path into its directory and file name.
fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(slash) => (&path[..slash], &path[slash + 1..]),
        None => ("", path),
    }
}

/// Create every directory on the way to `dir`. Existing ones answer with
/// an error, which is ignored.
fn ensure_dirs(stream: &mut RustlsFtpStream, dir: &str) {
    let mut prefix = String::new();
    if dir.starts_with('/') {
        prefix.push('/');
    }
    for part in dir.split('/').filter(|p| !p.is_empty()) {
        if !prefix.is_empty() && !prefix.ends_with('/') {
            prefix.push('/');
        }
        prefix.push_str(part);
        let _ = stream.mkdir(prefix.as_str());
    }
}

#[async_trait]
impl FileTransport for FtpTransport {
    fn describe(&self) -> String {
        let scheme = if self.settings.tls { "ftps" } else { "ftp" };
        let root = self.root.trim_start_matches('/');
        format!(
            "{}://{}@{}:{}/{}",
            scheme, self.settings.user, self.settings.host, self.settings.port, root
        )
    }

    async fn put(&self, path: &str, payload: &[u8]) -> Result<()> {
        let target = self.remote_path(path);
        let (dir, name) = split_path(&target);
        let temp = if dir.is_empty() {
            format!(".{}.part", name)
        } else {
            format!("{}/.{}.part", dir, name)
        };
        let dir = dir.to_string();
        let payload = payload.to_vec();
        let size = payload.len();
        let written = target.clone();

        self.with_session(move |stream| {
            ensure_dirs(stream, &dir);
            stream.put_file(temp.as_str(), &mut Cursor::new(payload))?;
            // RNFR/RNTO does not replace an existing file on every server.
            let _ = stream.rm(target.as_str());
            stream.rename(temp.as_str(), target.as_str())
        })
        .await?;
        debug!(path = %written, bytes = size, "ftp file written");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let target = self.remote_path(path);
        self.with_session(move |stream| stream.retr_as_buffer(target.as_str()))
            .await
            .map(Cursor::into_inner)
    }

    async fn list_dirs(&self, path: &str) -> Result<Vec<String>> {
        self.list(path, true).await
    }

    async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        self.list(path, false).await
    }
}
