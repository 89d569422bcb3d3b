//! HTTP client for the live workflow system restore pushes into.
//!
//! Two endpoints below the configured `api_url`:
//!
//! | Request                      | Meaning                                     |
//! |------------------------------|---------------------------------------------|
//! | `GET  /snapshot/{origin}`    | current snapshot id (plain text), 404 = none |
//! | `POST /snapshot`             | restore an XML snapshot with full content   |
//!
//! Requests use HTTP basic auth when `user` is configured.

use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::debug;

use workitem_archive_core::errors::{ArchiveError, Result};
use workitem_archive_core::transport::RemoteWorkflow;

use crate::config::RestoreConfig;
use crate::util::uri_encode;

pub struct HttpWorkflowClient {
    base: String,
    user: Option<String>,
    password: Option<String>,
    client: reqwest::Client,
}

impl HttpWorkflowClient {
    pub fn from_config(config: &RestoreConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ArchiveError::configuration(format!("http client: {}", e)))?;
        Ok(Self {
            base: config.api_url.trim_end_matches('/').to_string(),
            user: config.user.clone(),
            password: config.password.clone(),
            client,
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self.client.request(method, format!("{}{}", self.base, path));
        match self.user {
            Some(ref user) => builder.basic_auth(user, self.password.as_ref()),
            None => builder,
        }
    }
}

#[async_trait]
impl RemoteWorkflow for HttpWorkflowClient {
    async fn current_snapshot_id(&self, origin: &str) -> Result<Option<String>> {
        let path = format!("/snapshot/{}", uri_encode(origin));
        let resp = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| ArchiveError::transport(format!("GET {}: {}", path, e)))?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body = resp
                    .text()
                    .await
                    .map_err(|e| ArchiveError::transport(format!("GET {}: {}", path, e)))?;
                let id = body.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            status => Err(ArchiveError::transport(format!(
                "GET {} failed (HTTP {})",
                path, status
            ))),
        }
    }

    async fn restore_snapshot(&self, payload: &[u8]) -> Result<()> {
        let resp = self
            .request(reqwest::Method::POST, "/snapshot")
            .header("Content-Type", "application/xml")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| ArchiveError::transport(format!("POST /snapshot: {}", e)))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ArchiveError::transport(format!(
                "POST /snapshot failed (HTTP {}): {}",
                status,
                body.chars().take(500).collect::<String>()
            )));
        }
        debug!(bytes = payload.len(), "snapshot restored");
        Ok(())
    }
}
