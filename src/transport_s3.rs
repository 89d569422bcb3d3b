//! S3-compatible [`FileTransport`].
//!
//! Snapshot files are objects under `<root>/<yyyy>/<MM>/<origin>.xml`.
//! Directories are the `CommonPrefixes` of a `ListObjectsV2` call with
//! `delimiter=/`. Every request is signed with
//! [AWS Signature Version 4](https://docs.aws.amazon.com/AmazonS3/latest/API/sig-v4-authenticating-requests.html)
//! (see [`crate::sigv4`]).
//!
//! # Configuration
//!
//! ```toml
//! [transport]
//! kind = "s3"
//! bucket = "workitem-archive"
//! root = "archive"
//! region = "eu-central-1"
//! # endpoint_url = "http://localhost:9000"   # MinIO, path-style
//! # user = "<access key id>"
//! # password = "<secret access key>"
//! ```
//!
//! Without `user` / `password` the credentials come from
//! `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY` and the optional
//! `AWS_SESSION_TOKEN`.

use async_trait::async_trait;
use chrono::Utc;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Method, StatusCode};
use tracing::debug;

use workitem_archive_core::errors::{ArchiveError, Result};
use workitem_archive_core::transport::FileTransport;

use crate::config::TransportConfig;
use crate::sigv4::{sha256_hex, CanonicalRequest, Signer};
use crate::util::uri_encode;

// ============ AWS Credentials ============

struct AwsCredentials {
    access_key_id: String,
    secret_access_key: String,
    session_token: Option<String>,
}

impl AwsCredentials {
    /// Credentials from the config, falling back to the environment.
    fn resolve(config: &TransportConfig) -> Result<Self> {
        if let (Some(user), Some(password)) = (&config.user, &config.password) {
            return Ok(Self {
                access_key_id: user.clone(),
                secret_access_key: password.clone(),
                session_token: None,
            });
        }
        let access_key_id = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
            ArchiveError::configuration("transport.user or AWS_ACCESS_KEY_ID must be set")
        })?;
        let secret_access_key = std::env::var("AWS_SECRET_ACCESS_KEY").map_err(|_| {
            ArchiveError::configuration("transport.password or AWS_SECRET_ACCESS_KEY must be set")
        })?;
        Ok(Self {
            access_key_id,
            secret_access_key,
            session_token: std::env::var("AWS_SESSION_TOKEN").ok(),
        })
    }
}

// ============ Transport ============

pub struct S3Transport {
    bucket: String,
    region: String,
    /// Key prefix without surrounding slashes.
    prefix: String,
    endpoint_url: Option<String>,
    creds: AwsCredentials,
    client: reqwest::Client,
}

/// One page of a `ListObjectsV2` response.
#[derive(Debug, Default, PartialEq)]
struct ListPage {
    prefixes: Vec<String>,
    keys: Vec<String>,
    next_token: Option<String>,
}

impl S3Transport {
    pub fn from_config(config: &TransportConfig) -> Result<Self> {
        let bucket = config
            .bucket
            .clone()
            .filter(|b| !b.is_empty())
            .ok_or_else(|| ArchiveError::configuration("transport.bucket must be set"))?;
        Ok(Self {
            bucket,
            region: config.region.clone(),
            prefix: config.root.trim_matches('/').to_string(),
            endpoint_url: config.endpoint_url.clone(),
            creds: AwsCredentials::resolve(config)?,
            client: reqwest::Client::new(),
        })
    }

    fn key(&self, path: &str) -> String {
        let path = path.trim_matches('/');
        match (self.prefix.is_empty(), path.is_empty()) {
            (true, _) => path.to_string(),
            (false, true) => self.prefix.clone(),
            (false, false) => format!("{}/{}", self.prefix, path),
        }
    }

    /// `(scheme, host, path prefix)`: virtual-hosted style on AWS,
    /// path style on a custom endpoint.
    fn endpoint(&self) -> (&str, String, String) {
        match self.endpoint_url {
            Some(ref endpoint) => {
                let scheme = if endpoint.starts_with("http://") {
                    "http"
                } else {
                    "https"
                };
                let host = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                (scheme, host, format!("/{}", uri_encode(&self.bucket)))
            }
            None => (
                "https",
                format!("{}.s3.{}.amazonaws.com", self.bucket, self.region),
                String::new(),
            ),
        }
    }

    async fn send(
        &self,
        method: Method,
        key: &str,
        query: &[(&str, String)],
        body: Vec<u8>,
    ) -> Result<reqwest::Response> {
        let (scheme, host, base_path) = self.endpoint();
        let encoded_key = key.split('/').map(uri_encode).collect::<Vec<_>>().join("/");
        let canonical_uri = format!("{}/{}", base_path, encoded_key);

        let mut sorted_params: Vec<(&str, &str)> =
            query.iter().map(|(k, v)| (*k, v.as_str())).collect();
        sorted_params.sort();
        let canonical_querystring = sorted_params
            .iter()
            .map(|(k, v)| format!("{}={}", uri_encode(k), uri_encode(v)))
            .collect::<Vec<_>>()
            .join("&");

        let now = Utc::now();
        let amz_date = now.format("%Y%m%dT%H%M%SZ").to_string();
        let payload_hash = sha256_hex(&body);

        let mut headers = vec![
            ("host".to_string(), host.clone()),
            ("x-amz-content-sha256".to_string(), payload_hash.clone()),
            ("x-amz-date".to_string(), amz_date.clone()),
        ];
        if let Some(ref token) = self.creds.session_token {
            headers.push(("x-amz-security-token".to_string(), token.clone()));
        }
        let signer = Signer {
            access_key_id: &self.creds.access_key_id,
            secret_access_key: &self.creds.secret_access_key,
            region: &self.region,
            service: "s3",
        };
        let authorization = signer.authorization(
            &CanonicalRequest {
                method: method.as_str(),
                uri: &canonical_uri,
                query: &canonical_querystring,
                payload_hash: &payload_hash,
            },
            &mut headers,
            &amz_date,
        );

        let mut url = format!("{}://{}{}", scheme, host, canonical_uri);
        if !canonical_querystring.is_empty() {
            url.push('?');
            url.push_str(&canonical_querystring);
        }

        let mut req = self
            .client
            .request(method.clone(), &url)
            .header("Authorization", &authorization)
            .header("x-amz-content-sha256", &payload_hash)
            .header("x-amz-date", &amz_date);
        if let Some(ref token) = self.creds.session_token {
            req = req.header("x-amz-security-token", token);
        }
        if !body.is_empty() {
            req = req.header("Content-Type", "application/xml").body(body);
        }

        req.send().await.map_err(|e| {
            ArchiveError::transport(format!(
                "S3 {} s3://{}/{} failed: {}",
                method, self.bucket, key, e
            ))
        })
    }

    async fn list(&self, path: &str) -> Result<ListPage> {
        let mut listing_prefix = self.key(path);
        if !listing_prefix.is_empty() {
            listing_prefix.push('/');
        }

        let mut all = ListPage::default();
        let mut continuation_token: Option<String> = None;
        loop {
            let mut query = vec![
                ("list-type", "2".to_string()),
                ("delimiter", "/".to_string()),
                ("max-keys", "1000".to_string()),
            ];
            if !listing_prefix.is_empty() {
                query.push(("prefix", listing_prefix.clone()));
            }
            if let Some(ref token) = continuation_token {
                query.push(("continuation-token", token.clone()));
            }

            let resp = self.send(Method::GET, "", &query, Vec::new()).await?;
            let body = checked_body(resp, "ListObjectsV2", &listing_prefix).await?;
            let xml = String::from_utf8_lossy(&body);
            let page = parse_list_response(&xml)?;

            all.prefixes.extend(
                page.prefixes
                    .iter()
                    .filter_map(|p| p.strip_prefix(listing_prefix.as_str()))
                    .map(|p| p.trim_end_matches('/').to_string())
                    .filter(|p| !p.is_empty()),
            );
            all.keys.extend(
                page.keys
                    .iter()
                    .filter_map(|k| k.strip_prefix(listing_prefix.as_str()))
                    .filter(|k| !k.is_empty() && !k.contains('/'))
                    .map(str::to_string),
            );

            match page.next_token {
                Some(token) => continuation_token = Some(token),
                None => break,
            }
        }
        all.prefixes.sort();
        all.keys.sort();
        Ok(all)
    }
}

async fn checked_body(resp: reqwest::Response, op: &str, key: &str) -> Result<Vec<u8>> {
    let status = resp.status();
    if status == StatusCode::NOT_FOUND {
        return Err(ArchiveError::NotFound(key.to_string()));
    }
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ArchiveError::transport(format!(
            "S3 {} failed (HTTP {}) for '{}': {}",
            op,
            status,
            key,
            body.chars().take(500).collect::<String>()
        )));
    }
    let bytes = resp
        .bytes()
        .await
        .map_err(|e| ArchiveError::transport(format!("S3 {} body for '{}': {}", op, key, e)))?;
    Ok(bytes.to_vec())
}

#[async_trait]
impl FileTransport for S3Transport {
    fn describe(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.prefix)
    }

    async fn put(&self, path: &str, payload: &[u8]) -> Result<()> {
        let key = self.key(path);
        let resp = self.send(Method::PUT, &key, &[], payload.to_vec()).await?;
        checked_body(resp, "PutObject", &key).await?;
        debug!(%key, bytes = payload.len(), "s3 object written");
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let key = self.key(path);
        let resp = self.send(Method::GET, &key, &[], Vec::new()).await?;
        checked_body(resp, "GetObject", &key).await
    }

    async fn list_dirs(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.list(path).await?.prefixes)
    }

    async fn list_files(&self, path: &str) -> Result<Vec<String>> {
        Ok(self.list(path).await?.keys)
    }
}

// ============ ListObjectsV2 parsing ============

fn parse_list_response(xml: &str) -> Result<ListPage> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut page = ListPage::default();
    let mut path: Vec<String> = Vec::new();
    let mut truncated = false;
    let mut token = None;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| ArchiveError::transport(format!("ListObjectsV2 response: {}", e)))?;
        match event {
            Event::Start(e) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).to_string());
            }
            Event::End(_) => {
                path.pop();
            }
            Event::Text(t) => {
                let text = t
                    .unescape()
                    .map_err(|e| ArchiveError::transport(format!("ListObjectsV2 response: {}", e)))?
                    .to_string();
                let tail: Vec<&str> = path.iter().rev().take(2).map(String::as_str).collect();
                match tail.as_slice() {
                    ["Prefix", "CommonPrefixes"] => page.prefixes.push(text),
                    ["Key", "Contents"] => page.keys.push(text),
                    ["IsTruncated", ..] => truncated = text == "true",
                    ["NextContinuationToken", ..] => token = Some(text),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if truncated {
        page.next_token = token;
    }
    Ok(page)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds() -> AwsCredentials {
        AwsCredentials {
            access_key_id: "AKIDEXAMPLE".into(),
            secret_access_key: "wJalrXUtnFEMI/K7MDENG+bPxRfiCYEXAMPLEKEY".into(),
            session_token: None,
        }
    }

    fn transport(root: &str, endpoint: Option<&str>) -> S3Transport {
        S3Transport {
            bucket: "archive".into(),
            region: "eu-central-1".into(),
            prefix: root.trim_matches('/').into(),
            endpoint_url: endpoint.map(str::to_string),
            creds: creds(),
            client: reqwest::Client::new(),
        }
    }

    #[test]
    fn keys_are_prefixed_with_root() {
        let t = transport("/archive/", None);
        assert_eq!(t.key("2023/05/A.xml"), "archive/2023/05/A.xml");
        assert_eq!(t.key(""), "archive");
        let bare = transport("", None);
        assert_eq!(bare.key("2023"), "2023");
    }

    #[test]
    fn endpoint_styles() {
        let aws = transport("", None);
        let (scheme, host, base) = aws.endpoint();
        assert_eq!(scheme, "https");
        assert_eq!(host, "archive.s3.eu-central-1.amazonaws.com");
        assert_eq!(base, "");

        let minio = transport("", Some("http://localhost:9000/"));
        let (scheme, host, base) = minio.endpoint();
        assert_eq!(scheme, "http");
        assert_eq!(host, "localhost:9000");
        assert_eq!(base, "/archive");
    }

    #[test]
    fn parses_common_prefixes_and_keys() {
        let xml = r#"<?xml version="1.0" encoding="UTF-8"?>
<ListBucketResult xmlns="http://s3.amazonaws.com/doc/2006-03-01/">
  <Name>archive</Name>
  <Prefix>archive/2023/</Prefix>
  <IsTruncated>true</IsTruncated>
  <NextContinuationToken>tok-1</NextContinuationToken>
  <Contents>
    <Key>archive/2023/readme.txt</Key>
    <Size>5</Size>
  </Contents>
  <CommonPrefixes><Prefix>archive/2023/05/</Prefix></CommonPrefixes>
  <CommonPrefixes><Prefix>archive/2023/06/</Prefix></CommonPrefixes>
</ListBucketResult>"#;
        let page = parse_list_response(xml).unwrap();
        assert_eq!(page.prefixes, vec!["archive/2023/05/", "archive/2023/06/"]);
        assert_eq!(page.keys, vec!["archive/2023/readme.txt"]);
        assert_eq!(page.next_token.as_deref(), Some("tok-1"));
    }

    #[test]
    fn untruncated_listing_has_no_token() {
        let xml = "<ListBucketResult><IsTruncated>false</IsTruncated>\
                   <NextContinuationToken>stale</NextContinuationToken></ListBucketResult>";
        assert_eq!(parse_list_response(xml).unwrap().next_token, None);
    }

    #[test]
    fn credentials_from_config_take_precedence() {
        let config = TransportConfig {
            kind: crate::config::TransportKind::S3,
            root: String::new(),
            bucket: Some("b".into()),
            region: "us-east-1".into(),
            endpoint_url: None,
            host: None,
            port: None,
            tls: true,
            ca_file: None,
            timeout_secs: 30,
            user: Some("id".into()),
            password: Some("secret".into()),
        };
        let t = S3Transport::from_config(&config).unwrap();
        assert_eq!(t.creds.access_key_id, "id");
        assert_eq!(t.describe(), "s3://b/");
    }
}
