//! Azure Blob Storage backend
//!
//! Uploads are streamed as a block blob: the archive is cut into fixed size
//! blocks, each sent with `Put Block`, then committed with `Put Block List`.
//! At most one block is held in memory at a time.
//!
//! Requests are authorized either with the account key (Shared Key signing)
//! or with a SAS token carried in the query string.

use super::{StorageBackend, read_chunk};
use crate::config::{
    AZURE_ACCOUNT_URL_KEY, AZURE_API_KEY_KEY, AzureCredential, AzureStorageConfig,
};
use crate::error::{Error, Result, SinkError};
use crate::sink::ArchiveReader;
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use hmac::{Hmac, Mac};
use reqwest::header::{self, HeaderValue};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use url::Url;

const BACKEND: &str = "azure";
const API_VERSION_HEADER: &str = "x-ms-version";
const API_VERSION: &str = "2021-08-06";
const DATE_HEADER: &str = "x-ms-date";
const CONTENT_TYPE: &str = "application/gzip";

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
enum Auth {
    SharedKey { account: String, mac: HmacSha256 },
    Sas(String),
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::SharedKey { account, .. } => f
                .debug_struct("SharedKey")
                .field("account", account)
                .finish_non_exhaustive(),
            Auth::Sas(_) => f.write_str("Sas(..)"),
        }
    }
}

/// Azure Blob Storage client
#[derive(Debug, Clone)]
pub struct AzureBlobBackend {
    http: reqwest::Client,
    account_url: Url,
    container: String,
    auth: Auth,
    block_size: usize,
}

impl AzureBlobBackend {
    /// Create a backend for the configured account and container
    pub fn new(config: &AzureStorageConfig) -> Result<Self> {
        let account_url = Url::parse(&config.account_url).map_err(|e| {
            Error::config(
                format!("invalid storage account URL '{}': {}", config.account_url, e),
                AZURE_ACCOUNT_URL_KEY,
            )
        })?;

        let auth = match &config.credential {
            AzureCredential::SharedKey {
                account_name,
                account_key,
            } => {
                let invalid_key = |reason: String| {
                    Error::config(
                        format!("invalid storage account key: {reason}"),
                        AZURE_API_KEY_KEY,
                    )
                };
                let key = BASE64
                    .decode(account_key.trim())
                    .map_err(|e| invalid_key(e.to_string()))?;
                let mac = HmacSha256::new_from_slice(&key).map_err(|e| invalid_key(e.to_string()))?;
                Auth::SharedKey {
                    account: account_name.clone(),
                    mac,
                }
            }
            AzureCredential::Sas { token } => Auth::Sas(token.trim_start_matches('?').to_string()),
        };

        let http = reqwest::Client::builder()
            .user_agent(concat!("rbk/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to build HTTP client: {}", e),
                key: None,
            })?;

        Ok(Self {
            http,
            account_url,
            container: config.container.clone(),
            auth,
            block_size: config.block_size.max(1),
        })
    }

    /// Public location of a blob, without credentials
    fn blob_url(&self, name: &str) -> std::result::Result<Url, SinkError> {
        let mut url = self.account_url.clone();
        url.set_query(None);
        url.path_segments_mut()
            .map_err(|_| SinkError::InvalidLocation(self.account_url.to_string()))?
            .pop_if_empty()
            .push(&self.container)
            .push(name);
        Ok(url)
    }

    /// Blob URL with the operation parameters (and the SAS token, if any)
    fn request_url(&self, blob: &Url, params: &[(&str, &str)]) -> Url {
        let mut url = blob.clone();
        if let Auth::Sas(token) = &self.auth {
            url.set_query(Some(token));
        }
        {
            let mut query = url.query_pairs_mut();
            for (key, value) in params {
                query.append_pair(key, value);
            }
        }
        url
    }

    /// Add the date and Shared Key authorization headers
    fn authorize(&self, request: &mut reqwest::Request) -> std::result::Result<(), SinkError> {
        let Auth::SharedKey { account, mac } = &self.auth else {
            return Ok(());
        };

        let date = chrono::Utc::now()
            .format("%a, %d %b %Y %H:%M:%S GMT")
            .to_string();
        request
            .headers_mut()
            .insert(DATE_HEADER, header_value(&date)?);

        let signature = sign(mac, &string_to_sign(account, request));
        let authorization = header_value(&format!("SharedKey {account}:{signature}"))?;
        request
            .headers_mut()
            .insert(header::AUTHORIZATION, authorization);
        Ok(())
    }

    async fn send(
        &self,
        name: &str,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<(), SinkError> {
        let request_error = |source: reqwest::Error| SinkError::UploadRequest {
            backend: BACKEND,
            blob: name.to_string(),
            source: source.without_url(),
        };

        let mut request = request
            .header(API_VERSION_HEADER, API_VERSION)
            .build()
            .map_err(request_error)?;
        self.authorize(&mut request)?;

        let response = self.http.execute(request).await.map_err(request_error)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let message = match response.text().await {
            Ok(body) if !body.is_empty() => body,
            _ => status.canonical_reason().unwrap_or("unknown").to_string(),
        };
        Err(SinkError::UploadRejected {
            backend: BACKEND,
            blob: name.to_string(),
            status: status.as_u16(),
            message,
        })
    }
}

fn header_value(value: &str) -> std::result::Result<HeaderValue, SinkError> {
    HeaderValue::from_str(value)
        .map_err(|_| SinkError::InvalidLocation(format!("invalid header value {value:?}")))
}

/// Shared Key string-to-sign for the Blob service
fn string_to_sign(account: &str, request: &reqwest::Request) -> String {
    let headers = request.headers();
    let standard = |name: header::HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string()
    };
    // Zero length is signed as an empty string
    let content_length = match request.body().and_then(|b| b.as_bytes()).map(<[u8]>::len) {
        Some(len) if len > 0 => len.to_string(),
        _ => String::new(),
    };

    let mut lines = vec![
        request.method().as_str().to_string(),
        standard(header::CONTENT_ENCODING),
        standard(header::CONTENT_LANGUAGE),
        content_length,
        standard(header::HeaderName::from_static("content-md5")),
        standard(header::CONTENT_TYPE),
        // Date is carried by x-ms-date
        String::new(),
        standard(header::IF_MODIFIED_SINCE),
        standard(header::IF_MATCH),
        standard(header::IF_NONE_MATCH),
        standard(header::IF_UNMODIFIED_SINCE),
        standard(header::RANGE),
    ];

    let mut ms_headers: Vec<(&str, &str)> = headers
        .iter()
        .filter(|(name, _)| name.as_str().starts_with("x-ms-"))
        .map(|(name, value)| (name.as_str(), value.to_str().unwrap_or("").trim()))
        .collect();
    ms_headers.sort_unstable();
    lines.extend(ms_headers.iter().map(|(name, value)| format!("{name}:{value}")));

    let url = request.url();
    let mut resource = format!("/{}{}", account, url.path());
    let mut params: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for (key, value) in url.query_pairs() {
        params
            .entry(key.to_lowercase())
            .or_default()
            .push(value.into_owned());
    }
    for (key, mut values) in params {
        values.sort();
        resource.push_str(&format!("\n{}:{}", key, values.join(",")));
    }
    lines.push(resource);

    lines.join("\n")
}

fn sign(mac: &HmacSha256, string_to_sign: &str) -> String {
    let mut mac = mac.clone();
    mac.update(string_to_sign.as_bytes());
    BASE64.encode(mac.finalize().into_bytes())
}

/// Block IDs must be valid base64 of equal length; 32 decimal digits are both
fn block_id(index: usize) -> String {
    format!("{:032}", index)
}

fn block_list_xml(ids: &[String]) -> String {
    let mut xml = String::from(r#"<?xml version="1.0" encoding="utf-8"?><BlockList>"#);
    for id in ids {
        xml.push_str("<Latest>");
        xml.push_str(id);
        xml.push_str("</Latest>");
    }
    xml.push_str("</BlockList>");
    xml
}

#[async_trait]
impl StorageBackend for AzureBlobBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn upload(
        &self,
        name: &str,
        archive: &mut ArchiveReader<'_>,
    ) -> std::result::Result<String, SinkError> {
        let blob = self.blob_url(name)?;
        let mut ids = Vec::new();
        let mut total: u64 = 0;

        loop {
            let block = read_chunk(archive, self.block_size).await?;

            if block.is_empty() {
                break;
            }

            let id = block_id(ids.len());
            let len = block.len();
            let url = self.request_url(&blob, &[("comp", "block"), ("blockid", &id)]);
            self.send(name, self.http.put(url).body(block)).await?;

            tracing::debug!(blob = name, block = ids.len(), bytes = len, "Uploaded block");
            ids.push(id);
            total += len as u64;

            if len < self.block_size {
                break;
            }
        }

        let url = self.request_url(&blob, &[("comp", "blocklist")]);
        let request = self
            .http
            .put(url)
            .header("x-ms-blob-content-type", CONTENT_TYPE)
            .header(reqwest::header::CONTENT_TYPE, "application/xml")
            .body(block_list_xml(&ids));
        self.send(name, request).await?;

        tracing::info!(blob = name, blocks = ids.len(), bytes = total, "Committed block blob");
        Ok(blob.to_string())
    }
}
