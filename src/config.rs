//! Configuration types for repo-backup

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Environment key holding the GitHub token
pub const GITHUB_TOKEN_KEY: &str = "CLI_GITHUB_TOKEN";
/// Environment key overriding the GitHub API base URL
pub const GITHUB_API_URL_KEY: &str = "GITHUB_API_URL";
/// Environment key for the export status poll interval (seconds)
pub const STATUS_INTERVAL_KEY: &str = "BACKUP_STATUS_POLL_INTERVAL_SECS";
/// Environment key bounding the export status polling (seconds)
pub const STATUS_TIMEOUT_KEY: &str = "BACKUP_STATUS_TIMEOUT_SECS";
/// Environment key bounding archive URL resolution (seconds)
pub const ARCHIVE_URL_TIMEOUT_KEY: &str = "BACKUP_ARCHIVE_URL_TIMEOUT_SECS";
/// Environment key for the archive URL poll interval (seconds)
pub const ARCHIVE_URL_INTERVAL_KEY: &str = "BACKUP_ARCHIVE_URL_INTERVAL_SECS";
/// Environment key for the number of status-check retries
pub const STATUS_RETRY_ATTEMPTS_KEY: &str = "BACKUP_STATUS_RETRY_ATTEMPTS";
/// Environment key selecting the remote storage backend
pub const STORAGE_BACKEND_KEY: &str = "STORAGE_BACKEND";
/// Environment key for the Azure storage account URL
pub const AZURE_ACCOUNT_URL_KEY: &str = "AZURE_STORAGE_ACCOUNT_URL";
/// Environment key for the Azure container name
pub const AZURE_CONTAINER_KEY: &str = "AZURE_STORAGE_CONTAINER_NAME";
/// Environment key for the Azure storage account name (Shared Key auth)
pub const AZURE_ACCOUNT_NAME_KEY: &str = "AZURE_STORAGE_ACCOUNT_NAME";
/// Environment key for the Azure storage account key (Shared Key auth)
pub const AZURE_API_KEY_KEY: &str = "AZURE_STORAGE_API_KEY";
/// Environment key for the Azure SAS token
pub const AZURE_SAS_TOKEN_KEY: &str = "AZURE_STORAGE_SAS_TOKEN";
/// Environment key for the object store endpoint (`host[:port]`)
pub const OBJECT_ENDPOINT_KEY: &str = "OBJECT_STORAGE_ENDPOINT";
/// Environment key for the object store access key
pub const OBJECT_ACCESS_KEY_KEY: &str = "OBJECT_STORAGE_ACCESS_KEY";
/// Environment key for the object store secret key
pub const OBJECT_SECRET_KEY_KEY: &str = "OBJECT_STORAGE_SECRET_KEY";
/// Environment key for the object store bucket
pub const OBJECT_BUCKET_KEY: &str = "OBJECT_STORAGE_BUCKET_NAME";
/// Environment key enabling HTTPS to the object store
pub const OBJECT_USE_SSL_KEY: &str = "OBJECT_STORAGE_USE_SSL";

/// Main configuration for a backup run
///
/// Fields are organized into logical sub-configs:
/// - [`github`](GitHubConfig): provider endpoint and credentials
/// - [`polling`](PollingConfig): tick intervals, deadlines and retry policy
/// - [`storage`](StorageConfig): remote destination settings
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// GitHub API access
    pub github: GitHubConfig,

    /// Polling cadence and bounds
    #[serde(default)]
    pub polling: PollingConfig,

    /// Remote storage destination
    #[serde(default)]
    pub storage: StorageConfig,
}

/// GitHub API configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// API base URL (default: "https://api.github.com")
    #[serde(default = "default_api_url")]
    pub api_url: String,

    /// Personal access token with the `admin:org` scope
    #[serde(default)]
    pub token: String,

    /// User-Agent sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Per-request timeout for API calls (default: 30 seconds)
    #[serde(default = "default_request_timeout", with = "duration_serde")]
    pub request_timeout: Duration,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            token: String::new(),
            user_agent: default_user_agent(),
            request_timeout: default_request_timeout(),
        }
    }
}

/// Polling configuration for the export workflow
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollingConfig {
    /// Interval between export status checks (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub status_interval: Duration,

    /// Upper bound on export status polling (default: None = unbounded)
    #[serde(default, with = "optional_duration_serde")]
    pub status_timeout: Option<Duration>,

    /// Upper bound on archive URL resolution (default: 30 seconds)
    #[serde(default = "default_archive_url_timeout", with = "duration_serde")]
    pub archive_url_timeout: Duration,

    /// Interval between archive URL attempts (default: 5 seconds)
    #[serde(default = "default_poll_interval", with = "duration_serde")]
    pub archive_url_interval: Duration,

    /// Retry policy for a failing status check (default: no retries)
    ///
    /// A status check that errors aborts the run unless retries are enabled here.
    #[serde(default = "RetryConfig::none")]
    pub status_retry: RetryConfig,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            status_interval: default_poll_interval(),
            status_timeout: None,
            archive_url_timeout: default_archive_url_timeout(),
            archive_url_interval: default_poll_interval(),
            status_retry: RetryConfig::none(),
        }
    }
}

/// Retry configuration for transient failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of retry attempts (default: 3)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial delay before first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 30 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl RetryConfig {
    /// Policy that never retries
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Remote storage backend selection
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    /// Azure Blob Storage (default)
    #[default]
    Azure,

    /// S3-compatible object storage such as MinIO
    Object,
}

impl std::str::FromStr for StorageBackendKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "azure" => Ok(StorageBackendKind::Azure),
            "object" => Ok(StorageBackendKind::Object),
            other => Err(Error::config(
                format!("unsupported storage backend: {other} (supported: azure, object)"),
                STORAGE_BACKEND_KEY,
            )),
        }
    }
}

/// Remote storage configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which backend receives remote backups
    #[serde(default)]
    pub backend: StorageBackendKind,

    /// Azure Blob Storage settings (required when `backend` is `azure`)
    #[serde(default)]
    pub azure: Option<AzureStorageConfig>,

    /// S3-compatible settings (required when `backend` is `object`)
    #[serde(default)]
    pub object: Option<ObjectStorageConfig>,
}

/// Azure Blob Storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AzureStorageConfig {
    /// Account endpoint (e.g., "https://myaccount.blob.core.windows.net")
    pub account_url: String,

    /// Container receiving the archives
    pub container: String,

    /// How requests are authorized
    pub credential: AzureCredential,

    /// Size of each uploaded block in bytes (default: 8 MiB)
    #[serde(default = "default_block_size")]
    pub block_size: usize,
}

/// Credential for Azure Blob Storage requests
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AzureCredential {
    /// Account name and base64 account key; every request is signed
    SharedKey {
        /// Storage account name
        account_name: String,
        /// Base64-encoded account key
        account_key: String,
    },

    /// Shared access signature appended to every request URL
    Sas {
        /// Query string, with or without the leading `?`
        token: String,
    },
}

/// S3-compatible object storage configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectStorageConfig {
    /// Host and optional port, without scheme (e.g., "minio.internal:9000")
    pub endpoint: String,

    /// Access key ID
    pub access_key: String,

    /// Secret access key
    pub secret_key: String,

    /// Bucket receiving the archives
    pub bucket: String,

    /// Talk HTTPS to the endpoint (default: false)
    #[serde(default)]
    pub use_ssl: bool,

    /// Signing region; most S3-compatible stores accept the default
    #[serde(default = "default_region")]
    pub region: String,

    /// Size of each multipart part in bytes (default: 8 MiB)
    #[serde(default = "default_block_size")]
    pub part_size: usize,
}

impl ObjectStorageConfig {
    /// Endpoint URL with the scheme implied by `use_ssl`
    pub fn endpoint_url(&self) -> String {
        let scheme = if self.use_ssl { "https" } else { "http" };
        format!("{scheme}://{}", self.endpoint.trim_end_matches('/'))
    }
}

impl Config {
    /// Build a configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup
    ///
    /// Empty values are treated as unset. `CLI_GITHUB_TOKEN` is required; the
    /// Azure and object storage groups are each all-or-nothing.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let token = get(GITHUB_TOKEN_KEY).ok_or_else(|| {
            Error::config(
                "github token is not set in the configuration",
                GITHUB_TOKEN_KEY,
            )
        })?;

        let github = GitHubConfig {
            api_url: get(GITHUB_API_URL_KEY).unwrap_or_else(default_api_url),
            token,
            ..GitHubConfig::default()
        };

        let mut polling = PollingConfig::default();
        if let Some(interval) = parse_secs(&get, STATUS_INTERVAL_KEY)? {
            polling.status_interval = interval;
        }
        polling.status_timeout = parse_secs(&get, STATUS_TIMEOUT_KEY)?;
        if let Some(timeout) = parse_secs(&get, ARCHIVE_URL_TIMEOUT_KEY)? {
            polling.archive_url_timeout = timeout;
        }
        if let Some(interval) = parse_secs(&get, ARCHIVE_URL_INTERVAL_KEY)? {
            polling.archive_url_interval = interval;
        }
        if let Some(value) = get(STATUS_RETRY_ATTEMPTS_KEY) {
            polling.status_retry = RetryConfig {
                max_attempts: parse_number(&value, STATUS_RETRY_ATTEMPTS_KEY)?,
                ..RetryConfig::default()
            };
        }

        let backend = match get(STORAGE_BACKEND_KEY) {
            Some(value) => value.parse()?,
            None => StorageBackendKind::default(),
        };

        let azure = azure_from_lookup(&get)?;
        let object = object_from_lookup(&get)?;

        let config = Config {
            github,
            polling,
            storage: StorageConfig {
                backend,
                azure,
                object,
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Check invariants that serde defaults cannot express
    pub fn validate(&self) -> Result<()> {
        if self.github.token.trim().is_empty() {
            return Err(Error::config("github token is empty", GITHUB_TOKEN_KEY));
        }
        if self.polling.status_interval.is_zero() {
            return Err(Error::config(
                "status poll interval must be greater than zero",
                STATUS_INTERVAL_KEY,
            ));
        }
        if self.polling.archive_url_interval.is_zero() {
            return Err(Error::config(
                "archive URL poll interval must be greater than zero",
                ARCHIVE_URL_INTERVAL_KEY,
            ));
        }
        if let Some(azure) = &self.storage.azure
            && azure.block_size == 0
        {
            return Err(Error::Config {
                message: "azure block size must be greater than zero".to_string(),
                key: None,
            });
        }
        if let Some(object) = &self.storage.object
            && object.part_size == 0
        {
            return Err(Error::Config {
                message: "object storage part size must be greater than zero".to_string(),
                key: None,
            });
        }
        Ok(())
    }

    /// Azure settings, required for remote backups
    pub fn azure(&self) -> Result<&AzureStorageConfig> {
        self.storage.azure.as_ref().ok_or_else(|| {
            Error::config(
                "azure storage is not configured; remote backups need it",
                AZURE_ACCOUNT_URL_KEY,
            )
        })
    }

    /// Object storage settings, required when the backend is `object`
    pub fn object_storage(&self) -> Result<&ObjectStorageConfig> {
        self.storage.object.as_ref().ok_or_else(|| {
            Error::config(
                "object storage is not configured; remote backups need it",
                OBJECT_ENDPOINT_KEY,
            )
        })
    }
}

fn azure_from_lookup<G>(get: &G) -> Result<Option<AzureStorageConfig>>
where
    G: Fn(&str) -> Option<String>,
{
    let account_url = get(AZURE_ACCOUNT_URL_KEY);
    let container = get(AZURE_CONTAINER_KEY);
    let account_name = get(AZURE_ACCOUNT_NAME_KEY);
    let api_key = get(AZURE_API_KEY_KEY);
    let sas = get(AZURE_SAS_TOKEN_KEY);

    if account_url.is_none()
        && container.is_none()
        && account_name.is_none()
        && api_key.is_none()
        && sas.is_none()
    {
        return Ok(None);
    }

    let incomplete = || Error::Config {
        message: format!(
            "azure storage configuration is incomplete ({AZURE_CONTAINER_KEY} and either \
             {AZURE_ACCOUNT_NAME_KEY} with {AZURE_API_KEY_KEY} or \
             {AZURE_ACCOUNT_URL_KEY} with {AZURE_SAS_TOKEN_KEY} are required)"
        ),
        key: None,
    };

    let credential = match (api_key, sas) {
        (Some(_), Some(_)) => {
            return Err(Error::config(
                format!("set either {AZURE_API_KEY_KEY} or {AZURE_SAS_TOKEN_KEY}, not both"),
                AZURE_SAS_TOKEN_KEY,
            ));
        }
        (Some(account_key), None) => AzureCredential::SharedKey {
            account_name: account_name.clone().ok_or_else(incomplete)?,
            account_key,
        },
        (None, Some(token)) => AzureCredential::Sas { token },
        (None, None) => return Err(incomplete()),
    };

    let account_url = account_url
        .or_else(|| account_name.map(|name| format!("https://{name}.blob.core.windows.net")))
        .ok_or_else(incomplete)?;

    Ok(Some(AzureStorageConfig {
        account_url,
        container: container.ok_or_else(incomplete)?,
        credential,
        block_size: default_block_size(),
    }))
}

fn object_from_lookup<G>(get: &G) -> Result<Option<ObjectStorageConfig>>
where
    G: Fn(&str) -> Option<String>,
{
    let use_ssl = match get(OBJECT_USE_SSL_KEY) {
        Some(value) => parse_bool(&value, OBJECT_USE_SSL_KEY)?,
        None => false,
    };

    match (
        get(OBJECT_ENDPOINT_KEY),
        get(OBJECT_ACCESS_KEY_KEY),
        get(OBJECT_SECRET_KEY_KEY),
        get(OBJECT_BUCKET_KEY),
    ) {
        (Some(endpoint), Some(access_key), Some(secret_key), Some(bucket)) => {
            Ok(Some(ObjectStorageConfig {
                endpoint,
                access_key,
                secret_key,
                bucket,
                use_ssl,
                region: default_region(),
                part_size: default_block_size(),
            }))
        }
        (None, None, None, None) => Ok(None),
        _ => Err(Error::Config {
            message: format!(
                "object storage configuration is incomplete ({OBJECT_ENDPOINT_KEY}, \
                 {OBJECT_ACCESS_KEY_KEY}, {OBJECT_SECRET_KEY_KEY} and {OBJECT_BUCKET_KEY} \
                 are all required)"
            ),
            key: None,
        }),
    }
}

fn parse_bool(value: &str, key: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::config(format!("invalid boolean {value:?}"), key)),
    }
}

fn parse_secs<G>(get: &G, key: &str) -> Result<Option<Duration>>
where
    G: Fn(&str) -> Option<String>,
{
    get(key)
        .map(|value| parse_number::<u64>(&value, key).map(Duration::from_secs))
        .transpose()
}

fn parse_number<T: std::str::FromStr>(value: &str, key: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::config(format!("invalid number {value:?}"), key))
}

fn default_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_user_agent() -> String {
    format!("repo-backup/{}", env!("CARGO_PKG_VERSION"))
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_archive_url_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(30)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

fn default_block_size() -> usize {
    8 * 1024 * 1024
}

fn default_region() -> String {
    "us-east-1".to_string()
}

// Duration serialization helper (seconds)
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Optional Duration serialization helper
mod optional_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&d.as_secs()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<u64>::deserialize(deserializer)?;
        Ok(secs.map(Duration::from_secs))
    }
}
