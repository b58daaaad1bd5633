//! Error types for repo-backup
//!
//! This module provides the error taxonomy of the backup workflow:
//! - One top-level [`Error`] whose variants name the stage that failed
//! - Nested errors for the provider API, the archive download and the sinks
//! - Context information (organization, export job ID, endpoint, path)
//! - Machine-readable error codes for logs and the CLI

use crate::types::ExportJobId;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for repo-backup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for repo-backup
///
/// Each variant corresponds to one stage of the backup workflow, so callers can
/// tell a cancelled run apart from a timed out one and from an export that the
/// provider reported as failed.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "CLI_GITHUB_TOKEN")
        key: Option<String>,
    },

    /// Repository enumeration failed; no partial list is used
    #[error("failed to list private repositories of {organization}: {source}")]
    ListRepos {
        /// Organization being listed
        organization: String,
        /// Underlying provider failure
        #[source]
        source: ProviderError,
    },

    /// The organization has no private, non-archived repository to export
    #[error("organization {organization} has no private, non-archived repositories")]
    NoRepositories {
        /// Organization that was listed
        organization: String,
    },

    /// The export job could not be created
    #[error("failed to start export for {organization}: {source}")]
    StartExport {
        /// Organization being exported
        organization: String,
        /// Underlying provider failure
        #[source]
        source: ProviderError,
    },

    /// The provider reported the export job as failed
    #[error("export {job_id} of {organization} failed on the provider side")]
    MigrationFailed {
        /// Organization being exported
        organization: String,
        /// The failed export job
        job_id: ExportJobId,
    },

    /// A status check call itself failed (transport or provider fault)
    #[error("failed to get status of export {job_id} of {organization}: {source}")]
    StatusPoll {
        /// Organization being exported
        organization: String,
        /// The export job being polled
        job_id: ExportJobId,
        /// Underlying provider failure
        #[source]
        source: ProviderError,
    },

    /// The archive URL could not be resolved (timeout, cancellation or provider error)
    #[error("failed to resolve archive URL of export {job_id} of {organization}: {source}")]
    ResolveUrl {
        /// Organization being exported
        organization: String,
        /// The export job whose archive was requested
        job_id: ExportJobId,
        /// Why resolution stopped
        #[source]
        source: Box<Error>,
    },

    /// A bounded wait expired
    #[error("{operation} timed out after {timeout:?}")]
    Timeout {
        /// What was being waited for
        operation: &'static str,
        /// The configured bound
        timeout: Duration,
        /// Last error observed before the deadline, if any
        last_error: Option<String>,
    },

    /// Downloading the archive failed
    #[error("archive download for {organization} failed: {source}")]
    Download {
        /// Organization being exported
        organization: String,
        /// What went wrong
        #[source]
        source: DownloadError,
    },

    /// The sink could not persist the archive
    #[error("{sink} sink failed: {source}")]
    Sink {
        /// Name of the sink that failed (e.g., "local", "remote")
        sink: &'static str,
        /// Underlying sink failure
        #[source]
        source: SinkError,
    },

    /// Cancellation was observed while waiting
    #[error("backup cancelled")]
    Cancelled,
}

impl Error {
    /// Create a configuration error for the given key
    pub fn config(message: impl Into<String>, key: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.into()),
        }
    }

    /// Whether this error (or the error it wraps) is a cancellation
    pub fn is_cancelled(&self) -> bool {
        match self {
            Error::Cancelled => true,
            Error::ResolveUrl { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Whether this error (or the error it wraps) is an expired deadline
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout { .. } => true,
            Error::ResolveUrl { source, .. } => source.is_timeout(),
            _ => false,
        }
    }

    /// Machine-readable error code
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Config { .. } => "config_error",
            Error::ListRepos { .. } => "list_repos_failed",
            Error::NoRepositories { .. } => "no_repositories",
            Error::StartExport { .. } => "start_export_failed",
            Error::MigrationFailed { .. } => "migration_failed",
            Error::StatusPoll { .. } => "status_poll_failed",
            Error::ResolveUrl { .. } => "resolve_url_failed",
            Error::Timeout { .. } => "timeout",
            Error::Download { source, .. } => match source {
                DownloadError::Status { .. } => "download_status",
                DownloadError::Request(_) => "download_failed",
            },
            Error::Sink { .. } => "sink_failed",
            Error::Cancelled => "cancelled",
        }
    }
}

/// Errors returned by a [`ProviderClient`](crate::provider::ProviderClient)
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The provider answered with an unexpected HTTP status
    #[error("{endpoint} returned HTTP {status}: {message}")]
    Status {
        /// Request description (e.g., "GET /orgs/acme/repos")
        endpoint: String,
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// The request never produced a response
    #[error("{endpoint} request failed: {source}")]
    Request {
        /// Request description
        endpoint: String,
        /// Transport error
        #[source]
        source: reqwest::Error,
    },

    /// The response could not be interpreted
    #[error("invalid response from {endpoint}: {reason}")]
    InvalidResponse {
        /// Request description
        endpoint: String,
        /// What was wrong with it
        reason: String,
    },

    /// Failure reported by a non-HTTP provider implementation
    #[error("{0}")]
    Other(String),
}

/// Archive download errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// The archive URL answered with a non-2xx status
    #[error("archive request to {url} returned HTTP {status}")]
    Status {
        /// Archive URL without its query string
        url: String,
        /// HTTP status code
        status: u16,
    },

    /// Transport failure while requesting the archive
    #[error("archive request failed: {0}")]
    Request(#[source] reqwest::Error),
}

/// Errors returned by an [`ArchiveSink`](crate::sink::ArchiveSink) or a storage backend
#[derive(Debug, Error)]
pub enum SinkError {
    /// Creating or writing the destination file failed
    #[error("failed to write {path}: {source}")]
    Write {
        /// Destination path
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Reading the archive stream failed
    #[error("failed to read archive stream: {0}")]
    Read(#[source] std::io::Error),

    /// The storage service rejected an upload request
    #[error("{backend} rejected upload of {blob} with HTTP {status}: {message}")]
    UploadRejected {
        /// Storage backend name
        backend: &'static str,
        /// Blob being uploaded
        blob: String,
        /// HTTP status code
        status: u16,
        /// Response body or reason phrase
        message: String,
    },

    /// An upload request never produced a response
    #[error("{backend} upload of {blob} failed: {source}")]
    UploadRequest {
        /// Storage backend name
        backend: &'static str,
        /// Blob being uploaded
        blob: String,
        /// Transport error
        #[source]
        source: reqwest::Error,
    },

    /// A storage client failed before the service answered
    #[error("{backend} upload of {blob} failed during {operation}: {message}")]
    UploadFailed {
        /// Storage backend name
        backend: &'static str,
        /// Blob being uploaded
        blob: String,
        /// Service operation that failed
        operation: &'static str,
        /// Client error with its causes
        message: String,
    },

    /// The destination location could not be built
    #[error("invalid storage location: {0}")]
    InvalidLocation(String),
}
