//! Code-hosting provider abstraction
//!
//! The backup workflow only ever talks to the provider through [`ProviderClient`],
//! so tests can substitute an in-memory double and the HTTP client stays an
//! implementation detail.

use crate::error::ProviderError;
use crate::types::{ExportJob, ExportJobId, ExportOptions, RepoPage, Visibility};
use async_trait::async_trait;

mod github;

pub use github::GitHubClient;

/// Capability interface for the provider's migration export API
///
/// Every method is a single network request. Implementations do not retry;
/// retry and polling policy belong to the caller.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Fetch one page of an organization's repositories with the given visibility
    ///
    /// Pages are 1-based. A response without a next-page indicator is the final page.
    async fn list_org_repos(
        &self,
        organization: &str,
        visibility: Visibility,
        page: u32,
        per_page: u32,
    ) -> Result<RepoPage, ProviderError>;

    /// Start an export job covering the named repositories
    async fn start_export(
        &self,
        organization: &str,
        repositories: &[String],
        options: &ExportOptions,
    ) -> Result<ExportJob, ProviderError>;

    /// Fetch the current state of an export job
    async fn export_status(
        &self,
        organization: &str,
        job_id: ExportJobId,
    ) -> Result<ExportJob, ProviderError>;

    /// Fetch the download URL of a finished export
    ///
    /// Returns an error while the archive is not materialized yet.
    async fn archive_url(
        &self,
        organization: &str,
        job_id: ExportJobId,
    ) -> Result<String, ProviderError>;
}
