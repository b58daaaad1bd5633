//! Core types for repo-backup

use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier of an export job, scoped to an organization
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExportJobId(pub u64);

impl ExportJobId {
    /// Create a new ExportJobId
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Get the inner u64 value
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl From<u64> for ExportJobId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ExportJobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Repository visibility as reported by the provider
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to everyone
    Public,
    /// Visible to organization members with access
    #[default]
    Private,
    /// Visible to enterprise members
    Internal,
}

impl Visibility {
    /// Value used in the provider's listing filter
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Private => "private",
            Visibility::Internal => "internal",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a repository fetched from the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    /// Repository name, unique within the organization
    pub name: String,
    /// Whether the repository is archived (read-only)
    #[serde(default)]
    pub archived: bool,
    /// Repository visibility
    #[serde(default)]
    pub visibility: Visibility,
}

impl Repository {
    /// Private, non-archived repository with the given name
    pub fn private(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            archived: false,
            visibility: Visibility::Private,
        }
    }

    /// Mark this repository as archived
    pub fn archived(mut self) -> Self {
        self.archived = true;
        self
    }
}

/// One page of a repository listing
#[derive(Clone, Debug, Default)]
pub struct RepoPage {
    /// Repositories on this page, in provider order
    pub repositories: Vec<Repository>,
    /// Next page number, `None` on the final page
    pub next_page: Option<u32>,
}

/// State of an export job
///
/// The provider may report in-progress states this crate does not know about;
/// those are kept verbatim in [`ExportState::Other`] and treated as pending.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ExportState {
    /// Queued, not started yet
    Pending,
    /// Archive is being built
    Exporting,
    /// Archive is ready for download
    Exported,
    /// The provider gave up on the export
    Failed,
    /// Any other state reported by the provider
    Other(String),
}

impl ExportState {
    /// Whether the archive is ready for download
    pub fn is_ready(&self) -> bool {
        matches!(self, ExportState::Exported)
    }

    /// Whether the provider reported the export as failed
    pub fn is_failed(&self) -> bool {
        matches!(self, ExportState::Failed)
    }

    /// Provider wire value
    pub fn as_str(&self) -> &str {
        match self {
            ExportState::Pending => "pending",
            ExportState::Exporting => "exporting",
            ExportState::Exported => "exported",
            ExportState::Failed => "failed",
            ExportState::Other(state) => state,
        }
    }
}

impl From<String> for ExportState {
    fn from(state: String) -> Self {
        match state.as_str() {
            "pending" => ExportState::Pending,
            "exporting" => ExportState::Exporting,
            "exported" => ExportState::Exported,
            "failed" => ExportState::Failed,
            _ => ExportState::Other(state),
        }
    }
}

impl From<ExportState> for String {
    fn from(state: ExportState) -> Self {
        state.as_str().to_string()
    }
}

impl fmt::Display for ExportState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An export job as seen by the provider
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportJob {
    /// Job identifier
    pub id: ExportJobId,
    /// Current state
    pub state: ExportState,
}

/// What the export should leave out of the archive
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportOptions {
    /// Skip issue/PR attachments
    pub exclude_attachments: bool,
    /// Skip release assets
    pub exclude_releases: bool,
}

impl ExportOptions {
    /// Smallest archive: attachments and releases excluded
    pub fn minimal() -> Self {
        Self {
            exclude_attachments: true,
            exclude_releases: true,
        }
    }
}

/// Stage of a backup run, in execution order
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Enumerating private repositories
    ListingRepos,
    /// Submitting the export job
    StartingExport,
    /// Waiting for the export job to finish
    PollingStatus,
    /// Waiting for the archive URL
    ResolvingUrl,
    /// Opening the archive download
    Downloading,
    /// Handing the archive stream to the sink
    Saving,
    /// Finished successfully
    Done,
    /// Finished with an error
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::ListingRepos => "listing_repos",
            Stage::StartingExport => "starting_export",
            Stage::PollingStatus => "polling_status",
            Stage::ResolvingUrl => "resolving_url",
            Stage::Downloading => "downloading",
            Stage::Saving => "saving",
            Stage::Done => "done",
            Stage::Failed => "failed",
        };
        f.write_str(name)
    }
}
