//! The backup workflow
//!
//! [`BackupOrchestrator::run`] drives one export from start to finish:
//!
//! ```text
//! ListingRepos -> StartingExport -> PollingStatus -> ResolvingUrl -> Downloading -> Saving -> Done
//! ```
//!
//! Every stage runs once and strictly in order. Only `PollingStatus` and
//! `ResolvingUrl` loop, each on its own ticker. Any error moves the run to
//! `Failed` and is returned to the caller unchanged.

use crate::config::{Config, PollingConfig, RetryConfig};
use crate::error::{Error, Result};
use crate::poll::{Interrupt, Ticker, cancellable};
use crate::provider::{GitHubClient, ProviderClient};
use crate::retry::with_retry;
use crate::sink::ArchiveSink;
use crate::types::{ExportJob, ExportJobId, ExportOptions, Stage};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

mod archive_url;
mod download;
mod lister;

#[cfg(test)]
pub(crate) mod test_helpers;
#[cfg(test)]
mod tests;

pub use archive_url::{ArchiveUrlResolver, DEFAULT_INTERVAL, DEFAULT_TIMEOUT};
pub use download::open_archive;
pub use lister::{PAGE_SIZE, RepositoryLister};

/// Runs the export workflow for one organization at a time
///
/// Holds no per-run state, so one orchestrator can serve several runs.
pub struct BackupOrchestrator {
    provider: Arc<dyn ProviderClient>,
    lister: RepositoryLister,
    resolver: ArchiveUrlResolver,
    http: reqwest::Client,
    status_interval: Duration,
    status_timeout: Option<Duration>,
    status_retry: RetryConfig,
}

impl BackupOrchestrator {
    /// Create an orchestrator using the given provider and polling settings
    pub fn new(provider: Arc<dyn ProviderClient>, polling: &PollingConfig) -> Self {
        let resolver = ArchiveUrlResolver::new(provider.clone())
            .with_timeout(polling.archive_url_timeout)
            .with_interval(polling.archive_url_interval);

        Self {
            lister: RepositoryLister::new(provider.clone()),
            provider,
            resolver,
            http: reqwest::Client::new(),
            status_interval: polling.status_interval,
            status_timeout: polling.status_timeout,
            status_retry: polling.status_retry.clone(),
        }
    }

    /// Create an orchestrator talking to GitHub with the given settings
    pub fn from_config(config: &Config) -> Result<Self> {
        let provider = Arc::new(GitHubClient::new(&config.github)?);
        Ok(Self::new(provider, &config.polling))
    }

    /// Use a specific HTTP client for the archive download
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    /// Override the export status poll interval
    pub fn with_status_interval(mut self, interval: Duration) -> Self {
        self.status_interval = interval;
        self
    }

    /// Bound the export status polling
    pub fn with_status_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.status_timeout = timeout;
        self
    }

    /// Override the archive URL resolution timeout and interval
    pub fn with_archive_url_polling(mut self, timeout: Duration, interval: Duration) -> Self {
        self.resolver = self.resolver.with_timeout(timeout).with_interval(interval);
        self
    }

    /// The repository lister used by this orchestrator
    pub fn lister(&self) -> &RepositoryLister {
        &self.lister
    }

    /// Back up `organization` into `sink` and return the saved location
    ///
    /// The sink is invoked at most once, and only with an open archive stream.
    /// The stream is closed before this returns, on every path.
    pub async fn run(
        &self,
        organization: &str,
        sink: &dyn ArchiveSink,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut stage = Stage::ListingRepos;
        let result = self.execute(organization, sink, cancel, &mut stage).await;

        match &result {
            Ok(location) => {
                tracing::info!(organization, stage = %Stage::Done, location = %location, "Backup complete");
            }
            Err(e) if e.is_cancelled() => {
                tracing::warn!(organization, stage = %stage, "Backup cancelled");
            }
            Err(e) => {
                tracing::error!(
                    organization,
                    stage = %stage,
                    next = %Stage::Failed,
                    error = %e,
                    code = e.error_code(),
                    "Backup failed"
                );
            }
        }

        result
    }

    async fn execute(
        &self,
        organization: &str,
        sink: &dyn ArchiveSink,
        cancel: &CancellationToken,
        stage: &mut Stage,
    ) -> Result<String> {
        enter(organization, stage, Stage::ListingRepos);
        let repositories = self.lister.list(organization, cancel).await?;
        if repositories.is_empty() {
            return Err(Error::NoRepositories {
                organization: organization.to_string(),
            });
        }
        let names: Vec<String> = repositories.into_iter().map(|r| r.name).collect();

        enter(organization, stage, Stage::StartingExport);
        let job = self.start_export(organization, &names, cancel).await?;

        enter(organization, stage, Stage::PollingStatus);
        self.wait_for_export(organization, &job, cancel).await?;

        enter(organization, stage, Stage::ResolvingUrl);
        let url = self
            .resolver
            .resolve(organization, job.id, cancel)
            .await
            .map_err(|e| Error::ResolveUrl {
                organization: organization.to_string(),
                job_id: job.id,
                source: Box::new(e),
            })?;

        enter(organization, stage, Stage::Downloading);
        let archive = cancellable(cancel, open_archive(&self.http, &url))
            .await
            .map_err(|_| Error::Cancelled)?
            .map_err(|source| Error::Download {
                organization: organization.to_string(),
                source,
            })?;

        enter(organization, stage, Stage::Saving);
        save_archive(sink, archive, cancel).await
    }

    async fn start_export(
        &self,
        organization: &str,
        repositories: &[String],
        cancel: &CancellationToken,
    ) -> Result<ExportJob> {
        let options = ExportOptions::minimal();
        let job = cancellable(
            cancel,
            self.provider
                .start_export(organization, repositories, &options),
        )
        .await
        .map_err(|_| Error::Cancelled)?
        .map_err(|source| Error::StartExport {
            organization: organization.to_string(),
            source,
        })?;

        tracing::info!(
            organization,
            job_id = %job.id,
            repositories = repositories.len(),
            "Export started"
        );
        Ok(job)
    }

    /// Poll the job once per tick until it is exported or failed
    async fn wait_for_export(
        &self,
        organization: &str,
        job: &ExportJob,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut ticker = Ticker::new(self.status_interval, self.status_timeout);
        let job_id = job.id;

        loop {
            ticker
                .tick(cancel)
                .await
                .map_err(|reason| self.status_interrupted(reason))?;

            let status = ticker
                .guard(
                    cancel,
                    with_retry(&self.status_retry, || {
                        self.provider.export_status(organization, job_id)
                    }),
                )
                .await
                .map_err(|reason| self.status_interrupted(reason))?
                .map_err(|source| Error::StatusPoll {
                    organization: organization.to_string(),
                    job_id,
                    source,
                })?;

            if status.state.is_failed() {
                return Err(migration_failed(organization, job_id));
            }
            if status.state.is_ready() {
                tracing::info!(organization, %job_id, "Export finished");
                return Ok(());
            }

            tracing::debug!(organization, %job_id, state = %status.state, "Export in progress");
        }
    }

    fn status_interrupted(&self, reason: Interrupt) -> Error {
        match reason {
            Interrupt::Cancelled => Error::Cancelled,
            Interrupt::DeadlineExceeded => Error::Timeout {
                operation: "export status polling",
                timeout: self.status_timeout.unwrap_or_default(),
                last_error: None,
            },
        }
    }
}

/// Hand the archive to the sink, then close it whatever the sink did
async fn save_archive<R>(
    sink: &dyn ArchiveSink,
    mut archive: R,
    cancel: &CancellationToken,
) -> Result<String>
where
    R: AsyncRead + Send + Unpin,
{
    let saved = cancellable(cancel, sink.save(&mut archive)).await;
    drop(archive);

    saved
        .map_err(|_| Error::Cancelled)?
        .map_err(|source| Error::Sink {
            sink: sink.name(),
            source,
        })
}

fn enter(organization: &str, current: &mut Stage, next: Stage) {
    *current = next;
    tracing::debug!(organization, stage = %next, "Entering stage");
}

fn migration_failed(organization: &str, job_id: ExportJobId) -> Error {
    Error::MigrationFailed {
        organization: organization.to_string(),
        job_id,
    }
}
