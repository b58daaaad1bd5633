//! # repo-backup
//!
//! Backs up an organization's private repositories through the code-hosting
//! provider's migration export API.
//!
//! A backup run lists the organization's private, non-archived repositories,
//! starts one export job covering them, waits for the provider to build the
//! archive, and streams the archive into an [`ArchiveSink`]: a local file or a
//! remote blob store. The archive is never buffered in memory as a whole.
//!
//! ## Quick Start
//!
//! ```no_run
//! use repo_backup::{BackupOrchestrator, Config, LocalSink};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_env()?;
//!     let orchestrator = BackupOrchestrator::from_config(&config)?;
//!
//!     let cancel = CancellationToken::new();
//!     tokio::spawn(repo_backup::cancel_on_signal(cancel.clone()));
//!
//!     let sink = LocalSink::new("archive.tar.gz");
//!     let location = orchestrator.run("acme", &sink, &cancel).await?;
//!     println!("{location}");
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Backup workflow: listing, export polling, download
pub mod backup;
/// Configuration types
pub mod config;
/// Error types
pub mod error;
/// Cancellable tick-driven waits
pub mod poll;
/// Code-hosting provider clients
pub mod provider;
/// Retry logic with exponential backoff
pub mod retry;
/// Archive destinations
pub mod sink;
/// Remote blob storage backends
pub mod storage;
/// Core types
pub mod types;

pub use backup::{ArchiveUrlResolver, BackupOrchestrator, RepositoryLister};
pub use config::Config;
pub use error::{Error, Result};
pub use provider::{GitHubClient, ProviderClient};
pub use sink::{ArchiveSink, LocalSink, RemoteSink};
pub use storage::{AzureBlobBackend, ObjectStorageBackend, StorageBackend};
pub use types::{ExportJob, ExportJobId, ExportState, Repository};

use tokio_util::sync::CancellationToken;

/// Cancel `cancel` when the process receives SIGTERM or SIGINT
///
/// Meant to be spawned next to a backup run; every stage of the run observes
/// the token and stops at its next wait point.
pub async fn cancel_on_signal(cancel: CancellationToken) {
    tokio::select! {
        signal = interrupted() => {
            tracing::warn!(signal, "Interrupted, abandoning the backup run");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }
}

/// Run `work` with a token that SIGTERM or SIGINT cancel
///
/// The signal watcher is stopped and joined before this returns, whatever
/// `work` produced.
pub async fn run_until_signalled<F, Fut, T>(work: F) -> T
where
    F: FnOnce(CancellationToken) -> Fut,
    Fut: std::future::Future<Output = T>,
{
    let cancel = CancellationToken::new();
    let watcher = tokio::spawn(cancel_on_signal(cancel.clone()));

    let output = work(cancel.clone()).await;

    cancel.cancel();
    if let Err(e) = watcher.await {
        tracing::debug!(error = %e, "Signal watcher ended abnormally");
    }
    output
}

/// Resolves with the name of the first termination signal received
#[cfg(unix)]
async fn interrupted() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    match (
        signal(SignalKind::terminate()),
        signal(SignalKind::interrupt()),
    ) {
        (Ok(mut term), Ok(mut int)) => tokio::select! {
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
        },
        (Err(e), _) | (_, Err(e)) => {
            // Sandboxed runners may refuse the handlers
            tracing::debug!(error = %e, "Signal handlers unavailable, watching Ctrl+C only");
            ctrl_c().await
        }
    }
}

#[cfg(not(unix))]
async fn interrupted() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Cannot watch Ctrl+C, the run can only be stopped by killing it");
        std::future::pending::<()>().await;
    }
    "Ctrl+C"
}
