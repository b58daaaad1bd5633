//! rbk
//!
//! Command-line front end for repo-backup: lists an organization's private
//! repositories or backs them up to a local file or remote blob storage.

use clap::{Parser, Subcommand};
use repo_backup::{
    ArchiveSink, BackupOrchestrator, Config, Error, LocalSink, RemoteSink, storage,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "rbk")]
#[command(version)]
#[command(about = "Back up an organization's private repositories", long_about = None)]
struct Cli {
    /// Organization whose repositories are backed up
    #[arg(short, long, env = "RBK_ORGANIZATION")]
    organization: String,

    /// Environment file with credentials and settings
    #[arg(short, long, default_value = ".env")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the private, non-archived repositories, one per line
    Repos,

    /// Export the repositories and save the archive
    Backup {
        #[command(subcommand)]
        target: BackupTarget,
    },
}

#[derive(Subcommand)]
enum BackupTarget {
    /// Write the archive to a local file
    Local {
        /// Destination file
        #[arg(short, long, default_value = "archive.tar.gz")]
        output: PathBuf,
    },

    /// Upload the archive to the configured blob storage
    Remote,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "repo_backup=info,rbk=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            tracing::debug!(code = e.error_code(), "Exiting with failure");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Error> {
    load_env_file(&cli.config)?;
    let config = Config::from_env()?;
    let orchestrator = BackupOrchestrator::from_config(&config)?;

    repo_backup::run_until_signalled(|cancel| async move {
        match cli.command {
            Commands::Repos => list_repos(&orchestrator, &cli.organization, &cancel).await,
            Commands::Backup { target } => {
                backup(&orchestrator, &config, &cli.organization, target, &cancel).await
            }
        }
    })
    .await
}

async fn backup(
    orchestrator: &BackupOrchestrator,
    config: &Config,
    organization: &str,
    target: BackupTarget,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let sink: Box<dyn ArchiveSink> = match target {
        BackupTarget::Local { output } => Box::new(LocalSink::new(output)),
        BackupTarget::Remote => Box::new(RemoteSink::new(
            storage::from_config(config)?,
            organization.to_string(),
        )),
    };

    tracing::info!(organization, sink = sink.name(), "Starting backup");
    let location = orchestrator.run(organization, sink.as_ref(), cancel).await?;
    println!("{location}");
    Ok(())
}

async fn list_repos(
    orchestrator: &BackupOrchestrator,
    organization: &str,
    cancel: &CancellationToken,
) -> Result<(), Error> {
    let repositories = orchestrator.lister().list(organization, cancel).await?;
    for repo in repositories {
        println!("{}", repo.name);
    }
    Ok(())
}

/// Load `path` into the process environment; a missing file is not an error
fn load_env_file(path: &Path) -> Result<(), Error> {
    match dotenvy::from_path(path) {
        Ok(()) => {
            tracing::debug!(path = %path.display(), "Loaded environment file");
            Ok(())
        }
        Err(e) if e.not_found() => {
            tracing::debug!(path = %path.display(), "No environment file, using process environment");
            Ok(())
        }
        Err(e) => Err(Error::Config {
            message: format!("failed to load {}: {}", path.display(), e),
            key: None,
        }),
    }
}
