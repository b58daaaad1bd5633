//! Archive URL resolution for a finished export

use crate::error::{Error, Result};
use crate::poll::{Interrupt, Ticker};
use crate::provider::ProviderClient;
use crate::types::ExportJobId;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default overall bound on URL resolution
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default wait between URL lookups
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(5);

/// Polls the provider until an export's archive URL is available
///
/// The provider answers with an error until the archive is materialized, so
/// every lookup error counts as "not ready yet" and is retried on the next
/// tick until the deadline.
#[derive(Clone)]
pub struct ArchiveUrlResolver {
    provider: Arc<dyn ProviderClient>,
    timeout: Duration,
    interval: Duration,
}

impl ArchiveUrlResolver {
    /// Create a resolver with the default 30s timeout and 5s interval
    pub fn new(provider: Arc<dyn ProviderClient>) -> Self {
        Self {
            provider,
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Set the overall timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the poll interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Resolve with the configured timeout and interval
    pub async fn resolve(
        &self,
        organization: &str,
        job_id: ExportJobId,
        cancel: &CancellationToken,
    ) -> Result<String> {
        self.resolve_within(organization, job_id, self.timeout, self.interval, cancel)
            .await
    }

    /// Resolve with a per-call timeout and interval
    ///
    /// Returns [`Error::Timeout`] once `timeout` elapses without a URL and
    /// [`Error::Cancelled`] as soon as `cancel` fires.
    pub async fn resolve_within(
        &self,
        organization: &str,
        job_id: ExportJobId,
        timeout: Duration,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut ticker = Ticker::new(interval, Some(timeout));
        let mut last_error = None;
        let interrupted = |reason: Interrupt, last_error: Option<String>| match reason {
            Interrupt::Cancelled => Error::Cancelled,
            Interrupt::DeadlineExceeded => Error::Timeout {
                operation: "archive URL resolution",
                timeout,
                last_error,
            },
        };

        loop {
            if let Err(reason) = ticker.tick(cancel).await {
                return Err(interrupted(reason, last_error));
            }

            let lookup = ticker
                .guard(cancel, self.provider.archive_url(organization, job_id))
                .await;

            match lookup {
                Ok(Ok(url)) => {
                    tracing::debug!(organization, %job_id, "Archive URL resolved");
                    return Ok(url);
                }
                Ok(Err(e)) => {
                    tracing::debug!(organization, %job_id, error = %e, "Archive not ready yet");
                    last_error = Some(e.to_string());
                }
                Err(reason) => return Err(interrupted(reason, last_error)),
            }
        }
    }
}
