//! Private repository enumeration

use crate::error::{Error, Result};
use crate::poll::{Interrupt, cancellable};
use crate::provider::ProviderClient;
use crate::types::{Repository, Visibility};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Page size requested from the provider
pub const PAGE_SIZE: u32 = 100;

/// Lists an organization's private, non-archived repositories
#[derive(Clone)]
pub struct RepositoryLister {
    provider: Arc<dyn ProviderClient>,
}

impl RepositoryLister {
    /// Create a lister backed by the given provider
    pub fn new(provider: Arc<dyn ProviderClient>) -> Self {
        Self { provider }
    }

    /// Fetch every page of private repositories and drop the archived ones
    ///
    /// Provider order is preserved. A failure on any page discards the pages
    /// already fetched.
    pub async fn list(
        &self,
        organization: &str,
        cancel: &CancellationToken,
    ) -> Result<Vec<Repository>> {
        let mut all = Vec::new();
        let mut page = 1;

        loop {
            let fetched = cancellable(
                cancel,
                self.provider
                    .list_org_repos(organization, Visibility::Private, page, PAGE_SIZE),
            )
            .await
            .map_err(|_: Interrupt| Error::Cancelled)?
            .map_err(|source| Error::ListRepos {
                organization: organization.to_string(),
                source,
            })?;

            tracing::debug!(
                organization,
                page,
                count = fetched.repositories.len(),
                "Fetched repository page"
            );
            all.extend(fetched.repositories);

            // Guard against a provider that points back at a page we already read
            match fetched.next_page {
                Some(next) if next > page => page = next,
                _ => break,
            }
        }

        let total = all.len();
        let repositories: Vec<Repository> = all.into_iter().filter(|r| !r.archived).collect();

        tracing::info!(
            organization,
            total,
            selected = repositories.len(),
            skipped_archived = total - repositories.len(),
            "Listed private repositories"
        );

        Ok(repositories)
    }
}
