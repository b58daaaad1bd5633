use super::{ArchiveReader, ArchiveSink};
use crate::error::SinkError;
use crate::storage::StorageBackend;
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use std::sync::Arc;

/// Blob name for an organization's archive taken on `date`
///
/// Format: `<YYYY-MM-DD>-<organization>-migration.tar.gz`.
pub fn blob_name(date: NaiveDate, organization: &str) -> String {
    format!("{}-{}-migration.tar.gz", date.format("%Y-%m-%d"), organization)
}

/// Uploads the archive to remote blob storage
///
/// The blob is named after the current UTC date and the organization.
#[derive(Clone)]
pub struct RemoteSink {
    backend: Arc<dyn StorageBackend>,
    organization: String,
}

impl RemoteSink {
    /// Sink uploading `organization`'s archive through `backend`
    pub fn new(backend: Arc<dyn StorageBackend>, organization: impl Into<String>) -> Self {
        Self {
            backend,
            organization: organization.into(),
        }
    }
}

#[async_trait]
impl ArchiveSink for RemoteSink {
    fn name(&self) -> &'static str {
        "remote"
    }

    async fn save(&self, archive: &mut ArchiveReader<'_>) -> Result<String, SinkError> {
        let name = blob_name(Utc::now().date_naive(), &self.organization);
        tracing::info!(blob = %name, backend = self.backend.name(), "Uploading archive");

        let location = self.backend.upload(&name, archive).await?;

        tracing::info!(location = %location, "Archive uploaded");
        Ok(location)
    }
}
