//! Remote blob storage backends used by [`RemoteSink`](crate::sink::RemoteSink)

use crate::config::{Config, StorageBackendKind};
use crate::error::{Result, SinkError};
use crate::sink::ArchiveReader;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

mod azure;
mod object;

pub use azure::AzureBlobBackend;
pub use object::ObjectStorageBackend;

/// A blob store that accepts streaming uploads of unknown length
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Short backend name for errors and logs
    fn name(&self) -> &'static str;

    /// Upload the whole stream as blob `name` and return its location
    async fn upload(
        &self,
        name: &str,
        archive: &mut ArchiveReader<'_>,
    ) -> std::result::Result<String, SinkError>;
}

/// Build the backend selected by the storage settings
pub fn from_config(config: &Config) -> Result<Arc<dyn StorageBackend>> {
    match config.storage.backend {
        StorageBackendKind::Azure => {
            let azure = config.azure()?;
            Ok(Arc::new(AzureBlobBackend::new(azure)?))
        }
        StorageBackendKind::Object => {
            let object = config.object_storage()?;
            Ok(Arc::new(ObjectStorageBackend::new(object)?))
        }
    }
}

/// Read up to `size` bytes; a short chunk means the stream has ended
async fn read_chunk(
    archive: &mut ArchiveReader<'_>,
    size: usize,
) -> std::result::Result<Vec<u8>, SinkError> {
    let mut chunk = Vec::with_capacity(size);
    archive
        .take(size as u64)
        .read_to_end(&mut chunk)
        .await
        .map_err(SinkError::Read)?;
    Ok(chunk)
}
