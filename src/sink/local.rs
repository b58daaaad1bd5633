use super::{ArchiveReader, ArchiveSink};
use crate::error::SinkError;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

/// Writes the archive to a file on local disk
///
/// The file is created or truncated. A failed copy leaves the partial file in
/// place.
#[derive(Debug, Clone)]
pub struct LocalSink {
    path: PathBuf,
}

impl LocalSink {
    /// Sink writing to `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Destination path as given
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Write {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl ArchiveSink for LocalSink {
    fn name(&self) -> &'static str {
        "local"
    }

    async fn save(&self, archive: &mut ArchiveReader<'_>) -> Result<String, SinkError> {
        let mut file = File::create(&self.path)
            .await
            .map_err(|e| self.write_error(e))?;

        let written = tokio::io::copy(archive, &mut file)
            .await
            .map_err(|e| self.write_error(e))?;
        file.flush().await.map_err(|e| self.write_error(e))?;
        drop(file);

        let absolute = tokio::fs::canonicalize(&self.path)
            .await
            .map_err(|e| self.write_error(e))?;

        tracing::info!(path = %absolute.display(), bytes = written, "Archive written to disk");
        Ok(absolute.display().to_string())
    }
}
