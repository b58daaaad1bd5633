//! Archive destinations
//!
//! A sink receives the open archive stream exactly once per backup run and
//! reports where the archive ended up. The stream is lent, not given: the
//! orchestrator keeps ownership of the underlying connection and closes it
//! after `save` returns.

use crate::error::SinkError;
use async_trait::async_trait;
use tokio::io::AsyncRead;

mod local;
mod remote;

pub use local::LocalSink;
pub use remote::{RemoteSink, blob_name};

/// Borrowed archive byte stream handed to a sink
pub type ArchiveReader<'a> = dyn AsyncRead + Send + Unpin + 'a;

/// Destination for a downloaded archive
#[async_trait]
pub trait ArchiveSink: Send + Sync {
    /// Short name used in errors and logs (e.g., "local")
    fn name(&self) -> &'static str;

    /// Persist the whole stream and return the saved location
    async fn save(&self, archive: &mut ArchiveReader<'_>) -> Result<String, SinkError>;
}
