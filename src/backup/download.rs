//! Streaming archive download

use crate::error::DownloadError;
use futures::TryStreamExt;
use tokio::io::AsyncRead;
use tokio_util::io::StreamReader;
use url::Url;

/// Open the archive at `url` as a byte stream
///
/// Nothing is buffered beyond what the HTTP client holds in flight; the
/// connection is released when the returned reader is dropped.
pub async fn open_archive(
    client: &reqwest::Client,
    url: &str,
) -> Result<impl AsyncRead + Send + Unpin + use<>, DownloadError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| DownloadError::Request(e.without_url()))?;

    let status = response.status();
    if !status.is_success() {
        return Err(DownloadError::Status {
            url: redact(url),
            status: status.as_u16(),
        });
    }

    tracing::debug!(
        url = %redact(url),
        content_length = ?response.content_length(),
        "Archive download started"
    );

    let body = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
    Ok(StreamReader::new(body))
}

/// Drop the query string, which carries the signature of pre-signed URLs
fn redact(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) => {
            parsed.set_query(None);
            parsed.set_fragment(None);
            parsed.to_string()
        }
        Err(_) => url.split('?').next().unwrap_or(url).to_string(),
    }
}
