//! S3-compatible object storage backend (MinIO and friends)
//!
//! An archive that fits in one part goes up with a single `PutObject`.
//! Anything larger becomes a multipart upload, one part in memory at a time,
//! and is aborted if any part fails.

use super::{StorageBackend, read_chunk};
use crate::config::{OBJECT_ENDPOINT_KEY, ObjectStorageConfig};
use crate::error::{Error, Result, SinkError};
use crate::sink::ArchiveReader;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::config::{
    BehaviorVersion, Credentials, Region, RequestChecksumCalculation,
};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use url::Url;

const BACKEND: &str = "object";
const CONTENT_TYPE: &str = "application/gzip";

/// S3-compatible bucket addressed path-style
#[derive(Debug, Clone)]
pub struct ObjectStorageBackend {
    client: Client,
    endpoint: Url,
    bucket: String,
    part_size: usize,
}

impl ObjectStorageBackend {
    /// Create a backend for the configured endpoint and bucket
    pub fn new(config: &ObjectStorageConfig) -> Result<Self> {
        let endpoint_url = config.endpoint_url();
        let endpoint = Url::parse(&endpoint_url).map_err(|e| {
            Error::config(
                format!("invalid object storage endpoint '{}': {}", config.endpoint, e),
                OBJECT_ENDPOINT_KEY,
            )
        })?;

        let credentials = Credentials::new(
            config.access_key.clone(),
            config.secret_key.clone(),
            None,
            None,
            "rbk-config",
        );
        let s3_config = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(endpoint_url)
            .credentials_provider(credentials)
            .force_path_style(true)
            .request_checksum_calculation(RequestChecksumCalculation::WhenRequired)
            .build();

        tracing::debug!(
            endpoint = %endpoint,
            bucket = %config.bucket,
            "Object storage client initialised"
        );

        Ok(Self {
            client: Client::from_conf(s3_config),
            endpoint,
            bucket: config.bucket.clone(),
            part_size: config.part_size.max(1),
        })
    }

    /// Public location of an object
    fn object_url(&self, name: &str) -> std::result::Result<Url, SinkError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| SinkError::InvalidLocation(self.endpoint.to_string()))?
            .pop_if_empty()
            .push(&self.bucket)
            .push(name);
        Ok(url)
    }

    async fn put_whole(&self, name: &str, body: Vec<u8>) -> std::result::Result<(), SinkError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(name)
            .content_type(CONTENT_TYPE)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| upload_error(name, "PutObject", e))?;
        Ok(())
    }

    async fn put_multipart(
        &self,
        name: &str,
        first: Vec<u8>,
        archive: &mut ArchiveReader<'_>,
    ) -> std::result::Result<(usize, u64), SinkError> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(name)
            .content_type(CONTENT_TYPE)
            .send()
            .await
            .map_err(|e| upload_error(name, "CreateMultipartUpload", e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| SinkError::UploadFailed {
                backend: BACKEND,
                blob: name.to_string(),
                operation: "CreateMultipartUpload",
                message: "response carried no upload ID".to_string(),
            })?
            .to_string();

        match self.send_parts(name, &upload_id, first, archive).await {
            Ok(uploaded) => Ok(uploaded),
            Err(e) => {
                self.abort(name, &upload_id).await;
                Err(e)
            }
        }
    }

    async fn send_parts(
        &self,
        name: &str,
        upload_id: &str,
        first: Vec<u8>,
        archive: &mut ArchiveReader<'_>,
    ) -> std::result::Result<(usize, u64), SinkError> {
        let mut parts = Vec::new();
        let mut total: u64 = 0;
        let mut part = first;

        loop {
            let number = i32::try_from(parts.len() + 1).map_err(|_| SinkError::UploadFailed {
                backend: BACKEND,
                blob: name.to_string(),
                operation: "UploadPart",
                message: "too many parts".to_string(),
            })?;
            let len = part.len();

            let output = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(name)
                .upload_id(upload_id)
                .part_number(number)
                .body(ByteStream::from(part))
                .send()
                .await
                .map_err(|e| upload_error(name, "UploadPart", e))?;

            tracing::debug!(object = name, part = number, bytes = len, "Uploaded part");
            parts.push(
                CompletedPart::builder()
                    .part_number(number)
                    .set_e_tag(output.e_tag().map(str::to_string))
                    .build(),
            );
            total += len as u64;

            if len < self.part_size {
                break;
            }
            part = read_chunk(archive, self.part_size).await?;
            if part.is_empty() {
                break;
            }
        }

        let count = parts.len();
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(name)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| upload_error(name, "CompleteMultipartUpload", e))?;

        Ok((count, total))
    }

    /// Drop the stored parts of a failed upload; failures are only logged
    async fn abort(&self, name: &str, upload_id: &str) {
        let aborted = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(name)
            .upload_id(upload_id)
            .send()
            .await;

        if let Err(e) = aborted {
            tracing::warn!(
                object = name,
                upload_id,
                error = %DisplayErrorContext(&e),
                "Could not abort multipart upload"
            );
        }
    }
}

fn upload_error<E>(name: &str, operation: &'static str, err: SdkError<E>) -> SinkError
where
    E: std::error::Error + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    let message = DisplayErrorContext(&err).to_string();
    match status {
        Some(status) => SinkError::UploadRejected {
            backend: BACKEND,
            blob: name.to_string(),
            status,
            message,
        },
        None => SinkError::UploadFailed {
            backend: BACKEND,
            blob: name.to_string(),
            operation,
            message,
        },
    }
}

#[async_trait]
impl StorageBackend for ObjectStorageBackend {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn upload(
        &self,
        name: &str,
        archive: &mut ArchiveReader<'_>,
    ) -> std::result::Result<String, SinkError> {
        let location = self.object_url(name)?;
        let first = read_chunk(archive, self.part_size).await?;

        if first.len() < self.part_size {
            let bytes = first.len();
            self.put_whole(name, first).await?;
            tracing::info!(object = name, bytes, "Uploaded object");
        } else {
            let (parts, bytes) = self.put_multipart(name, first, archive).await?;
            tracing::info!(object = name, parts, bytes, "Completed multipart upload");
        }

        Ok(location.to_string())
    }
}
