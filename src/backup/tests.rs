#![allow(clippy::unwrap_used, clippy::expect_used)]

use super::test_helpers::{JOB_ID, MockProvider};
use super::*;
use crate::error::{DownloadError, ProviderError, SinkError};
use crate::sink::ArchiveReader;
use crate::types::{ExportState, Repository};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::io::AsyncReadExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const STATUS_INTERVAL: Duration = Duration::from_millis(20);

/// Sink that keeps the bytes it was given
#[derive(Default)]
struct RecordingSink {
    calls: AtomicUsize,
    received: Mutex<Vec<u8>>,
    fail: bool,
}

impl RecordingSink {
    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ArchiveSink for RecordingSink {
    fn name(&self) -> &'static str {
        "recording"
    }

    async fn save(&self, archive: &mut ArchiveReader<'_>) -> std::result::Result<String, SinkError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut body = Vec::new();
        archive.read_to_end(&mut body).await.map_err(SinkError::Read)?;
        *self.received.lock().unwrap() = body;

        if self.fail {
            return Err(SinkError::InvalidLocation("disk full".into()));
        }
        Ok("mem://archive".into())
    }
}

fn fast_polling() -> PollingConfig {
    PollingConfig {
        status_interval: STATUS_INTERVAL,
        status_timeout: None,
        archive_url_timeout: Duration::from_secs(2),
        archive_url_interval: Duration::from_millis(5),
        status_retry: RetryConfig::none(),
    }
}

fn acme_provider() -> MockProvider {
    MockProvider::with_repos(vec![
        Repository::private("api"),
        Repository::private("web").archived(),
        Repository::private("legacy"),
    ])
}

async fn archive_server(status: u16, body: &'static [u8]) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/archive.tar.gz"))
        .respond_with(ResponseTemplate::new(status).set_body_bytes(body.to_vec()))
        .mount(&server)
        .await;
    server
}

fn archive_url(server: &MockServer) -> String {
    format!("{}/archive.tar.gz", server.uri())
}

#[tokio::test]
async fn pending_then_exported_polls_exactly_twice_and_saves() {
    let server = archive_server(200, b"DATA").await;
    let provider = Arc::new(acme_provider());
    provider.script_states([ExportState::Pending, ExportState::Exported]);
    provider.archive_ready_after(0, archive_url(&server));
    let sink = RecordingSink::default();

    let start = std::time::Instant::now();
    let location = BackupOrchestrator::new(provider.clone(), &fast_polling())
        .run("acme", &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(location, "mem://archive");
    assert_eq!(provider.status_calls(), 2);
    assert!(
        start.elapsed() >= STATUS_INTERVAL * 2,
        "status must be polled on ticks, took {:?}",
        start.elapsed()
    );
    assert_eq!(sink.calls(), 1);
    assert_eq!(*sink.received.lock().unwrap(), b"DATA");

    let (names, options) = provider.started_with().unwrap();
    assert_eq!(names, ["api", "legacy"]);
    assert_eq!(options, ExportOptions::minimal());
}

#[tokio::test]
async fn unknown_in_progress_states_keep_polling() {
    let server = archive_server(200, b"DATA").await;
    let provider = Arc::new(acme_provider());
    provider.script_states([
        ExportState::Pending,
        ExportState::Exporting,
        ExportState::Other("archiving".into()),
        ExportState::Exported,
    ]);
    provider.archive_ready_after(1, archive_url(&server));
    let sink = RecordingSink::default();

    BackupOrchestrator::new(provider.clone(), &fast_polling())
        .with_status_interval(Duration::from_millis(5))
        .run("acme", &sink, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(provider.status_calls(), 4);
    assert_eq!(provider.archive_calls(), 2);
}

#[tokio::test]
async fn failed_export_stops_polling() {
    let provider = Arc::new(acme_provider());
    provider.script_states([ExportState::Pending, ExportState::Failed]);
    let sink = RecordingSink::default();

    let err = BackupOrchestrator::new(provider.clone(), &fast_polling())
        .run("acme", &sink, &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        Error::MigrationFailed {
            organization,
            job_id,
        } => {
            assert_eq!(organization, "acme");
            assert_eq!(*job_id, JOB_ID);
        }
        other => panic!("unexpected error: {other:?}"),
    }

    tokio::time::sleep(STATUS_INTERVAL * 3).await;
    assert_eq!(provider.status_calls(), 2, "no polling after failure");
    assert_eq!(provider.archive_calls(), 0);
    assert_eq!(sink.calls(), 0);
}

#[tokio::test]
async fn cancellation_mid_poll_is_reported_as_cancelled() {
    let provider = Arc::new(acme_provider());
    let sink = RecordingSink::default();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(70)).await;
        trigger.cancel();
    });

    let err = BackupOrchestrator::new(provider.clone(), &fast_polling())
        .run("acme", &sink, &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled(), "expected cancellation, got {err:?}");
    assert!(!err.is_timeout());
    assert_eq!(err.error_code(), "cancelled");
    assert!(provider.status_calls() >= 1);
    assert_eq!(sink.calls(), 0);
}

#[tokio::test]
async fn status_check_error_aborts_without_retry_by_default() {
    let provider = Arc::new(acme_provider());
    provider.script_status_error(ProviderError::Status {
        endpoint: "GET /orgs/acme/migrations/42".into(),
        status: 502,
        message: "Bad Gateway".into(),
    });
    provider.set_steady_state(ExportState::Exported);
    let sink = RecordingSink::default();

    let err = BackupOrchestrator::new(provider.clone(), &fast_polling())
        .run("acme", &sink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::StatusPoll { job_id, .. } if job_id == JOB_ID));
    assert_eq!(provider.status_calls(), 1);
}

#[tokio::test]
async fn status_check_error_is_retried_when_enabled() {
    let server = archive_server(200, b"DATA").await;
    let provider = Arc::new(acme_provider());
    provider.script_status_error(ProviderError::Status {
        endpoint: "GET /orgs/acme/migrations/42".into(),
        status: 503,
        message: "Service Unavailable".into(),
    });
    provider.script_states([ExportState::Exported]);
    provider.archive_ready_after(0, archive_url(&server));

    let polling = PollingConfig {
        status_retry: RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(5),
            max_delay: Duration::from_millis(20),
            backoff_multiplier: 2.0,
            jitter: false,
        },
        ..fast_polling()
    };

    let location = BackupOrchestrator::new(provider.clone(), &polling)
        .run("acme", &RecordingSink::default(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(location, "mem://archive");
    assert_eq!(provider.status_calls(), 2);
}

#[tokio::test]
async fn bounded_status_polling_times_out() {
    let provider = Arc::new(acme_provider());

    let err = BackupOrchestrator::new(provider, &fast_polling())
        .with_status_interval(Duration::from_millis(5))
        .with_status_timeout(Some(Duration::from_millis(40)))
        .run("acme", &RecordingSink::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "expected timeout, got {err:?}");
    assert!(!err.is_cancelled());
}

#[tokio::test]
async fn unresolvable_archive_url_times_out() {
    let provider = Arc::new(acme_provider());
    provider.script_states([ExportState::Exported]);
    let sink = RecordingSink::default();

    let err = BackupOrchestrator::new(provider.clone(), &fast_polling())
        .with_archive_url_polling(Duration::from_millis(30), Duration::from_millis(5))
        .run("acme", &sink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ResolveUrl { .. }));
    assert!(err.is_timeout());
    assert!(provider.archive_calls() >= 1);
    assert_eq!(sink.calls(), 0);
}

#[tokio::test]
async fn download_404_is_reported_and_sink_is_never_invoked() {
    let server = archive_server(404, b"").await;
    let provider = Arc::new(acme_provider());
    provider.script_states([ExportState::Exported]);
    provider.archive_ready_after(0, archive_url(&server));
    let sink = RecordingSink::default();

    let err = BackupOrchestrator::new(provider, &fast_polling())
        .run("acme", &sink, &CancellationToken::new())
        .await
        .unwrap_err();

    match &err {
        Error::Download {
            source: DownloadError::Status { status, .. },
            ..
        } => assert_eq!(*status, 404),
        other => panic!("unexpected error: {other:?}"),
    }
    assert!(err.to_string().contains("404"));
    assert_eq!(sink.calls(), 0);
}

#[tokio::test]
async fn sink_failure_is_wrapped_with_sink_name() {
    let server = archive_server(200, b"DATA").await;
    let provider = Arc::new(acme_provider());
    provider.script_states([ExportState::Exported]);
    provider.archive_ready_after(0, archive_url(&server));
    let sink = RecordingSink::failing();

    let err = BackupOrchestrator::new(provider, &fast_polling())
        .run("acme", &sink, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Sink { sink: "recording", .. }));
    assert_eq!(sink.calls(), 1);
}

#[tokio::test]
async fn list_failure_never_starts_the_export() {
    let provider = Arc::new(acme_provider());
    provider.fail_list_on_page(1, ProviderError::Other("unauthorized".into()));

    let err = BackupOrchestrator::new(provider.clone(), &fast_polling())
        .run("acme", &RecordingSink::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::ListRepos { .. }));
    assert_eq!(provider.start_calls(), 0);
}

#[tokio::test]
async fn organization_without_active_repositories_is_an_error() {
    let provider = Arc::new(MockProvider::with_repos(vec![
        Repository::private("web").archived(),
    ]));

    let err = BackupOrchestrator::new(provider.clone(), &fast_polling())
        .run("acme", &RecordingSink::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::NoRepositories { .. }));
    assert_eq!(provider.start_calls(), 0);
}

#[tokio::test]
async fn start_failure_skips_polling() {
    let provider = Arc::new(acme_provider());
    provider.fail_start(ProviderError::Other("migration limit reached".into()));

    let err = BackupOrchestrator::new(provider.clone(), &fast_polling())
        .run("acme", &RecordingSink::default(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert_eq!(err.error_code(), "start_export_failed");
    assert_eq!(provider.status_calls(), 0);
}

#[tokio::test]
async fn already_cancelled_run_does_not_touch_the_provider() {
    let provider = Arc::new(acme_provider());
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = BackupOrchestrator::new(provider.clone(), &fast_polling())
        .run("acme", &RecordingSink::default(), &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(provider.list_calls(), 0);
}

/// Reader over a fixed body that counts how often it is dropped
struct CountedReader {
    body: &'static [u8],
    drops: Arc<AtomicUsize>,
}

impl CountedReader {
    fn new(body: &'static [u8]) -> (Self, Arc<AtomicUsize>) {
        let drops = Arc::new(AtomicUsize::new(0));
        (
            Self {
                body,
                drops: drops.clone(),
            },
            drops,
        )
    }
}

impl tokio::io::AsyncRead for CountedReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        _cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        let n = self.body.len().min(buf.remaining());
        buf.put_slice(&self.body[..n]);
        self.body = &self.body[n..];
        std::task::Poll::Ready(Ok(()))
    }
}

impl Drop for CountedReader {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sink that reads a few bytes and then panics
struct PanickingSink;

#[async_trait]
impl ArchiveSink for PanickingSink {
    fn name(&self) -> &'static str {
        "panicking"
    }

    async fn save(&self, archive: &mut ArchiveReader<'_>) -> std::result::Result<String, SinkError> {
        let mut head = [0u8; 2];
        archive.read_exact(&mut head).await.map_err(SinkError::Read)?;
        panic!("sink crashed mid-write");
    }
}

#[tokio::test]
async fn archive_is_released_once_after_a_successful_save() {
    let (reader, drops) = CountedReader::new(b"DATA");
    let sink = RecordingSink::default();

    let location = save_archive(&sink, reader, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(location, "mem://archive");
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn archive_is_released_once_when_the_sink_fails() {
    let (reader, drops) = CountedReader::new(b"DATA");
    let sink = RecordingSink::failing();

    let err = save_archive(&sink, reader, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Sink { sink: "recording", .. }));
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn archive_is_released_once_when_the_sink_panics() {
    use futures::FutureExt;
    use std::panic::AssertUnwindSafe;

    let (reader, drops) = CountedReader::new(b"DATA");
    let cancel = CancellationToken::new();

    let outcome = AssertUnwindSafe(save_archive(&PanickingSink, reader, &cancel))
        .catch_unwind()
        .await;

    assert!(outcome.is_err(), "panic should reach the caller");
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn archive_is_released_once_when_saving_is_cancelled() {
    let (reader, drops) = CountedReader::new(b"DATA");
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = save_archive(&RecordingSink::default(), reader, &cancel)
        .await
        .unwrap_err();

    assert!(err.is_cancelled());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}
