//! Scriptable in-memory provider for workflow tests

#![allow(clippy::unwrap_used, clippy::expect_used)]

use crate::error::ProviderError;
use crate::provider::ProviderClient;
use crate::types::{ExportJob, ExportJobId, ExportOptions, ExportState, RepoPage, Repository, Visibility};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Job ID handed out by [`MockProvider::start_export`]
pub(crate) const JOB_ID: ExportJobId = ExportJobId(42);

/// Provider double with scripted answers and call counters
///
/// Status answers are consumed from a queue; once it is empty the provider
/// keeps reporting `steady_state` (pending by default), which lets tests
/// model an export that never finishes.
pub(crate) struct MockProvider {
    repos: Vec<Repository>,
    list_failures: Mutex<HashMap<u32, ProviderError>>,
    pages: Mutex<Vec<u32>>,
    visibility: Mutex<Option<Visibility>>,
    list_calls: AtomicUsize,

    start_failure: Mutex<Option<ProviderError>>,
    started_with: Mutex<Option<(Vec<String>, ExportOptions)>>,
    start_calls: AtomicUsize,

    status_script: Mutex<VecDeque<Result<ExportState, ProviderError>>>,
    steady_state: Mutex<ExportState>,
    status_calls: AtomicUsize,

    archive_url: Mutex<Option<String>>,
    archive_not_ready: AtomicUsize,
    archive_calls: AtomicUsize,
}

impl MockProvider {
    pub(crate) fn with_repos(repos: Vec<Repository>) -> Self {
        Self {
            repos,
            list_failures: Mutex::new(HashMap::new()),
            pages: Mutex::new(Vec::new()),
            visibility: Mutex::new(None),
            list_calls: AtomicUsize::new(0),
            start_failure: Mutex::new(None),
            started_with: Mutex::new(None),
            start_calls: AtomicUsize::new(0),
            status_script: Mutex::new(VecDeque::new()),
            steady_state: Mutex::new(ExportState::Pending),
            status_calls: AtomicUsize::new(0),
            archive_url: Mutex::new(None),
            archive_not_ready: AtomicUsize::new(0),
            archive_calls: AtomicUsize::new(0),
        }
    }

    /// Provider for an organization holding the given repository names
    pub(crate) fn with_names(names: &[&str]) -> Self {
        Self::with_repos(names.iter().map(|n| Repository::private(*n)).collect())
    }

    pub(crate) fn fail_list_on_page(&self, page: u32, error: ProviderError) {
        self.list_failures.lock().unwrap().insert(page, error);
    }

    pub(crate) fn fail_start(&self, error: ProviderError) {
        *self.start_failure.lock().unwrap() = Some(error);
    }

    /// Queue status answers, in order
    pub(crate) fn script_states(&self, states: impl IntoIterator<Item = ExportState>) {
        self.status_script
            .lock()
            .unwrap()
            .extend(states.into_iter().map(Ok));
    }

    pub(crate) fn script_status_error(&self, error: ProviderError) {
        self.status_script.lock().unwrap().push_back(Err(error));
    }

    pub(crate) fn set_steady_state(&self, state: ExportState) {
        *self.steady_state.lock().unwrap() = state;
    }

    /// Make the archive URL available after `not_ready` failed lookups
    pub(crate) fn archive_ready_after(&self, not_ready: usize, url: impl Into<String>) {
        self.archive_not_ready.store(not_ready, Ordering::SeqCst);
        *self.archive_url.lock().unwrap() = Some(url.into());
    }

    pub(crate) fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requested_pages(&self) -> Vec<u32> {
        self.pages.lock().unwrap().clone()
    }

    pub(crate) fn requested_visibility(&self) -> Option<Visibility> {
        *self.visibility.lock().unwrap()
    }

    pub(crate) fn start_calls(&self) -> usize {
        self.start_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn started_with(&self) -> Option<(Vec<String>, ExportOptions)> {
        self.started_with.lock().unwrap().clone()
    }

    pub(crate) fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn archive_calls(&self) -> usize {
        self.archive_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderClient for MockProvider {
    async fn list_org_repos(
        &self,
        _organization: &str,
        visibility: Visibility,
        page: u32,
        per_page: u32,
    ) -> Result<RepoPage, ProviderError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.pages.lock().unwrap().push(page);
        *self.visibility.lock().unwrap() = Some(visibility);

        if let Some(error) = self.list_failures.lock().unwrap().remove(&page) {
            return Err(error);
        }

        let per_page = per_page as usize;
        let start = (page as usize - 1) * per_page;
        let end = (start + per_page).min(self.repos.len());
        let repositories = self.repos.get(start..end).unwrap_or_default().to_vec();
        let next_page = (end < self.repos.len()).then_some(page + 1);

        Ok(RepoPage {
            repositories,
            next_page,
        })
    }

    async fn start_export(
        &self,
        _organization: &str,
        repositories: &[String],
        options: &ExportOptions,
    ) -> Result<ExportJob, ProviderError> {
        self.start_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.start_failure.lock().unwrap().take() {
            return Err(error);
        }

        *self.started_with.lock().unwrap() = Some((repositories.to_vec(), *options));
        Ok(ExportJob {
            id: JOB_ID,
            state: ExportState::Pending,
        })
    }

    async fn export_status(
        &self,
        _organization: &str,
        job_id: ExportJobId,
    ) -> Result<ExportJob, ProviderError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.status_script.lock().unwrap().pop_front();
        let state = match next {
            Some(answer) => answer?,
            None => self.steady_state.lock().unwrap().clone(),
        };

        Ok(ExportJob { id: job_id, state })
    }

    async fn archive_url(
        &self,
        _organization: &str,
        _job_id: ExportJobId,
    ) -> Result<String, ProviderError> {
        self.archive_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.archive_not_ready.load(Ordering::SeqCst);
        if remaining > 0 {
            self.archive_not_ready.store(remaining - 1, Ordering::SeqCst);
            return Err(not_ready());
        }

        self.archive_url.lock().unwrap().clone().ok_or_else(not_ready)
    }
}

fn not_ready() -> ProviderError {
    ProviderError::Status {
        endpoint: "GET archive".into(),
        status: 404,
        message: "archive not ready".into(),
    }
}
