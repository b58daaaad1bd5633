//! GitHub REST implementation of [`ProviderClient`]

use super::ProviderClient;
use crate::config::{GITHUB_API_URL_KEY, GITHUB_TOKEN_KEY, GitHubConfig};
use crate::error::{Error, ProviderError, Result};
use crate::types::{ExportJob, ExportJobId, ExportOptions, RepoPage, Repository, Visibility};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, LINK, LOCATION};
use reqwest::redirect::Policy;
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

const ACCEPT_GITHUB_JSON: &str = "application/vnd.github+json";
const API_VERSION_HEADER: &str = "x-github-api-version";
const API_VERSION: &str = "2022-11-28";

/// Client for the organization migration endpoints of the GitHub REST API
///
/// Redirects are never followed: the archive endpoint answers with a redirect
/// whose `Location` is the signed download URL, and that URL is what we want.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct StartMigrationRequest<'a> {
    repositories: &'a [String],
    exclude_attachments: bool,
    exclude_releases: bool,
}

impl GitHubClient {
    /// Build a client from the GitHub settings
    pub fn new(config: &GitHubConfig) -> Result<Self> {
        let base = Url::parse(&config.api_url).map_err(|e| {
            Error::config(
                format!("invalid GitHub API URL '{}': {}", config.api_url, e),
                GITHUB_API_URL_KEY,
            )
        })?;

        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(ACCEPT_GITHUB_JSON));
        headers.insert(API_VERSION_HEADER, HeaderValue::from_static(API_VERSION));
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.token))
            .map_err(|_| Error::config("token contains invalid characters", GITHUB_TOKEN_KEY))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(config.user_agent.clone())
            .timeout(config.request_timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| Error::Config {
                message: format!("failed to build HTTP client: {}", e),
                key: None,
            })?;

        Ok(Self {
            http,
            base_url: base.as_str().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send(
        &self,
        endpoint: &str,
        request: reqwest::RequestBuilder,
    ) -> std::result::Result<reqwest::Response, ProviderError> {
        request
            .send()
            .await
            .map_err(|source| ProviderError::Request {
                endpoint: endpoint.to_string(),
                source,
            })
    }
}

/// Turn a non-2xx response into [`ProviderError::Status`]
async fn ensure_success(
    endpoint: &str,
    response: reqwest::Response,
) -> std::result::Result<reqwest::Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.text().await {
        Ok(body) if !body.is_empty() => body,
        _ => status.canonical_reason().unwrap_or("unknown").to_string(),
    };
    Err(ProviderError::Status {
        endpoint: endpoint.to_string(),
        status: status.as_u16(),
        message,
    })
}

async fn read_json<T: DeserializeOwned>(
    endpoint: &str,
    response: reqwest::Response,
) -> std::result::Result<T, ProviderError> {
    let body = response
        .bytes()
        .await
        .map_err(|source| ProviderError::Request {
            endpoint: endpoint.to_string(),
            source,
        })?;
    serde_json::from_slice(&body).map_err(|e| ProviderError::InvalidResponse {
        endpoint: endpoint.to_string(),
        reason: e.to_string(),
    })
}

/// Page number of the `rel="next"` entry of a `Link` header
fn next_page_from_link(link_header: &str) -> Option<u32> {
    link_header.split(',').find_map(|part| {
        let mut url = None;
        let mut is_next = false;

        for segment in part.split(';').map(str::trim) {
            if let Some(inner) = segment.strip_prefix('<').and_then(|s| s.strip_suffix('>')) {
                url = Some(inner);
            } else if let Some(rel) = segment.strip_prefix("rel=") {
                is_next = rel.trim_matches('"') == "next";
            }
        }

        if is_next { url.and_then(page_param) } else { None }
    })
}

fn page_param(url: &str) -> Option<u32> {
    let url = Url::parse(url).ok()?;
    url.query_pairs()
        .find(|(key, _)| key == "page")
        .and_then(|(_, value)| value.parse().ok())
}

#[async_trait]
impl ProviderClient for GitHubClient {
    async fn list_org_repos(
        &self,
        organization: &str,
        visibility: Visibility,
        page: u32,
        per_page: u32,
    ) -> std::result::Result<RepoPage, ProviderError> {
        let endpoint = format!("GET /orgs/{}/repos", organization);
        let request = self
            .http
            .get(self.url(&format!("/orgs/{}/repos", organization)))
            .query(&[
                ("type", visibility.as_str().to_string()),
                ("per_page", per_page.to_string()),
                ("page", page.to_string()),
            ]);

        let response = ensure_success(&endpoint, self.send(&endpoint, request).await?).await?;
        let next_page = response
            .headers()
            .get(LINK)
            .and_then(|value| value.to_str().ok())
            .and_then(next_page_from_link);
        let repositories: Vec<Repository> = read_json(&endpoint, response).await?;

        Ok(RepoPage {
            repositories,
            next_page,
        })
    }

    async fn start_export(
        &self,
        organization: &str,
        repositories: &[String],
        options: &ExportOptions,
    ) -> std::result::Result<ExportJob, ProviderError> {
        let endpoint = format!("POST /orgs/{}/migrations", organization);
        let request = self
            .http
            .post(self.url(&format!("/orgs/{}/migrations", organization)))
            .json(&StartMigrationRequest {
                repositories,
                exclude_attachments: options.exclude_attachments,
                exclude_releases: options.exclude_releases,
            });

        let response = ensure_success(&endpoint, self.send(&endpoint, request).await?).await?;
        read_json(&endpoint, response).await
    }

    async fn export_status(
        &self,
        organization: &str,
        job_id: ExportJobId,
    ) -> std::result::Result<ExportJob, ProviderError> {
        let path = format!("/orgs/{}/migrations/{}", organization, job_id);
        let endpoint = format!("GET {}", path);
        let request = self.http.get(self.url(&path));

        let response = ensure_success(&endpoint, self.send(&endpoint, request).await?).await?;
        read_json(&endpoint, response).await
    }

    async fn archive_url(
        &self,
        organization: &str,
        job_id: ExportJobId,
    ) -> std::result::Result<String, ProviderError> {
        let path = format!("/orgs/{}/migrations/{}/archive", organization, job_id);
        let endpoint = format!("GET {}", path);
        let request = self.http.get(self.url(&path));
        let response = self.send(&endpoint, request).await?;

        if !response.status().is_redirection() {
            let response = ensure_success(&endpoint, response).await?;
            return Err(ProviderError::InvalidResponse {
                endpoint,
                reason: format!("expected a redirect, got HTTP {}", response.status()),
            });
        }

        response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| ProviderError::InvalidResponse {
                endpoint,
                reason: "redirect without Location header".to_string(),
            })
    }
}
