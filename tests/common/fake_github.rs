//! wiremock stand-in for the GitHub migration API and the archive host

use repo_backup::config::{Config, GitHubConfig, PollingConfig};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Job ID returned by the fake migration endpoint
pub const JOB_ID: u64 = 7;

/// Path the archive redirect points to
pub const ARCHIVE_PATH: &str = "/download/archive.tar.gz";

/// Fake provider for organization "acme"
///
/// Repos: api (private), web (private, archived), legacy (private). The export
/// reports `pending` once, then `exported`.
pub struct FakeGitHub {
    pub server: MockServer,
}

impl FakeGitHub {
    pub async fn start() -> Self {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/orgs/acme/repos"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {"name": "api", "archived": false, "visibility": "private"},
                {"name": "web", "archived": true, "visibility": "private"},
                {"name": "legacy", "archived": false, "visibility": "private"}
            ])))
            .mount(&server)
            .await;

        Mock::given(method("POST"))
            .and(path("/orgs/acme/migrations"))
            .and(body_partial_json(serde_json::json!({
                "repositories": ["api", "legacy"],
                "exclude_attachments": true,
                "exclude_releases": true
            })))
            .respond_with(
                ResponseTemplate::new(201)
                    .set_body_json(serde_json::json!({"id": JOB_ID, "state": "pending"})),
            )
            .mount(&server)
            .await;

        let status_path = format!("/orgs/acme/migrations/{JOB_ID}");
        Mock::given(method("GET"))
            .and(path(status_path.as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": JOB_ID, "state": "pending"})),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(status_path.as_str()))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"id": JOB_ID, "state": "exported"})),
            )
            .mount(&server)
            .await;

        Mock::given(method("GET"))
            .and(path(format!("/orgs/acme/migrations/{JOB_ID}/archive").as_str()))
            .respond_with(
                ResponseTemplate::new(302)
                    .insert_header("location", format!("{}{}", server.uri(), ARCHIVE_PATH).as_str()),
            )
            .mount(&server)
            .await;

        Self { server }
    }

    /// Serve the archive body with the given status
    pub async fn serve_archive(&self, status: u16, body: &[u8]) {
        Mock::given(method("GET"))
            .and(path(ARCHIVE_PATH))
            .respond_with(ResponseTemplate::new(status).set_body_bytes(body.to_vec()))
            .mount(&self.server)
            .await;
    }

    /// Number of migration export requests the server has received
    pub async fn export_requests(&self) -> usize {
        let export_path = "/orgs/acme/migrations";
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .filter(|r| r.method.as_str() == "POST" && r.url.path() == export_path)
            .count()
    }

    /// Configuration pointing at this server with millisecond polling
    pub fn config(&self) -> Config {
        Config {
            github: GitHubConfig {
                api_url: self.server.uri(),
                token: "test-token".into(),
                ..GitHubConfig::default()
            },
            polling: PollingConfig {
                status_interval: Duration::from_millis(10),
                archive_url_timeout: Duration::from_secs(5),
                archive_url_interval: Duration::from_millis(10),
                ..PollingConfig::default()
            },
            ..Config::default()
        }
    }
}
