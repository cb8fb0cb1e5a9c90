//! Remote artifact client
//!
//! [`ArtifactClient`] is the narrow surface the firmware resolvers need.
//! [`GithubClient`] implements it over the GitHub REST API with reqwest.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};

use crate::config::{encode_segment, GithubConfig};
use crate::error::GithubError;
use crate::models::*;
use crate::Result;

/// Page size requested from list endpoints.
pub const PER_PAGE: usize = 100;

/// Upper bound on pages fetched for one list call.
pub const MAX_PAGES: u32 = 10;

const GITHUB_JSON: &str = "application/vnd.github+json";
const API_VERSION: &str = "2022-11-28";

/// Read-only access to releases, pull requests and CI artifacts.
///
/// Guarantees:
/// - Single-entity lookups return `Ok(None)` on 404, never an error.
/// - List operations return every page (up to [`MAX_PAGES`]).
/// - No state is kept between calls.
#[async_trait]
pub trait ArtifactClient: Send + Sync {
    /// All releases, newest first.
    async fn list_releases(&self) -> Result<Vec<Release>>;

    /// A release by tag name.
    async fn release_by_tag(&self, tag: &str) -> Result<Option<Release>>;

    /// Open pull requests, most recently updated first.
    async fn list_open_pulls(&self) -> Result<Vec<PullRequest>>;

    /// A pull request by number.
    async fn pull(&self, number: u64) -> Result<Option<PullRequest>>;

    /// Commits of a pull request, oldest first.
    async fn pull_commits(&self, number: u64) -> Result<Vec<PullCommit>>;

    /// Check runs attached to a commit sha or ref.
    async fn check_runs_for_ref(&self, git_ref: &str) -> Result<Vec<CheckRun>>;

    /// A workflow job by id.
    async fn job(&self, job_id: u64) -> Result<Option<WorkflowJob>>;

    /// Artifacts uploaded by a workflow run.
    async fn run_artifacts(&self, run_id: u64) -> Result<Vec<Artifact>>;
}

/// GitHub REST client
pub struct GithubClient {
    config: GithubConfig,
    http_client: reqwest::Client,
}

impl GithubClient {
    /// Create a new client from explicit configuration
    pub fn new(config: GithubConfig) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        if let Some(token) = &config.token {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| GithubError::Config(format!("invalid token: {e}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let http_client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .default_headers(headers)
            .build()
            .map_err(|e| GithubError::Config(e.to_string()))?;

        Ok(GithubClient {
            config,
            http_client,
        })
    }

    /// Create client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::new(GithubConfig::from_env())
    }

    /// Configuration this client was built with.
    pub fn config(&self) -> &GithubConfig {
        &self.config
    }

    /// Download raw bytes (release assets, artifact archives).
    ///
    /// Sends the configured credential; artifact archives are not public.
    #[instrument(skip(self), level = "debug")]
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http_client
            .get(url)
            .header(ACCEPT, "application/octet-stream")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(GithubError::Http {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let bytes = response.bytes().await?;
        debug!(url = %url, bytes = bytes.len(), "download finished");
        Ok(bytes.to_vec())
    }

    /// GET a JSON document. `Ok(None)` on 404.
    async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Option<T>> {
        let url = self.config.endpoint(path);
        debug!(url = %url, ?query, "GET");

        let response = self
            .http_client
            .get(&url)
            .header(ACCEPT, GITHUB_JSON)
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(GithubError::Http {
                status: status.as_u16(),
                url,
            });
        }

        let body = response.bytes().await?;
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|e| GithubError::Decode {
                url,
                reason: e.to_string(),
            })
    }

    /// GET a list endpoint where absence means the repository itself is gone.
    async fn get_required<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T> {
        self.get_json(path, query)
            .await?
            .ok_or_else(|| GithubError::Http {
                status: StatusCode::NOT_FOUND.as_u16(),
                url: self.config.endpoint(path),
            })
    }

    /// Collect a bare-array list endpoint across pages.
    async fn get_paginated<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<Vec<T>> {
        let mut items = Vec::new();
        for page in 1..=MAX_PAGES {
            let batch: Vec<T> = self.get_required(path, &page_query(query, page)).await?;
            let len = batch.len();
            items.extend(batch);
            if len < PER_PAGE {
                break;
            }
        }
        Ok(items)
    }

    /// Collect a wrapped list endpoint (`{ total_count, <items> }`) across pages.
    async fn get_wrapped<P, T, F>(
        &self,
        path: &str,
        query: &[(&str, String)],
        unwrap: F,
    ) -> Result<Vec<T>>
    where
        P: DeserializeOwned,
        F: Fn(P) -> (u64, Vec<T>),
    {
        let mut items = Vec::new();
        for page in 1..=MAX_PAGES {
            let wrapped: P = self.get_required(path, &page_query(query, page)).await?;
            let (total, batch) = unwrap(wrapped);
            let len = batch.len();
            items.extend(batch);
            if len < PER_PAGE || items.len() as u64 >= total {
                break;
            }
        }
        Ok(items)
    }
}

fn page_query<'a>(base: &[(&'a str, String)], page: u32) -> Vec<(&'a str, String)> {
    let mut query = base.to_vec();
    query.push(("per_page", PER_PAGE.to_string()));
    query.push(("page", page.to_string()));
    query
}

#[async_trait]
impl ArtifactClient for GithubClient {
    #[instrument(skip(self))]
    async fn list_releases(&self) -> Result<Vec<Release>> {
        let path = self.config.repo_path("/releases");
        self.get_paginated(&path, &[]).await
    }

    #[instrument(skip(self))]
    async fn release_by_tag(&self, tag: &str) -> Result<Option<Release>> {
        let path = self
            .config
            .repo_path(&format!("/releases/tags/{}", encode_segment(tag)));
        self.get_json(&path, &[]).await
    }

    #[instrument(skip(self))]
    async fn list_open_pulls(&self) -> Result<Vec<PullRequest>> {
        let path = self.config.repo_path("/pulls");
        let query = [
            ("state", "open".to_string()),
            ("sort", "updated".to_string()),
            ("direction", "desc".to_string()),
        ];
        self.get_paginated(&path, &query).await
    }

    #[instrument(skip(self))]
    async fn pull(&self, number: u64) -> Result<Option<PullRequest>> {
        let path = self.config.repo_path(&format!("/pulls/{number}"));
        self.get_json(&path, &[]).await
    }

    #[instrument(skip(self))]
    async fn pull_commits(&self, number: u64) -> Result<Vec<PullCommit>> {
        let path = self.config.repo_path(&format!("/pulls/{number}/commits"));
        self.get_paginated(&path, &[]).await
    }

    #[instrument(skip(self))]
    async fn check_runs_for_ref(&self, git_ref: &str) -> Result<Vec<CheckRun>> {
        let path = self.config.repo_path(&format!(
            "/commits/{}/check-runs",
            encode_segment(git_ref)
        ));
        self.get_wrapped(&path, &[], |page: CheckRunPage| {
            (page.total_count, page.check_runs)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn job(&self, job_id: u64) -> Result<Option<WorkflowJob>> {
        let path = self.config.repo_path(&format!("/actions/jobs/{job_id}"));
        self.get_json(&path, &[]).await
    }

    #[instrument(skip(self))]
    async fn run_artifacts(&self, run_id: u64) -> Result<Vec<Artifact>> {
        let path = self
            .config
            .repo_path(&format!("/actions/runs/{run_id}/artifacts"));
        self.get_wrapped(&path, &[], |page: ArtifactPage| {
            (page.total_count, page.artifacts)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_query_appends_paging() {
        let query = page_query(&[("state", "open".to_string())], 3);
        assert_eq!(
            query,
            vec![
                ("state", "open".to_string()),
                ("per_page", "100".to_string()),
                ("page", "3".to_string()),
            ]
        );
    }

    #[test]
    fn test_client_rejects_unprintable_token() {
        let config = GithubConfig::new("http://localhost", "o", "r").with_token("bad\ntoken");
        match GithubClient::new(config) {
            Err(GithubError::Config(_)) => {}
            other => panic!("expected Config error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_client_from_explicit_config() {
        let config = GithubConfig::new("http://localhost:9", "EdgeTX", "edgetx");
        let client = GithubClient::new(config).unwrap();
        assert_eq!(client.config().repo, "edgetx");
    }
}
