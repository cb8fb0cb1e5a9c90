//! In-memory fake of [`ArtifactClient`]
//!
//! `MemoryArtifactClient` holds releases, pull requests and CI records in
//! maps and answers with the same absence/error semantics as the HTTP
//! client. It backs the mocked execution context and the resolver tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::client::ArtifactClient;
use crate::error::GithubError;
use crate::models::*;
use crate::Result;

#[derive(Debug, Default)]
struct FakeRepo {
    releases: Vec<Release>,
    pulls: Vec<PullRequest>,
    pull_commits: HashMap<u64, Vec<PullCommit>>,
    check_runs: HashMap<String, Vec<CheckRun>>,
    jobs: HashMap<u64, WorkflowJob>,
    run_artifacts: HashMap<u64, Vec<Artifact>>,
    failure: Option<u16>,
}

/// In-memory artifact client backed by plain collections.
#[derive(Debug, Default)]
pub struct MemoryArtifactClient {
    repo: Mutex<FakeRepo>,
    calls: AtomicU64,
}

impl MemoryArtifactClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a release (listed in insertion order).
    pub fn with_release(self, release: Release) -> Self {
        self.repo.lock().unwrap().releases.push(release);
        self
    }

    /// Add an open pull request together with its commits.
    pub fn with_pull(self, pull: PullRequest, commits: Vec<PullCommit>) -> Self {
        {
            let mut repo = self.repo.lock().unwrap();
            repo.pull_commits.insert(pull.number, commits);
            repo.pulls.push(pull);
        }
        self
    }

    /// Attach check runs to a commit sha.
    pub fn with_check_runs(self, sha: &str, runs: Vec<CheckRun>) -> Self {
        self.repo
            .lock()
            .unwrap()
            .check_runs
            .insert(sha.to_string(), runs);
        self
    }

    /// Register a workflow job.
    pub fn with_job(self, job: WorkflowJob) -> Self {
        self.repo.lock().unwrap().jobs.insert(job.id, job);
        self
    }

    /// Attach artifacts to a workflow run.
    pub fn with_run_artifacts(self, run_id: u64, artifacts: Vec<Artifact>) -> Self {
        self.repo
            .lock()
            .unwrap()
            .run_artifacts
            .insert(run_id, artifacts);
        self
    }

    /// Make every subsequent call fail with the given HTTP status.
    pub fn fail_with_status(&self, status: u16) {
        self.repo.lock().unwrap().failure = Some(status);
    }

    /// Number of calls answered so far.
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn enter(&self, endpoint: &str) -> Result<std::sync::MutexGuard<'_, FakeRepo>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let repo = self.repo.lock().unwrap();
        match repo.failure {
            Some(status) => Err(GithubError::Http {
                status,
                url: format!("memory://{endpoint}"),
            }),
            None => Ok(repo),
        }
    }
}

#[async_trait]
impl ArtifactClient for MemoryArtifactClient {
    async fn list_releases(&self) -> Result<Vec<Release>> {
        let repo = self.enter("releases")?;
        Ok(repo.releases.clone())
    }

    async fn release_by_tag(&self, tag: &str) -> Result<Option<Release>> {
        let repo = self.enter("releases/tags")?;
        Ok(repo.releases.iter().find(|r| r.tag_name == tag).cloned())
    }

    async fn list_open_pulls(&self) -> Result<Vec<PullRequest>> {
        let repo = self.enter("pulls")?;
        let mut pulls = repo.pulls.clone();
        pulls.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(pulls)
    }

    async fn pull(&self, number: u64) -> Result<Option<PullRequest>> {
        let repo = self.enter("pulls/{number}")?;
        Ok(repo.pulls.iter().find(|p| p.number == number).cloned())
    }

    async fn pull_commits(&self, number: u64) -> Result<Vec<PullCommit>> {
        let repo = self.enter("pulls/{number}/commits")?;
        repo.pull_commits
            .get(&number)
            .cloned()
            .ok_or_else(|| GithubError::Http {
                status: 404,
                url: format!("memory://pulls/{number}/commits"),
            })
    }

    async fn check_runs_for_ref(&self, git_ref: &str) -> Result<Vec<CheckRun>> {
        let repo = self.enter("commits/{ref}/check-runs")?;
        Ok(repo.check_runs.get(git_ref).cloned().unwrap_or_default())
    }

    async fn job(&self, job_id: u64) -> Result<Option<WorkflowJob>> {
        let repo = self.enter("actions/jobs/{id}")?;
        Ok(repo.jobs.get(&job_id).cloned())
    }

    async fn run_artifacts(&self, run_id: u64) -> Result<Vec<Artifact>> {
        let repo = self.enter("actions/runs/{id}/artifacts")?;
        Ok(repo.run_artifacts.get(&run_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pull(number: u64, sha: &str) -> PullRequest {
        PullRequest {
            number,
            title: format!("PR {number}"),
            body: None,
            head: PullHead {
                label: format!("someone:branch-{number}"),
                sha: sha.to_string(),
                ref_name: format!("branch-{number}"),
            },
            updated_at: None,
        }
    }

    #[tokio::test]
    async fn release_by_tag_absent_is_none() {
        let client = MemoryArtifactClient::new().with_release(Release::new(1, "v1.0.0", vec![]));
        assert!(client.release_by_tag("v9.9.9").await.unwrap().is_none());
        assert!(client.release_by_tag("v1.0.0").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn pull_commits_follow_registration() {
        let client = MemoryArtifactClient::new().with_pull(
            pull(42, "head"),
            vec![
                PullCommit { sha: "one".into() },
                PullCommit { sha: "head".into() },
            ],
        );
        let commits = client.pull_commits(42).await.unwrap();
        assert_eq!(commits.len(), 2);
        assert_eq!(commits[1].sha, "head");
        assert!(client.pull_commits(7).await.is_err());
    }

    #[tokio::test]
    async fn injected_failure_surfaces_as_http_error() {
        let client = MemoryArtifactClient::new();
        client.fail_with_status(503);
        let err = client.list_releases().await.unwrap_err();
        assert_eq!(err.status(), Some(503));
        assert_eq!(client.calls(), 1);
    }
}
