//! GitHub API payloads consumed by EdgeTX Buddy
//!
//! Only the fields the firmware pipeline reads are modelled; everything else
//! in the responses is ignored on deserialisation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A published (or pre-release) firmware release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: u64,
    pub tag_name: String,
    pub name: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub draft: bool,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

impl Release {
    /// Minimal release with the given tag and assets.
    pub fn new(id: u64, tag_name: &str, assets: Vec<ReleaseAsset>) -> Self {
        Release {
            id,
            tag_name: tag_name.to_string(),
            name: None,
            body: None,
            prerelease: false,
            draft: false,
            assets,
            published_at: None,
        }
    }
}

/// A file attached to a release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseAsset {
    pub id: u64,
    pub name: String,
    pub browser_download_url: String,
    #[serde(default)]
    pub size: u64,
}

impl ReleaseAsset {
    pub fn new(id: u64, name: &str, browser_download_url: &str) -> Self {
        ReleaseAsset {
            id,
            name: name.to_string(),
            browser_download_url: browser_download_url.to_string(),
            size: 0,
        }
    }
}

/// An open pull request against the firmware repository
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub body: Option<String>,
    pub head: PullHead,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// Head branch of a pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullHead {
    /// `owner:branch`
    pub label: String,
    pub sha: String,
    #[serde(rename = "ref", default)]
    pub ref_name: String,
}

/// A commit listed on a pull request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullCommit {
    pub sha: String,
}

/// A check run attached to a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRun {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub conclusion: Option<String>,
    #[serde(default)]
    pub app: Option<CheckRunApp>,
}

/// The GitHub App that produced a check run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckRunApp {
    #[serde(default)]
    pub slug: Option<String>,
}

/// A GitHub Actions workflow job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowJob {
    pub id: u64,
    pub run_id: u64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// An artifact uploaded by a workflow run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    pub id: u64,
    pub name: String,
    pub archive_download_url: String,
    #[serde(default)]
    pub expired: bool,
}

/// `GET /commits/{ref}/check-runs` wraps its list
#[derive(Debug, Deserialize)]
pub(crate) struct CheckRunPage {
    pub total_count: u64,
    pub check_runs: Vec<CheckRun>,
}

/// `GET /actions/runs/{id}/artifacts` wraps its list
#[derive(Debug, Deserialize)]
pub(crate) struct ArtifactPage {
    pub total_count: u64,
    pub artifacts: Vec<Artifact>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_ignores_unknown_fields_and_defaults_missing_ones() {
        let json = r#"{
            "id": 7,
            "tag_name": "v2.9.0",
            "name": null,
            "body": "notes",
            "html_url": "https://github.com/EdgeTX/edgetx/releases/v2.9.0"
        }"#;
        let release: Release = serde_json::from_str(json).unwrap();
        assert_eq!(release.tag_name, "v2.9.0");
        assert!(!release.prerelease);
        assert!(release.assets.is_empty());
    }

    #[test]
    fn pull_head_reads_ref_keyword() {
        let json = r#"{"label": "pfeerick:fix", "sha": "abc", "ref": "fix"}"#;
        let head: PullHead = serde_json::from_str(json).unwrap();
        assert_eq!(head.ref_name, "fix");
    }

    #[test]
    fn check_run_without_app() {
        let json = r#"{"id": 1, "name": "build (t16)", "app": null}"#;
        let run: CheckRun = serde_json::from_str(json).unwrap();
        assert!(run.app.is_none());
    }
}
