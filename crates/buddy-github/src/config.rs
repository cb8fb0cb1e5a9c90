//! GitHub client configuration

use serde::{Deserialize, Serialize};

/// Default API base when no proxy is configured
pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Configuration for [`crate::GithubClient`]
#[derive(Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    /// API base URL (GitHub itself or a proxy in front of it)
    pub api_base: String,
    /// Repository owner
    pub owner: String,
    /// Firmware repository name
    pub repo: String,
    /// Bearer token (optional, public data works without one)
    pub token: Option<String>,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        GithubConfig {
            api_base: std::env::var("BUDDY_GITHUB_API")
                .unwrap_or_else(|_| DEFAULT_API_BASE.to_string()),
            owner: std::env::var("BUDDY_GITHUB_OWNER").unwrap_or_else(|_| "EdgeTX".to_string()),
            repo: std::env::var("BUDDY_GITHUB_REPO").unwrap_or_else(|_| "edgetx".to_string()),
            token: std::env::var("BUDDY_GITHUB_TOKEN")
                .ok()
                .filter(|t| !t.is_empty()),
            user_agent: format!("edgetx-buddy/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl GithubConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Create config for a specific API base and repository
    pub fn new(api_base: &str, owner: &str, repo: &str) -> Self {
        GithubConfig {
            api_base: api_base.to_string(),
            owner: owner.to_string(),
            repo: repo.to_string(),
            token: None,
            user_agent: format!("edgetx-buddy/{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Set authentication token
    pub fn with_token(mut self, token: &str) -> Self {
        self.token = Some(token.to_string());
        self
    }

    /// Absolute URL for an API path such as `/repos/o/r/releases`.
    pub(crate) fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.api_base.trim_end_matches('/'), path)
    }

    /// Path below `/repos/{owner}/{repo}`.
    pub(crate) fn repo_path(&self, tail: &str) -> String {
        format!(
            "/repos/{}/{}{}",
            encode_segment(&self.owner),
            encode_segment(&self.repo),
            tail
        )
    }
}

// The token never reaches logs.
impl std::fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GithubConfig")
            .field("api_base", &self.api_base)
            .field("owner", &self.owner)
            .field("repo", &self.repo)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

/// Percent-encode a single path segment (tags may contain `/` or `+`).
pub(crate) fn encode_segment(segment: &str) -> String {
    let mut out = String::with_capacity(segment.len());
    for byte in segment.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_new() {
        let config = GithubConfig::new("http://localhost:8080/", "EdgeTX", "edgetx");
        assert_eq!(config.owner, "EdgeTX");
        assert_eq!(config.token, None);
        assert_eq!(
            config.endpoint("/repos/EdgeTX/edgetx/releases"),
            "http://localhost:8080/repos/EdgeTX/edgetx/releases"
        );
    }

    #[test]
    fn test_config_with_token() {
        let config = GithubConfig::new(DEFAULT_API_BASE, "o", "r").with_token("secret-token");
        assert_eq!(config.token, Some("secret-token".to_string()));
    }

    #[test]
    fn test_debug_redacts_token() {
        let config = GithubConfig::new(DEFAULT_API_BASE, "o", "r").with_token("secret-token");
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("secret-token"));
        assert!(rendered.contains("<redacted>"));
    }

    #[test]
    fn test_repo_path_encodes_segments() {
        let config = GithubConfig::new(DEFAULT_API_BASE, "EdgeTX", "edgetx");
        assert_eq!(
            config.repo_path(&format!("/releases/tags/{}", encode_segment("v2.9.0+rc/1"))),
            "/repos/EdgeTX/edgetx/releases/tags/v2.9.0%2Brc%2F1"
        );
    }
}
