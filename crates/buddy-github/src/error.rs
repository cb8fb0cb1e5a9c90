//! Error types for buddy-github

use thiserror::Error;

/// Errors that can occur talking to the GitHub API
#[derive(Error, Debug)]
pub enum GithubError {
    /// The API answered with a non-success status (other than a 404 on a
    /// single-entity lookup, which is reported as absence)
    #[error("GitHub API returned HTTP {status} for {url}")]
    Http { status: u16, url: String },

    /// The request never produced a response
    #[error("HTTP transport failed: {0}")]
    Transport(String),

    /// The response body was not the JSON we expected
    #[error("failed to decode response from {url}: {reason}")]
    Decode { url: String, reason: String },

    /// The client could not be built from its configuration
    #[error("invalid GitHub client configuration: {0}")]
    Config(String),
}

impl GithubError {
    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GithubError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GithubError {
    fn from(err: reqwest::Error) -> Self {
        GithubError::Transport(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_error_display_carries_status_and_url() {
        let err = GithubError::Http {
            status: 502,
            url: "https://api.github.com/repos/EdgeTX/edgetx/releases".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("502"));
        assert!(msg.contains("/releases"));
        assert_eq!(err.status(), Some(502));
    }

    #[test]
    fn transport_error_has_no_status() {
        let err = GithubError::Transport("connection reset".to_string());
        assert_eq!(err.status(), None);
    }
}
