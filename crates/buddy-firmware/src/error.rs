//! Error types for buddy-firmware

use thiserror::Error;

/// Errors that can occur resolving firmware binaries
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FirmwareError {
    /// The bundle was parsed but does not contain the requested target
    #[error("target {target} not found in bundle {url}")]
    NotFoundInArchive { url: String, target: String },

    /// The bundle could not be downloaded
    #[error("failed to fetch bundle {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The download is not a readable firmware bundle
    #[error("malformed bundle {url}: {reason}")]
    MalformedArchive { url: String, reason: String },
}

impl FirmwareError {
    pub(crate) fn malformed(url: &str, reason: impl std::fmt::Display) -> Self {
        FirmwareError::MalformedArchive {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn fetch(url: &str, reason: impl std::fmt::Display) -> Self {
        FirmwareError::Fetch {
            url: url.to_string(),
            reason: reason.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_in_archive_display() {
        let err = FirmwareError::NotFoundInArchive {
            url: "https://example.invalid/fw.zip".to_string(),
            target: "tx16s".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("tx16s"));
        assert!(msg.contains("fw.zip"));
    }

    #[test]
    fn test_fetch_error_display() {
        let err = FirmwareError::fetch("u", "HTTP 502");
        assert_eq!(err.to_string(), "failed to fetch bundle u: HTTP 502");
    }
}
