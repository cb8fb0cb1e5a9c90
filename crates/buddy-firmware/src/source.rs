//! Where bundle archives come from.

use async_trait::async_trait;

use crate::Result;

/// Fetches the raw bytes of a bundle archive.
///
/// Implementations report unreachable or failing downloads as
/// [`crate::FirmwareError::Fetch`].
#[async_trait]
pub trait ArchiveSource: Send + Sync {
    /// Download the archive stored at `url`.
    async fn fetch_archive(&self, url: &str) -> Result<Vec<u8>>;
}
