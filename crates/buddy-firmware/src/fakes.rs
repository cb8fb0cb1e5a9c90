//! Test doubles for the firmware store
//!
//! - `MemoryArchiveSource`: serves archives from a map and counts fetches
//! - `BundleBuilder`: writes bundle zips in the layout CI produces

use std::collections::HashMap;
use std::io::{Cursor, Write};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::bundle::MANIFEST_FILE;
use crate::error::FirmwareError;
use crate::source::ArchiveSource;
use crate::Result;

/// In-memory archive source
#[derive(Debug, Default)]
pub struct MemoryArchiveSource {
    archives: Mutex<HashMap<String, Vec<u8>>>,
    fetches: Mutex<HashMap<String, usize>>,
    latency: Option<Duration>,
}

impl MemoryArchiveSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_archive(self, url: &str, archive: Vec<u8>) -> Self {
        self.insert(url, archive);
        self
    }

    /// Delay every fetch, so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    pub fn insert(&self, url: &str, archive: Vec<u8>) {
        self.archives
            .lock()
            .unwrap()
            .insert(url.to_string(), archive);
    }

    /// Number of fetches made for `url`, successful or not.
    pub fn fetches(&self, url: &str) -> usize {
        self.fetches.lock().unwrap().get(url).copied().unwrap_or(0)
    }

    pub fn total_fetches(&self) -> usize {
        self.fetches.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ArchiveSource for MemoryArchiveSource {
    async fn fetch_archive(&self, url: &str) -> Result<Vec<u8>> {
        *self
            .fetches
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_insert(0) += 1;

        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        self.archives
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| FirmwareError::fetch(url, "HTTP 404"))
    }
}

/// Builds bundle archives.
///
/// ```
/// use buddy_firmware::fakes::BundleBuilder;
///
/// let zip = BundleBuilder::new()
///     .target("RadioMaster TX16S", "tx16s", b"binary")
///     .build()
///     .unwrap();
/// assert!(!zip.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct BundleBuilder {
    targets: Vec<(String, String)>,
    files: Vec<(String, Vec<u8>)>,
    manifest: bool,
}

impl BundleBuilder {
    pub fn new() -> Self {
        BundleBuilder {
            manifest: true,
            ..Default::default()
        }
    }

    /// List a target in the manifest and add its `<code>-<version>.bin`.
    pub fn target(mut self, name: &str, code: &str, binary: &[u8]) -> Self {
        self.targets.push((name.to_string(), format!("{code}-")));
        self.files
            .push((format!("{code}-v2.9.0-abcdef0.bin"), binary.to_vec()));
        self
    }

    /// List a target in the manifest without adding a binary for it.
    pub fn manifest_only(mut self, name: &str, code: &str) -> Self {
        self.targets.push((name.to_string(), format!("{code}-")));
        self
    }

    /// Add an arbitrary entry.
    pub fn file(mut self, path: &str, contents: &[u8]) -> Self {
        self.files.push((path.to_string(), contents.to_vec()));
        self
    }

    /// Leave `fw.json` out of the archive.
    pub fn without_manifest(mut self) -> Self {
        self.manifest = false;
        self
    }

    pub fn build(self) -> std::io::Result<Vec<u8>> {
        let options =
            SimpleFileOptions::default().compression_method(CompressionMethod::Stored);
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

        if self.manifest {
            let manifest = serde_json::json!({ "targets": self.targets });
            zip.start_file(MANIFEST_FILE, options)
                .map_err(std::io::Error::other)?;
            zip.write_all(manifest.to_string().as_bytes())?;
        }

        for (path, contents) in &self.files {
            zip.start_file(path.as_str(), options)
                .map_err(std::io::Error::other)?;
            zip.write_all(contents)?;
        }

        let cursor = zip.finish().map_err(std::io::Error::other)?;
        Ok(cursor.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_url_is_a_fetch_error() {
        let source = MemoryArchiveSource::new();
        let err = source.fetch_archive("https://nowhere").await.unwrap_err();
        assert!(matches!(err, FirmwareError::Fetch { .. }));
        assert_eq!(source.fetches("https://nowhere"), 1);
    }

    #[test]
    fn builder_writes_a_readable_zip() {
        let bytes = BundleBuilder::new()
            .target("TX16S", "tx16s", b"abc")
            .build()
            .unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let names: Vec<&str> = archive.file_names().collect();
        assert!(names.contains(&"fw.json"));
        assert!(names.contains(&"tx16s-v2.9.0-abcdef0.bin"));
    }
}
