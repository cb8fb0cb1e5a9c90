//! Writable directory picker (SD card contents are copied into it).

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Options passed to the picker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectoryOptions {
    /// Remembers the last directory picked under this id
    pub id: Option<String>,
}

/// A directory the user granted write access to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryHandle {
    pub id: String,
    pub name: String,
    pub path: PathBuf,
}

impl DirectoryHandle {
    fn for_path(id: Option<&str>, path: PathBuf) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        DirectoryHandle {
            id: id.unwrap_or("default").to_string(),
            name,
            path,
        }
    }
}

/// Capability to obtain a writable directory.
#[async_trait]
pub trait DirectoryPicker: Send + Sync {
    /// `Ok(None)` when the user cancelled the picker.
    async fn request_writable_directory(
        &self,
        options: &DirectoryOptions,
    ) -> std::io::Result<Option<DirectoryHandle>>;
}

/// Headless picker answering with a directory fixed in configuration.
///
/// Without a configured directory every request counts as cancelled.
pub struct ConfiguredDirectoryPicker {
    directory: Option<PathBuf>,
}

impl ConfiguredDirectoryPicker {
    pub fn new(directory: Option<PathBuf>) -> Self {
        ConfiguredDirectoryPicker { directory }
    }
}

#[async_trait]
impl DirectoryPicker for ConfiguredDirectoryPicker {
    async fn request_writable_directory(
        &self,
        options: &DirectoryOptions,
    ) -> std::io::Result<Option<DirectoryHandle>> {
        let Some(directory) = &self.directory else {
            debug!("no writable directory configured");
            return Ok(None);
        };

        let metadata = tokio::fs::metadata(directory).await?;
        if !metadata.is_dir() || metadata.permissions().readonly() {
            warn!(path = %directory.display(), "configured directory is not writable");
            return Ok(None);
        }

        Ok(Some(DirectoryHandle::for_path(
            options.id.as_deref(),
            directory.clone(),
        )))
    }
}

/// In-memory picker for mocked contexts.
pub struct MemoryDirectoryPicker {
    path: Option<PathBuf>,
}

impl MemoryDirectoryPicker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        MemoryDirectoryPicker {
            path: Some(path.into()),
        }
    }

    pub fn cancelling() -> Self {
        MemoryDirectoryPicker { path: None }
    }
}

#[async_trait]
impl DirectoryPicker for MemoryDirectoryPicker {
    async fn request_writable_directory(
        &self,
        options: &DirectoryOptions,
    ) -> std::io::Result<Option<DirectoryHandle>> {
        Ok(self
            .path
            .clone()
            .map(|path| DirectoryHandle::for_path(options.id.as_deref(), path)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn configured_directory_is_returned() {
        let dir = tempfile::tempdir().unwrap();
        let picker = ConfiguredDirectoryPicker::new(Some(dir.path().to_path_buf()));

        let handle = picker
            .request_writable_directory(&DirectoryOptions {
                id: Some("sdcard".into()),
            })
            .await
            .unwrap()
            .unwrap();

        assert_eq!(handle.id, "sdcard");
        assert_eq!(handle.path, dir.path());
    }

    #[tokio::test]
    async fn unconfigured_picker_cancels() {
        let picker = ConfiguredDirectoryPicker::new(None);
        let picked = picker
            .request_writable_directory(&DirectoryOptions::default())
            .await
            .unwrap();
        assert!(picked.is_none());
    }

    #[tokio::test]
    async fn missing_directory_is_an_error() {
        let picker = ConfiguredDirectoryPicker::new(Some("/nonexistent/sdcard".into()));
        assert!(picker
            .request_writable_directory(&DirectoryOptions::default())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn memory_picker_names_handle_after_last_component() {
        let picker = MemoryDirectoryPicker::new("/media/user/SDCARD");
        let handle = picker
            .request_writable_directory(&DirectoryOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(handle.name, "SDCARD");
        assert_eq!(handle.id, "default");

        assert!(MemoryDirectoryPicker::cancelling()
            .request_writable_directory(&DirectoryOptions::default())
            .await
            .unwrap()
            .is_none());
    }
}
