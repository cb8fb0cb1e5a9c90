//! Execution context
//!
//! The capability set an executor resolves operations against. It is built
//! once, when the executor starts, by either [`ExecutionContext::real`] or
//! [`ExecutionContext::mocked`], and shared read-only afterwards.

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use buddy_firmware::{ArchiveSource, FirmwareError, FirmwareStore};
use buddy_github::{ArtifactClient, GithubClient, GithubConfig};
use tracing::info;

use crate::bus::ExecutorArgs;
use crate::device::{DeviceProvider, SysfsDeviceProvider};
use crate::error::ContextError;
use crate::filesystem::{ConfiguredDirectoryPicker, DirectoryPicker};
use crate::mock;

/// Host capabilities configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Directory handed out by the writable directory picker
    pub sdcard_dir: Option<PathBuf>,
    /// USB device enumeration root
    pub usb_sysfs_root: PathBuf,
    /// USB device node root
    pub usb_dev_root: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            sdcard_dir: std::env::var("BUDDY_SDCARD_DIR").ok().map(PathBuf::from),
            usb_sysfs_root: std::env::var("BUDDY_USB_SYSFS_ROOT")
                .unwrap_or_else(|_| "/sys/bus/usb/devices".to_string())
                .into(),
            usb_dev_root: std::env::var("BUDDY_USB_DEV_ROOT")
                .unwrap_or_else(|_| "/dev/bus/usb".to_string())
                .into(),
        }
    }
}

impl HostConfig {
    /// Create a new config from environment variables
    pub fn from_env() -> Self {
        Self::default()
    }

    /// Set the directory returned by the picker
    pub fn with_sdcard_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sdcard_dir = Some(dir.into());
        self
    }
}

/// Bundle downloads through the authenticated GitHub client.
pub struct GithubArchiveSource {
    client: Arc<GithubClient>,
}

impl GithubArchiveSource {
    pub fn new(client: Arc<GithubClient>) -> Self {
        GithubArchiveSource { client }
    }
}

#[async_trait]
impl ArchiveSource for GithubArchiveSource {
    async fn fetch_archive(&self, url: &str) -> buddy_firmware::Result<Vec<u8>> {
        self.client
            .download(url)
            .await
            .map_err(|e| FirmwareError::Fetch {
                url: url.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Capabilities available to resolvers
pub struct ExecutionContext {
    github: Arc<dyn ArtifactClient>,
    firmware: Arc<FirmwareStore>,
    devices: Arc<dyn DeviceProvider>,
    file_system: Arc<dyn DirectoryPicker>,
}

impl ExecutionContext {
    pub fn new(
        github: Arc<dyn ArtifactClient>,
        firmware: Arc<FirmwareStore>,
        devices: Arc<dyn DeviceProvider>,
        file_system: Arc<dyn DirectoryPicker>,
    ) -> Self {
        ExecutionContext {
            github,
            firmware,
            devices,
            file_system,
        }
    }

    /// Context backed by GitHub and the host's USB and filesystem.
    pub fn real(github: GithubConfig, host: HostConfig) -> Result<Self, ContextError> {
        info!(?github, ?host, "building real execution context");
        let client = Arc::new(GithubClient::new(github)?);
        let store = FirmwareStore::new(Arc::new(GithubArchiveSource::new(Arc::clone(&client))));
        Ok(Self::new(
            client,
            Arc::new(store),
            Arc::new(SysfsDeviceProvider::new(
                host.usb_sysfs_root,
                host.usb_dev_root,
            )),
            Arc::new(ConfiguredDirectoryPicker::new(host.sdcard_dir)),
        ))
    }

    /// Context backed by in-memory fixtures. Makes no network or device I/O.
    pub fn mocked() -> Result<Self, ContextError> {
        info!("building mocked execution context");
        Ok(Self::new(
            Arc::new(mock::github()),
            Arc::new(FirmwareStore::new(Arc::new(mock::archives()?))),
            Arc::new(mock::devices()),
            Arc::new(mock::directory_picker()),
        ))
    }

    /// Pick the constructor once, from the executor's start-up arguments.
    pub fn for_args(
        args: &ExecutorArgs,
        github: GithubConfig,
        host: HostConfig,
    ) -> Result<Self, ContextError> {
        if args.mocked {
            Self::mocked()
        } else {
            Self::real(github, host)
        }
    }

    pub fn github(&self) -> &dyn ArtifactClient {
        self.github.as_ref()
    }

    pub fn firmware(&self) -> &FirmwareStore {
        &self.firmware
    }

    pub fn devices(&self) -> &dyn DeviceProvider {
        self.devices.as_ref()
    }

    pub fn file_system(&self) -> &dyn DirectoryPicker {
        self.file_system.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_config_builder_sets_sdcard() {
        let config = HostConfig::from_env().with_sdcard_dir("/media/sd");
        assert_eq!(config.sdcard_dir, Some(PathBuf::from("/media/sd")));
    }

    #[tokio::test]
    async fn mocked_context_serves_fixtures() {
        let context = ExecutionContext::mocked().unwrap();
        let releases = context.github().list_releases().await.unwrap();
        assert!(!releases.is_empty());
        assert!(!context.devices().list_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn real_context_builds_without_network() {
        let github = GithubConfig::new("http://127.0.0.1:9", "EdgeTX", "edgetx");
        let host = HostConfig {
            sdcard_dir: None,
            usb_sysfs_root: "/nonexistent/sys".into(),
            usb_dev_root: "/nonexistent/dev".into(),
        };
        let context = ExecutionContext::real(github, host).unwrap();
        assert!(context.devices().list_devices().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn unreachable_download_is_a_fetch_error() {
        let client = GithubClient::new(GithubConfig::new("http://127.0.0.1:9", "o", "r")).unwrap();
        let source = GithubArchiveSource::new(Arc::new(client));
        let err = source
            .fetch_archive("http://127.0.0.1:9/bundle.zip")
            .await
            .unwrap_err();
        assert!(matches!(err, FirmwareError::Fetch { .. }));
    }
}
