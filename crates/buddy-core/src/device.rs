//! Device capability provider
//!
//! The flashing protocol itself lives elsewhere; this module only finds
//! USB devices, asks for one, and opens a writable handle on it.
//!
//! Exclusivity rules enforced by [`DeviceGate`]:
//! - at most one `request_device` selection runs at a time
//! - a device has at most one open writable handle

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};

use crate::error::DeviceError;

/// USB vendor id of STM32 bootloaders in DFU mode.
pub const STM32_DFU_VENDOR_ID: u16 = 0x0483;
/// USB product id of STM32 bootloaders in DFU mode.
pub const STM32_DFU_PRODUCT_ID: u16 = 0xdf11;

/// A USB device as seen by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub id: String,
    pub vendor_id: u16,
    pub product_id: u16,
    pub product_name: Option<String>,
    pub serial_number: Option<String>,
}

/// Narrows which devices a selection may return. Empty matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
}

impl DeviceFilter {
    pub fn matches(&self, device: &DeviceDescriptor) -> bool {
        self.vendor_id.map_or(true, |v| v == device.vendor_id)
            && self.product_id.map_or(true, |p| p == device.product_id)
    }
}

/// Capability over attached USB devices.
#[async_trait]
pub trait DeviceProvider: Send + Sync {
    /// Devices currently attached.
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError>;

    /// Ask for one device. `Ok(None)` means the user cancelled or nothing matched.
    async fn request_device(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Option<DeviceDescriptor>, DeviceError>;

    /// Open a writable stream to `device`.
    async fn open_writable(&self, device: &DeviceDescriptor) -> Result<DeviceHandle, DeviceError>;
}

/// Writable stream to a device. Dropping it releases the device.
pub struct DeviceHandle {
    descriptor: DeviceDescriptor,
    writer: Box<dyn AsyncWrite + Send + Unpin>,
    _lease: DeviceLease,
}

impl DeviceHandle {
    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub async fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.writer.write_all(data).await
    }

    pub async fn flush(&mut self) -> io::Result<()> {
        self.writer.flush().await
    }
}

impl std::fmt::Debug for DeviceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceHandle")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Tracks the running selection and the devices currently open.
#[derive(Debug, Default)]
pub struct DeviceGate {
    selecting: AtomicBool,
    leased: Arc<Mutex<HashSet<String>>>,
}

impl DeviceGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a selection; fails while another one is running.
    pub fn begin_selection(&self) -> Result<SelectionGuard<'_>, DeviceError> {
        if self
            .selecting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(DeviceError::Busy(
                "another device selection is in progress".to_string(),
            ));
        }
        Ok(SelectionGuard { gate: self })
    }

    /// Reserve `id` for writing; fails while it is already open.
    pub fn lease(&self, id: &str) -> Result<DeviceLease, DeviceError> {
        let mut leased = self.leased.lock().unwrap_or_else(|e| e.into_inner());
        if !leased.insert(id.to_string()) {
            return Err(DeviceError::Busy(format!("device {id} is already open")));
        }
        Ok(DeviceLease {
            id: id.to_string(),
            leased: Arc::clone(&self.leased),
        })
    }

    pub fn is_leased(&self, id: &str) -> bool {
        self.leased
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(id)
    }
}

/// Held while a selection runs.
pub struct SelectionGuard<'a> {
    gate: &'a DeviceGate,
}

impl Drop for SelectionGuard<'_> {
    fn drop(&mut self) {
        self.gate.selecting.store(false, Ordering::Release);
    }
}

/// Held while a device is open for writing.
#[derive(Debug)]
pub struct DeviceLease {
    id: String,
    leased: Arc<Mutex<HashSet<String>>>,
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        self.leased
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

/// Linux provider reading `/sys/bus/usb/devices`.
///
/// There is no consent prompt on a headless host: a selection returns the
/// first attached device matching the filter.
pub struct SysfsDeviceProvider {
    sysfs_root: PathBuf,
    dev_root: PathBuf,
    gate: DeviceGate,
}

impl SysfsDeviceProvider {
    pub fn new(sysfs_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        SysfsDeviceProvider {
            sysfs_root: sysfs_root.into(),
            dev_root: dev_root.into(),
            gate: DeviceGate::new(),
        }
    }

    /// Character device node for the sysfs entry `id`.
    async fn node_path(&self, id: &str) -> Result<PathBuf, DeviceError> {
        let entry = self.sysfs_root.join(id);
        let busnum = read_attr(&entry, "busnum").await;
        let devnum = read_attr(&entry, "devnum").await;
        match (
            busnum.and_then(|b| b.parse::<u16>().ok()),
            devnum.and_then(|d| d.parse::<u16>().ok()),
        ) {
            (Some(bus), Some(dev)) => Ok(self.dev_root.join(format!("{bus:03}")).join(format!("{dev:03}"))),
            _ => Err(DeviceError::Unknown(id.to_string())),
        }
    }
}

async fn read_attr(dir: &Path, name: &str) -> Option<String> {
    tokio::fs::read_to_string(dir.join(name))
        .await
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

async fn read_sysfs_device(dir: &Path, id: &str) -> Option<DeviceDescriptor> {
    let vendor_id = u16::from_str_radix(&read_attr(dir, "idVendor").await?, 16).ok()?;
    let product_id = u16::from_str_radix(&read_attr(dir, "idProduct").await?, 16).ok()?;
    Some(DeviceDescriptor {
        id: id.to_string(),
        vendor_id,
        product_id,
        product_name: read_attr(dir, "product").await,
        serial_number: read_attr(dir, "serial").await,
    })
}

#[async_trait]
impl DeviceProvider for SysfsDeviceProvider {
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        let mut devices = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.sysfs_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(devices),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let id = entry.file_name().to_string_lossy().into_owned();
            // Interface entries look like `1-4:1.0`.
            if id.contains(':') {
                continue;
            }
            if let Some(device) = read_sysfs_device(&entry.path(), &id).await {
                devices.push(device);
            }
        }

        devices.sort_by(|a, b| a.id.cmp(&b.id));
        debug!(count = devices.len(), root = %self.sysfs_root.display(), "usb devices enumerated");
        Ok(devices)
    }

    async fn request_device(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Option<DeviceDescriptor>, DeviceError> {
        let _selection = self.gate.begin_selection()?;
        let device = self
            .list_devices()
            .await?
            .into_iter()
            .find(|d| filter.matches(d));
        info!(device = ?device.as_ref().map(|d| &d.id), "device selection finished");
        Ok(device)
    }

    async fn open_writable(&self, device: &DeviceDescriptor) -> Result<DeviceHandle, DeviceError> {
        let lease = self.gate.lease(&device.id)?;
        let node = self.node_path(&device.id).await?;
        let file = tokio::fs::OpenOptions::new().write(true).open(&node).await?;
        info!(device = %device.id, node = %node.display(), "device opened for writing");
        Ok(DeviceHandle {
            descriptor: device.clone(),
            writer: Box::new(file),
            _lease: lease,
        })
    }
}

type WrittenBytes = Arc<Mutex<HashMap<String, Vec<u8>>>>;

/// In-memory provider for mocked contexts and tests.
#[derive(Default)]
pub struct MemoryDeviceProvider {
    devices: Vec<DeviceDescriptor>,
    consent_delay: Option<Duration>,
    cancels: bool,
    gate: DeviceGate,
    written: WrittenBytes,
}

impl MemoryDeviceProvider {
    pub fn new(devices: Vec<DeviceDescriptor>) -> Self {
        MemoryDeviceProvider {
            devices,
            ..Default::default()
        }
    }

    /// Simulate a consent prompt that takes `delay` to answer.
    pub fn with_consent_delay(mut self, delay: Duration) -> Self {
        self.consent_delay = Some(delay);
        self
    }

    /// Simulate a user who dismisses every prompt.
    pub fn cancelling(mut self) -> Self {
        self.cancels = true;
        self
    }

    /// Bytes written to `id` so far.
    pub fn written(&self, id: &str) -> Vec<u8> {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeviceProvider for MemoryDeviceProvider {
    async fn list_devices(&self) -> Result<Vec<DeviceDescriptor>, DeviceError> {
        Ok(self.devices.clone())
    }

    async fn request_device(
        &self,
        filter: &DeviceFilter,
    ) -> Result<Option<DeviceDescriptor>, DeviceError> {
        let _selection = self.gate.begin_selection()?;
        if let Some(delay) = self.consent_delay {
            tokio::time::sleep(delay).await;
        }
        if self.cancels {
            return Ok(None);
        }
        Ok(self.devices.iter().find(|d| filter.matches(d)).cloned())
    }

    async fn open_writable(&self, device: &DeviceDescriptor) -> Result<DeviceHandle, DeviceError> {
        if !self.devices.iter().any(|d| d.id == device.id) {
            return Err(DeviceError::Unknown(device.id.clone()));
        }
        let lease = self.gate.lease(&device.id)?;
        Ok(DeviceHandle {
            descriptor: device.clone(),
            writer: Box::new(MemorySink {
                id: device.id.clone(),
                written: Arc::clone(&self.written),
            }),
            _lease: lease,
        })
    }
}

struct MemorySink {
    id: String,
    written: WrittenBytes,
}

impl AsyncWrite for MemorySink {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.written
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(self.id.clone())
            .or_default()
            .extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
