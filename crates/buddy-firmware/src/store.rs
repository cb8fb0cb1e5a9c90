//! Firmware store
//!
//! Resolves `(bundle url, target code)` to binary bytes. Bundles are
//! downloaded once per url and kept for the lifetime of the store; two
//! concurrent first requests for the same url share a single download.
//! A failed download leaves nothing cached, so the next request retries.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{broadcast, OnceCell};
use tracing::{debug, info, instrument, warn};

use crate::bundle::{FirmwareBundle, TargetDescriptor};
use crate::error::FirmwareError;
use crate::local::{IdGenerator, LocalFirmware, LocalFirmwareRegistry};
use crate::source::ArchiveSource;
use crate::Result;

const EVENT_CAPACITY: usize = 64;

type BundleCell = Arc<OnceCell<Arc<FirmwareBundle>>>;

/// Lifecycle of a bundle download, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StoreEvent {
    #[serde(rename_all = "camelCase")]
    BundleDownloadStarted { url: String },
    #[serde(rename_all = "camelCase")]
    BundleReady { url: String, targets: usize },
    #[serde(rename_all = "camelCase")]
    BundleFailed { url: String, error: String },
}

impl StoreEvent {
    /// Topic name used when the event leaves the process.
    pub fn topic(&self) -> &'static str {
        match self {
            StoreEvent::BundleDownloadStarted { .. } => "firmware.bundleDownloadStarted",
            StoreEvent::BundleReady { .. } => "firmware.bundleReady",
            StoreEvent::BundleFailed { .. } => "firmware.bundleFailed",
        }
    }
}

/// Download counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub downloads: u64,
    pub cache_hits: u64,
}

/// Bundle cache, binary memo and local firmware registry.
pub struct FirmwareStore {
    source: Arc<dyn ArchiveSource>,
    bundles: Mutex<HashMap<String, BundleCell>>,
    binaries: Mutex<HashMap<(String, String), Arc<Vec<u8>>>>,
    local: LocalFirmwareRegistry,
    events: broadcast::Sender<StoreEvent>,
    downloads: AtomicU64,
    cache_hits: AtomicU64,
}

impl FirmwareStore {
    pub fn new(source: Arc<dyn ArchiveSource>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        FirmwareStore {
            source,
            bundles: Mutex::new(HashMap::new()),
            binaries: Mutex::new(HashMap::new()),
            local: LocalFirmwareRegistry::new(),
            events,
            downloads: AtomicU64::new(0),
            cache_hits: AtomicU64::new(0),
        }
    }

    /// Use `next_id` for local firmware ids instead of random UUIDs.
    pub fn with_id_generator(mut self, next_id: IdGenerator) -> Self {
        self.local = LocalFirmwareRegistry::with_id_generator(next_id);
        self
    }

    /// Receive bundle lifecycle events from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            downloads: self.downloads.load(Ordering::Relaxed),
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
        }
    }

    /// Targets contained in the bundle at `bundle_url`.
    #[instrument(skip(self), level = "debug")]
    pub async fn list_targets(&self, bundle_url: &str) -> Result<Vec<TargetDescriptor>> {
        let bundle = self.bundle(bundle_url).await?;
        Ok(bundle.targets().to_vec())
    }

    /// Binary for `target_code` inside the bundle at `bundle_url`.
    #[instrument(skip(self), level = "debug")]
    pub async fn fetch_binary(&self, bundle_url: &str, target_code: &str) -> Result<Vec<u8>> {
        let key = (bundle_url.to_string(), target_code.to_string());
        if let Some(data) = self.lock_binaries().get(&key) {
            return Ok(data.as_ref().clone());
        }

        let bundle = self.bundle(bundle_url).await?;
        let code = target_code.to_string();
        let data = tokio::task::spawn_blocking(move || bundle.extract(&code))
            .await
            .map_err(|e| FirmwareError::malformed(bundle_url, e))??;

        let data = Arc::new(data);
        let memo = Arc::clone(self.lock_binaries().entry(key).or_insert(data));
        Ok(memo.as_ref().clone())
    }

    /// Keep user-supplied firmware for the session.
    pub fn register_local_firmware(&self, data: Vec<u8>, name: Option<String>) -> Arc<LocalFirmware> {
        let firmware = self.local.register(data, name);
        info!(id = %firmware.id, bytes = firmware.data.len(), digest = %firmware.digest, "local firmware registered");
        firmware
    }

    pub fn local_firmware_by_id(&self, id: &str) -> Option<Arc<LocalFirmware>> {
        self.local.get(id)
    }

    /// Parsed bundle for `url`, downloading it if this is the first request.
    async fn bundle(&self, url: &str) -> Result<Arc<FirmwareBundle>> {
        let cell = {
            let mut bundles = self.bundles.lock().unwrap_or_else(|e| e.into_inner());
            Arc::clone(bundles.entry(url.to_string()).or_default())
        };

        if let Some(bundle) = cell.get() {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            debug!(url = %url, "bundle cache hit");
            return Ok(Arc::clone(bundle));
        }

        let bundle = cell.get_or_try_init(|| self.download(url)).await?;
        Ok(Arc::clone(bundle))
    }

    async fn download(&self, url: &str) -> Result<Arc<FirmwareBundle>> {
        self.downloads.fetch_add(1, Ordering::Relaxed);
        self.publish(StoreEvent::BundleDownloadStarted {
            url: url.to_string(),
        });

        match self.fetch_and_parse(url).await {
            Ok(bundle) => {
                info!(url = %url, targets = bundle.targets().len(), "bundle ready");
                self.publish(StoreEvent::BundleReady {
                    url: url.to_string(),
                    targets: bundle.targets().len(),
                });
                Ok(bundle)
            }
            Err(e) => {
                warn!(url = %url, error = %e, "bundle download failed");
                self.publish(StoreEvent::BundleFailed {
                    url: url.to_string(),
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    async fn fetch_and_parse(&self, url: &str) -> Result<Arc<FirmwareBundle>> {
        let archive = self.source.fetch_archive(url).await?;
        let owned_url = url.to_string();
        let bundle = tokio::task::spawn_blocking(move || FirmwareBundle::parse(&owned_url, archive))
            .await
            .map_err(|e| FirmwareError::malformed(url, e))??;
        Ok(Arc::new(bundle))
    }

    fn publish(&self, event: StoreEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn lock_binaries(&self) -> std::sync::MutexGuard<'_, HashMap<(String, String), Arc<Vec<u8>>>> {
        self.binaries.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{BundleBuilder, MemoryArchiveSource};

    const URL: &str = "https://example.invalid/bundle.zip";

    fn store_with(source: Arc<MemoryArchiveSource>) -> FirmwareStore {
        FirmwareStore::new(source)
    }

    #[tokio::test]
    async fn second_list_is_a_cache_hit() {
        let archive = BundleBuilder::new()
            .target("TX16S", "tx16s", b"x")
            .build()
            .unwrap();
        let source = Arc::new(MemoryArchiveSource::new().with_archive(URL, archive));
        let store = store_with(Arc::clone(&source));

        store.list_targets(URL).await.unwrap();
        store.list_targets(URL).await.unwrap();

        assert_eq!(source.fetches(URL), 1);
        assert_eq!(
            store.stats(),
            StoreStats {
                downloads: 1,
                cache_hits: 1
            }
        );
    }

    #[tokio::test]
    async fn failed_download_is_retried() {
        let source = Arc::new(MemoryArchiveSource::new());
        let store = store_with(Arc::clone(&source));

        let err = store.list_targets(URL).await.unwrap_err();
        assert!(matches!(err, FirmwareError::Fetch { .. }));

        let archive = BundleBuilder::new()
            .target("TX16S", "tx16s", b"x")
            .build()
            .unwrap();
        source.insert(URL, archive);

        assert_eq!(store.list_targets(URL).await.unwrap().len(), 1);
        assert_eq!(source.fetches(URL), 2);
    }

    #[tokio::test]
    async fn events_trace_download_lifecycle() {
        let archive = BundleBuilder::new()
            .target("TX16S", "tx16s", b"x")
            .target("T16", "t16", b"y")
            .build()
            .unwrap();
        let source = Arc::new(MemoryArchiveSource::new().with_archive(URL, archive));
        let store = store_with(source);
        let mut events = store.subscribe();

        store.list_targets(URL).await.unwrap();
        store.list_targets("https://example.invalid/missing.zip").await.unwrap_err();

        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::BundleDownloadStarted { url: URL.into() }
        );
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::BundleReady {
                url: URL.into(),
                targets: 2
            }
        );
        assert_eq!(events.recv().await.unwrap().topic(), "firmware.bundleDownloadStarted");
        assert_eq!(events.recv().await.unwrap().topic(), "firmware.bundleFailed");
    }

    #[test]
    fn event_serialises_with_type_tag() {
        let event = StoreEvent::BundleReady {
            url: "u".into(),
            targets: 3,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"type": "bundleReady", "url": "u", "targets": 3})
        );
    }

    #[tokio::test]
    async fn custom_id_generator_is_used_for_local_firmware() {
        let store = store_with(Arc::new(MemoryArchiveSource::new()))
            .with_id_generator(Arc::new(|| "abc".to_string()));

        assert!(store.local_firmware_by_id("abc").is_none());
        let stored = store.register_local_firmware(vec![9, 9], None);
        assert_eq!(stored.id, "abc");
        assert_eq!(store.local_firmware_by_id("abc").unwrap().data, vec![9, 9]);
    }
}
