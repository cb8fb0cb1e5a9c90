//! Firmware store behaviour seen from outside the crate.

use std::sync::Arc;
use std::time::Duration;

use buddy_firmware::fakes::{BundleBuilder, MemoryArchiveSource};
use buddy_firmware::{FirmwareError, FirmwareStore};

const RELEASE_URL: &str = "https://github.com/EdgeTX/edgetx/releases/download/v2.9.0/edgetx-firmware-v2.9.0.zip";

fn release_bundle() -> Vec<u8> {
    BundleBuilder::new()
        .target("RadioMaster TX16S", "tx16s", b"\x00tx16s firmware\xff")
        .target("FrSky X9D Plus 2019", "x9d+2019", b"x9d firmware")
        .target("Jumper T-Lite", "tlite", b"tlite firmware")
        .build()
        .unwrap()
}

#[tokio::test]
async fn concurrent_first_listing_downloads_once() {
    let source = Arc::new(
        MemoryArchiveSource::new()
            .with_archive(RELEASE_URL, release_bundle())
            .with_latency(Duration::from_millis(50)),
    );
    let store = Arc::new(FirmwareStore::new(source.clone()));

    let (a, b) = tokio::join!(store.list_targets(RELEASE_URL), store.list_targets(RELEASE_URL));

    let a = a.unwrap();
    let b = b.unwrap();
    assert_eq!(a, b);
    assert_eq!(a.len(), 3);
    assert_eq!(source.fetches(RELEASE_URL), 1);
}

#[tokio::test]
async fn many_concurrent_callers_share_one_download() {
    let source = Arc::new(
        MemoryArchiveSource::new()
            .with_archive(RELEASE_URL, release_bundle())
            .with_latency(Duration::from_millis(20)),
    );
    let store = Arc::new(FirmwareStore::new(source.clone()));

    let tasks: Vec<_> = (0..16)
        .map(|_| {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.fetch_binary(RELEASE_URL, "tlite").await })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        assert_eq!(result.unwrap().unwrap(), b"tlite firmware");
    }
    assert_eq!(source.total_fetches(), 1);
}

#[tokio::test]
async fn binary_bytes_are_exact_and_repeatable() {
    let source = Arc::new(MemoryArchiveSource::new().with_archive(RELEASE_URL, release_bundle()));
    let store = FirmwareStore::new(source);

    let first = store.fetch_binary(RELEASE_URL, "tx16s").await.unwrap();
    let second = store.fetch_binary(RELEASE_URL, "tx16s").await.unwrap();

    assert_eq!(first, b"\x00tx16s firmware\xff");
    assert_eq!(first, second);
}

#[tokio::test]
async fn codes_with_shared_prefix_do_not_collide() {
    let archive = BundleBuilder::new()
        .target("FrSky X10", "x10", b"x10")
        .target("FrSky X10 Express", "x10express", b"x10express")
        .build()
        .unwrap();
    let source = Arc::new(MemoryArchiveSource::new().with_archive(RELEASE_URL, archive));
    let store = FirmwareStore::new(source);

    assert_eq!(store.fetch_binary(RELEASE_URL, "x10").await.unwrap(), b"x10");
    assert_eq!(
        store.fetch_binary(RELEASE_URL, "x10express").await.unwrap(),
        b"x10express"
    );
}

#[tokio::test]
async fn absent_target_is_not_found_in_archive() {
    let source = Arc::new(MemoryArchiveSource::new().with_archive(RELEASE_URL, release_bundle()));
    let store = FirmwareStore::new(source);

    let err = store.fetch_binary(RELEASE_URL, "nv14").await.unwrap_err();
    assert_eq!(
        err,
        FirmwareError::NotFoundInArchive {
            url: RELEASE_URL.to_string(),
            target: "nv14".to_string(),
        }
    );
}

#[tokio::test]
async fn corrupt_download_is_malformed_and_not_cached() {
    let source = Arc::new(MemoryArchiveSource::new().with_archive(RELEASE_URL, b"<html>rate limited</html>".to_vec()));
    let store = FirmwareStore::new(source.clone());

    let err = store.list_targets(RELEASE_URL).await.unwrap_err();
    assert!(matches!(err, FirmwareError::MalformedArchive { .. }));

    source.insert(RELEASE_URL, release_bundle());
    assert_eq!(store.list_targets(RELEASE_URL).await.unwrap().len(), 3);
}

#[tokio::test]
async fn local_firmware_round_trip() {
    let store = FirmwareStore::new(Arc::new(MemoryArchiveSource::new()));

    let stored = store.register_local_firmware(b"my build".to_vec(), Some("custom.bin".into()));
    let found = store.local_firmware_by_id(&stored.id).unwrap();

    assert_eq!(found.data, b"my build");
    assert_eq!(found.name.as_deref(), Some("custom.bin"));
    assert!(store.local_firmware_by_id("not-registered").is_none());
}
