//! Firmware bundle archives
//!
//! A bundle is a zip archive. Targets are listed by a `fw.json` manifest:
//!
//! ```json
//! { "targets": [["RadioMaster TX16S", "tx16s-"], ["Jumper T-Pro", "tpro-"]] }
//! ```
//!
//! and each target's binary is the entry named `<code>-<version>.bin`.
//! Bundles without a manifest list their targets by `.bin` entry names.
//! CI artifacts sometimes wrap the bundle in one more zip; that layer is
//! unwrapped before parsing.

use std::io::{Cursor, Read};

use serde::{Deserialize, Serialize};
use tracing::debug;
use zip::ZipArchive;

use crate::error::FirmwareError;
use crate::Result;

/// Name of the target manifest inside a bundle.
pub const MANIFEST_FILE: &str = "fw.json";

/// One target listed by a bundle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetDescriptor {
    /// Target code, e.g. `tx16s`
    pub code: String,
    /// Display name, e.g. `RadioMaster TX16S`
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct Manifest {
    targets: Vec<(String, String)>,
}

/// A downloaded and indexed bundle archive.
#[derive(Debug)]
pub struct FirmwareBundle {
    url: String,
    archive: Vec<u8>,
    targets: Vec<TargetDescriptor>,
}

impl FirmwareBundle {
    /// Index the archive downloaded from `url`.
    pub fn parse(url: &str, archive: Vec<u8>) -> Result<Self> {
        let archive = unwrap_nested(url, archive)?;
        let names = entry_names(url, &archive)?;

        let targets = match names.iter().find(|n| basename(n) == MANIFEST_FILE) {
            Some(manifest_entry) => {
                let raw = read_entry(url, &archive, manifest_entry)?;
                let manifest: Manifest = serde_json::from_slice(&raw)
                    .map_err(|e| FirmwareError::malformed(url, format!("bad {MANIFEST_FILE}: {e}")))?;
                manifest
                    .targets
                    .into_iter()
                    .map(|(name, code)| TargetDescriptor {
                        code: code.trim_end_matches('-').to_string(),
                        name,
                    })
                    .collect()
            }
            None => targets_from_entry_names(&names),
        };

        debug!(url = %url, targets = targets.len(), "bundle indexed");
        Ok(FirmwareBundle {
            url: url.to_string(),
            archive,
            targets,
        })
    }

    /// Url the bundle was downloaded from (its cache key).
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Targets listed by the bundle, in manifest order.
    pub fn targets(&self) -> &[TargetDescriptor] {
        &self.targets
    }

    /// Look up one target by code.
    pub fn target(&self, code: &str) -> Option<&TargetDescriptor> {
        self.targets.iter().find(|t| t.code == code)
    }

    /// Extract the binary for `code`.
    pub fn extract(&self, code: &str) -> Result<Vec<u8>> {
        let not_found = || FirmwareError::NotFoundInArchive {
            url: self.url.clone(),
            target: code.to_string(),
        };

        if self.target(code).is_none() {
            return Err(not_found());
        }

        let prefix = format!("{code}-");
        let names = entry_names(&self.url, &self.archive)?;
        let entry = names
            .iter()
            .find(|n| {
                let base = basename(n);
                base.starts_with(&prefix) && base.ends_with(".bin")
            })
            .ok_or_else(not_found)?;

        read_entry(&self.url, &self.archive, entry)
    }
}

fn open<'a>(url: &str, archive: &'a [u8]) -> Result<ZipArchive<Cursor<&'a [u8]>>> {
    ZipArchive::new(Cursor::new(archive)).map_err(|e| FirmwareError::malformed(url, e))
}

fn entry_names(url: &str, archive: &[u8]) -> Result<Vec<String>> {
    let mut zip = open(url, archive)?;
    let mut names = Vec::with_capacity(zip.len());
    for i in 0..zip.len() {
        let entry = zip
            .by_index(i)
            .map_err(|e| FirmwareError::malformed(url, e))?;
        if !entry.is_dir() {
            names.push(entry.name().to_string());
        }
    }
    Ok(names)
}

fn read_entry(url: &str, archive: &[u8], name: &str) -> Result<Vec<u8>> {
    let mut zip = open(url, archive)?;
    let mut entry = zip
        .by_name(name)
        .map_err(|e| FirmwareError::malformed(url, e))?;
    let mut data = Vec::with_capacity(capacity_hint(entry.size(), archive.len()));
    entry
        .read_to_end(&mut data)
        .map_err(|e| FirmwareError::malformed(url, e))?;
    Ok(data)
}

/// Pre-allocation for an entry. The declared size comes from the archive
/// header, so it is bounded by the archive's own size.
fn capacity_hint(declared: u64, archive_len: usize) -> usize {
    let bound = (archive_len as u64).saturating_mul(4);
    usize::try_from(declared.min(bound)).unwrap_or(0)
}

/// Replace an archive that only wraps a single inner zip by that inner zip.
fn unwrap_nested(url: &str, archive: Vec<u8>) -> Result<Vec<u8>> {
    let names = entry_names(url, &archive)?;
    let has_content = names.iter().any(|n| {
        let base = basename(n);
        base == MANIFEST_FILE || base.ends_with(".bin")
    });
    let inner: Vec<&String> = names.iter().filter(|n| n.ends_with(".zip")).collect();

    if has_content || inner.len() != 1 {
        return Ok(archive);
    }

    debug!(url = %url, inner = %inner[0], "unwrapping nested bundle archive");
    read_entry(url, &archive, inner[0])
}

fn targets_from_entry_names(names: &[String]) -> Vec<TargetDescriptor> {
    let mut targets: Vec<TargetDescriptor> = Vec::new();
    for name in names {
        let base = basename(name);
        let Some(stem) = base.strip_suffix(".bin") else {
            continue;
        };
        let Some((code, _version)) = stem.split_once('-') else {
            continue;
        };
        if code.is_empty() || targets.iter().any(|t| t.code == code) {
            continue;
        }
        targets.push(TargetDescriptor {
            code: code.to_string(),
            name: code.to_string(),
        });
    }
    targets
}

fn basename(name: &str) -> &str {
    name.rsplit('/').next().unwrap_or(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::BundleBuilder;

    const URL: &str = "https://example.invalid/edgetx-firmware.zip";

    #[test]
    fn manifest_targets_strip_trailing_dash() {
        let archive = BundleBuilder::new()
            .target("RadioMaster TX16S", "tx16s", b"tx16s-image")
            .target("FrSky X10 Express", "x10express", b"x10-image")
            .build()
            .unwrap();

        let bundle = FirmwareBundle::parse(URL, archive).unwrap();
        assert_eq!(
            bundle.targets(),
            &[
                TargetDescriptor {
                    code: "tx16s".into(),
                    name: "RadioMaster TX16S".into()
                },
                TargetDescriptor {
                    code: "x10express".into(),
                    name: "FrSky X10 Express".into()
                },
            ]
        );
    }

    #[test]
    fn extract_returns_exact_entry_bytes() {
        let archive = BundleBuilder::new()
            .target("X10", "x10", b"x10 bytes")
            .target("X10 Express", "x10express", b"x10 express bytes")
            .build()
            .unwrap();
        let bundle = FirmwareBundle::parse(URL, archive).unwrap();

        assert_eq!(bundle.extract("x10").unwrap(), b"x10 bytes");
        assert_eq!(bundle.extract("x10express").unwrap(), b"x10 express bytes");
    }

    #[test]
    fn extract_unknown_target_is_not_found_in_archive() {
        let archive = BundleBuilder::new()
            .target("TX16S", "tx16s", b"image")
            .build()
            .unwrap();
        let bundle = FirmwareBundle::parse(URL, archive).unwrap();

        assert_eq!(
            bundle.extract("nv14"),
            Err(FirmwareError::NotFoundInArchive {
                url: URL.to_string(),
                target: "nv14".to_string()
            })
        );
    }

    #[test]
    fn listed_target_without_binary_is_not_found_in_archive() {
        let archive = BundleBuilder::new()
            .manifest_only("Phantom", "ghost")
            .build()
            .unwrap();
        let bundle = FirmwareBundle::parse(URL, archive).unwrap();

        assert!(bundle.target("ghost").is_some());
        assert!(matches!(
            bundle.extract("ghost"),
            Err(FirmwareError::NotFoundInArchive { .. })
        ));
    }

    #[test]
    fn bundle_without_manifest_lists_bin_entries() {
        let archive = BundleBuilder::new()
            .without_manifest()
            .file("firmware/tx16s-v2.9.0-abc.bin", b"a")
            .file("firmware/t12-v2.9.0-abc.bin", b"b")
            .file("README.txt", b"c")
            .build()
            .unwrap();
        let bundle = FirmwareBundle::parse(URL, archive).unwrap();

        let codes: Vec<&str> = bundle.targets().iter().map(|t| t.code.as_str()).collect();
        assert_eq!(codes, vec!["tx16s", "t12"]);
        assert_eq!(bundle.extract("t12").unwrap(), b"b");
    }

    #[test]
    fn nested_artifact_archive_is_unwrapped() {
        let inner = BundleBuilder::new()
            .target("TX16S", "tx16s", b"inner image")
            .build()
            .unwrap();
        let outer = BundleBuilder::new()
            .without_manifest()
            .file("edgetx-firmware-pr-1234.zip", &inner)
            .build()
            .unwrap();

        let bundle = FirmwareBundle::parse(URL, outer).unwrap();
        assert_eq!(bundle.extract("tx16s").unwrap(), b"inner image");
    }

    #[test]
    fn declared_entry_size_does_not_drive_allocation() {
        assert_eq!(capacity_hint(u64::MAX, 1024), 4096);
        assert_eq!(capacity_hint(100, 1024), 100);
        assert_eq!(capacity_hint(10, 0), 0);
    }

    #[test]
    fn garbage_is_malformed() {
        let err = FirmwareBundle::parse(URL, b"definitely not a zip".to_vec()).unwrap_err();
        assert!(matches!(err, FirmwareError::MalformedArchive { .. }));
    }

    #[test]
    fn bad_manifest_is_malformed() {
        let archive = BundleBuilder::new()
            .without_manifest()
            .file(MANIFEST_FILE, b"{ not json")
            .build()
            .unwrap();
        let err = FirmwareBundle::parse(URL, archive).unwrap_err();
        assert!(err.to_string().contains("bad fw.json"));
    }
}
