//! Fixtures behind the mocked execution context.
//!
//! Two releases with firmware bundles, one pull request whose head commit
//! has a finished CI build and one without CI, two radios in DFU mode.

use buddy_firmware::fakes::{BundleBuilder, MemoryArchiveSource};
use buddy_github::fakes::MemoryArtifactClient;
use buddy_github::{
    Artifact, CheckRun, CheckRunApp, PullCommit, PullHead, PullRequest, Release, ReleaseAsset,
    WorkflowJob,
};

use crate::device::{
    DeviceDescriptor, MemoryDeviceProvider, STM32_DFU_PRODUCT_ID, STM32_DFU_VENDOR_ID,
};
use crate::filesystem::MemoryDirectoryPicker;

const DOWNLOADS: &str = "https://mock.edgetx.invalid";

pub const STABLE_TAG: &str = "v2.9.0";
pub const PRERELEASE_TAG: &str = "v2.10.0-rc1";
pub const CI_PR_NUMBER: u64 = 1234;
pub const CI_HEAD_SHA: &str = "f3a4c1d0b6e2a9587c4d1e0f9a8b7c6d5e4f3a2b";

/// Targets shipped in every mocked bundle: (display name, code)
pub const TARGETS: &[(&str, &str)] = &[
    ("RadioMaster TX16S", "tx16s"),
    ("RadioMaster Boxer", "boxer"),
    ("Jumper T16", "t16"),
    ("FrSky X10", "x10"),
    ("FrSky X10 Express", "x10express"),
    ("Flysky NV14", "nv14"),
];

pub fn release_bundle_url(tag: &str) -> String {
    format!("{DOWNLOADS}/releases/download/{tag}/edgetx-firmware-{tag}.zip")
}

pub fn pr_bundle_url(number: u64) -> String {
    format!("{DOWNLOADS}/actions/artifacts/edgetx-firmware-pr-{number}.zip")
}

/// Bytes of the mocked binary for `code` in the bundle labelled `label`.
pub fn binary(label: &str, code: &str) -> Vec<u8> {
    format!("EdgeTX {label} firmware for {code}").into_bytes()
}

fn bundle(label: &str) -> std::io::Result<Vec<u8>> {
    TARGETS
        .iter()
        .fold(BundleBuilder::new(), |builder, (name, code)| {
            builder.target(name, code, &binary(label, code))
        })
        .build()
}

fn release(id: u64, tag: &str, name: &str, prerelease: bool) -> Release {
    let mut release = Release::new(
        id,
        tag,
        vec![
            ReleaseAsset::new(id * 10 + 1, &format!("edgetx-firmware-{tag}.zip"), &release_bundle_url(tag)),
            ReleaseAsset::new(
                id * 10 + 2,
                &format!("edgetx-sdcard-sounds-{tag}.zip"),
                &format!("{DOWNLOADS}/releases/download/{tag}/sounds.zip"),
            ),
        ],
    );
    release.name = Some(name.to_string());
    release.body = Some(format!("Release notes for {tag}"));
    release.prerelease = prerelease;
    release
}

fn pull(number: u64, title: &str, label: &str, sha: &str) -> PullRequest {
    PullRequest {
        number,
        title: title.to_string(),
        body: Some(format!("Mocked pull request {number}")),
        head: PullHead {
            label: label.to_string(),
            sha: sha.to_string(),
            ref_name: label.split(':').last().unwrap_or(label).to_string(),
        },
        updated_at: None,
    }
}

fn check_run(id: u64, name: &str) -> CheckRun {
    CheckRun {
        id,
        name: name.to_string(),
        status: Some("completed".to_string()),
        conclusion: Some("success".to_string()),
        app: Some(CheckRunApp {
            slug: Some("github-actions".to_string()),
        }),
    }
}

/// Remote artifact fixtures.
pub fn github() -> MemoryArtifactClient {
    MemoryArtifactClient::new()
        .with_release(release(2, PRERELEASE_TAG, "EdgeTX \"Jolly Mon\" v2.10.0-rc1", true))
        .with_release(release(1, STABLE_TAG, "EdgeTX \"Providence\" v2.9.0", false))
        .with_pull(
            pull(CI_PR_NUMBER, "Add RadioMaster Boxer support", "edgetx:boxer", CI_HEAD_SHA),
            vec![
                PullCommit {
                    sha: "9b2e0aa4c3d1f5e6a7b8c9d0e1f2a3b4c5d6e7f8".to_string(),
                },
                PullCommit {
                    sha: CI_HEAD_SHA.to_string(),
                },
            ],
        )
        .with_pull(
            pull(1201, "Fix trainer port on NV14", "someone:nv14-trainer", "0c1d2e3f"),
            vec![PullCommit {
                sha: "0c1d2e3f".to_string(),
            }],
        )
        .with_check_runs(
            CI_HEAD_SHA,
            vec![check_run(5001, "lint"), check_run(5002, "Build (tx16s)")],
        )
        .with_job(WorkflowJob {
            id: 5002,
            run_id: 7001,
            name: "Build (tx16s)".to_string(),
            status: Some("completed".to_string()),
        })
        .with_run_artifacts(
            7001,
            vec![Artifact {
                id: 8001,
                name: format!("edgetx-firmware-pr-{CI_PR_NUMBER}"),
                archive_download_url: pr_bundle_url(CI_PR_NUMBER),
                expired: false,
            }],
        )
}

/// Bundle archives for every fixture url.
pub fn archives() -> std::io::Result<MemoryArchiveSource> {
    Ok(MemoryArchiveSource::new()
        .with_archive(&release_bundle_url(STABLE_TAG), bundle(STABLE_TAG)?)
        .with_archive(&release_bundle_url(PRERELEASE_TAG), bundle(PRERELEASE_TAG)?)
        .with_archive(
            &pr_bundle_url(CI_PR_NUMBER),
            // CI artifacts arrive wrapped in one more zip.
            BundleBuilder::new()
                .without_manifest()
                .file("edgetx-firmware.zip", &bundle("pr-1234")?)
                .build()?,
        ))
}

pub fn devices() -> MemoryDeviceProvider {
    MemoryDeviceProvider::new(vec![
        DeviceDescriptor {
            id: "1-4".to_string(),
            vendor_id: STM32_DFU_VENDOR_ID,
            product_id: STM32_DFU_PRODUCT_ID,
            product_name: Some("STM32  BOOTLOADER".to_string()),
            serial_number: Some("356C35553235".to_string()),
        },
        DeviceDescriptor {
            id: "1-6".to_string(),
            vendor_id: STM32_DFU_VENDOR_ID,
            product_id: STM32_DFU_PRODUCT_ID,
            product_name: Some("STM32  BOOTLOADER".to_string()),
            serial_number: Some("2067376B5748".to_string()),
        },
    ])
}

pub fn directory_picker() -> MemoryDirectoryPicker {
    MemoryDirectoryPicker::new("/mock/sdcard")
}
