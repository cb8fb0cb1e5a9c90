//! Resolvers of the firmware graph
//!
//! ```text
//! type Query {
//!   edgeTxReleases: [EdgeTxRelease!]!
//!   edgeTxRelease(id: ID!): EdgeTxRelease
//!   edgeTxPrs: [EdgeTxPr!]!
//!   edgeTxPr(id: ID!): EdgeTxPr
//!   localFirmware(byId: ID!): LocalEdgeTxFirmware
//!   flashableDevices: [FlashableDevice!]!
//! }
//!
//! type Mutation {
//!   registerLocalFirmware(fileName: String, firmwareBase64Data: String!): LocalEdgeTxFirmware!
//!   requestFlashableDevice(vendorId: Int, productId: Int): FlashableDevice
//!   pickWritableDirectory(id: String): WritableDirectory
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use buddy_firmware::{LocalFirmware, TargetDescriptor};
use buddy_github::{PullCommit, PullRequest, Release, ReleaseAsset};
use tracing::debug;

use crate::context::ExecutionContext;
use crate::device::{DeviceDescriptor, DeviceFilter};
use crate::filesystem::{DirectoryHandle, DirectoryOptions};
use crate::schema::execution::{
    Arguments, ErrorCode, FieldError, FieldResult, ObjectResolver, Resolved,
};
use crate::schema::lazy::Lazy;

/// Asset and artifact names containing this are firmware bundles.
pub const FIRMWARE_INDICATOR: &str = "firmware";

const CI_APP_SLUG: &str = "github-actions";
const CI_BUILD_INDICATOR: &str = "build";

pub struct QueryRoot;

#[async_trait]
impl ObjectResolver for QueryRoot {
    fn type_name(&self) -> &'static str {
        "Query"
    }

    async fn resolve_field(
        &self,
        field: &str,
        args: &Arguments,
        ctx: &ExecutionContext,
    ) -> FieldResult {
        match field {
            "edgeTxReleases" => {
                let releases = ctx.github().list_releases().await?;
                Ok(Resolved::list(releases.into_iter().map(ReleaseNode)))
            }
            "edgeTxRelease" => {
                let tag = args.id("id")?;
                let release = ctx.github().release_by_tag(&tag).await?;
                Ok(Resolved::optional(release.map(ReleaseNode)))
            }
            "edgeTxPrs" => {
                let pulls = ctx.github().list_open_pulls().await?;
                Ok(Resolved::list(pulls.into_iter().map(PrNode::new)))
            }
            "edgeTxPr" => {
                let id = args.id("id")?;
                let number: u64 = id
                    .parse()
                    .map_err(|_| FieldError::bad_input(format!("\"{id}\" is not a pull request number")))?;
                let pull = ctx.github().pull(number).await?;
                Ok(Resolved::optional(pull.map(PrNode::new)))
            }
            "localFirmware" => {
                let id = args.id("byId")?;
                let firmware = ctx.firmware().local_firmware_by_id(&id);
                Ok(Resolved::optional(firmware.map(LocalFirmwareNode)))
            }
            "flashableDevices" => {
                let devices = ctx.devices().list_devices().await?;
                Ok(Resolved::list(devices.into_iter().map(DeviceNode)))
            }
            other => Err(FieldError::unknown_field(self.type_name(), other)),
        }
    }
}

pub struct MutationRoot;

#[async_trait]
impl ObjectResolver for MutationRoot {
    fn type_name(&self) -> &'static str {
        "Mutation"
    }

    async fn resolve_field(
        &self,
        field: &str,
        args: &Arguments,
        ctx: &ExecutionContext,
    ) -> FieldResult {
        match field {
            "registerLocalFirmware" => {
                let encoded = args.required_string("firmwareBase64Data")?;
                let data = STANDARD.decode(encoded.trim()).map_err(|e| {
                    FieldError::bad_input(format!("firmwareBase64Data is not valid base64: {e}"))
                })?;
                let name = args.string("fileName")?;
                let firmware = ctx.firmware().register_local_firmware(data, name);
                Ok(Resolved::object(LocalFirmwareNode(firmware)))
            }
            "requestFlashableDevice" => {
                let filter = DeviceFilter {
                    vendor_id: usb_id(args, "vendorId")?,
                    product_id: usb_id(args, "productId")?,
                };
                let device = ctx.devices().request_device(&filter).await?;
                Ok(Resolved::optional(device.map(DeviceNode)))
            }
            "pickWritableDirectory" => {
                let options = DirectoryOptions {
                    id: args.string("id")?,
                };
                let directory = ctx
                    .file_system()
                    .request_writable_directory(&options)
                    .await
                    .map_err(|e| {
                        FieldError::new(ErrorCode::FieldError, format!("cannot open directory: {e}"))
                    })?;
                Ok(Resolved::optional(directory.map(DirectoryNode)))
            }
            other => Err(FieldError::unknown_field(self.type_name(), other)),
        }
    }
}

fn usb_id(args: &Arguments, name: &str) -> Result<Option<u16>, FieldError> {
    args.int(name)?
        .map(|v| {
            u16::try_from(v)
                .map_err(|_| FieldError::bad_input(format!("{name} {v} is not a USB id")))
        })
        .transpose()
}

struct ReleaseNode(Release);

#[async_trait]
impl ObjectResolver for ReleaseNode {
    fn type_name(&self) -> &'static str {
        "EdgeTxRelease"
    }

    async fn resolve_field(&self, field: &str, _: &Arguments, _: &ExecutionContext) -> FieldResult {
        let release = &self.0;
        match field {
            "id" => Ok(Resolved::value(release.tag_name.clone())),
            "name" => Ok(Resolved::value(
                release.name.clone().filter(|n| !n.is_empty()).unwrap_or_else(|| release.tag_name.clone()),
            )),
            "description" => Ok(Resolved::scalar(release.body.clone())),
            "isPrerelease" => Ok(Resolved::value(release.prerelease)),
            "assets" => Ok(Resolved::list(release.assets.iter().cloned().map(AssetNode))),
            "firmwareBundle" => {
                let asset = release
                    .assets
                    .iter()
                    .find(|a| a.name.contains(FIRMWARE_INDICATOR))
                    .ok_or_else(|| {
                        FieldError::resolution(format!(
                            "Could not find firmware bundle for release {}",
                            release.tag_name
                        ))
                    })?;
                Ok(Resolved::object(BundleNode::new(
                    asset.id,
                    &asset.name,
                    &asset.browser_download_url,
                )))
            }
            other => Err(FieldError::unknown_field(self.type_name(), other)),
        }
    }
}

struct AssetNode(ReleaseAsset);

#[async_trait]
impl ObjectResolver for AssetNode {
    fn type_name(&self) -> &'static str {
        "EdgeTxReleaseAsset"
    }

    async fn resolve_field(&self, field: &str, _: &Arguments, _: &ExecutionContext) -> FieldResult {
        match field {
            "id" => Ok(Resolved::value(self.0.id.to_string())),
            "name" => Ok(Resolved::value(self.0.name.clone())),
            "url" => Ok(Resolved::value(self.0.browser_download_url.clone())),
            other => Err(FieldError::unknown_field(self.type_name(), other)),
        }
    }
}

struct PrNode {
    pull: PullRequest,
    commits: Lazy<u64, Vec<PullCommit>>,
}

impl PrNode {
    fn new(pull: PullRequest) -> Self {
        PrNode {
            commits: Lazy::Pending(pull.number),
            pull,
        }
    }
}

#[async_trait]
impl ObjectResolver for PrNode {
    fn type_name(&self) -> &'static str {
        "EdgeTxPr"
    }

    async fn resolve_field(&self, field: &str, _: &Arguments, ctx: &ExecutionContext) -> FieldResult {
        let pull = &self.pull;
        match field {
            "id" => Ok(Resolved::value(pull.number.to_string())),
            "name" => Ok(Resolved::value(pull.head.label.clone())),
            "description" => Ok(Resolved::value(format!(
                "#{}\n{}",
                pull.title,
                pull.body.as_deref().unwrap_or_default()
            ))),
            "headCommitId" => Ok(Resolved::value(pull.head.sha.clone())),
            "headCommit" => Ok(Resolved::object(PrCommitNode::new(pull.head.sha.clone()))),
            "commits" => {
                let commits = self
                    .commits
                    .load(|number| async move { ctx.github().pull_commits(number).await })
                    .await?;
                Ok(Resolved::list(commits.into_iter().map(|c| PrCommitNode::new(c.sha))))
            }
            other => Err(FieldError::unknown_field(self.type_name(), other)),
        }
    }
}

struct PrCommitNode {
    sha: String,
    bundle: Lazy<String, Option<BundleNode>>,
}

impl PrCommitNode {
    fn new(sha: String) -> Self {
        PrCommitNode {
            bundle: Lazy::Pending(sha.clone()),
            sha,
        }
    }
}

/// Bundle built by CI for `sha`, if the build finished and uploaded one.
async fn ci_bundle(ctx: &ExecutionContext, sha: String) -> Result<Option<BundleNode>, FieldError> {
    let runs = ctx.github().check_runs_for_ref(&sha).await?;
    let Some(build) = runs.iter().find(|run| {
        run.app.as_ref().and_then(|a| a.slug.as_deref()) == Some(CI_APP_SLUG)
            && run.name.to_lowercase().contains(CI_BUILD_INDICATOR)
    }) else {
        debug!(sha = %sha, "no CI build check run");
        return Ok(None);
    };

    // Actions check runs share their id with the workflow job.
    let Some(job) = ctx.github().job(build.id).await? else {
        debug!(sha = %sha, job = build.id, "CI job not found");
        return Ok(None);
    };

    let artifacts = ctx.github().run_artifacts(job.run_id).await?;
    Ok(artifacts
        .into_iter()
        .find(|a| a.name.contains(FIRMWARE_INDICATOR) && !a.expired)
        .map(|a| BundleNode::new(a.id, &a.name, &a.archive_download_url)))
}

#[async_trait]
impl ObjectResolver for PrCommitNode {
    fn type_name(&self) -> &'static str {
        "EdgeTxPrCommit"
    }

    async fn resolve_field(&self, field: &str, _: &Arguments, ctx: &ExecutionContext) -> FieldResult {
        match field {
            "id" => Ok(Resolved::value(self.sha.clone())),
            "firmwareBundle" => {
                let bundle = self.bundle.load(|sha| ci_bundle(ctx, sha)).await?;
                Ok(Resolved::optional(bundle))
            }
            other => Err(FieldError::unknown_field(self.type_name(), other)),
        }
    }
}

#[derive(Clone)]
struct BundleNode {
    id: String,
    name: String,
    url: String,
    targets: Lazy<String, Vec<TargetDescriptor>>,
}

impl BundleNode {
    fn new(id: u64, name: &str, url: &str) -> Self {
        BundleNode {
            id: id.to_string(),
            name: name.to_string(),
            url: url.to_string(),
            targets: Lazy::Pending(url.to_string()),
        }
    }

    async fn targets(&self, ctx: &ExecutionContext) -> Result<Vec<TargetDescriptor>, FieldError> {
        Ok(self
            .targets
            .load(|url| async move { ctx.firmware().list_targets(&url).await })
            .await?)
    }

    fn target_node(&self, target: TargetDescriptor) -> TargetNode {
        TargetNode {
            bundle_url: self.url.clone(),
            target,
        }
    }
}

#[async_trait]
impl ObjectResolver for BundleNode {
    fn type_name(&self) -> &'static str {
        "EdgeTxFirmwareBundle"
    }

    async fn resolve_field(&self, field: &str, args: &Arguments, ctx: &ExecutionContext) -> FieldResult {
        match field {
            "id" => Ok(Resolved::value(self.id.clone())),
            "name" => Ok(Resolved::value(self.name.clone())),
            "url" => Ok(Resolved::value(self.url.clone())),
            "targets" => {
                let targets = self.targets(ctx).await?;
                Ok(Resolved::list(targets.into_iter().map(|t| self.target_node(t))))
            }
            "target" => {
                let code = args.id("id")?;
                let target = self
                    .targets(ctx)
                    .await?
                    .into_iter()
                    .find(|t| t.code == code);
                Ok(Resolved::optional(target.map(|t| self.target_node(t))))
            }
            other => Err(FieldError::unknown_field(self.type_name(), other)),
        }
    }
}

struct TargetNode {
    bundle_url: String,
    target: TargetDescriptor,
}

#[async_trait]
impl ObjectResolver for TargetNode {
    fn type_name(&self) -> &'static str {
        "EdgeTxFirmwareTarget"
    }

    async fn resolve_field(&self, field: &str, _: &Arguments, ctx: &ExecutionContext) -> FieldResult {
        match field {
            "id" | "code" => Ok(Resolved::value(self.target.code.clone())),
            "name" => Ok(Resolved::value(self.target.name.clone())),
            "bundleUrl" => Ok(Resolved::value(self.bundle_url.clone())),
            "base64Data" => {
                let data = ctx
                    .firmware()
                    .fetch_binary(&self.bundle_url, &self.target.code)
                    .await?;
                Ok(Resolved::value(STANDARD.encode(data)))
            }
            other => Err(FieldError::unknown_field(self.type_name(), other)),
        }
    }
}

struct LocalFirmwareNode(Arc<LocalFirmware>);

#[async_trait]
impl ObjectResolver for LocalFirmwareNode {
    fn type_name(&self) -> &'static str {
        "LocalEdgeTxFirmware"
    }

    async fn resolve_field(&self, field: &str, _: &Arguments, _: &ExecutionContext) -> FieldResult {
        match field {
            "id" => Ok(Resolved::value(self.0.id.clone())),
            "name" => Ok(Resolved::value(self.0.display_name().to_string())),
            "base64Data" => Ok(Resolved::value(STANDARD.encode(&self.0.data))),
            "digest" => Ok(Resolved::value(self.0.digest.clone())),
            other => Err(FieldError::unknown_field(self.type_name(), other)),
        }
    }
}

struct DeviceNode(DeviceDescriptor);

#[async_trait]
impl ObjectResolver for DeviceNode {
    fn type_name(&self) -> &'static str {
        "FlashableDevice"
    }

    async fn resolve_field(&self, field: &str, _: &Arguments, _: &ExecutionContext) -> FieldResult {
        let device = &self.0;
        match field {
            "id" => Ok(Resolved::value(device.id.clone())),
            "vendorId" => Ok(Resolved::value(device.vendor_id)),
            "productId" => Ok(Resolved::value(device.product_id)),
            "productName" => Ok(Resolved::scalar(device.product_name.clone())),
            "serialNumber" => Ok(Resolved::scalar(device.serial_number.clone())),
            other => Err(FieldError::unknown_field(self.type_name(), other)),
        }
    }
}

struct DirectoryNode(DirectoryHandle);

#[async_trait]
impl ObjectResolver for DirectoryNode {
    fn type_name(&self) -> &'static str {
        "WritableDirectory"
    }

    async fn resolve_field(&self, field: &str, _: &Arguments, _: &ExecutionContext) -> FieldResult {
        match field {
            "id" => Ok(Resolved::value(self.0.id.clone())),
            "name" => Ok(Resolved::value(self.0.name.clone())),
            "path" => Ok(Resolved::value(self.0.path.display().to_string())),
            other => Err(FieldError::unknown_field(self.type_name(), other)),
        }
    }
}
