//! EdgeTX Buddy - firmware command line
//!
//! The `buddy` command lists EdgeTX releases and pull requests, inspects
//! firmware bundles and downloads target binaries. Every command runs as an
//! operation over the execution bus.
//!
//! ## Transports
//!
//! - `direct`: resolve in this task
//! - `worker`: resolve on a background task behind an in-memory channel
//! - `host`: resolve in a `buddyd` child process over its stdio

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use buddy_core::bus::{spawn_worker, BusLink, DirectLink, OperationLink, StreamChannel};
use buddy_core::{
    init_tracing, ExecutionContext, ExecutorArgs, HostConfig, OperationRequest, SchemaExecutor,
};
use buddy_github::GithubConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn, Level};

#[derive(Parser)]
#[command(name = "buddy")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "EdgeTX Buddy firmware command line", long_about = None)]
struct Cli {
    /// Where operations are resolved
    #[arg(long, value_enum, default_value_t = Transport::Worker, global = true)]
    transport: Transport,

    /// Resolve against built-in fixtures instead of GitHub and USB
    #[arg(long, env = "BUDDY_MOCKED", global = true)]
    mocked: bool,

    /// Executor binary started by the host transport
    #[arg(long, env = "BUDDYD_PATH", default_value = "buddyd", global = true)]
    buddyd: PathBuf,

    /// Directory offered when a writable directory is requested
    #[arg(long, env = "BUDDY_SDCARD_DIR", global = true)]
    sdcard_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Transport {
    Direct,
    Worker,
    Host,
}

/// Which firmware bundle to use
#[derive(Args, Debug, Clone)]
struct BundleArgs {
    /// Release tag, e.g. v2.9.0
    #[arg(long, conflicts_with = "pr", required_unless_present = "pr")]
    release: Option<String>,

    /// Pull request number; its head commit's CI bundle is used
    #[arg(long)]
    pr: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query or mutation document and print the raw result
    Query {
        /// Operation document, or @path to read it from a file
        document: String,

        /// Variables as a JSON object
        #[arg(long)]
        variables: Option<String>,

        /// Operation to run when the document holds several
        #[arg(long)]
        operation_name: Option<String>,
    },

    /// List EdgeTX releases
    Releases,

    /// List open EdgeTX pull requests
    Prs,

    /// List the targets in a firmware bundle
    Targets {
        #[command(flatten)]
        bundle: BundleArgs,
    },

    /// Download one target's firmware binary
    Download {
        #[command(flatten)]
        bundle: BundleArgs,

        /// Target code, e.g. tx16s
        target: String,

        /// Output file (default: <target>.bin)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Register a local firmware file for this session
    Register {
        /// Firmware binary
        path: PathBuf,

        /// Display name (default: file name)
        #[arg(long)]
        name: Option<String>,
    },

    /// List radios attached in DFU mode
    Devices,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum BundleSource {
    Release(String),
    Pr(u64),
}

impl BundleArgs {
    fn source(&self) -> Result<BundleSource> {
        match (&self.release, self.pr) {
            (Some(tag), None) => Ok(BundleSource::Release(tag.clone())),
            (None, Some(number)) => Ok(BundleSource::Pr(number)),
            _ => bail!("pass exactly one of --release or --pr"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReleaseRow {
    id: String,
    name: String,
    is_prerelease: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PrRow {
    id: String,
    name: String,
    head_commit_id: String,
}

#[derive(Debug, Deserialize)]
struct TargetRow {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TargetBinary {
    id: String,
    name: String,
    base64_data: String,
}

#[derive(Debug, Deserialize)]
struct BundleView {
    url: String,
    #[serde(default)]
    targets: Vec<TargetRow>,
    #[serde(default)]
    target: Option<TargetBinary>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceRow {
    id: String,
    vendor_id: u16,
    product_id: u16,
    product_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LocalFirmwareRow {
    id: String,
    name: String,
    digest: String,
}

/// An open link plus the executor process behind it, if any.
struct Session {
    link: Box<dyn OperationLink>,
    child: Option<Child>,
}

impl Session {
    async fn open(cli: &Cli) -> Result<Self> {
        let args = ExecutorArgs { mocked: cli.mocked };
        match cli.transport {
            Transport::Direct => {
                let context = ExecutionContext::for_args(
                    &args,
                    GithubConfig::from_env(),
                    host_config(cli),
                )?;
                Ok(Session {
                    link: Box::new(DirectLink::new(SchemaExecutor::new(context))),
                    child: None,
                })
            }
            Transport::Worker => {
                let host = host_config(cli);
                let link = spawn_worker(args, move |args: &ExecutorArgs| {
                    let context =
                        ExecutionContext::for_args(args, GithubConfig::from_env(), host.clone())?;
                    Ok(SchemaExecutor::new(context))
                })
                .await?;
                Ok(Session {
                    link: Box::new(link),
                    child: None,
                })
            }
            Transport::Host => {
                let mut command = Command::new(&cli.buddyd);
                command
                    .arg("--lazy")
                    .stdin(Stdio::piped())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::inherit())
                    .kill_on_drop(true);
                if let Some(dir) = &cli.sdcard_dir {
                    command.arg("--sdcard-dir").arg(dir);
                }
                if cli.verbose {
                    command.arg("--verbose");
                }
                let mut child = command
                    .spawn()
                    .with_context(|| format!("failed to start {}", cli.buddyd.display()))?;
                debug!(pid = ?child.id(), "started executor process");

                let channel = StreamChannel::from_child(&mut child)?;
                let link = BusLink::connect(channel, args).await?;
                Ok(Session {
                    link: Box::new(link),
                    child: Some(child),
                })
            }
        }
    }

    /// Drop the link (closing the child's stdin) and reap the child.
    async fn close(self) -> Result<()> {
        let Session { link, child } = self;
        drop(link);
        if let Some(mut child) = child {
            match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
                Ok(status) => {
                    let status = status?;
                    debug!(%status, "executor process exited");
                }
                Err(_) => {
                    warn!("executor process did not exit, killing it");
                    child.kill().await?;
                }
            }
        }
        Ok(())
    }
}

fn host_config(cli: &Cli) -> HostConfig {
    let host = HostConfig::from_env();
    match &cli.sdcard_dir {
        Some(dir) => host.with_sdcard_dir(dir),
        None => host,
    }
}

/// Run `request` and decode the value at `pointer`. Any error entry fails
/// the command.
async fn query<T: DeserializeOwned>(
    link: &dyn OperationLink,
    request: OperationRequest,
    pointer: &str,
) -> Result<T> {
    let result = link.execute(request).await?;
    if let Some(error) = result.errors.first() {
        for extra in &result.errors[1..] {
            warn!("{extra}");
        }
        bail!("{error}");
    }
    let value = result
        .data
        .as_ref()
        .and_then(|data| data.pointer(pointer))
        .cloned()
        .unwrap_or(Value::Null);
    serde_json::from_value(value).with_context(|| format!("unexpected result shape at {pointer}"))
}

async fn fetch_releases(link: &dyn OperationLink) -> Result<Vec<ReleaseRow>> {
    query(
        link,
        OperationRequest::new("query Releases { edgeTxReleases { id name isPrerelease } }")
            .operation_name("Releases"),
        "/edgeTxReleases",
    )
    .await
}

async fn fetch_prs(link: &dyn OperationLink) -> Result<Vec<PrRow>> {
    query(
        link,
        OperationRequest::new("query Prs { edgeTxPrs { id name headCommitId } }")
            .operation_name("Prs"),
        "/edgeTxPrs",
    )
    .await
}

fn bundle_request(source: &BundleSource, target: Option<&str>) -> (OperationRequest, &'static str) {
    let (fields, declaration) = match target {
        Some(_) => ("url target(id: $target) { id name base64Data }", ", $target: ID!"),
        None => ("url targets { id name }", ""),
    };
    let (request, pointer) = match source {
        BundleSource::Release(tag) => (
            OperationRequest::new(format!(
                "query ReleaseBundle($tag: ID!{declaration}) {{ edgeTxRelease(id: $tag) {{ firmwareBundle {{ {fields} }} }} }}"
            ))
            .variable("tag", tag.as_str()),
            "/edgeTxRelease/firmwareBundle",
        ),
        BundleSource::Pr(number) => (
            OperationRequest::new(format!(
                "query PrBundle($pr: ID!{declaration}) {{ edgeTxPr(id: $pr) {{ headCommit {{ firmwareBundle {{ {fields} }} }} }} }}"
            ))
            .variable("pr", number.to_string()),
            "/edgeTxPr/headCommit/firmwareBundle",
        ),
    };
    match target {
        Some(code) => (request.variable("target", code), pointer),
        None => (request, pointer),
    }
}

async fn fetch_bundle(
    link: &dyn OperationLink,
    source: &BundleSource,
    target: Option<&str>,
) -> Result<BundleView> {
    let (request, pointer) = bundle_request(source, target);
    let bundle: Option<BundleView> = query(link, request, pointer).await?;
    match (bundle, source) {
        (Some(bundle), _) => Ok(bundle),
        (None, BundleSource::Release(tag)) => bail!("release {tag} not found"),
        (None, BundleSource::Pr(number)) => {
            bail!("pull request #{number} not found or its head commit has no CI firmware bundle")
        }
    }
}

async fn fetch_devices(link: &dyn OperationLink) -> Result<Vec<DeviceRow>> {
    query(
        link,
        OperationRequest::new(
            "query Devices { flashableDevices { id vendorId productId productName } }",
        ),
        "/flashableDevices",
    )
    .await
}

async fn register_firmware(
    link: &dyn OperationLink,
    data: &[u8],
    name: Option<&str>,
) -> Result<LocalFirmwareRow> {
    let mut request = OperationRequest::new(
        "mutation Register($data: String!, $name: String) { registerLocalFirmware(firmwareBase64Data: $data, fileName: $name) { id name digest } }",
    )
    .variable("data", STANDARD.encode(data));
    if let Some(name) = name {
        request = request.variable("name", name);
    }
    query(link, request, "/registerLocalFirmware").await
}

fn parse_variables(raw: Option<&str>) -> Result<Map<String, Value>> {
    match raw {
        None => Ok(Map::new()),
        Some(raw) => match serde_json::from_str(raw).context("--variables is not JSON")? {
            Value::Object(map) => Ok(map),
            _ => bail!("--variables must be a JSON object"),
        },
    }
}

fn read_document(document: &str) -> Result<String> {
    match document.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read operation document {path}")),
        None => Ok(document.to_string()),
    }
}

async fn cmd_query(
    link: &dyn OperationLink,
    document: &str,
    variables: Option<&str>,
    operation_name: Option<&str>,
) -> Result<()> {
    let mut request = OperationRequest::new(read_document(document)?);
    request.variables = parse_variables(variables)?;
    request.operation_name = operation_name.map(str::to_string);

    let result = link.execute(request).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.is_ok() {
        bail!("operation finished with {} error(s)", result.errors.len());
    }
    Ok(())
}

async fn cmd_releases(link: &dyn OperationLink) -> Result<()> {
    let releases = fetch_releases(link).await?;
    if releases.is_empty() {
        println!("No releases found.");
    }
    for release in releases {
        let marker = if release.is_prerelease {
            " (prerelease)"
        } else {
            ""
        };
        println!("{:<16} {}{}", release.id, release.name, marker);
    }
    Ok(())
}

async fn cmd_prs(link: &dyn OperationLink) -> Result<()> {
    let prs = fetch_prs(link).await?;
    if prs.is_empty() {
        println!("No open pull requests.");
    }
    for pr in prs {
        let short: String = pr.head_commit_id.chars().take(7).collect();
        println!("#{:<6} {} {}", pr.id, short, pr.name);
    }
    Ok(())
}

async fn cmd_targets(link: &dyn OperationLink, source: &BundleSource) -> Result<()> {
    let bundle = fetch_bundle(link, source, None).await?;
    println!("Bundle: {}", bundle.url);
    for target in bundle.targets {
        println!("  {:<14} {}", target.id, target.name);
    }
    Ok(())
}

/// Write the target binary and return where it went.
async fn download_target(
    link: &dyn OperationLink,
    source: &BundleSource,
    code: &str,
    output: Option<&Path>,
) -> Result<(PathBuf, Vec<u8>)> {
    let bundle = fetch_bundle(link, source, Some(code)).await?;
    let Some(target) = bundle.target else {
        bail!("target {code} is not listed in {}", bundle.url);
    };
    let data = STANDARD
        .decode(target.base64_data.as_bytes())
        .context("executor returned invalid base64")?;

    let path = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from(format!("{}.bin", target.id)));
    tokio::fs::write(&path, &data)
        .await
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!(target = %target.name, path = %path.display(), bytes = data.len(), "firmware written");
    Ok((path, data))
}

async fn cmd_download(
    link: &dyn OperationLink,
    source: &BundleSource,
    code: &str,
    output: Option<&Path>,
) -> Result<()> {
    let (path, data) = download_target(link, source, code, output).await?;
    println!("Wrote {} bytes to {}", data.len(), path.display());
    println!("sha256: {}", hex::encode(Sha256::digest(&data)));
    Ok(())
}

async fn cmd_register(link: &dyn OperationLink, path: &Path, name: Option<&str>) -> Result<()> {
    let data = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
    let firmware = register_firmware(link, &data, name.or(file_name.as_deref())).await?;
    println!("Registered {} as {}", firmware.name, firmware.id);
    println!("sha256: {}", firmware.digest);
    Ok(())
}

async fn cmd_devices(link: &dyn OperationLink) -> Result<()> {
    let devices = fetch_devices(link).await?;
    if devices.is_empty() {
        println!("No radios in DFU mode found.");
    }
    for device in devices {
        println!(
            "{:<8} {:04x}:{:04x} {}",
            device.id,
            device.vendor_id,
            device.product_id,
            device.product_name.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn dispatch(link: &dyn OperationLink, command: &Commands) -> Result<()> {
    match command {
        Commands::Query {
            document,
            variables,
            operation_name,
        } => cmd_query(link, document, variables.as_deref(), operation_name.as_deref()).await,
        Commands::Releases => cmd_releases(link).await,
        Commands::Prs => cmd_prs(link).await,
        Commands::Targets { bundle } => cmd_targets(link, &bundle.source()?).await,
        Commands::Download {
            bundle,
            target,
            output,
        } => cmd_download(link, &bundle.source()?, target, output.as_deref()).await,
        Commands::Register { path, name } => cmd_register(link, path, name.as_deref()).await,
        Commands::Devices => cmd_devices(link).await,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };
    init_tracing(cli.json, level);

    let session = Session::open(&cli)
        .await
        .with_context(|| format!("failed to open {:?} transport", cli.transport))?;
    let outcome = dispatch(session.link.as_ref(), &cli.command).await;
    session.close().await?;
    outcome
}
