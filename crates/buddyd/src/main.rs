//! buddyd: the EdgeTX Buddy executor as a separate process.
//!
//! Reads bus frames (newline-delimited JSON) on stdin and writes replies
//! and store events on stdout. Logs go to stderr.

use std::path::PathBuf;

use anyhow::{Context, Result};
use buddy_core::bus::StreamChannel;
use buddy_core::{
    init_tracing, BusBackend, ExecutionContext, ExecutorArgs, HostConfig, SchemaExecutor, METRICS,
};
use buddy_github::GithubConfig;
use clap::Parser;
use tracing::{info, Level};

#[derive(Parser, Debug)]
#[command(name = "buddyd")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "EdgeTX Buddy executor speaking the execution bus on stdio", long_about = None)]
struct Args {
    /// Resolve operations against built-in fixtures instead of GitHub and USB
    #[arg(long, env = "BUDDY_MOCKED")]
    mocked: bool,

    /// Build the executor on the caller's initialise message, not at start-up
    #[arg(long)]
    lazy: bool,

    /// Directory offered when a writable directory is requested
    #[arg(long, env = "BUDDY_SDCARD_DIR")]
    sdcard_dir: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,
}

impl Args {
    fn host_config(&self) -> HostConfig {
        let host = HostConfig::from_env();
        match &self.sdcard_dir {
            Some(dir) => host.with_sdcard_dir(dir),
            None => host,
        }
    }
}

/// Executor factory for the backend; GitHub settings come from the environment.
fn executor_factory(
    host: HostConfig,
) -> impl Fn(&ExecutorArgs) -> Result<SchemaExecutor> + Send + Sync + 'static {
    move |args: &ExecutorArgs| {
        let context = ExecutionContext::for_args(args, GithubConfig::from_env(), host.clone())
            .context("failed to build execution context")?;
        Ok(SchemaExecutor::new(context))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(args.json, level);

    let mut backend = BusBackend::new(StreamChannel::stdio(), executor_factory(args.host_config()));
    if !args.lazy {
        backend.initialise(&ExecutorArgs {
            mocked: args.mocked,
        })?;
    }

    info!(
        pid = std::process::id(),
        mocked = args.mocked,
        lazy = args.lazy,
        "buddyd listening on stdio"
    );
    backend.listen().await;

    METRICS.flush();
    info!("buddyd stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use buddy_core::bus::{memory_pair, BusLink};
    use buddy_core::OperationRequest;

    #[test]
    fn flags_parse() {
        let args =
            Args::try_parse_from(["buddyd", "--mocked", "--sdcard-dir", "/media/sd", "-v"]).unwrap();
        assert!(args.mocked);
        assert!(!args.lazy);
        assert!(args.verbose);
        assert_eq!(
            args.host_config().sdcard_dir,
            Some(PathBuf::from("/media/sd"))
        );
    }

    #[tokio::test]
    async fn factory_builds_a_mocked_executor() {
        let (caller, worker) = memory_pair();
        let backend = BusBackend::new(worker, executor_factory(HostConfig::from_env()));
        tokio::spawn(backend.listen());

        let link = BusLink::connect(caller, ExecutorArgs { mocked: true })
            .await
            .unwrap();
        let result = link
            .execute(OperationRequest::new("{ flashableDevices { id } }"))
            .await
            .unwrap();
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(
            result.pointer("flashableDevices.0.id"),
            Some(&serde_json::json!("1-4"))
        );
    }
}
