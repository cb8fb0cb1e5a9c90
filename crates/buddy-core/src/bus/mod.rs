//! Execution bus
//!
//! Carries operations from a caller to an executor and results back. The
//! executor may live in the same task ([`DirectLink`]), in a spawned worker
//! task ([`spawn_worker`]) or in another process ([`StreamChannel`] over a
//! child's stdio). Callers see one interface, [`OperationLink`], whichever
//! transport is underneath.

pub mod backend;
pub mod channel;
pub mod direct;
pub mod link;
pub mod memory;
pub mod message;
pub mod stream;

use async_trait::async_trait;

pub use backend::{BusBackend, ExecutorFactory};
pub use channel::Channel;
pub use direct::DirectLink;
pub use link::{BusEvent, BusLink, OperationState};
pub use memory::{memory_pair, MemoryChannel};
pub use message::{BusMessage, CorrelationId, ExecutorArgs, Inbound};
pub use stream::StreamChannel;

use crate::error::BusError;
use crate::schema::{ExecutionResult, OperationRequest, SchemaExecutor};

/// Anything that can carry an operation to an executor and back.
#[async_trait]
pub trait OperationLink: Send + Sync {
    async fn execute(&self, request: OperationRequest) -> Result<ExecutionResult, BusError>;
}

/// Start an executor on a background task and connect to it.
pub async fn spawn_worker<F>(
    args: ExecutorArgs,
    factory: F,
) -> Result<BusLink<MemoryChannel>, BusError>
where
    F: Fn(&ExecutorArgs) -> anyhow::Result<SchemaExecutor> + Send + Sync + 'static,
{
    let (caller, worker) = memory_pair();
    tokio::spawn(BusBackend::new(worker, factory).listen());
    BusLink::connect(caller, args).await
}
