//! EdgeTX Buddy Core Library
//!
//! The execution context a firmware operation runs against, the operation
//! schema that resolves queries and mutations over it, and the bus that
//! carries operations to an executor in another task or process.

pub mod bus;
pub mod context;
pub mod device;
mod error;
pub mod filesystem;
pub mod metrics;
pub mod mock;
pub mod obs;
pub mod schema;
pub mod telemetry;

pub use bus::{
    spawn_worker, BusBackend, BusEvent, BusLink, Channel, DirectLink, ExecutorArgs, OperationLink,
};
pub use context::{ExecutionContext, GithubArchiveSource, HostConfig};
pub use device::{DeviceDescriptor, DeviceFilter, DeviceProvider};
pub use error::{BusError, ContextError, DeviceError};
pub use filesystem::{DirectoryHandle, DirectoryPicker};
pub use metrics::METRICS;
pub use obs::{
    emit_bundle_downloaded, emit_operation_completed, emit_operation_failed, emit_operation_sent,
    OperationSpan,
};
pub use schema::{ErrorCode, ExecutionError, ExecutionResult, OperationRequest, SchemaExecutor};
pub use telemetry::init_tracing;
