use async_trait::async_trait;
use buddy_firmware::StoreEvent;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::bus::message::CorrelationId;
use crate::bus::OperationLink;
use crate::error::BusError;
use crate::obs;
use crate::schema::{ExecutionResult, OperationRequest, SchemaExecutor};

/// Same-thread link: runs operations on a local executor, no serialization.
#[derive(Clone)]
pub struct DirectLink {
    executor: SchemaExecutor,
}

impl DirectLink {
    pub fn new(executor: SchemaExecutor) -> Self {
        DirectLink { executor }
    }

    pub async fn execute(&self, request: OperationRequest) -> ExecutionResult {
        let id = CorrelationId::new();
        self.executor
            .execute(request)
            .instrument(obs::operation_span(id.as_str()))
            .await
    }

    /// Store events, as typed values rather than bus frames.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.executor.context().firmware().subscribe()
    }
}

#[async_trait]
impl OperationLink for DirectLink {
    async fn execute(&self, request: OperationRequest) -> Result<ExecutionResult, BusError> {
        Ok(DirectLink::execute(self, request).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::ExecutionContext;

    #[tokio::test]
    async fn executes_without_a_channel() {
        let link = DirectLink::new(SchemaExecutor::new(ExecutionContext::mocked().unwrap()));
        let result = link
            .execute(OperationRequest::new(
                r#"{ edgeTxRelease(id: "v2.9.0") { id isPrerelease } }"#,
            ))
            .await;
        assert!(result.is_ok(), "{:?}", result.errors);
        assert_eq!(
            result.pointer("edgeTxRelease.isPrerelease"),
            Some(&serde_json::Value::Bool(false))
        );
    }
}
