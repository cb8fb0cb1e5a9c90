//! Structured tracing for bus operations and bundle downloads.

use buddy_core::{
    emit_bundle_downloaded, emit_operation_completed, emit_operation_failed, emit_operation_sent,
    spawn_worker, BusError, ExecutionContext, ExecutorArgs, OperationRequest, OperationSpan,
    SchemaExecutor,
};
use tracing_test::traced_test;

#[traced_test]
#[test]
fn operation_sent_carries_correlation_id() {
    emit_operation_sent("corr-1", Some("Releases"));
    assert!(logs_contain("operation.sent"));
    assert!(logs_contain("corr-1"));
}

#[traced_test]
#[test]
fn operation_completed_reports_error_count() {
    emit_operation_completed("corr-2", 12, 3);
    assert!(logs_contain("operation.completed"));
    assert!(logs_contain("errors=3"));
}

#[traced_test]
#[test]
fn operation_failed_is_a_warning() {
    emit_operation_failed("corr-3", &BusError::Closed);
    assert!(logs_contain("WARN"));
    assert!(logs_contain("bus channel closed"));
}

#[traced_test]
#[test]
fn bundle_downloaded_names_the_url() {
    emit_bundle_downloaded("https://example.invalid/fw.zip", 6);
    assert!(logs_contain("bundle.downloaded"));
    assert!(logs_contain("targets=6"));
}

#[traced_test]
#[test]
fn operation_span_tags_nested_events() {
    let _span = OperationSpan::enter("span-corr");
    tracing::info!("inside");
    assert!(logs_contain("span-corr"));
}

#[tokio::test]
#[traced_test]
async fn worker_round_trip_is_traced() {
    let link = spawn_worker(ExecutorArgs { mocked: true }, |_: &ExecutorArgs| {
        Ok(SchemaExecutor::new(ExecutionContext::mocked()?))
    })
    .await
    .unwrap();
    let result = link
        .execute(OperationRequest::new("query Releases { edgeTxReleases { id } }").operation_name("Releases"))
        .await
        .unwrap();
    assert!(result.is_ok());

    assert!(logs_contain("operation.sent"));
    assert!(logs_contain("operation.completed"));
    assert!(logs_contain("Releases"));
}
