//! Structured lifecycle events for bus operations and bundle downloads.
//!
//! Events are emitted at `info!` level (filter with `RUST_LOG`); failures
//! at `warn!`. Each carries an `event` field naming it.

use tracing::{info, warn};

/// RAII guard entering a span tagged with an operation's correlation id.
///
/// ```ignore
/// let _span = OperationSpan::enter("5d0c...");
/// // every event below carries correlation_id = "5d0c..."
/// ```
pub struct OperationSpan {
    _span: tracing::span::EnteredSpan,
}

impl OperationSpan {
    pub fn enter(correlation_id: &str) -> Self {
        Self {
            _span: operation_span(correlation_id).entered(),
        }
    }
}

/// The same span, unentered, for `Instrument::instrument` on futures.
pub fn operation_span(correlation_id: &str) -> tracing::Span {
    tracing::info_span!("buddy.operation", correlation_id = %correlation_id)
}

/// Emit event: operation handed to the transport.
pub fn emit_operation_sent(correlation_id: &str, operation_name: Option<&str>) {
    info!(
        event = "operation.sent",
        correlation_id = %correlation_id,
        operation_name = operation_name.unwrap_or(""),
    );
}

/// Emit event: response received.
pub fn emit_operation_completed(correlation_id: &str, duration_ms: u64, errors: usize) {
    info!(
        event = "operation.completed",
        correlation_id = %correlation_id,
        duration_ms = duration_ms,
        errors = errors,
    );
}

/// Emit event: the operation failed at the bus level (warning level).
pub fn emit_operation_failed(correlation_id: &str, error: &dyn std::fmt::Display) {
    warn!(event = "operation.failed", correlation_id = %correlation_id, error = %error);
}

/// Emit event: a bundle archive was downloaded and indexed.
pub fn emit_bundle_downloaded(url: &str, targets: usize) {
    info!(event = "bundle.downloaded", url = %url, targets = targets);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_span_create() {
        let _span = OperationSpan::enter("test-correlation-id");
    }
}
