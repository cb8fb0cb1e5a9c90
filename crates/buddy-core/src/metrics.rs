//! Global atomic counters for EdgeTX Buddy observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. when the executor shuts down).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

/// Lightweight atomic counters.
pub struct Metrics {
    operations_executed: AtomicU64,
    field_errors: AtomicU64,
    bus_failures: AtomicU64,
    bundle_downloads: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            operations_executed: AtomicU64::new(0),
            field_errors: AtomicU64::new(0),
            bus_failures: AtomicU64::new(0),
            bundle_downloads: AtomicU64::new(0),
        }
    }

    /// One operation evaluated by a schema executor.
    pub fn inc_operations_executed(&self) {
        self.operations_executed.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "operations_executed", "counter incremented");
    }

    /// Field errors reported in one response.
    pub fn add_field_errors(&self, count: u64) {
        self.field_errors.fetch_add(count, Ordering::Relaxed);
        tracing::trace!(metric = "field_errors", count, "counter incremented");
    }

    /// One bus operation failed at the transport level.
    pub fn inc_bus_failures(&self) {
        self.bus_failures.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "bus_failures", "counter incremented");
    }

    /// One bundle archive downloaded and indexed.
    pub fn inc_bundle_downloads(&self) {
        self.bundle_downloads.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "bundle_downloads", "counter incremented");
    }

    /// Emit all current counter values as a single `info!` event.
    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            operations_executed = self.operations_executed(),
            field_errors = self.field_errors(),
            bus_failures = self.bus_failures(),
            bundle_downloads = self.bundle_downloads(),
        );
    }

    pub fn operations_executed(&self) -> u64 {
        self.operations_executed.load(Ordering::Relaxed)
    }

    pub fn field_errors(&self) -> u64 {
        self.field_errors.load(Ordering::Relaxed)
    }

    pub fn bus_failures(&self) -> u64 {
        self.bus_failures.load(Ordering::Relaxed)
    }

    pub fn bundle_downloads(&self) -> u64 {
        self.bundle_downloads.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.operations_executed.store(0, Ordering::Relaxed);
        self.field_errors.store(0, Ordering::Relaxed);
        self.bus_failures.store(0, Ordering::Relaxed);
        self.bundle_downloads.store(0, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment() {
        let m = Metrics::new();
        m.inc_operations_executed();
        m.inc_operations_executed();
        m.add_field_errors(3);
        m.inc_bus_failures();
        m.inc_bundle_downloads();

        assert_eq!(m.operations_executed(), 2);
        assert_eq!(m.field_errors(), 3);
        assert_eq!(m.bus_failures(), 1);
        assert_eq!(m.bundle_downloads(), 1);
    }

    #[test]
    fn reset_zeroes_all() {
        let m = Metrics::new();
        m.inc_operations_executed();
        m.add_field_errors(1);
        m.reset();
        assert_eq!(m.operations_executed(), 0);
        assert_eq!(m.field_errors(), 0);
    }
}
