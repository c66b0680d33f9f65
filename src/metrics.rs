//! Metrics collection for observability
//!
//! # Metrics
//!
//! - `economy_operations_total` - Committed single-currency modifications
//! - `economy_transactions_total` - Committed multi-currency transactions
//! - `economy_rollbacks_total` - Transactions rolled back mid-commit
//! - `economy_rate_limited_total` - Operations rejected by the rate limiter
//! - `economy_lock_timeouts_total` - Lock acquisitions that timed out
//! - `economy_operation_duration_seconds` - Latency of mutating operations

use prometheus::{Histogram, HistogramOpts, IntCounter, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed single-currency modifications
    pub operations_total: IntCounter,

    /// Committed multi-currency transactions
    pub transactions_total: IntCounter,

    /// Transactions rolled back mid-commit
    pub rollbacks_total: IntCounter,

    /// Operations rejected by the rate limiter
    pub rate_limited_total: IntCounter,

    /// Lock acquisitions that timed out
    pub lock_timeouts_total: IntCounter,

    /// Latency of mutating operations
    pub operation_duration: Histogram,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("operations_total", &self.operations_total.get())
            .field("transactions_total", &self.transactions_total.get())
            .finish()
    }
}

impl Metrics {
    /// Create new metrics collector with its own registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let operations_total = IntCounter::new(
            "economy_operations_total",
            "Committed single-currency modifications",
        )?;
        registry.register(Box::new(operations_total.clone()))?;

        let transactions_total = IntCounter::new(
            "economy_transactions_total",
            "Committed multi-currency transactions",
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let rollbacks_total = IntCounter::new(
            "economy_rollbacks_total",
            "Transactions rolled back mid-commit",
        )?;
        registry.register(Box::new(rollbacks_total.clone()))?;

        let rate_limited_total = IntCounter::new(
            "economy_rate_limited_total",
            "Operations rejected by the rate limiter",
        )?;
        registry.register(Box::new(rate_limited_total.clone()))?;

        let lock_timeouts_total = IntCounter::new(
            "economy_lock_timeouts_total",
            "Lock acquisitions that timed out",
        )?;
        registry.register(Box::new(lock_timeouts_total.clone()))?;

        let operation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "economy_operation_duration_seconds",
                "Latency of mutating operations",
            )
            .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.010, 0.050, 0.100, 0.500, 1.0]),
        )?;
        registry.register(Box::new(operation_duration.clone()))?;

        Ok(Self {
            operations_total,
            transactions_total,
            rollbacks_total,
            rate_limited_total,
            lock_timeouts_total,
            operation_duration,
            registry,
        })
    }

    /// Record a committed modification
    pub fn record_operation(&self) {
        self.operations_total.inc();
    }

    /// Record a committed transaction
    pub fn record_transaction(&self) {
        self.transactions_total.inc();
    }

    /// Record a mid-commit rollback
    pub fn record_rollback(&self) {
        self.rollbacks_total.inc();
    }

    /// Record a rate-limited rejection
    pub fn record_rate_limited(&self) {
        self.rate_limited_total.inc();
    }

    /// Record a lock timeout
    pub fn record_lock_timeout(&self) {
        self.lock_timeouts_total.inc();
    }

    /// Record operation latency
    pub fn record_duration(&self, seconds: f64) {
        self.operation_duration.observe(seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().unwrap();
        assert_eq!(metrics.operations_total.get(), 0);
        assert_eq!(metrics.rollbacks_total.get(), 0);
    }

    #[test]
    fn test_counters_increment() {
        let metrics = Metrics::new().unwrap();
        metrics.record_operation();
        metrics.record_operation();
        metrics.record_transaction();
        metrics.record_rollback();

        assert_eq!(metrics.operations_total.get(), 2);
        assert_eq!(metrics.transactions_total.get(), 1);
        assert_eq!(metrics.rollbacks_total.get(), 1);
    }

    #[test]
    fn test_independent_registries() {
        // Each engine instance owns its registry; creating two must not clash.
        let a = Metrics::new().unwrap();
        let b = Metrics::new().unwrap();
        a.record_operation();
        assert_eq!(b.operations_total.get(), 0);
    }
}
