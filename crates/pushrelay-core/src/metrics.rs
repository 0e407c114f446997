//! Process-wide delivery counters.
//!
//! [`GlobalMetrics`] is an owned state object constructed at process start
//! and injected into the components that need it. Counters only move
//! forward; `reset` exists for explicit operator action.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Monotonic delivery counters shared by every worker.
#[derive(Debug, Default)]
pub struct GlobalMetrics {
    attempted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    expired_subscriptions: AtomicU64,
}

impl GlobalMetrics {
    /// Creates a zeroed metrics object.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one delivery attempt.
    pub fn delivery_attempted(&self) {
        self.attempted.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one successful delivery.
    pub fn delivery_succeeded(&self) {
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one failed delivery.
    pub fn delivery_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records one permanently rejected subscription.
    pub fn subscription_expired(&self) {
        self.expired_subscriptions.fetch_add(1, Ordering::Relaxed);
    }

    /// Delivery attempts since start (or last reset).
    pub fn attempted(&self) -> u64 {
        self.attempted.load(Ordering::Relaxed)
    }

    /// Successful deliveries since start (or last reset).
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// Failed deliveries since start (or last reset).
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Expired subscriptions observed since start (or last reset).
    pub fn expired_subscriptions(&self) -> u64 {
        self.expired_subscriptions.load(Ordering::Relaxed)
    }

    /// Percentage of attempts that succeeded, rounded to two decimals.
    /// Zero when nothing was attempted yet.
    pub fn success_rate(&self) -> f64 {
        let attempted = self.attempted();
        if attempted == 0 {
            return 0.0;
        }
        round2(self.succeeded() as f64 / attempted as f64 * 100.0)
    }

    /// Percentage of attempts that did not succeed.
    pub fn failure_rate(&self) -> f64 {
        round2(100.0 - self.success_rate())
    }

    /// Point-in-time copy of all counters and derived rates.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            deliveries_attempted: self.attempted(),
            deliveries_succeeded: self.succeeded(),
            deliveries_failed: self.failed(),
            expired_subscriptions: self.expired_subscriptions(),
            success_rate: self.success_rate(),
            failure_rate: self.failure_rate(),
        }
    }

    /// Zeroes every counter. Explicit operator action only.
    pub fn reset(&self) {
        self.attempted.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.expired_subscriptions.store(0, Ordering::Relaxed);
    }
}

/// Rounds a percentage to two decimals for reporting.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Read-only copy of [`GlobalMetrics`] at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricsSnapshot {
    /// Delivery attempts.
    pub deliveries_attempted: u64,
    /// Successful deliveries.
    pub deliveries_succeeded: u64,
    /// Failed deliveries.
    pub deliveries_failed: u64,
    /// Permanently rejected subscriptions.
    pub expired_subscriptions: u64,
    /// Percentage of attempts that succeeded.
    pub success_rate: f64,
    /// Percentage of attempts that did not succeed.
    pub failure_rate: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = GlobalMetrics::new();

        metrics.delivery_attempted();
        metrics.delivery_attempted();
        metrics.delivery_succeeded();
        metrics.delivery_failed();
        metrics.subscription_expired();

        assert_eq!(metrics.attempted(), 2);
        assert_eq!(metrics.succeeded(), 1);
        assert_eq!(metrics.failed(), 1);
        assert_eq!(metrics.expired_subscriptions(), 1);
    }

    #[test]
    fn rates_derive_from_counters() {
        let metrics = GlobalMetrics::new();
        assert_eq!(metrics.success_rate(), 0.0);
        assert_eq!(metrics.failure_rate(), 100.0);

        for _ in 0..3 {
            metrics.delivery_attempted();
        }
        metrics.delivery_succeeded();

        assert_eq!(metrics.success_rate(), 33.33);
        assert_eq!(metrics.failure_rate(), 66.67);
    }

    #[test]
    fn snapshot_is_point_in_time() {
        let metrics = GlobalMetrics::new();
        metrics.delivery_attempted();
        metrics.delivery_succeeded();

        let snapshot = metrics.snapshot();
        metrics.delivery_attempted();

        assert_eq!(snapshot.deliveries_attempted, 1);
        assert_eq!(snapshot.success_rate, 100.0);
        assert_eq!(metrics.attempted(), 2);
    }

    #[test]
    fn reset_zeroes_everything() {
        let metrics = GlobalMetrics::new();
        metrics.delivery_attempted();
        metrics.delivery_failed();
        metrics.subscription_expired();

        metrics.reset();

        assert_eq!(metrics.snapshot().deliveries_attempted, 0);
        assert_eq!(metrics.snapshot().deliveries_failed, 0);
        assert_eq!(metrics.snapshot().expired_subscriptions, 0);
        assert_eq!(metrics.success_rate(), 0.0);
    }
}
