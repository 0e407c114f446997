//! Clock abstraction for testable timing.
//!
//! Rate-limit windows and batch staggering both depend on time; injecting a
//! [`Clock`] lets tests drive them deterministically. Production code uses
//! [`RealClock`], tests use [`TestClock`].

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// Source of time for the engine.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time.
    fn now(&self) -> SystemTime;

    /// Sleeps for the given duration. Under test this advances virtual
    /// time instead of waiting.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// System clock backed by tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Controllable clock for deterministic tests.
///
/// `sleep` advances the virtual clock immediately and yields once, so
/// staggered and windowed code runs instantly under test while still
/// observing ordered timestamps.
#[derive(Debug, Clone)]
pub struct TestClock {
    // Nanoseconds since UNIX_EPOCH.
    now_ns: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a test clock starting at the current system time.
    pub fn new() -> Self {
        let since_epoch = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
        Self {
            now_ns: Arc::new(AtomicU64::new(
                u64::try_from(since_epoch.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0),
            )),
        }
    }

    /// Moves the clock forward.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(0);
        self.now_ns.fetch_add(ns, Ordering::AcqRel);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_nanos(self.now_ns.load(Ordering::Acquire))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances() {
        let clock = TestClock::new();
        let start = clock.now();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now().duration_since(start).unwrap(), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_clock_sleep_is_instant() {
        let clock = TestClock::new();
        let start = clock.now();

        clock.sleep(Duration::from_secs(3600)).await;

        assert_eq!(clock.now().duration_since(start).unwrap(), Duration::from_secs(3600));
    }

    #[test]
    fn shared_handles_see_the_same_time() {
        let clock = TestClock::new();
        let handle = clock.clone();

        clock.advance(Duration::from_secs(5));

        assert_eq!(handle.now(), clock.now());
    }
}
