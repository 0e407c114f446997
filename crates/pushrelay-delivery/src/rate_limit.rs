//! Per-resource request rate limiting.
//!
//! Counters are keyed by `(resource type, resource id, optional user id)`
//! and live in a pluggable [`CounterStore`]. The check path increments
//! first and compares after, and a rejected call is *not* rolled back: the
//! attempt itself counts against quota, so repeated rejected attempts stay
//! visible in the counter. The info path is strictly read-only.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
    time::{Duration, SystemTime},
};

use chrono::{DateTime, Utc};
use pushrelay_core::{Clock, EventSink, PushError, PushEvent, RealClock, ResourceType, Result};
use tracing::debug;

use crate::config::RateLimitConfig;

/// Interval between lazy expiry sweeps of the in-memory store.
const SWEEP_INTERVAL: Duration = Duration::from_secs(300);

/// Counter storage behind the rate limiter.
///
/// `increment` must be atomic per key: reset the counter to 1 with a fresh
/// expiry when touched after its TTL passed, bump it in place otherwise,
/// and return the post-increment count. `get` must not perturb the stored
/// counter.
pub trait CounterStore: Send + Sync + std::fmt::Debug {
    /// Increments the counter for `key`, installing `ttl` as its window on
    /// first touch (or after expiry), and returns the new count.
    fn increment(&self, key: &str, ttl: Duration) -> u64;

    /// Current count for `key`; zero when absent or expired. Read-only.
    fn get(&self, key: &str) -> u64;
}

#[derive(Debug, Clone, Copy)]
struct CounterEntry {
    count: u64,
    expires_at: SystemTime,
}

#[derive(Debug)]
struct MemoryInner {
    entries: HashMap<String, CounterEntry>,
    last_sweep: SystemTime,
}

/// In-process counter store: a mutex-guarded map with lazy expiry sweeps.
///
/// Expired entries are dropped wholesale at most every five minutes, so
/// memory stays bounded without a background task.
#[derive(Debug)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    clock: Arc<dyn Clock>,
}

impl MemoryStore {
    /// Creates a store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(RealClock::new()))
    }

    /// Creates a store using an injected clock.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let now = clock.now();
        Self { inner: Mutex::new(MemoryInner { entries: HashMap::new(), last_sweep: now }), clock }
    }

    /// Forces an expiry sweep now.
    pub fn cleanup(&self) {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        Self::sweep(&mut inner, now);
    }

    /// Number of live entries, including not-yet-swept expired ones.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).entries.len()
    }

    /// Whether the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(inner: &mut MemoryInner, now: SystemTime) {
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| entry.expires_at > now);
        inner.last_sweep = now;

        let removed = before - inner.entries.len();
        if removed > 0 {
            debug!(removed, remaining = inner.entries.len(), "swept expired rate-limit counters");
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for MemoryStore {
    fn increment(&self, key: &str, ttl: Duration) -> u64 {
        let now = self.clock.now();
        let mut inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        if now.duration_since(inner.last_sweep).unwrap_or_default() > SWEEP_INTERVAL {
            Self::sweep(&mut inner, now);
        }

        let entry = inner
            .entries
            .entry(key.to_owned())
            .or_insert(CounterEntry { count: 0, expires_at: now + ttl });

        if entry.expires_at <= now {
            *entry = CounterEntry { count: 1, expires_at: now + ttl };
        } else {
            entry.count += 1;
        }

        entry.count
    }

    fn get(&self, key: &str) -> u64 {
        let now = self.clock.now();
        let inner = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        match inner.entries.get(key) {
            Some(entry) if entry.expires_at > now => entry.count,
            _ => 0,
        }
    }
}

type StoreFactory = Box<dyn Fn(Arc<dyn Clock>) -> Arc<dyn CounterStore> + Send + Sync>;

/// Registry mapping a configured counter-store name to a constructor.
///
/// `"memory"` is built in; multi-process deployments register their
/// distributed store (atomic increment + expire) here.
pub struct StoreRegistry {
    factories: HashMap<String, StoreFactory>,
}

impl StoreRegistry {
    /// Creates a registry with the built-in `"memory"` store.
    pub fn new() -> Self {
        let mut registry = Self { factories: HashMap::new() };
        registry.register("memory", |clock| Arc::new(MemoryStore::with_clock(clock)));
        registry
    }

    /// Registers a constructor under a name, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn(Arc<dyn Clock>) -> Arc<dyn CounterStore> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Constructs the store registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown name.
    pub fn resolve(&self, name: &str, clock: Arc<dyn Clock>) -> Result<Arc<dyn CounterStore>> {
        self.factories
            .get(name)
            .map(|factory| factory(clock))
            .ok_or_else(|| PushError::configuration(format!("unknown counter store: {name}")))
    }
}

impl Default for StoreRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StoreRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRegistry")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Read-only view of one quota at one point in time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimitInfo {
    /// Configured maximum for the window.
    pub limit: u64,
    /// Accepted requests still available in the current window.
    pub remaining: u64,
    /// Length of the window.
    pub window: Duration,
    /// When a fresh window would end, measured from now.
    pub reset_at: DateTime<Utc>,
}

/// Per-resource request rate limiter.
#[derive(Debug)]
pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    limits: RateLimitConfig,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Creates a limiter over an in-memory store with the given quotas.
    pub fn new(limits: RateLimitConfig, events: Arc<dyn EventSink>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(RealClock::new());
        Self { store: Arc::new(MemoryStore::with_clock(clock.clone())), limits, events, clock }
    }

    /// Creates a limiter over an explicit store and clock.
    pub fn with_store(
        store: Arc<dyn CounterStore>,
        limits: RateLimitConfig,
        events: Arc<dyn EventSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { store, limits, events, clock }
    }

    /// Counts one request against the quota for the composite key and
    /// rejects it when the post-increment count exceeds the maximum.
    ///
    /// The increment is kept even on rejection, so rejected attempts keep
    /// contributing to the visible counter. Scopes without a configured
    /// rule always pass.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::RateLimitExceeded`] carrying the scope, the
    /// post-increment count, the maximum, and the window.
    pub fn check_rate_limit(
        &self,
        resource: ResourceType,
        resource_id: &str,
        user_id: Option<&str>,
    ) -> Result<()> {
        let Some(rule) = self.limits.rule(resource) else {
            return Ok(());
        };

        let key = limit_key(resource, resource_id, user_id);
        let current = self.store.increment(&key, rule.window);

        if current > rule.max_requests {
            self.events.publish(PushEvent::RateLimitExceeded {
                resource_type: resource.as_str().to_owned(),
                resource_id: resource_id.to_owned(),
                user_id: user_id.map(str::to_owned),
                current_count: current,
                max_requests: rule.max_requests,
                window_secs: rule.window.as_secs(),
            });

            return Err(PushError::rate_limited(resource, current, rule.max_requests, rule.window));
        }

        Ok(())
    }

    /// Like [`check_rate_limit`](Self::check_rate_limit) but answers with a
    /// boolean instead of an error. The attempt still counts against quota.
    pub fn within_rate_limit(
        &self,
        resource: ResourceType,
        resource_id: &str,
        user_id: Option<&str>,
    ) -> bool {
        self.check_rate_limit(resource, resource_id, user_id).is_ok()
    }

    /// Read-only quota snapshot for the composite key.
    ///
    /// Never perturbs the stored counter; calling it repeatedly yields the
    /// same `remaining`. `None` when the scope has no configured rule.
    pub fn rate_limit_info(
        &self,
        resource: ResourceType,
        resource_id: &str,
        user_id: Option<&str>,
    ) -> Option<RateLimitInfo> {
        let rule = self.limits.rule(resource)?;

        let key = limit_key(resource, resource_id, user_id);
        let current = self.store.get(&key);

        Some(RateLimitInfo {
            limit: rule.max_requests,
            remaining: rule.max_requests.saturating_sub(current),
            window: rule.window,
            reset_at: DateTime::<Utc>::from(self.clock.now() + rule.window),
        })
    }

    /// Configured quota rules.
    pub fn limits(&self) -> &RateLimitConfig {
        &self.limits
    }
}

/// Composite counter key: `pushrelay:rate_limit:<type>[:user_<id>]:<id>`.
fn limit_key(resource: ResourceType, resource_id: &str, user_id: Option<&str>) -> String {
    match user_id {
        Some(user) => {
            format!("pushrelay:rate_limit:{}:user_{user}:{resource_id}", resource.as_str())
        },
        None => format!("pushrelay:rate_limit:{}:{resource_id}", resource.as_str()),
    }
}
