//! Engine configuration.
//!
//! Plain serde structs with production defaults; the host application owns
//! where the values come from (file, environment, tenant settings) and the
//! engine only reads them.

use std::{collections::HashMap, time::Duration};

use pushrelay_core::ResourceType;
use serde::{Deserialize, Serialize};

/// Configuration for the delivery pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of concurrent delivery workers.
    pub pool_size: usize,

    /// Bounded delivery queue capacity. Enqueues beyond this are dropped.
    pub queue_size: usize,

    /// Idle connections kept per push-service host on the shared client.
    pub connection_pool_size: usize,

    /// Timeout for a single outbound push request.
    pub request_timeout: Duration,

    /// Maximum time for workers to drain queued tasks and finish in-flight
    /// deliveries at shutdown before they are terminated.
    pub shutdown_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: crate::DEFAULT_POOL_SIZE,
            queue_size: crate::DEFAULT_QUEUE_SIZE,
            connection_pool_size: 10,
            request_timeout: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(1),
        }
    }
}

/// Configuration for batch delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Notifications per chunk; bounds peak resource use on large fan-outs.
    pub batch_size: usize,

    /// Delay inserted between consecutive deliveries to the same endpoint
    /// within one chunk.
    pub stagger_step: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { batch_size: crate::DEFAULT_BATCH_SIZE, stagger_step: crate::DEFAULT_STAGGER_STEP }
    }
}

/// Quota for one resource scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitRule {
    /// Maximum accepted requests within one window.
    pub max_requests: u64,

    /// Length of the sliding window.
    pub window: Duration,
}

impl LimitRule {
    /// Creates a rule of `max_requests` per `window`.
    pub const fn new(max_requests: u64, window: Duration) -> Self {
        Self { max_requests, window }
    }

    /// `max_requests` per hour.
    pub const fn per_hour(max_requests: u64) -> Self {
        Self::new(max_requests, Duration::from_secs(3600))
    }
}

/// Per-resource rate-limit quotas.
///
/// Scopes without a rule are unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Quota per push endpoint.
    pub endpoint: Option<LimitRule>,
    /// Quota per user.
    pub user: Option<LimitRule>,
    /// Process-wide quota.
    pub global: Option<LimitRule>,
    /// Quota per subscription.
    pub subscription: Option<LimitRule>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            endpoint: Some(LimitRule::per_hour(100)),
            user: Some(LimitRule::per_hour(1000)),
            global: Some(LimitRule::per_hour(10_000)),
            subscription: Some(LimitRule::per_hour(50)),
        }
    }
}

impl RateLimitConfig {
    /// A configuration with no quotas at all.
    pub fn unlimited() -> Self {
        Self { endpoint: None, user: None, global: None, subscription: None }
    }

    /// Rule for one resource scope, if configured.
    pub fn rule(&self, resource: ResourceType) -> Option<LimitRule> {
        match resource {
            ResourceType::Endpoint => self.endpoint,
            ResourceType::User => self.user,
            ResourceType::Global => self.global,
            ResourceType::Subscription => self.subscription,
        }
    }

    /// Map view of every configured rule, for diagnostics.
    pub fn rules(&self) -> HashMap<ResourceType, LimitRule> {
        [
            (ResourceType::Endpoint, self.endpoint),
            (ResourceType::User, self.user),
            (ResourceType::Global, self.global),
            (ResourceType::Subscription, self.subscription),
        ]
        .into_iter()
        .filter_map(|(resource, rule)| rule.map(|r| (resource, r)))
        .collect()
    }
}
