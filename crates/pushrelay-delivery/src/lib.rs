//! Concurrent web-push delivery engine.
//!
//! This crate implements the delivery core: a bounded worker pool that
//! performs one push attempt per task, a batch layer that chunks large
//! fan-outs and staggers same-endpoint deliveries, a per-resource rate
//! limiter, and an error classifier that routes failures to the correct
//! remediation.
//!
//! # Architecture
//!
//! ```text
//! caller ──▶ BatchDelivery ──▶ DeliveryPool ──▶ worker ──▶ WebPushSender
//!            (chunk, group,     (bounded queue,             (external push
//!             stagger)           drop on full)               protocol)
//!                                     │
//!                                     └──▶ invalidation lane (1 worker)
//! ```
//!
//! Failures flow through [`ErrorClassifier`], which publishes one
//! instrumentation event per classification and updates the shared
//! [`GlobalMetrics`](pushrelay_core::GlobalMetrics). A slow or failing
//! endpoint never stalls the others: the queue is bounded (overflow is a
//! counted drop, not a blocked caller) and same-endpoint bursts are
//! staggered by the batch layer.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use pushrelay_core::{GlobalMetrics, NoOpSink, RealClock};
//! use pushrelay_delivery::{DeliveryPool, PoolConfig, PushConnection, TestSender};
//!
//! # fn example() -> pushrelay_core::Result<()> {
//! let config = PoolConfig::default();
//! let connection = PushConnection::new(&config)?;
//! let pool = DeliveryPool::builder(config, Arc::new(TestSender::new()), connection)
//!     .metrics(Arc::new(GlobalMetrics::new()))
//!     .events(Arc::new(NoOpSink::new()))
//!     .build();
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod classify;
pub mod config;
pub mod pool;
pub mod rate_limit;
pub mod subscription;
pub mod transport;

pub use batch::BatchDelivery;
pub use classify::{ErrorClassifier, FailureContext};
pub use config::{BatchConfig, LimitRule, PoolConfig, RateLimitConfig};
pub use pool::{DeliveryPool, DeliveryPoolBuilder, PoolMetricsSnapshot};
pub use rate_limit::{CounterStore, MemoryStore, RateLimitInfo, RateLimiter, StoreRegistry};
pub use subscription::{
    MemorySubscriptionStore, RecordingInvalidator, SubscriptionInvalidator, SubscriptionStore,
};
pub use transport::{PushConnection, SenderRegistry, TestSender, WebPushSender};

/// Default number of concurrent delivery workers.
pub const DEFAULT_POOL_SIZE: usize = 50;

/// Default bounded delivery queue capacity.
pub const DEFAULT_QUEUE_SIZE: usize = 10_000;

/// Default notifications per batch chunk.
pub const DEFAULT_BATCH_SIZE: usize = 100;

/// Default delay between consecutive same-endpoint deliveries in a batch.
pub const DEFAULT_STAGGER_STEP: std::time::Duration = std::time::Duration::from_millis(10);
