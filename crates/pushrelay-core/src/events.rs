//! Instrumentation events for decoupled observability.
//!
//! The engine publishes one structured event for each notable outcome:
//! deliveries, failures, overflow drops, rate-limit rejections, batch
//! progress, and expired subscriptions. Sinks are fire-and-forget: a
//! `publish` call must never block the delivery path and its failures never
//! propagate.

use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::notification::SubscriptionId;

/// Structured instrumentation event published by the engine.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PushEvent {
    /// A notification was delivered.
    NotificationDelivery {
        /// Target endpoint URL.
        endpoint: String,
        /// Notification title.
        title: String,
    },
    /// A delivery attempt failed with a transient error.
    NotificationDeliveryFailed {
        /// Target endpoint URL.
        endpoint: String,
        /// Failure description.
        error: String,
    },
    /// A task was dropped because the bounded delivery queue was full.
    PoolOverflow {
        /// Enqueue attempts since pool start.
        total_queued: u64,
        /// Dropped tasks since pool start.
        overflow_count: u64,
        /// Percentage of enqueue attempts dropped.
        overflow_rate: f64,
    },
    /// A rate-limit quota was exceeded.
    RateLimitExceeded {
        /// Scope whose quota was exceeded.
        resource_type: String,
        /// Identifier within the scope.
        resource_id: String,
        /// Owning user, when scoped per user.
        user_id: Option<String>,
        /// Post-increment counter value.
        current_count: u64,
        /// Configured maximum for the window.
        max_requests: u64,
        /// Quota window in seconds.
        window_secs: u64,
    },
    /// A batch chunk was handed to the delivery layer.
    BatchDelivery {
        /// Notifications in the chunk.
        chunk_size: usize,
        /// Distinct endpoints in the chunk.
        endpoints: usize,
    },
    /// An endpoint permanently rejected a subscription.
    SubscriptionExpired {
        /// Target endpoint URL.
        endpoint: String,
        /// Correlation token, when known.
        subscription_id: Option<SubscriptionId>,
        /// Rejection description.
        error: String,
    },
    /// Invalid or missing setup was detected.
    ConfigurationError {
        /// Problem description.
        error: String,
    },
    /// An uncategorized error was observed.
    UnexpectedError {
        /// Failure description.
        error: String,
    },
}

impl PushEvent {
    /// Stable event name, matching the serialized `event` tag.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NotificationDelivery { .. } => "notification_delivery",
            Self::NotificationDeliveryFailed { .. } => "notification_delivery_failed",
            Self::PoolOverflow { .. } => "pool_overflow",
            Self::RateLimitExceeded { .. } => "rate_limit_exceeded",
            Self::BatchDelivery { .. } => "batch_delivery",
            Self::SubscriptionExpired { .. } => "subscription_expired",
            Self::ConfigurationError { .. } => "configuration_error",
            Self::UnexpectedError { .. } => "unexpected_error",
        }
    }
}

/// Destination for instrumentation events.
///
/// Implementations must not block and must swallow their own failures;
/// the engine treats `publish` as infallible.
pub trait EventSink: Send + Sync + std::fmt::Debug {
    /// Publishes one event. Fire-and-forget.
    fn publish(&self, event: PushEvent);
}

/// Sink that discards every event.
#[derive(Debug, Default)]
pub struct NoOpSink;

impl NoOpSink {
    /// Creates a new discarding sink.
    pub fn new() -> Self {
        Self
    }
}

impl EventSink for NoOpSink {
    fn publish(&self, _event: PushEvent) {}
}

/// Sink that forwards every event to multiple subscribers.
#[derive(Debug, Clone, Default)]
pub struct MulticastSink {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl MulticastSink {
    /// Creates a multicast sink with no subscribers.
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_sink(&mut self, sink: Arc<dyn EventSink>) {
        self.sinks.push(sink);
    }

    /// Number of registered subscribers.
    pub fn sink_count(&self) -> usize {
        self.sinks.len()
    }
}

impl EventSink for MulticastSink {
    fn publish(&self, event: PushEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone());
        }
    }
}

/// Recording sink for tests and local inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<PushEvent>>,
}

impl MemorySink {
    /// Creates an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every published event, in publish order.
    pub fn events(&self) -> Vec<PushEvent> {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Number of published events with the given name.
    pub fn count_named(&self, name: &str) -> usize {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).iter().filter(|e| e.name() == name).count()
    }

    /// Discards all recorded events.
    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

impl EventSink for MemorySink {
    fn publish(&self, event: PushEvent) {
        self.events.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(event);
    }
}
