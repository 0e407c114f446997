//! Core domain types for the pushrelay web-push delivery engine.
//!
//! Provides the notification value object, the push error taxonomy,
//! instrumentation events, process-wide delivery metrics, and the clock
//! abstraction. The delivery crate builds the concurrent engine on top of
//! these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod events;
pub mod metrics;
pub mod notification;
pub mod time;

pub use error::{ErrorKind, PushError, ResourceType, Result};
pub use events::{EventSink, MemorySink, MulticastSink, NoOpSink, PushEvent};
pub use metrics::{GlobalMetrics, MetricsSnapshot};
pub use notification::{
    DeliveryTask, Notification, NotificationAction, NotificationBuilder, NotificationOptions,
    SubscriptionId, Urgency,
};
pub use time::{Clock, RealClock, TestClock};
