//! Error taxonomy for push delivery operations.
//!
//! Every failure the engine observes is routed into one of a fixed set of
//! kinds, each with a distinct remediation policy: expired subscriptions
//! trigger cleanup, rate-limit rejections are surfaced to the caller,
//! delivery failures are retryable by an external job layer, configuration
//! errors are fatal at setup time, and anything uncategorized is wrapped as
//! a delivery failure for uniform handling.

use std::{fmt, time::Duration};

use thiserror::Error;

/// Result type alias for push operations.
pub type Result<T> = std::result::Result<T, PushError>;

/// Resource scope a rate-limit quota applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceType {
    /// A single push endpoint URL.
    Endpoint,
    /// A user owning one or more subscriptions.
    User,
    /// The whole process.
    Global,
    /// A single subscription.
    Subscription,
}

impl ResourceType {
    /// Stable lowercase label used in counter keys and event payloads.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Endpoint => "endpoint",
            Self::User => "user",
            Self::Global => "global",
            Self::Subscription => "subscription",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure taxonomy for push delivery.
#[derive(Debug, Clone, Error)]
pub enum PushError {
    /// The endpoint permanently rejected the subscription. No retry;
    /// triggers subscription cleanup.
    #[error("subscription expired or invalid: {message}")]
    ExpiredSubscription {
        /// Description of the rejection.
        message: String,
    },

    /// A quota was exceeded. The increment is not rolled back, so the
    /// rejected attempt itself still counts against the quota.
    #[error("rate limit exceeded for {resource}: {current}/{max} in {}s", window.as_secs())]
    RateLimitExceeded {
        /// Scope whose quota was exceeded.
        resource: ResourceType,
        /// Post-increment counter value.
        current: u64,
        /// Configured maximum for the window.
        max: u64,
        /// Length of the quota window.
        window: Duration,
    },

    /// Transient network or protocol failure. Retryable by the external
    /// job layer with bounded attempts.
    #[error("push delivery failed: {message}")]
    Delivery {
        /// Description of the failure.
        message: String,
    },

    /// Invalid or missing setup, e.g. a malformed VAPID key. Fatal at
    /// configuration time, not per delivery.
    #[error("invalid push configuration: {message}")]
    Configuration {
        /// Description of the problem.
        message: String,
    },

    /// Anything uncategorized. The classifier wraps this as a delivery
    /// failure after logging it with more detail.
    #[error("unexpected push error: {message}")]
    Unexpected {
        /// Description of the failure.
        message: String,
    },
}

impl PushError {
    /// Creates an expired-subscription error.
    pub fn expired(message: impl Into<String>) -> Self {
        Self::ExpiredSubscription { message: message.into() }
    }

    /// Creates a rate-limit rejection carrying the full counter context.
    pub fn rate_limited(resource: ResourceType, current: u64, max: u64, window: Duration) -> Self {
        Self::RateLimitExceeded { resource, current, max, window }
    }

    /// Creates a transient delivery failure.
    pub fn delivery(message: impl Into<String>) -> Self {
        Self::Delivery { message: message.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an uncategorized error.
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected { message: message.into() }
    }

    /// Whether this failure means the subscription itself is no longer
    /// valid, as opposed to a transient issue.
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::ExpiredSubscription { .. })
    }

    /// Classification kind for metrics labels and routing.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::ExpiredSubscription { .. } => ErrorKind::ExpiredSubscription,
            Self::RateLimitExceeded { .. } => ErrorKind::RateLimit,
            Self::Delivery { .. } => ErrorKind::Delivery,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Unexpected { .. } => ErrorKind::Unexpected,
        }
    }
}

/// Category of push error for metrics and event payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Endpoint permanently rejected the subscription.
    ExpiredSubscription,
    /// A quota was exceeded.
    RateLimit,
    /// Transient network/protocol failure.
    Delivery,
    /// Invalid or missing setup.
    Configuration,
    /// Uncategorized failure.
    Unexpected,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ExpiredSubscription => write!(f, "expired_subscription"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Delivery => write!(f, "delivery"),
            Self::Configuration => write!(f, "configuration"),
            Self::Unexpected => write!(f, "unexpected"),
        }
    }
}
