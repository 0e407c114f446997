//! Central failure classification.
//!
//! Every delivery failure funnels through [`ErrorClassifier`], which routes
//! it to the matching counter, event, and log line. Callers get the error
//! back (possibly normalized) and decide themselves whether to invalidate a
//! subscription, propagate, or move on.

use std::sync::Arc;

use pushrelay_core::{EventSink, GlobalMetrics, PushError, PushEvent, SubscriptionId};
use tracing::{error, info, warn};

/// Where a failure happened, for events and logs.
#[derive(Debug, Clone)]
pub struct FailureContext {
    /// Push service endpoint the delivery targeted.
    pub endpoint: String,
    /// Subscription the notification belonged to, when known.
    pub subscription_id: Option<SubscriptionId>,
    /// Title of the failed notification.
    pub title: String,
}

impl FailureContext {
    /// Context for a delivery to `endpoint` with `title`.
    pub fn new(endpoint: impl Into<String>, title: impl Into<String>) -> Self {
        Self { endpoint: endpoint.into(), subscription_id: None, title: title.into() }
    }

    /// Attaches the owning subscription.
    #[must_use]
    pub fn with_subscription(mut self, id: SubscriptionId) -> Self {
        self.subscription_id = Some(id);
        self
    }
}

/// Routes failures to metrics, events, and logs by error kind.
#[derive(Debug, Clone)]
pub struct ErrorClassifier {
    metrics: Arc<GlobalMetrics>,
    events: Arc<dyn EventSink>,
}

impl ErrorClassifier {
    /// Creates a classifier reporting into the given metrics and sink.
    pub fn new(metrics: Arc<GlobalMetrics>, events: Arc<dyn EventSink>) -> Self {
        Self { metrics, events }
    }

    /// Records a failure and hands back the error to act on.
    ///
    /// Expired subscriptions count as expirations rather than delivery
    /// failures; the caller should invalidate the subscription. Rate-limit
    /// rejections count as failures but publish no event here, since the
    /// limiter already published one when it rejected. Configuration errors
    /// touch no delivery counter at all. Unexpected errors are normalized
    /// into delivery errors so downstream handling sees a closed set.
    pub fn classify(&self, error: PushError, ctx: &FailureContext) -> PushError {
        match error {
            PushError::ExpiredSubscription { .. } => {
                self.metrics.subscription_expired();
                self.events.publish(PushEvent::SubscriptionExpired {
                    endpoint: ctx.endpoint.clone(),
                    subscription_id: ctx.subscription_id,
                    error: error.to_string(),
                });
                info!(
                    endpoint = %ctx.endpoint,
                    subscription_id = ?ctx.subscription_id,
                    "subscription expired"
                );
                error
            },
            // The limiter publishes rate_limit_exceeded at the point of
            // rejection; senders never surface this variant (see
            // WebPushSender::send), so only count and log here.
            PushError::RateLimitExceeded { .. } => {
                self.metrics.delivery_failed();
                warn!(endpoint = %ctx.endpoint, error = %error, "delivery rate limited");
                error
            },
            PushError::Delivery { .. } => {
                self.metrics.delivery_failed();
                self.events.publish(PushEvent::NotificationDeliveryFailed {
                    endpoint: ctx.endpoint.clone(),
                    error: error.to_string(),
                });
                warn!(
                    endpoint = %ctx.endpoint,
                    title = %ctx.title,
                    error = %error,
                    "notification delivery failed"
                );
                error
            },
            PushError::Configuration { .. } => {
                self.events.publish(PushEvent::ConfigurationError { error: error.to_string() });
                error!(error = %error, "push configuration error");
                error
            },
            PushError::Unexpected { message } => {
                self.metrics.delivery_failed();
                self.events
                    .publish(PushEvent::UnexpectedError { error: message.clone() });
                error!(
                    endpoint = %ctx.endpoint,
                    error = %message,
                    "unexpected error during delivery"
                );
                PushError::delivery(format!("unexpected error: {message}"))
            },
        }
    }
}
