//! Batch delivery of many notifications.
//!
//! Large fan-outs are split into chunks, and within a chunk notifications
//! for the same endpoint are delivered with a small stagger between them
//! instead of as a burst. Distinct endpoints proceed concurrently. When no
//! pool is available the batch layer falls back to delivering directly on
//! the calling task, sequentially.

use std::{collections::HashMap, sync::Arc};

use futures::future::join_all;
use pushrelay_core::{
    Clock, EventSink, GlobalMetrics, NoOpSink, Notification, PushError, PushEvent, RealClock,
    ResourceType, Result,
};
use tracing::{debug, warn};

use crate::{
    classify::{ErrorClassifier, FailureContext},
    config::BatchConfig,
    pool::DeliveryPool,
    rate_limit::RateLimiter,
    subscription::SubscriptionStore,
    transport::{PushConnection, WebPushSender},
};

enum DeliveryMode {
    /// Hand each notification to the shared worker pool.
    Pooled(Arc<DeliveryPool>),
    /// Deliver inline on the calling task, one at a time.
    Direct {
        sender: Arc<dyn WebPushSender>,
        connection: Arc<PushConnection>,
        metrics: Arc<GlobalMetrics>,
        store: Option<Arc<dyn SubscriptionStore>>,
        rate_limiter: Option<Arc<RateLimiter>>,
    },
}

impl std::fmt::Debug for DeliveryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pooled(_) => f.write_str("Pooled"),
            Self::Direct { .. } => f.write_str("Direct"),
        }
    }
}

/// Chunked, endpoint-staggered fan-out over a pool or inline sender.
#[derive(Debug)]
pub struct BatchDelivery {
    config: BatchConfig,
    mode: DeliveryMode,
    events: Arc<dyn EventSink>,
    clock: Arc<dyn Clock>,
}

impl BatchDelivery {
    /// Creates a batch layer that submits to a running [`DeliveryPool`].
    pub fn pooled(config: BatchConfig, pool: Arc<DeliveryPool>) -> Self {
        Self {
            config,
            mode: DeliveryMode::Pooled(pool),
            events: Arc::new(NoOpSink::new()),
            clock: Arc::new(RealClock::new()),
        }
    }

    /// Creates a batch layer that delivers inline, without a pool.
    ///
    /// Deliveries run sequentially on the calling task. Intended for small
    /// batches and environments where spawning a pool is not worth it.
    pub fn direct(
        config: BatchConfig,
        sender: Arc<dyn WebPushSender>,
        connection: Arc<PushConnection>,
        metrics: Arc<GlobalMetrics>,
    ) -> Self {
        Self {
            config,
            mode: DeliveryMode::Direct {
                sender,
                connection,
                metrics,
                store: None,
                rate_limiter: None,
            },
            events: Arc::new(NoOpSink::new()),
            clock: Arc::new(RealClock::new()),
        }
    }

    /// Publishes instrumentation events to the given sink.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    /// Overrides the clock, for tests.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// In direct mode, looks up and deletes subscriptions whose endpoint
    /// permanently rejected a delivery. No effect in pooled mode.
    #[must_use]
    pub fn subscription_store(mut self, store: Arc<dyn SubscriptionStore>) -> Self {
        if let DeliveryMode::Direct { store: slot, .. } = &mut self.mode {
            *slot = Some(store);
        }
        self
    }

    /// In direct mode, enforces per-endpoint quotas before each delivery.
    /// No effect in pooled mode, where the pool's own limiter applies.
    #[must_use]
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        if let DeliveryMode::Direct { rate_limiter: slot, .. } = &mut self.mode {
            *slot = Some(limiter);
        }
        self
    }

    /// Delivers every notification, in chunks.
    ///
    /// `batch_size` overrides the configured chunk size for this call.
    /// Pooled submissions never fail from here; a full pool queue drops and
    /// counts the overflowing tasks instead.
    ///
    /// # Errors
    ///
    /// In direct mode, rate-limit rejections and configuration errors stop
    /// the batch and propagate. Transient per-notification failures are
    /// classified and skipped so the rest of the batch still goes out.
    pub async fn deliver_all(
        &self,
        notifications: Vec<Notification>,
        batch_size: Option<usize>,
    ) -> Result<()> {
        if notifications.is_empty() {
            return Ok(());
        }

        let chunk_size = batch_size.unwrap_or(self.config.batch_size).max(1);
        let total = notifications.len();
        debug!(total, chunk_size, mode = ?self.mode, "starting batch delivery");

        for chunk in notifications.chunks(chunk_size) {
            let groups = group_by_endpoint(chunk);
            self.events.publish(PushEvent::BatchDelivery {
                chunk_size: chunk.len(),
                endpoints: groups.len(),
            });

            match &self.mode {
                DeliveryMode::Pooled(pool) => self.deliver_chunk_pooled(pool, groups).await,
                DeliveryMode::Direct { .. } => self.deliver_chunk_direct(chunk).await?,
            }
        }

        Ok(())
    }

    /// Submits one chunk to the pool, endpoint groups in parallel and
    /// same-endpoint notifications staggered.
    async fn deliver_chunk_pooled(
        &self,
        pool: &DeliveryPool,
        groups: Vec<(String, Vec<Notification>)>,
    ) {
        let submissions = groups.into_iter().map(|(_endpoint, group)| async move {
            for (index, notification) in group.into_iter().enumerate() {
                if index > 0 {
                    self.clock.sleep(self.config.stagger_step).await;
                }
                pool.enqueue(notification, None);
            }
        });

        join_all(submissions).await;
    }

    /// Delivers one chunk inline, sequentially.
    async fn deliver_chunk_direct(&self, chunk: &[Notification]) -> Result<()> {
        let DeliveryMode::Direct { sender, connection, metrics, store, rate_limiter } = &self.mode
        else {
            return Ok(());
        };
        let classifier = ErrorClassifier::new(metrics.clone(), self.events.clone());

        for notification in chunk {
            let endpoint = notification.endpoint();
            let ctx = FailureContext::new(endpoint, notification.title());

            metrics.delivery_attempted();

            if let Some(limiter) = rate_limiter {
                if let Err(error) =
                    limiter.check_rate_limit(ResourceType::Endpoint, endpoint, None)
                {
                    return Err(classifier.classify(error, &ctx));
                }
            }

            match sender.send(notification, connection).await {
                Ok(()) => {
                    metrics.delivery_succeeded();
                    self.events.publish(PushEvent::NotificationDelivery {
                        endpoint: endpoint.to_owned(),
                        title: notification.title().to_owned(),
                    });
                },
                Err(error) => {
                    let classified = classifier.classify(error, &ctx);
                    match classified {
                        PushError::ExpiredSubscription { .. } => {
                            if let Some(store) = store {
                                invalidate_by_endpoint(store.as_ref(), endpoint).await;
                            }
                        },
                        PushError::Configuration { .. } => return Err(classified),
                        // Transient failures skip this notification only.
                        _ => {},
                    }
                },
            }
        }

        Ok(())
    }
}

/// Groups a chunk by endpoint, preserving first-seen endpoint order and the
/// relative order of notifications within each endpoint.
fn group_by_endpoint(chunk: &[Notification]) -> Vec<(String, Vec<Notification>)> {
    let mut index: HashMap<&str, usize> = HashMap::new();
    let mut groups: Vec<(String, Vec<Notification>)> = Vec::new();

    for notification in chunk {
        match index.get(notification.endpoint()) {
            Some(&i) => groups[i].1.push(notification.clone()),
            None => {
                index.insert(notification.endpoint(), groups.len());
                groups.push((notification.endpoint().to_owned(), vec![notification.clone()]));
            },
        }
    }

    groups
}

/// Best-effort cleanup of the subscription behind a permanently rejected
/// endpoint. Failures are logged, never propagated.
async fn invalidate_by_endpoint(store: &dyn SubscriptionStore, endpoint: &str) {
    match store.find_by_endpoint(endpoint).await {
        Some(id) => {
            if let Err(error) = store.delete(id).await {
                warn!(
                    subscription_id = %id,
                    endpoint = %endpoint,
                    error = %error,
                    "failed to delete expired subscription"
                );
            }
        },
        None => debug!(endpoint = %endpoint, "no subscription found for expired endpoint"),
    }
}
