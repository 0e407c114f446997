//! Bounded worker pool for concurrent push delivery.
//!
//! Tasks enter through a bounded queue. When the queue is full the task is
//! dropped and counted rather than blocking the caller, so a burst beyond
//! capacity degrades to partial delivery instead of backpressure on the
//! producer. A separate single-worker lane serializes subscription
//! invalidations so cleanup writes never race each other.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use pushrelay_core::{
    metrics::round2, DeliveryTask, EventSink, GlobalMetrics, NoOpSink, Notification, PushEvent,
    ResourceType, SubscriptionId,
};
use serde::Serialize;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    classify::{ErrorClassifier, FailureContext},
    config::PoolConfig,
    rate_limit::RateLimiter,
    subscription::SubscriptionInvalidator,
    transport::{PushConnection, WebPushSender},
};

/// Live counters for the pool itself, as opposed to delivery outcomes.
#[derive(Debug, Default)]
struct PoolCounters {
    total_queued: AtomicU64,
    overflow_count: AtomicU64,
    queue_length: AtomicUsize,
    active_workers: AtomicUsize,
}

impl PoolCounters {
    fn overflow_rate(&self) -> f64 {
        let total = self.total_queued.load(Ordering::Relaxed);
        if total == 0 {
            return 0.0;
        }
        let overflow = self.overflow_count.load(Ordering::Relaxed);
        round2(overflow as f64 / total as f64 * 100.0)
    }
}

/// Point-in-time view of the pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PoolMetricsSnapshot {
    /// Tasks accepted into the queue plus tasks dropped on overflow.
    pub total_queued: u64,
    /// Tasks dropped because the queue was full.
    pub overflow_count: u64,
    /// Dropped tasks as a percentage of all enqueue attempts.
    pub overflow_rate: f64,
    /// Tasks currently waiting in the queue.
    pub queue_length: usize,
    /// Workers currently executing a delivery.
    pub active_workers: usize,
    /// Configured worker count.
    pub max_workers: usize,
}

/// Everything a delivery worker needs, shared across the pool.
struct WorkerContext {
    queue: Arc<Mutex<mpsc::Receiver<DeliveryTask>>>,
    sender: Arc<dyn WebPushSender>,
    connection: Arc<PushConnection>,
    counters: Arc<PoolCounters>,
    metrics: Arc<GlobalMetrics>,
    events: Arc<dyn EventSink>,
    classifier: ErrorClassifier,
    rate_limiter: Option<Arc<RateLimiter>>,
    invalidation_tx: Option<mpsc::UnboundedSender<SubscriptionId>>,
    cancel: CancellationToken,
}

/// Bounded pool of delivery workers with drop-on-overflow admission.
///
/// Built via [`DeliveryPool::builder`]; workers start as part of `build()`
/// and run until [`shutdown`](Self::shutdown) closes the queue and drains
/// it. Dropping the pool without shutting it down cancels the workers so
/// no tasks leak, but skips the drain.
pub struct DeliveryPool {
    config: PoolConfig,
    tx: Option<mpsc::Sender<DeliveryTask>>,
    counters: Arc<PoolCounters>,
    events: Arc<dyn EventSink>,
    cancel: CancellationToken,
    worker_handles: Vec<JoinHandle<()>>,
    invalidation_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for DeliveryPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryPool")
            .field("pool_size", &self.config.pool_size)
            .field("queue_size", &self.config.queue_size)
            .field("workers", &self.worker_handles.len())
            .finish_non_exhaustive()
    }
}

impl DeliveryPool {
    /// Starts building a pool over the given sender and connection.
    pub fn builder(
        config: PoolConfig,
        sender: Arc<dyn WebPushSender>,
        connection: PushConnection,
    ) -> DeliveryPoolBuilder {
        DeliveryPoolBuilder {
            config,
            sender,
            connection: Arc::new(connection),
            metrics: None,
            events: None,
            rate_limiter: None,
            invalidator: None,
        }
    }

    /// Submits one notification for asynchronous delivery.
    ///
    /// Returns `true` when the task was accepted. A full queue drops the
    /// task, counts the overflow, and publishes a `pool_overflow` event;
    /// enqueueing after shutdown drops the task silently. Neither case
    /// blocks the caller.
    pub fn enqueue(
        &self,
        notification: Notification,
        subscription_id: Option<SubscriptionId>,
    ) -> bool {
        self.counters.total_queued.fetch_add(1, Ordering::Relaxed);

        let task = DeliveryTask { notification, subscription_id };
        let Some(tx) = &self.tx else {
            debug!(
                endpoint = %task.notification.endpoint(),
                "delivery pool is shut down, dropping notification"
            );
            return false;
        };
        match tx.try_send(task) {
            Ok(()) => {
                self.counters.queue_length.fetch_add(1, Ordering::Relaxed);
                true
            },
            Err(mpsc::error::TrySendError::Full(task)) => {
                let overflow =
                    self.counters.overflow_count.fetch_add(1, Ordering::Relaxed) + 1;
                let total = self.counters.total_queued.load(Ordering::Relaxed);
                let rate = self.counters.overflow_rate();

                self.events.publish(PushEvent::PoolOverflow {
                    total_queued: total,
                    overflow_count: overflow,
                    overflow_rate: rate,
                });
                warn!(
                    endpoint = %task.notification.endpoint(),
                    overflow_count = overflow,
                    overflow_rate = rate,
                    "delivery queue full, dropping notification"
                );
                false
            },
            Err(mpsc::error::TrySendError::Closed(task)) => {
                debug!(
                    endpoint = %task.notification.endpoint(),
                    "delivery pool is shut down, dropping notification"
                );
                false
            },
        }
    }

    /// Current pool counters.
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            total_queued: self.counters.total_queued.load(Ordering::Relaxed),
            overflow_count: self.counters.overflow_count.load(Ordering::Relaxed),
            overflow_rate: self.counters.overflow_rate(),
            queue_length: self.counters.queue_length.load(Ordering::Relaxed),
            active_workers: self.counters.active_workers.load(Ordering::Relaxed),
            max_workers: self.config.pool_size,
        }
    }

    /// Stops the pool after draining queued tasks.
    ///
    /// The queue is closed to new submissions, workers keep claiming tasks
    /// until it is empty and then exit, and the invalidation lane finishes
    /// its backlog. Workers still running when the shutdown timeout expires
    /// are cancelled and aborted, discarding whatever remains queued.
    pub async fn shutdown(mut self) {
        info!(queue_length = self.metrics().queue_length, "shutting down delivery pool");

        // Workers exit once the closed queue runs dry; the last worker to
        // exit drops its lane sender, which lets the invalidation worker
        // drain and stop as well.
        drop(self.tx.take());

        let mut handles = std::mem::take(&mut self.worker_handles);
        if let Some(handle) = self.invalidation_handle.take() {
            handles.push(handle);
        }

        let joined = tokio::time::timeout(self.config.shutdown_timeout, async {
            for handle in &mut handles {
                if let Err(join_error) = handle.await {
                    error!(error = %join_error, "delivery worker panicked during shutdown");
                }
            }
        })
        .await;

        if joined.is_err() {
            let still_running = handles.iter().filter(|h| !h.is_finished()).count();
            warn!(
                still_running,
                timeout_millis = self.config.shutdown_timeout.as_millis() as u64,
                "worker shutdown timed out, aborting remaining workers"
            );
            self.cancel.cancel();
            for handle in &handles {
                handle.abort();
            }
        }

        let snapshot = self.metrics();
        info!(
            total_queued = snapshot.total_queued,
            overflow_count = snapshot.overflow_count,
            overflow_rate = snapshot.overflow_rate,
            "delivery pool shut down"
        );
    }
}

impl Drop for DeliveryPool {
    fn drop(&mut self) {
        if !self.cancel.is_cancelled() {
            let active = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
            if active > 0 {
                warn!(
                    active_workers = active,
                    "delivery pool dropped without shutdown, cancelling workers"
                );
            }
            self.cancel.cancel();
        }
    }
}

/// Builder for [`DeliveryPool`].
pub struct DeliveryPoolBuilder {
    config: PoolConfig,
    sender: Arc<dyn WebPushSender>,
    connection: Arc<PushConnection>,
    metrics: Option<Arc<GlobalMetrics>>,
    events: Option<Arc<dyn EventSink>>,
    rate_limiter: Option<Arc<RateLimiter>>,
    invalidator: Option<Arc<dyn SubscriptionInvalidator>>,
}

impl DeliveryPoolBuilder {
    /// Shares delivery outcome counters with the rest of the process.
    #[must_use]
    pub fn metrics(mut self, metrics: Arc<GlobalMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Publishes instrumentation events to the given sink.
    #[must_use]
    pub fn events(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = Some(events);
        self
    }

    /// Enforces quotas before each delivery attempt.
    #[must_use]
    pub fn rate_limiter(mut self, limiter: Arc<RateLimiter>) -> Self {
        self.rate_limiter = Some(limiter);
        self
    }

    /// Enables the invalidation lane: expired subscriptions are handed to
    /// `invalidator` one at a time on a dedicated worker.
    #[must_use]
    pub fn invalidator(mut self, invalidator: Arc<dyn SubscriptionInvalidator>) -> Self {
        self.invalidator = Some(invalidator);
        self
    }

    /// Spawns the workers and returns the running pool.
    ///
    /// Must be called within a tokio runtime.
    pub fn build(self) -> DeliveryPool {
        let metrics = self.metrics.unwrap_or_default();
        let events: Arc<dyn EventSink> = self.events.unwrap_or_else(|| Arc::new(NoOpSink::new()));

        let (tx, rx) = mpsc::channel(self.config.queue_size.max(1));
        let queue = Arc::new(Mutex::new(rx));
        let counters = Arc::new(PoolCounters::default());
        let cancel = CancellationToken::new();
        let classifier = ErrorClassifier::new(metrics.clone(), events.clone());

        let (invalidation_tx, invalidation_handle) = match self.invalidator {
            Some(invalidator) => {
                let (itx, irx) = mpsc::unbounded_channel();
                let handle =
                    tokio::spawn(invalidation_worker(irx, invalidator, cancel.clone()));
                (Some(itx), Some(handle))
            },
            None => (None, None),
        };

        info!(
            pool_size = self.config.pool_size,
            queue_size = self.config.queue_size,
            invalidation_lane = invalidation_handle.is_some(),
            "starting delivery pool"
        );

        let mut worker_handles = Vec::with_capacity(self.config.pool_size);
        for worker_id in 0..self.config.pool_size.max(1) {
            let ctx = WorkerContext {
                queue: queue.clone(),
                sender: self.sender.clone(),
                connection: self.connection.clone(),
                counters: counters.clone(),
                metrics: metrics.clone(),
                events: events.clone(),
                classifier: classifier.clone(),
                rate_limiter: self.rate_limiter.clone(),
                invalidation_tx: invalidation_tx.clone(),
                cancel: cancel.clone(),
            };
            worker_handles.push(tokio::spawn(delivery_worker(worker_id, ctx)));
        }

        DeliveryPool {
            config: self.config,
            tx: Some(tx),
            counters,
            events,
            cancel,
            worker_handles,
            invalidation_handle,
        }
    }
}

/// One delivery worker: claim a task, attempt it, classify any failure.
async fn delivery_worker(worker_id: usize, ctx: WorkerContext) {
    debug!(worker_id, "delivery worker starting");

    loop {
        let task = tokio::select! {
            biased;
            () = ctx.cancel.cancelled() => break,
            task = async { ctx.queue.lock().await.recv().await } => task,
        };

        let Some(task) = task else { break };

        ctx.counters.queue_length.fetch_sub(1, Ordering::Relaxed);
        ctx.counters.active_workers.fetch_add(1, Ordering::Relaxed);

        deliver_one(&ctx, task).await;

        ctx.counters.active_workers.fetch_sub(1, Ordering::Relaxed);
    }

    debug!(worker_id, "delivery worker stopped");
}

/// A single delivery attempt, including quota checks and failure routing.
async fn deliver_one(ctx: &WorkerContext, task: DeliveryTask) {
    let notification = task.notification;
    let endpoint = notification.endpoint().to_owned();
    let title = notification.title().to_owned();

    ctx.metrics.delivery_attempted();

    if let Some(limiter) = &ctx.rate_limiter {
        let checked = limiter
            .check_rate_limit(ResourceType::Global, "deliveries", None)
            .and_then(|()| limiter.check_rate_limit(ResourceType::Endpoint, &endpoint, None));
        if let Err(error) = checked {
            let mut fail_ctx = FailureContext::new(&endpoint, &title);
            if let Some(id) = task.subscription_id {
                fail_ctx = fail_ctx.with_subscription(id);
            }
            ctx.classifier.classify(error, &fail_ctx);
            return;
        }
    }

    match ctx.sender.send(&notification, &ctx.connection).await {
        Ok(()) => {
            ctx.metrics.delivery_succeeded();
            ctx.events.publish(PushEvent::NotificationDelivery {
                endpoint: endpoint.clone(),
                title: title.clone(),
            });
            debug!(endpoint = %endpoint, title = %title, "notification delivered");
        },
        Err(error) => {
            let mut fail_ctx = FailureContext::new(&endpoint, &title);
            if let Some(id) = task.subscription_id {
                fail_ctx = fail_ctx.with_subscription(id);
            }
            let classified = ctx.classifier.classify(error, &fail_ctx);

            if classified.is_permanent() {
                if let (Some(id), Some(itx)) = (task.subscription_id, &ctx.invalidation_tx) {
                    if itx.send(id).is_err() {
                        debug!(subscription_id = %id, "invalidation lane closed");
                    }
                }
            }
        },
    }
}

/// The invalidation lane: one worker, so cleanup writes are serialized.
async fn invalidation_worker(
    mut rx: mpsc::UnboundedReceiver<SubscriptionId>,
    invalidator: Arc<dyn SubscriptionInvalidator>,
    cancel: CancellationToken,
) {
    debug!("invalidation worker starting");

    loop {
        let id = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            id = rx.recv() => id,
        };

        let Some(id) = id else { break };

        match invalidator.invalidate(id).await {
            Ok(()) => info!(subscription_id = %id, "invalidated expired subscription"),
            Err(error) => {
                warn!(subscription_id = %id, error = %error, "subscription invalidation failed");
            },
        }
    }

    debug!("invalidation worker stopped");
}
