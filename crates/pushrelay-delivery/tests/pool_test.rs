//! Integration tests for the delivery pool lifecycle.
//!
//! Exercises task flow end to end through the bounded queue, worker
//! claiming, failure classification, the invalidation lane, and shutdown.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use pushrelay_core::{
    GlobalMetrics, MemorySink, Notification, PushError, Result, SubscriptionId,
};
use pushrelay_delivery::{
    DeliveryPool, LimitRule, PoolConfig, PushConnection, RateLimitConfig, RateLimiter,
    RecordingInvalidator, TestSender, WebPushSender,
};
use tokio::sync::Semaphore;

fn notification(endpoint: &str, title: &str) -> Notification {
    Notification::builder()
        .endpoint(endpoint)
        .p256dh_key("BPubKey")
        .auth_key("authsecret")
        .title(title)
        .body("body")
        .build()
        .expect("valid notification")
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn,pushrelay=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Polls `condition` until it holds or a second passes.
async fn wait_until(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met within 1s");
}

/// Sender that blocks every delivery until permits are released, for
/// driving the queue into overflow deterministically.
#[derive(Debug)]
struct GatedSender {
    gate: Arc<Semaphore>,
    inner: TestSender,
}

impl GatedSender {
    fn new() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        (Arc::new(Self { gate: gate.clone(), inner: TestSender::new() }), gate)
    }
}

#[async_trait]
impl WebPushSender for GatedSender {
    async fn send(&self, notification: &Notification, connection: &PushConnection) -> Result<()> {
        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| PushError::delivery("gate closed"))?;
        self.inner.send(notification, connection).await
    }
}

#[tokio::test]
async fn tasks_flow_through_workers_to_sender() {
    init_tracing();
    let sender = Arc::new(TestSender::new());
    let metrics = Arc::new(GlobalMetrics::new());
    let config = PoolConfig { pool_size: 4, ..Default::default() };
    let connection = PushConnection::new(&config).expect("connection");
    let pool = DeliveryPool::builder(config, sender.clone(), connection)
        .metrics(metrics.clone())
        .build();

    for i in 0..20 {
        assert!(pool.enqueue(notification(&format!("https://push.example/{}", i % 3), "hi"), None));
    }

    wait_until(|| sender.delivery_count() == 20).await;
    assert_eq!(metrics.attempted(), 20);
    assert_eq!(metrics.succeeded(), 20);
    assert_eq!(pool.metrics().queue_length, 0);

    pool.shutdown().await;
}

#[tokio::test]
async fn full_queue_drops_and_counts_overflow() {
    init_tracing();
    let (sender, gate) = GatedSender::new();
    let sink = Arc::new(MemorySink::new());
    let config = PoolConfig { pool_size: 1, queue_size: 1, ..Default::default() };
    let connection = PushConnection::new(&config).expect("connection");
    let pool = DeliveryPool::builder(config, sender.clone(), connection)
        .events(sink.clone())
        .build();

    // First task is claimed by the worker and blocks on the gate.
    assert!(pool.enqueue(notification("https://push.example/a", "1"), None));
    wait_until(|| pool.metrics().active_workers == 1).await;

    // Second fills the queue, third overflows.
    assert!(pool.enqueue(notification("https://push.example/a", "2"), None));
    assert!(!pool.enqueue(notification("https://push.example/a", "3"), None));

    let snapshot = pool.metrics();
    assert_eq!(snapshot.total_queued, 3);
    assert_eq!(snapshot.overflow_count, 1);
    assert!((snapshot.overflow_rate - 33.33).abs() < 0.01);
    assert_eq!(sink.count_named("pool_overflow"), 1);

    // Release the gate so the two accepted tasks drain.
    gate.add_permits(10);
    wait_until(|| sender.inner.delivery_count() == 2).await;

    pool.shutdown().await;
}

#[tokio::test]
async fn expired_subscription_is_invalidated_on_dedicated_lane() {
    init_tracing();
    let sender = Arc::new(TestSender::new());
    sender.fail_endpoint("https://push.example/gone", PushError::expired("410 Gone"));

    let metrics = Arc::new(GlobalMetrics::new());
    let sink = Arc::new(MemorySink::new());
    let invalidator = RecordingInvalidator::new();
    let config = PoolConfig { pool_size: 2, ..Default::default() };
    let connection = PushConnection::new(&config).expect("connection");
    let pool = DeliveryPool::builder(config, sender.clone(), connection)
        .metrics(metrics.clone())
        .events(sink.clone())
        .invalidator(Arc::new(invalidator.clone()))
        .build();

    let expired_id = SubscriptionId::new();
    pool.enqueue(notification("https://push.example/gone", "bye"), Some(expired_id));
    pool.enqueue(notification("https://push.example/ok", "hi"), Some(SubscriptionId::new()));

    wait_until(|| invalidator.invalidated().len() == 1).await;
    assert_eq!(invalidator.invalidated(), vec![expired_id]);

    wait_until(|| sender.delivery_count() == 1).await;
    assert_eq!(metrics.expired_subscriptions(), 1);
    assert_eq!(metrics.succeeded(), 1);
    assert_eq!(sink.count_named("subscription_expired"), 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn delivery_failure_is_classified_not_invalidated() {
    init_tracing();
    let sender = Arc::new(TestSender::new());
    sender.fail_endpoint("https://push.example/flaky", PushError::delivery("503"));

    let metrics = Arc::new(GlobalMetrics::new());
    let sink = Arc::new(MemorySink::new());
    let invalidator = RecordingInvalidator::new();
    let config = PoolConfig { pool_size: 1, ..Default::default() };
    let connection = PushConnection::new(&config).expect("connection");
    let pool = DeliveryPool::builder(config, sender.clone(), connection)
        .metrics(metrics.clone())
        .events(sink.clone())
        .invalidator(Arc::new(invalidator.clone()))
        .build();

    pool.enqueue(notification("https://push.example/flaky", "hi"), Some(SubscriptionId::new()));

    wait_until(|| metrics.failed() == 1).await;
    assert_eq!(sink.count_named("notification_delivery_failed"), 1);
    assert!(invalidator.invalidated().is_empty());

    pool.shutdown().await;
}

#[tokio::test]
async fn pool_enforces_endpoint_quota() {
    init_tracing();
    let sender = Arc::new(TestSender::new());
    let metrics = Arc::new(GlobalMetrics::new());
    let sink = Arc::new(MemorySink::new());
    let limits = RateLimitConfig {
        endpoint: Some(LimitRule::per_hour(1)),
        user: None,
        global: None,
        subscription: None,
    };
    let limiter = Arc::new(RateLimiter::new(limits, sink.clone()));

    let config = PoolConfig { pool_size: 1, ..Default::default() };
    let connection = PushConnection::new(&config).expect("connection");
    let pool = DeliveryPool::builder(config, sender.clone(), connection)
        .metrics(metrics.clone())
        .events(sink.clone())
        .rate_limiter(limiter)
        .build();

    pool.enqueue(notification("https://push.example/hot", "1"), None);
    pool.enqueue(notification("https://push.example/hot", "2"), None);

    wait_until(|| metrics.attempted() == 2).await;
    wait_until(|| metrics.failed() == 1).await;
    assert_eq!(sender.delivery_count(), 1);
    assert_eq!(sink.count_named("rate_limit_exceeded"), 1);

    pool.shutdown().await;
}

#[tokio::test]
async fn shutdown_completes_in_flight_delivery() {
    init_tracing();
    let (sender, gate) = GatedSender::new();
    let config =
        PoolConfig { pool_size: 1, shutdown_timeout: Duration::from_secs(2), ..Default::default() };
    let connection = PushConnection::new(&config).expect("connection");
    let pool = DeliveryPool::builder(config, sender.clone(), connection).build();

    pool.enqueue(notification("https://push.example/a", "slow"), None);
    wait_until(|| pool.metrics().active_workers == 1).await;

    // Unblock the delivery just before shutdown so the in-flight task can
    // finish inside the shutdown window.
    gate.add_permits(1);
    pool.shutdown().await;

    assert_eq!(sender.inner.delivery_count(), 1);
}

#[tokio::test]
async fn shutdown_drains_queued_tasks_with_ample_timeout() {
    init_tracing();
    let (sender, gate) = GatedSender::new();
    let config =
        PoolConfig { pool_size: 1, shutdown_timeout: Duration::from_secs(5), ..Default::default() };
    let connection = PushConnection::new(&config).expect("connection");
    let pool = DeliveryPool::builder(config, sender.clone(), connection).build();

    for i in 0..5 {
        assert!(pool.enqueue(notification("https://push.example/a", &format!("n{i}")), None));
    }
    // One task in flight, four still queued when shutdown begins.
    wait_until(|| {
        let snapshot = pool.metrics();
        snapshot.active_workers == 1 && snapshot.queue_length == 4
    })
    .await;

    let shutdown = tokio::spawn(pool.shutdown());
    gate.add_permits(5);
    shutdown.await.expect("shutdown completes");

    assert_eq!(sender.inner.delivery_count(), 5);
}

#[tokio::test]
async fn shutdown_drains_invalidation_lane() {
    init_tracing();
    let (sender, gate) = GatedSender::new();
    sender.inner.fail_endpoint("https://push.example/gone", PushError::expired("410 Gone"));
    let invalidator = RecordingInvalidator::new();
    let config =
        PoolConfig { pool_size: 1, shutdown_timeout: Duration::from_secs(5), ..Default::default() };
    let connection = PushConnection::new(&config).expect("connection");
    let pool = DeliveryPool::builder(config, sender.clone(), connection)
        .invalidator(Arc::new(invalidator.clone()))
        .build();

    let expired_id = SubscriptionId::new();
    pool.enqueue(notification("https://push.example/ok", "1"), None);
    pool.enqueue(notification("https://push.example/gone", "2"), Some(expired_id));
    wait_until(|| pool.metrics().active_workers == 1).await;

    let shutdown = tokio::spawn(pool.shutdown());
    gate.add_permits(5);
    shutdown.await.expect("shutdown completes");

    // The expired task was still queued when shutdown began; its
    // invalidation completed before the lane stopped.
    assert_eq!(invalidator.invalidated(), vec![expired_id]);
}

#[tokio::test]
async fn shutdown_aborts_workers_stuck_past_timeout() {
    init_tracing();
    let (sender, _gate) = GatedSender::new();
    let config = PoolConfig {
        pool_size: 1,
        shutdown_timeout: Duration::from_millis(50),
        ..Default::default()
    };
    let connection = PushConnection::new(&config).expect("connection");
    let pool = DeliveryPool::builder(config, sender.clone(), connection).build();

    // The worker blocks forever on the gate; shutdown must still return.
    pool.enqueue(notification("https://push.example/a", "stuck"), None);
    wait_until(|| pool.metrics().active_workers == 1).await;

    pool.shutdown().await;
    assert_eq!(sender.inner.delivery_count(), 0);
}
