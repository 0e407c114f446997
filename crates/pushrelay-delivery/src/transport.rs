//! Push-protocol boundary and the shared outbound connection.
//!
//! The engine never speaks the Web Push wire protocol itself; it hands a
//! notification and the shared [`PushConnection`] to a [`WebPushSender`]
//! implementation, which owns encoding, encryption, and VAPID
//! identification. A [`SenderRegistry`] maps a configured name to a
//! constructor, resolved once at configuration time. The built-in
//! [`TestSender`] records deliveries for assertions.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use pushrelay_core::{Notification, PushError, Result};
use tracing::debug;

use crate::config::PoolConfig;

/// External push-delivery capability.
///
/// Implementations must be safe to call from many workers concurrently;
/// the connection handle is shared, never mutated.
#[async_trait]
pub trait WebPushSender: Send + Sync + std::fmt::Debug {
    /// Performs one delivery attempt.
    ///
    /// # Errors
    ///
    /// Returns [`PushError::ExpiredSubscription`] when the endpoint
    /// permanently rejected the subscription, and a delivery or
    /// configuration error otherwise. Implementations must not return
    /// [`PushError::RateLimitExceeded`]: quota checks run before `send` is
    /// called and publish their own `rate_limit_exceeded` event at the
    /// point of rejection, so a rate-limit error surfaced from here would
    /// be counted as a failure without an event.
    async fn send(&self, notification: &Notification, connection: &PushConnection) -> Result<()>;
}

/// Shared, reusable outbound HTTP connection handle.
///
/// Wraps a pooled [`reqwest::Client`] so connection setup is amortized
/// across every delivery. Cloning is cheap and all clones share the pool.
#[derive(Debug, Clone)]
pub struct PushConnection {
    client: reqwest::Client,
}

impl PushConnection {
    /// Builds the shared client from pool configuration.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the client cannot be built with
    /// the provided settings.
    pub fn new(config: &PoolConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .pool_max_idle_per_host(config.connection_pool_size)
            .timeout(config.request_timeout)
            .user_agent(concat!("pushrelay/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PushError::configuration(format!("failed to build push client: {e}")))?;

        Ok(Self { client })
    }

    /// The underlying HTTP client, for sender implementations.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }
}

type SenderFactory = Box<dyn Fn() -> Arc<dyn WebPushSender> + Send + Sync>;

/// Registry mapping a configured sender name to a constructor.
///
/// Resolved once at configuration time; hosts register their production
/// push-protocol implementation next to the built-in `"test"` sender.
pub struct SenderRegistry {
    factories: HashMap<String, SenderFactory>,
}

impl SenderRegistry {
    /// Creates a registry with the built-in `"test"` sender.
    pub fn new() -> Self {
        let mut registry = Self { factories: HashMap::new() };
        registry.register("test", || Arc::new(TestSender::new()));
        registry
    }

    /// Registers a constructor under a name, replacing any previous one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Arc<dyn WebPushSender> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    /// Constructs the sender registered under `name`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for an unknown name.
    pub fn resolve(&self, name: &str) -> Result<Arc<dyn WebPushSender>> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| PushError::configuration(format!("unknown delivery method: {name}")))
    }
}

impl Default for SenderRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SenderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SenderRegistry")
            .field("names", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Recording sender for tests.
///
/// Stores every delivered notification and can be told to fail specific
/// endpoints with a chosen error.
#[derive(Debug, Default)]
pub struct TestSender {
    deliveries: Mutex<Vec<Notification>>,
    failures: Mutex<HashMap<String, PushError>>,
}

impl TestSender {
    /// Creates an empty recording sender.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every send to `endpoint` fail with `error`.
    pub fn fail_endpoint(&self, endpoint: impl Into<String>, error: PushError) {
        self.failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).insert(endpoint.into(), error);
    }

    /// Snapshot of every delivered notification, in delivery order.
    pub fn deliveries(&self) -> Vec<Notification> {
        self.deliveries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }

    /// Number of recorded deliveries.
    pub fn delivery_count(&self) -> usize {
        self.deliveries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    /// Discards all recorded deliveries.
    pub fn clear_deliveries(&self) {
        self.deliveries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clear();
    }
}

#[async_trait]
impl WebPushSender for TestSender {
    async fn send(&self, notification: &Notification, _connection: &PushConnection) -> Result<()> {
        if let Some(error) =
            self.failures.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).get(notification.endpoint())
        {
            return Err(error.clone());
        }

        self.deliveries.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(notification.clone());
        debug!(endpoint = notification.endpoint(), title = notification.title(), "test sender delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pushrelay_core::ErrorKind;
    use serde_json::json;

    use super::*;

    fn notification(endpoint: &str) -> Notification {
        Notification::builder()
            .title("hi")
            .body("there")
            .endpoint(endpoint)
            .p256dh_key("p")
            .auth_key("a")
            .data("k", json!(1))
            .build()
            .unwrap()
    }

    fn connection() -> PushConnection {
        PushConnection::new(&PoolConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_sender_records_deliveries() {
        let sender = TestSender::new();
        let conn = connection();

        sender.send(&notification("https://push.example/1"), &conn).await.unwrap();
        sender.send(&notification("https://push.example/2"), &conn).await.unwrap();

        assert_eq!(sender.delivery_count(), 2);
        assert_eq!(sender.deliveries()[0].endpoint(), "https://push.example/1");

        sender.clear_deliveries();
        assert_eq!(sender.delivery_count(), 0);
    }

    #[tokio::test]
    async fn test_sender_injects_failures() {
        let sender = TestSender::new();
        let conn = connection();
        sender.fail_endpoint("https://push.example/bad", PushError::expired("410 Gone"));

        let err = sender.send(&notification("https://push.example/bad"), &conn).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ExpiredSubscription);

        // Other endpoints are unaffected and failures are not recorded.
        sender.send(&notification("https://push.example/ok"), &conn).await.unwrap();
        assert_eq!(sender.delivery_count(), 1);
    }

    #[test]
    fn registry_resolves_builtin_test_sender() {
        let registry = SenderRegistry::new();
        assert!(registry.resolve("test").is_ok());

        let err = registry.resolve("web_push").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Configuration);
    }

    #[test]
    fn registry_accepts_custom_senders() {
        let mut registry = SenderRegistry::new();
        registry.register("recording", || Arc::new(TestSender::new()));
        assert!(registry.resolve("recording").is_ok());
    }
}
