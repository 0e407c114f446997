//! Subscription-store boundary.
//!
//! Persistence of subscriptions lives outside the engine. The pool only
//! needs a way to invalidate a subscription by its correlation token, and
//! the batch direct path needs endpoint lookup plus deletion for expired
//! cleanup. In-memory implementations are provided for tests.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use pushrelay_core::{Result, SubscriptionId};

/// External store of push subscriptions.
#[async_trait]
pub trait SubscriptionStore: Send + Sync + std::fmt::Debug {
    /// Looks up the subscription registered for an endpoint.
    async fn find_by_endpoint(&self, endpoint: &str) -> Option<SubscriptionId>;

    /// Deletes a subscription.
    ///
    /// # Errors
    ///
    /// Returns an error when the store rejects the deletion; callers treat
    /// cleanup as best-effort and only log such failures.
    async fn delete(&self, id: SubscriptionId) -> Result<()>;
}

/// Callback invoked (serialized, off the delivery workers) when a delivery
/// attempt proves a subscription permanently invalid.
#[async_trait]
pub trait SubscriptionInvalidator: Send + Sync + std::fmt::Debug {
    /// Invalidates one subscription.
    ///
    /// # Errors
    ///
    /// Returns an error when invalidation fails; the pool logs it and
    /// never propagates it.
    async fn invalidate(&self, id: SubscriptionId) -> Result<()>;
}

/// In-memory subscription store for tests.
#[derive(Debug, Default)]
pub struct MemorySubscriptionStore {
    by_endpoint: Mutex<HashMap<String, SubscriptionId>>,
    deleted: Mutex<Vec<SubscriptionId>>,
}

impl MemorySubscriptionStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a subscription for an endpoint, returning its id.
    pub fn insert(&self, endpoint: impl Into<String>) -> SubscriptionId {
        let id = SubscriptionId::new();
        self.by_endpoint.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).insert(endpoint.into(), id);
        id
    }

    /// Ids deleted so far, in deletion order.
    pub fn deleted(&self) -> Vec<SubscriptionId> {
        self.deleted.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait]
impl SubscriptionStore for MemorySubscriptionStore {
    async fn find_by_endpoint(&self, endpoint: &str) -> Option<SubscriptionId> {
        self.by_endpoint.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).get(endpoint).copied()
    }

    async fn delete(&self, id: SubscriptionId) -> Result<()> {
        let mut by_endpoint = self.by_endpoint.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        by_endpoint.retain(|_, stored| *stored != id);
        drop(by_endpoint);

        self.deleted.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(id);
        Ok(())
    }
}

/// Invalidator that records every call, for asserting exactly-once
/// invalidation in tests.
#[derive(Debug, Default, Clone)]
pub struct RecordingInvalidator {
    invalidated: Arc<Mutex<Vec<SubscriptionId>>>,
}

impl RecordingInvalidator {
    /// Creates an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids invalidated so far, in call order.
    pub fn invalidated(&self) -> Vec<SubscriptionId> {
        self.invalidated.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).clone()
    }
}

#[async_trait]
impl SubscriptionInvalidator for RecordingInvalidator {
    async fn invalidate(&self, id: SubscriptionId) -> Result<()> {
        self.invalidated.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).push(id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_finds_and_deletes() {
        let store = MemorySubscriptionStore::new();
        let id = store.insert("https://push.example/1");

        assert_eq!(store.find_by_endpoint("https://push.example/1").await, Some(id));
        assert_eq!(store.find_by_endpoint("https://push.example/2").await, None);

        store.delete(id).await.unwrap();
        assert_eq!(store.find_by_endpoint("https://push.example/1").await, None);
        assert_eq!(store.deleted(), vec![id]);
    }

    #[tokio::test]
    async fn recording_invalidator_keeps_call_order() {
        let invalidator = RecordingInvalidator::new();
        let first = SubscriptionId::new();
        let second = SubscriptionId::new();

        invalidator.invalidate(first).await.unwrap();
        invalidator.invalidate(second).await.unwrap();

        assert_eq!(invalidator.invalidated(), vec![first, second]);
    }
}
