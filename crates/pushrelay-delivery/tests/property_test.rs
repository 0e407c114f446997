//! Property-based tests for quota accounting and message encoding.
//!
//! Focuses on counting invariants that must hold for any quota shape and
//! any attempt sequence, rather than enumerating individual scenarios.

use std::{sync::Arc, time::Duration};

use proptest::prelude::*;
use pushrelay_core::{NoOpSink, Notification, ResourceType, TestClock};
use pushrelay_delivery::{
    CounterStore, LimitRule, MemoryStore, RateLimitConfig, RateLimiter,
};

fn limiter(max: u64) -> RateLimiter {
    let clock = Arc::new(TestClock::new());
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let config = RateLimitConfig {
        endpoint: Some(LimitRule { max_requests: max, window: Duration::from_secs(3600) }),
        user: None,
        global: None,
        subscription: None,
    };
    RateLimiter::with_store(store, config, Arc::new(NoOpSink::new()), clock)
}

proptest! {
    /// Exactly `min(attempts, max)` requests are accepted, in order.
    #[test]
    fn accepted_count_is_quota_capped(max in 1u64..50, attempts in 1usize..120) {
        let limiter = limiter(max);

        let accepted = (0..attempts)
            .filter(|_| {
                limiter
                    .check_rate_limit(ResourceType::Endpoint, "https://push.example/a", None)
                    .is_ok()
            })
            .count();

        prop_assert_eq!(accepted as u64, max.min(attempts as u64));
    }

    /// The counter reflects every attempt, accepted or rejected.
    #[test]
    fn counter_includes_rejected_attempts(max in 1u64..20, attempts in 1usize..80) {
        let limiter = limiter(max);

        for _ in 0..attempts {
            let _ = limiter.check_rate_limit(ResourceType::Endpoint, "https://push.example/a", None);
        }

        let info = limiter
            .rate_limit_info(ResourceType::Endpoint, "https://push.example/a", None)
            .expect("rule configured");
        prop_assert_eq!(info.remaining, max.saturating_sub(attempts as u64));
    }

    /// Counters for distinct keys never interfere.
    #[test]
    fn distinct_keys_count_independently(
        increments in prop::collection::vec(0usize..8, 1..20),
    ) {
        let clock = Arc::new(TestClock::new());
        let store = MemoryStore::with_clock(clock);

        for (key_index, &count) in increments.iter().enumerate() {
            for _ in 0..count {
                store.increment(&format!("key-{key_index}"), Duration::from_secs(3600));
            }
        }

        for (key_index, &count) in increments.iter().enumerate() {
            prop_assert_eq!(store.get(&format!("key-{key_index}")), count as u64);
        }
    }

    /// The encoded payload is always valid JSON carrying the title and body.
    #[test]
    fn encoded_message_is_valid_json(
        title in "[a-zA-Z0-9 ]{0,40}",
        body in "[a-zA-Z0-9 ]{0,80}",
    ) {
        let notification = Notification::builder()
            .endpoint("https://push.example/a")
            .p256dh_key("BPubKey")
            .auth_key("authsecret")
            .title(&title)
            .body(&body)
            .build()
            .expect("valid notification");

        let value: serde_json::Value =
            serde_json::from_str(&notification.encoded_message()).expect("valid JSON");
        prop_assert_eq!(value["title"].as_str(), Some(title.as_str()));
        prop_assert_eq!(value["options"]["body"].as_str(), Some(body.as_str()));
    }
}
