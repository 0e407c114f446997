//! Notification value object and delivery task.
//!
//! A [`Notification`] is immutable after construction and carries everything
//! a push endpoint needs: title, body, opaque data, the endpoint URL, and
//! the subscription credentials. It is produced by an external
//! subscription-to-notification builder and consumed exactly once by the
//! delivery engine.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::error::{PushError, Result};

/// Opaque correlation token for a stored subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SubscriptionId(pub Uuid);

impl SubscriptionId {
    /// Generates a fresh random id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Delivery urgency hint forwarded to the push service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Urgency {
    /// Deliver only when the device is on power and Wi-Fi.
    VeryLow,
    /// Deliver on power or Wi-Fi.
    Low,
    /// Deliver opportunistically.
    Normal,
    /// Deliver immediately.
    High,
}

impl Urgency {
    /// Wire label used in the push request header.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::VeryLow => "very-low",
            Self::Low => "low",
            Self::Normal => "normal",
            Self::High => "high",
        }
    }
}

/// Optional action button attached to a displayed notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    /// Identifier reported back when the user activates the action.
    pub action: String,
    /// Label shown on the button.
    pub title: String,
    /// Optional icon URL for the button.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// Optional display and transport fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationOptions {
    /// Icon URL shown with the notification.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    /// Badge URL shown on constrained displays.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub badge: Option<String>,
    /// Delivery urgency hint.
    pub urgency: Urgency,
    /// Seconds the push service may hold the message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl: Option<u32>,
    /// Replacement tag; a new notification replaces an old one with the
    /// same tag.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
    /// Action buttons.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<NotificationAction>,
}

impl Default for NotificationOptions {
    fn default() -> Self {
        Self {
            icon: None,
            badge: None,
            urgency: Urgency::High,
            ttl: None,
            tag: None,
            actions: Vec::new(),
        }
    }
}

/// Immutable push notification addressed to a single endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    title: String,
    body: String,
    data: Map<String, Value>,
    endpoint: String,
    p256dh_key: String,
    auth_key: String,
    options: NotificationOptions,
}

impl Notification {
    /// Starts building a notification.
    pub fn builder() -> NotificationBuilder {
        NotificationBuilder::default()
    }

    /// Notification title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Notification body text.
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Opaque application data delivered alongside the notification.
    pub fn data(&self) -> &Map<String, Value> {
        &self.data
    }

    /// Push endpoint URL this notification is addressed to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Subscription public key credential.
    pub fn p256dh_key(&self) -> &str {
        &self.p256dh_key
    }

    /// Subscription auth secret credential.
    pub fn auth_key(&self) -> &str {
        &self.auth_key
    }

    /// Optional display and transport fields.
    pub fn options(&self) -> &NotificationOptions {
        &self.options
    }

    /// JSON message body handed to the push-protocol library.
    ///
    /// Shape: `{"title": ..., "options": {"body", "icon", "badge", "data"}}`.
    pub fn encoded_message(&self) -> String {
        let payload = json!({
            "title": self.title,
            "options": {
                "body": self.body,
                "icon": self.options.icon,
                "badge": self.options.badge,
                "data": self.data,
            },
        });
        payload.to_string()
    }
}

/// Builder for [`Notification`].
#[derive(Debug, Default)]
pub struct NotificationBuilder {
    title: String,
    body: String,
    data: Map<String, Value>,
    endpoint: String,
    p256dh_key: String,
    auth_key: String,
    options: NotificationOptions,
}

impl NotificationBuilder {
    /// Sets the title.
    #[must_use]
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    /// Sets the body text.
    #[must_use]
    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// Adds one opaque data entry.
    #[must_use]
    pub fn data(mut self, key: impl Into<String>, value: Value) -> Self {
        self.data.insert(key.into(), value);
        self
    }

    /// Sets the target endpoint URL.
    #[must_use]
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Sets the subscription public key credential.
    #[must_use]
    pub fn p256dh_key(mut self, key: impl Into<String>) -> Self {
        self.p256dh_key = key.into();
        self
    }

    /// Sets the subscription auth secret credential.
    #[must_use]
    pub fn auth_key(mut self, key: impl Into<String>) -> Self {
        self.auth_key = key.into();
        self
    }

    /// Replaces the optional fields wholesale.
    #[must_use]
    pub fn options(mut self, options: NotificationOptions) -> Self {
        self.options = options;
        self
    }

    /// Finalizes the notification.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the endpoint or either
    /// credential is missing.
    pub fn build(self) -> Result<Notification> {
        if self.endpoint.is_empty() {
            return Err(PushError::configuration("notification endpoint is required"));
        }
        if self.p256dh_key.is_empty() || self.auth_key.is_empty() {
            return Err(PushError::configuration(
                "notification subscription credentials are required",
            ));
        }

        Ok(Notification {
            title: self.title,
            body: self.body,
            data: self.data,
            endpoint: self.endpoint,
            p256dh_key: self.p256dh_key,
            auth_key: self.auth_key,
            options: self.options,
        })
    }
}

/// A notification plus its optional subscription correlation token,
/// submitted to the delivery pool.
///
/// Created at enqueue time and destroyed after exactly one delivery
/// attempt; retries belong to the external job layer.
#[derive(Debug, Clone)]
pub struct DeliveryTask {
    /// The notification to deliver.
    pub notification: Notification,
    /// Correlation token used to invalidate the subscription on permanent
    /// failure, when known.
    pub subscription_id: Option<SubscriptionId>,
}
