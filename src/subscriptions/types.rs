//! Subscription entity.

use crate::error::{RegistryError, Result};
use crate::events::EventType;
use crate::types::Timestamp;
use std::time::Duration;

/// One subscriber's interest in one event type.
///
/// `(event_type, subscriber)` is the natural key. Values are immutable;
/// a keep-alive produces a new value via [`renewed`](Self::renewed).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    subscriber: String,
    event_type: EventType,
    last_renewed_at: Timestamp,
}

impl Subscription {
    pub fn builder() -> SubscriptionBuilder {
        SubscriptionBuilder::default()
    }

    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn last_renewed_at(&self) -> Timestamp {
        self.last_renewed_at
    }

    /// Whether the subscription is still live at `now`.
    ///
    /// Active while strictly less than `window` has passed since the last
    /// renewal.
    pub fn is_active(&self, now: Timestamp, window: Duration) -> bool {
        now.duration_since(self.last_renewed_at) < window
    }

    /// Copy of this subscription renewed at `at`.
    pub fn renewed(&self, at: Timestamp) -> Self {
        Self {
            subscriber: self.subscriber.clone(),
            event_type: self.event_type,
            last_renewed_at: at,
        }
    }
}

/// Builder for [`Subscription`].
#[derive(Clone, Debug, Default)]
pub struct SubscriptionBuilder {
    subscriber: Option<String>,
    event_type: Option<EventType>,
    renewed_at: Option<Timestamp>,
}

impl SubscriptionBuilder {
    pub fn subscriber(mut self, subscriber: impl Into<String>) -> Self {
        self.subscriber = Some(subscriber.into());
        self
    }

    pub fn event_type(mut self, event_type: EventType) -> Self {
        self.event_type = Some(event_type);
        self
    }

    /// Renewal time. Defaults to the epoch when unset.
    pub fn renewed_at(mut self, at: Timestamp) -> Self {
        self.renewed_at = Some(at);
        self
    }

    pub fn build(self) -> Result<Subscription> {
        let subscriber = self.subscriber.unwrap_or_default();
        validate_subscriber(&subscriber)?;

        let event_type = self.event_type.ok_or_else(|| {
            RegistryError::InvalidArgument("subscription needs an event type".into())
        })?;

        Ok(Subscription {
            subscriber,
            event_type,
            last_renewed_at: self.renewed_at.unwrap_or_default(),
        })
    }
}

/// Reject empty subscriber ids.
pub(crate) fn validate_subscriber(subscriber: &str) -> Result<()> {
    if subscriber.is_empty() {
        return Err(RegistryError::InvalidArgument(
            "subscriber id must not be empty".into(),
        ));
    }
    Ok(())
}
