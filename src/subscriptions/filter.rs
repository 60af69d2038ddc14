//! Liveness filtering with lazy eviction.

use crate::clock::Clock;
use crate::error::Result;
use crate::events::EventType;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::repository::SubscriptionRepository;
use super::types::Subscription;

/// Returns the live subscriptions of an event type and removes the rest.
///
/// This is the only garbage collection the registry does: an expired
/// subscription stays in the store until a dispatch for its event type
/// observes it.
pub struct ActiveSubscriptionsFilter {
    repository: Arc<SubscriptionRepository>,
    clock: Arc<dyn Clock>,
    liveness_window: Duration,
}

impl ActiveSubscriptionsFilter {
    pub fn new(
        repository: Arc<SubscriptionRepository>,
        clock: Arc<dyn Clock>,
        liveness_window: Duration,
    ) -> Self {
        Self {
            repository,
            clock,
            liveness_window,
        }
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    /// Active subscriptions for `event_type`, in repository order.
    ///
    /// Expired ones are removed from the repository before returning. A
    /// storage failure during removal aborts the call.
    pub fn filter_subscriptions(&self, event_type: EventType) -> Result<Vec<Subscription>> {
        let now = self.clock.now();
        let subscriptions = self.repository.find_subscriptions(event_type)?;

        let mut active = Vec::with_capacity(subscriptions.len());
        let mut evicted = 0usize;

        for subscription in subscriptions {
            if subscription.is_active(now, self.liveness_window) {
                active.push(subscription);
            } else {
                self.repository.remove_subscription(&subscription)?;
                evicted += 1;
            }
        }

        if evicted > 0 {
            debug!(%event_type, evicted, active = active.len(), "evicted expired subscriptions");
        }

        Ok(active)
    }
}
