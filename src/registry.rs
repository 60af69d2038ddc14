//! Main PushRegistry struct tying all components together.

use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::events::{EventType, EventTypeRegistry};
use crate::storage::{KeySpace, KeyValueStore, LruStore, MemoryStore, RecordEncoding};
use crate::subscriptions::{ActiveSubscriptionsFilter, Subscription, SubscriptionRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Registry configuration.
#[derive(Clone, Debug)]
pub struct RegistryConfig {
    /// How long a subscription stays active without a keep-alive.
    pub liveness_window: Duration,

    /// Encoding for values written to the store.
    pub encoding: RecordEncoding,

    /// Key prefix, for deployments sharing one cache.
    pub namespace: Option<String>,

    /// Entry limit for [`PushRegistry::in_memory`] (None = unbounded).
    pub cache_capacity: Option<usize>,

    /// Stored keys expire after this many liveness windows without a
    /// write (0 = never).
    pub ttl_windows: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(30),
            encoding: RecordEncoding::default(),
            namespace: None,
            cache_capacity: None,
            ttl_windows: 4,
        }
    }
}

impl RegistryConfig {
    /// Time-to-live for stored keys, if any.
    pub fn record_ttl(&self) -> Option<Duration> {
        match self.ttl_windows {
            0 => None,
            n => Some(self.liveness_window.saturating_mul(n)),
        }
    }
}

/// The server side of a push channel.
///
/// Provides the operations a channel endpoint forwards from clients:
/// - `subscribe` / `unsubscribe` for one event type
/// - `keep_alive` renewing everything a subscriber listens to
/// - `disconnect` dropping a subscriber entirely
/// - `active_subscriptions` selecting recipients when dispatching
pub struct PushRegistry {
    config: RegistryConfig,
    clock: Arc<dyn Clock>,
    repository: Arc<SubscriptionRepository>,
    filter: ActiveSubscriptionsFilter,
}

impl PushRegistry {
    /// Create a registry over a shared store.
    pub fn new(
        config: RegistryConfig,
        store: Arc<dyn KeyValueStore>,
        event_types: EventTypeRegistry,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let repository = Arc::new(
            SubscriptionRepository::new(store, event_types)
                .with_key_space(KeySpace::new(config.namespace.as_deref()))
                .with_encoding(config.encoding)
                .with_ttl(config.record_ttl()),
        );
        let filter = ActiveSubscriptionsFilter::new(
            Arc::clone(&repository),
            Arc::clone(&clock),
            config.liveness_window,
        );

        Self {
            config,
            clock,
            repository,
            filter,
        }
    }

    /// Create a single-process registry on the wall clock.
    pub fn in_memory(config: RegistryConfig, event_types: EventTypeRegistry) -> Self {
        let store: Arc<dyn KeyValueStore> = match config.cache_capacity {
            Some(capacity) => Arc::new(LruStore::new(capacity)),
            None => Arc::new(MemoryStore::new()),
        };
        Self::new(config, store, event_types, Arc::new(SystemClock))
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn repository(&self) -> &Arc<SubscriptionRepository> {
        &self.repository
    }

    pub fn filter(&self) -> &ActiveSubscriptionsFilter {
        &self.filter
    }

    // --- Channel Operations ---

    /// Start listening for `event_type`, renewed as of now.
    ///
    /// The write is retried once if the store is unavailable.
    pub fn subscribe(&self, subscriber: &str, event_type: EventType) -> Result<Subscription> {
        let subscription = Subscription::builder()
            .subscriber(subscriber)
            .event_type(event_type)
            .renewed_at(self.clock.now())
            .build()?;

        if let Err(e) = self.repository.put(&subscription) {
            if !e.is_storage_unavailable() {
                return Err(e);
            }
            warn!(subscriber, %event_type, error = %e, "subscribe failed, retrying once");
            self.repository.put(&subscription)?;
        }

        debug!(subscriber, %event_type, "subscribed");
        Ok(subscription)
    }

    pub fn unsubscribe(&self, subscriber: &str, event_type: EventType) -> Result<()> {
        self.repository.remove(event_type, subscriber)?;
        debug!(subscriber, %event_type, "unsubscribed");
        Ok(())
    }

    /// Renew every subscription of `subscriber`. Returns how many were renewed.
    ///
    /// Includes event types only other nodes have registered.
    pub fn keep_alive(&self, subscriber: &str) -> Result<usize> {
        let renewed = self
            .repository
            .renew_subscriptions(subscriber, self.clock.now())?;

        trace!(subscriber, renewed, "keep-alive");
        Ok(renewed)
    }

    /// Forget a subscriber whose session ended.
    pub fn disconnect(&self, subscriber: &str) -> Result<()> {
        self.repository.remove_all_subscriptions(subscriber)?;
        debug!(subscriber, "disconnected");
        Ok(())
    }

    /// Recipients for an event of `event_type`; expired subscriptions are evicted.
    pub fn active_subscriptions(&self, event_type: EventType) -> Result<Vec<Subscription>> {
        self.filter.filter_subscriptions(event_type)
    }
}
