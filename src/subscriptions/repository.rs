//! Subscription repository over a flat key-value store.
//!
//! Each subscription lives under its compound key, and two index lists
//! make it reachable by event type and by subscriber. Every mutation
//! updates all three. The store offers no multi-key transactions, so a
//! crash or race between those writes can leave an index entry pointing at
//! nothing; readers skip such entries and prune them.

use crate::error::{RegistryError, Result};
use crate::events::{EventType, EventTypeRegistry};
use crate::storage::codec;
use crate::storage::{KeySpace, KeyValueStore, Mutation, RecordEncoding};
use crate::types::Timestamp;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::types::{validate_subscriber, Subscription};

/// Stored form of a subscription.
#[derive(Debug, Serialize, Deserialize)]
struct StoredSubscription {
    subscriber: String,
    event_type: String,
    last_renewed_at: Timestamp,
}

impl From<&Subscription> for StoredSubscription {
    fn from(subscription: &Subscription) -> Self {
        Self {
            subscriber: subscription.subscriber().to_string(),
            event_type: subscription.event_type().name().to_string(),
            last_renewed_at: subscription.last_renewed_at(),
        }
    }
}

/// Owner of all persisted subscription records.
pub struct SubscriptionRepository {
    store: Arc<dyn KeyValueStore>,
    event_types: EventTypeRegistry,
    keys: KeySpace,
    encoding: RecordEncoding,
    ttl: Option<Duration>,
}

impl SubscriptionRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, event_types: EventTypeRegistry) -> Self {
        Self {
            store,
            event_types,
            keys: KeySpace::default(),
            encoding: RecordEncoding::default(),
            ttl: None,
        }
    }

    pub fn with_key_space(mut self, keys: KeySpace) -> Self {
        self.keys = keys;
        self
    }

    pub fn with_encoding(mut self, encoding: RecordEncoding) -> Self {
        self.encoding = encoding;
        self
    }

    /// Expire records and index lists that go `ttl` without being written.
    ///
    /// Reclaims keys no index points at any more, which no query can evict.
    pub fn with_ttl(mut self, ttl: Option<Duration>) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn event_types(&self) -> &EventTypeRegistry {
        &self.event_types
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    // --- Writes ---

    /// Insert or replace the subscription under its `(event_type, subscriber)` key.
    ///
    /// Replacing keeps the subscriber's original position in the event type index.
    pub fn put(&self, subscription: &Subscription) -> Result<()> {
        let event_type = subscription.event_type();
        let subscriber = subscription.subscriber();
        self.validate(event_type, subscriber)?;

        let record = codec::encode(&StoredSubscription::from(subscription), self.encoding)?;
        self.store
            .put(&self.keys.subscription(event_type, subscriber), record, self.ttl)?;

        self.add_to_index(&self.keys.event_type_index(event_type), subscriber)?;
        self.add_to_index(&self.keys.subscriber_index(subscriber), event_type.name())?;

        trace!(%event_type, subscriber, renewed_at = %subscription.last_renewed_at(), "stored subscription");
        Ok(())
    }

    /// Set the renewal time of every stored record of `subscriber` to `at`.
    ///
    /// Works by stored name, so records of event types this node has not
    /// registered are renewed too. Missing records are not recreated.
    /// Returns how many records were renewed.
    pub fn renew_subscriptions(&self, subscriber: &str, at: Timestamp) -> Result<usize> {
        validate_subscriber(subscriber)?;

        let index_key = self.keys.subscriber_index(subscriber);
        let names = self.subscriber_event_types(&index_key)?;

        let mut renewed = 0;
        let mut stale = Vec::new();

        for name in names {
            let key = self.keys.subscription_named(&name, subscriber);
            let mut found = false;

            self.store.update(&key, self.ttl, &mut |current| {
                let Some(bytes) = current else {
                    return Ok(Mutation::Keep);
                };

                let mut stored: StoredSubscription = codec::decode(bytes)?;
                check_owner(&stored, &name, subscriber)?;
                stored.last_renewed_at = at;
                found = true;
                Ok(Mutation::Put(codec::encode(&stored, self.encoding)?))
            })?;

            if found {
                self.add_to_index(&self.keys.event_type_index_named(&name), subscriber)?;
                self.add_to_index(&index_key, &name)?;
                renewed += 1;
            } else {
                stale.push(name);
            }
        }

        if !stale.is_empty() {
            debug!(subscriber, stale = stale.len(), "pruning stale subscriber index entries");
            self.remove_from_index(&index_key, &stale)?;
        }

        Ok(renewed)
    }

    /// Remove the record with the same key as `subscription`.
    pub fn remove_subscription(&self, subscription: &Subscription) -> Result<()> {
        self.remove(subscription.event_type(), subscription.subscriber())
    }

    /// Remove one record by key. Removing a missing record is a no-op.
    pub fn remove(&self, event_type: EventType, subscriber: &str) -> Result<()> {
        self.validate(event_type, subscriber)?;

        self.store
            .delete(&self.keys.subscription(event_type, subscriber))?;
        self.remove_from_index(&self.keys.event_type_index(event_type), &[subscriber])?;
        self.remove_from_index(&self.keys.subscriber_index(subscriber), &[event_type.name()])?;

        trace!(%event_type, subscriber, "removed subscription");
        Ok(())
    }

    /// Remove every record of `subscriber`, across all event types.
    ///
    /// Records of event types this node does not know are removed as well.
    pub fn remove_all_subscriptions(&self, subscriber: &str) -> Result<()> {
        validate_subscriber(subscriber)?;

        let index_key = self.keys.subscriber_index(subscriber);
        let names = self.subscriber_event_types(&index_key)?;

        for name in &names {
            self.store
                .delete(&self.keys.subscription_named(name, subscriber))?;
            self.remove_from_index(&self.keys.event_type_index_named(name), &[subscriber])?;
        }

        // Only drop what was seen, a concurrent put may have added more
        self.remove_from_index(&index_key, &names)?;

        debug!(subscriber, removed = names.len(), "removed all subscriptions");
        Ok(())
    }

    // --- Reads ---

    pub fn has_subscription(&self, event_type: EventType, subscriber: &str) -> Result<bool> {
        self.validate(event_type, subscriber)?;

        Ok(self
            .store
            .get(&self.keys.subscription(event_type, subscriber))?
            .is_some())
    }

    /// Current record under `(event_type, subscriber)`, if any.
    pub fn subscription(
        &self,
        event_type: EventType,
        subscriber: &str,
    ) -> Result<Option<Subscription>> {
        self.validate(event_type, subscriber)?;
        self.load(event_type, subscriber)
    }

    /// All subscriptions for an event type, in insertion order.
    pub fn find_subscriptions(&self, event_type: EventType) -> Result<Vec<Subscription>> {
        self.event_types.ensure_registered(event_type)?;

        let index_key = self.keys.event_type_index(event_type);
        let subscribers = self.read_index(&index_key)?.unwrap_or_default();

        let mut found = Vec::with_capacity(subscribers.len());
        let mut stale = Vec::new();

        for subscriber in subscribers {
            match self.load(event_type, &subscriber)? {
                Some(subscription) => found.push(subscription),
                None => stale.push(subscriber),
            }
        }

        if !stale.is_empty() {
            debug!(%event_type, stale = stale.len(), "pruning stale event type index entries");
            self.remove_from_index(&index_key, &stale)?;
        }

        Ok(found)
    }

    /// All subscriptions of a subscriber, in insertion order.
    ///
    /// Entries for event types this node has not registered are skipped but
    /// left in place; another node may know them.
    pub fn find_subscriber_subscriptions(&self, subscriber: &str) -> Result<Vec<Subscription>> {
        validate_subscriber(subscriber)?;

        let index_key = self.keys.subscriber_index(subscriber);
        let names = self.subscriber_event_types(&index_key)?;

        let mut found = Vec::with_capacity(names.len());
        let mut stale = Vec::new();

        for name in names {
            let Some(event_type) = self.event_types.resolve(&name) else {
                warn!(subscriber, event_type = %name, "skipping unregistered event type");
                continue;
            };

            match self.load(event_type, subscriber)? {
                Some(subscription) => found.push(subscription),
                None => stale.push(name),
            }
        }

        if !stale.is_empty() {
            debug!(subscriber, stale = stale.len(), "pruning stale subscriber index entries");
            self.remove_from_index(&index_key, &stale)?;
        }

        Ok(found)
    }

    // --- Internals ---

    fn validate(&self, event_type: EventType, subscriber: &str) -> Result<()> {
        validate_subscriber(subscriber)?;
        self.event_types.ensure_registered(event_type)
    }

    fn load(&self, event_type: EventType, subscriber: &str) -> Result<Option<Subscription>> {
        let Some(bytes) = self.store.get(&self.keys.subscription(event_type, subscriber))? else {
            return Ok(None);
        };

        let stored: StoredSubscription = codec::decode(&bytes)?;
        check_owner(&stored, event_type.name(), subscriber)?;

        Subscription::builder()
            .subscriber(stored.subscriber)
            .event_type(event_type)
            .renewed_at(stored.last_renewed_at)
            .build()
            .map(Some)
    }

    /// Event type names listed in a subscriber index.
    ///
    /// If the index is unreadable every registered type is a candidate, so
    /// records stay reachable by their owner.
    fn subscriber_event_types(&self, index_key: &str) -> Result<Vec<String>> {
        match self.read_index(index_key)? {
            Some(names) => Ok(names),
            None => Ok(self
                .event_types
                .iter()
                .map(|event_type| event_type.name().to_string())
                .collect()),
        }
    }

    /// Read an index list; a missing key is an empty list.
    ///
    /// `None` means the list was unreadable. It is deleted, and later writes
    /// rebuild it.
    fn read_index(&self, key: &str) -> Result<Option<Vec<String>>> {
        let Some(bytes) = self.store.get(key)? else {
            return Ok(Some(Vec::new()));
        };

        match codec::decode(&bytes) {
            Ok(entries) => Ok(Some(entries)),
            Err(e) => {
                warn!(key, error = %e, "discarding unreadable index");
                // Leave it alone if a writer replaced it since the read
                self.store.update(key, None, &mut |current| match current {
                    Some(bytes) if codec::decode::<Vec<String>>(bytes).is_err() => {
                        Ok(Mutation::Delete)
                    }
                    _ => Ok(Mutation::Keep),
                })?;
                Ok(None)
            }
        }
    }

    /// Append `entry` to an index list unless already present.
    ///
    /// With a TTL the list is rewritten either way, to push its expiry out.
    fn add_to_index(&self, key: &str, entry: &str) -> Result<()> {
        let encoding = self.encoding;
        let refresh = self.ttl.is_some();

        self.store.update(key, self.ttl, &mut |current| {
            let mut entries: Vec<String> = match current {
                Some(bytes) => codec::decode(bytes).unwrap_or_else(|e| {
                    warn!(key, error = %e, "discarding unreadable index");
                    Vec::new()
                }),
                None => Vec::new(),
            };

            if entries.iter().any(|existing| existing == entry) {
                if !refresh {
                    return Ok(Mutation::Keep);
                }
            } else {
                entries.push(entry.to_string());
            }

            Ok(Mutation::Put(codec::encode(&entries, encoding)?))
        })
    }

    /// Drop `removed` from an index list, deleting the key once it is empty.
    ///
    /// An unreadable list is deleted.
    fn remove_from_index<S: AsRef<str>>(&self, key: &str, removed: &[S]) -> Result<()> {
        let encoding = self.encoding;

        self.store.update(key, self.ttl, &mut |current| {
            let Some(bytes) = current else {
                return Ok(Mutation::Keep);
            };

            let mut entries: Vec<String> = match codec::decode(bytes) {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(key, error = %e, "discarding unreadable index");
                    return Ok(Mutation::Delete);
                }
            };
            let before = entries.len();
            entries.retain(|existing| !removed.iter().any(|r| r.as_ref() == existing));

            if entries.len() == before {
                Ok(Mutation::Keep)
            } else if entries.is_empty() {
                Ok(Mutation::Delete)
            } else {
                Ok(Mutation::Put(codec::encode(&entries, encoding)?))
            }
        })
    }
}

/// A record must sit under the key of its own event type and subscriber.
fn check_owner(stored: &StoredSubscription, event_type: &str, subscriber: &str) -> Result<()> {
    if stored.event_type != event_type || stored.subscriber != subscriber {
        return Err(RegistryError::InvalidFormat(format!(
            "Record under {}/{} belongs to {}/{}",
            event_type, subscriber, stored.event_type, stored.subscriber
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::storage::MemoryStore;

    const SIMPLE: EventType = EventType::new("SimpleEvent");
    const ANOTHER: EventType = EventType::new("AnotherEvent");

    fn setup() -> (Arc<MemoryStore>, SubscriptionRepository) {
        let store = Arc::new(MemoryStore::new());
        let event_types = EventTypeRegistry::new()
            .with(SIMPLE)
            .and_then(|r| r.with(ANOTHER))
            .unwrap();
        let repository = SubscriptionRepository::new(store.clone(), event_types);
        (store, repository)
    }

    fn subscription(subscriber: &str, event_type: EventType) -> Subscription {
        Subscription::builder()
            .subscriber(subscriber)
            .event_type(event_type)
            .build()
            .unwrap()
    }

    #[test]
    fn test_put_writes_all_three_views() {
        let (store, repository) = setup();
        repository
            .put(&subscription("john@gmail.com", SIMPLE))
            .unwrap();

        assert_eq!(
            store.keys(),
            vec![
                "idx:subscriber:john@gmail.com".to_string(),
                "idx:type:SimpleEvent".to_string(),
                "sub:SimpleEvent:john@gmail.com".to_string(),
            ]
        );
    }

    #[test]
    fn test_remove_deletes_empty_indexes() {
        let (store, repository) = setup();
        repository
            .put(&subscription("john@gmail.com", SIMPLE))
            .unwrap();

        repository.remove(SIMPLE, "john@gmail.com").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_overwrite_keeps_index_position() {
        let (_store, repository) = setup();
        repository.put(&subscription("john@gmail.com", SIMPLE)).unwrap();
        repository.put(&subscription("peter@gmail.com", SIMPLE)).unwrap();

        let renewed = subscription("john@gmail.com", SIMPLE).renewed(Timestamp::from_secs(9));
        repository.put(&renewed).unwrap();

        let found = repository.find_subscriptions(SIMPLE).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0], renewed);
        assert_eq!(found[1].subscriber(), "peter@gmail.com");
    }

    #[test]
    fn test_stale_index_entry_is_pruned() {
        let (store, repository) = setup();
        repository.put(&subscription("john@gmail.com", SIMPLE)).unwrap();
        repository.put(&subscription("peter@gmail.com", SIMPLE)).unwrap();

        // Simulate a lost primary record (eviction or partial failure)
        store.delete("sub:SimpleEvent:john@gmail.com").unwrap();

        let found = repository.find_subscriptions(SIMPLE).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].subscriber(), "peter@gmail.com");

        let index: Vec<String> =
            codec::decode(&store.get("idx:type:SimpleEvent").unwrap().unwrap()).unwrap();
        assert_eq!(index, vec!["peter@gmail.com".to_string()]);
    }

    #[test]
    fn test_unknown_event_type_in_subscriber_index() {
        let (store, repository) = setup();
        repository.put(&subscription("john@gmail.com", SIMPLE)).unwrap();

        // Another node registered a type this one does not know
        let foreign = vec!["SimpleEvent".to_string(), "FutureEvent".to_string()];
        store
            .put(
                "idx:subscriber:john@gmail.com",
                codec::encode(&foreign, RecordEncoding::default()).unwrap(),
                None,
            )
            .unwrap();
        store
            .put("sub:FutureEvent:john@gmail.com", b"opaque".to_vec(), None)
            .unwrap();

        let found = repository.find_subscriber_subscriptions("john@gmail.com").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].event_type(), SIMPLE);

        repository.remove_all_subscriptions("john@gmail.com").unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn test_unreadable_index_reads_empty_and_is_rebuilt() {
        let (store, repository) = setup();
        store
            .put("idx:type:SimpleEvent", b"garbage".to_vec(), None)
            .unwrap();

        assert!(repository.find_subscriptions(SIMPLE).unwrap().is_empty());
        assert!(!store.contains_key("idx:type:SimpleEvent"));

        repository.put(&subscription("john@gmail.com", SIMPLE)).unwrap();
        let found = repository.find_subscriptions(SIMPLE).unwrap();
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn test_unreadable_subscriber_index_falls_back_to_registered_types() {
        let (store, repository) = setup();
        repository.put(&subscription("john@gmail.com", SIMPLE)).unwrap();
        repository.put(&subscription("john@gmail.com", ANOTHER)).unwrap();
        store
            .put("idx:subscriber:john@gmail.com", b"garbage".to_vec(), None)
            .unwrap();

        let found = repository.find_subscriber_subscriptions("john@gmail.com").unwrap();
        assert_eq!(found.len(), 2);

        repository.remove(SIMPLE, "john@gmail.com").unwrap();
        assert!(!repository.has_subscription(SIMPLE, "john@gmail.com").unwrap());
        assert!(repository.has_subscription(ANOTHER, "john@gmail.com").unwrap());
    }

    #[test]
    fn test_renew_keeps_unregistered_event_types() {
        let (store, repository) = setup();
        repository.put(&subscription("john@gmail.com", SIMPLE)).unwrap();

        // Written by a node that also knows FutureEvent
        let foreign = StoredSubscription {
            subscriber: "john@gmail.com".to_string(),
            event_type: "FutureEvent".to_string(),
            last_renewed_at: Timestamp::from_secs(1),
        };
        store
            .put(
                "sub:FutureEvent:john@gmail.com",
                codec::encode(&foreign, RecordEncoding::default()).unwrap(),
                None,
            )
            .unwrap();
        let names = vec!["SimpleEvent".to_string(), "FutureEvent".to_string()];
        store
            .put(
                "idx:subscriber:john@gmail.com",
                codec::encode(&names, RecordEncoding::default()).unwrap(),
                None,
            )
            .unwrap();

        let renewed = repository
            .renew_subscriptions("john@gmail.com", Timestamp::from_secs(50))
            .unwrap();
        assert_eq!(renewed, 2);

        let stored: StoredSubscription =
            codec::decode(&store.get("sub:FutureEvent:john@gmail.com").unwrap().unwrap()).unwrap();
        assert_eq!(stored.last_renewed_at, Timestamp::from_secs(50));
        assert!(store.contains_key("idx:type:FutureEvent"));
    }

    #[test]
    fn test_renew_does_not_recreate_removed_records() {
        let (store, repository) = setup();
        repository.put(&subscription("john@gmail.com", SIMPLE)).unwrap();
        store.delete("sub:SimpleEvent:john@gmail.com").unwrap();

        let renewed = repository
            .renew_subscriptions("john@gmail.com", Timestamp::from_secs(50))
            .unwrap();
        assert_eq!(renewed, 0);
        assert!(!store.contains_key("sub:SimpleEvent:john@gmail.com"));
        assert!(!store.contains_key("idx:subscriber:john@gmail.com"));
    }

    #[test]
    fn test_ttl_reclaims_unindexed_record() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1_000)));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let repository = SubscriptionRepository::new(
            store.clone(),
            EventTypeRegistry::new().with(SIMPLE).unwrap(),
        )
        .with_ttl(Some(Duration::from_secs(120)));

        repository.put(&subscription("john@gmail.com", SIMPLE)).unwrap();
        store.delete("idx:type:SimpleEvent").unwrap();

        clock.advance(Duration::from_secs(119));
        assert_eq!(store.len(), 2);

        clock.advance(Duration::from_secs(1));
        assert!(store.is_empty());
    }

    #[test]
    fn test_index_ttl_follows_latest_write() {
        let clock = Arc::new(ManualClock::new(Timestamp::from_secs(1_000)));
        let store = Arc::new(MemoryStore::with_clock(clock.clone()));
        let repository = SubscriptionRepository::new(
            store.clone(),
            EventTypeRegistry::new().with(SIMPLE).unwrap(),
        )
        .with_ttl(Some(Duration::from_secs(120)));

        repository.put(&subscription("john@gmail.com", SIMPLE)).unwrap();
        clock.advance(Duration::from_secs(100));
        repository.put(&subscription("peter@gmail.com", SIMPLE)).unwrap();

        // John's record is gone, Peter's keeps the shared type index alive
        clock.advance(Duration::from_secs(100));
        let found = repository.find_subscriptions(SIMPLE).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].subscriber(), "peter@gmail.com");
    }

    #[test]
    fn test_json_encoding() {
        let store = Arc::new(MemoryStore::new());
        let event_types = EventTypeRegistry::new().with(SIMPLE).unwrap();
        let repository =
            SubscriptionRepository::new(store, event_types).with_encoding(RecordEncoding::Json);

        let original = subscription("john@gmail.com", SIMPLE).renewed(Timestamp::from_secs(3));
        repository.put(&original).unwrap();

        assert_eq!(
            repository.subscription(SIMPLE, "john@gmail.com").unwrap(),
            Some(original)
        );
    }

    #[test]
    fn test_namespaced_keys() {
        let (store, _) = setup();
        let event_types = EventTypeRegistry::new().with(SIMPLE).unwrap();
        let repository = SubscriptionRepository::new(store.clone(), event_types)
            .with_key_space(KeySpace::new(Some("push")));

        repository.put(&subscription("john@gmail.com", SIMPLE)).unwrap();
        assert!(store.contains_key("push:sub:SimpleEvent:john@gmail.com"));
    }
}
