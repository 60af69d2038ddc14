//! In-process key-value stores.

use super::{KeyValueStore, Mutation};
use crate::clock::{Clock, SystemClock};
use crate::error::Result;
use crate::types::Timestamp;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;
use std::time::Duration;

/// Stored value with its expiry.
#[derive(Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: Option<Timestamp>,
}

impl Entry {
    fn new(value: Vec<u8>, ttl: Option<Duration>, now: Timestamp) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| now.saturating_add(ttl)),
        }
    }

    fn is_live(&self, now: Timestamp) -> bool {
        self.expires_at.map_or(true, |at| now < at)
    }
}

/// Unbounded in-memory store.
///
/// Expired keys read as missing and are dropped on the next access.
/// `update` runs under the write lock, so index maintenance is atomic.
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store whose expiry follows `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        let now = self.clock.now();
        self.entries.read().values().filter(|e| e.is_live(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains_key(&self, key: &str) -> bool {
        let now = self.clock.now();
        self.entries.read().get(key).map_or(false, |e| e.is_live(now))
    }

    /// Snapshot of all live keys, sorted.
    pub fn keys(&self) -> Vec<String> {
        let now = self.clock.now();
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.is_live(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    /// Drop every expired key. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| e.is_live(now));
        before - entries.len()
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();

        {
            let entries = self.entries.read();
            match entries.get(key) {
                None => return Ok(None),
                Some(entry) if entry.is_live(now) => return Ok(Some(entry.value.clone())),
                Some(_) => {}
            }
        }

        // Expired: drop it unless it was rewritten in the meantime
        let mut entries = self.entries.write();
        if entries.get(key).map_or(false, |e| !e.is_live(now)) {
            entries.remove(key);
        }
        Ok(None)
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry::new(value, ttl, self.clock.now());
        self.entries.write().insert(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        apply: &mut dyn FnMut(Option<&[u8]>) -> Result<Mutation>,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut entries = self.entries.write();

        let current = entries
            .get(key)
            .filter(|e| e.is_live(now))
            .map(|e| e.value.as_slice());

        match apply(current)? {
            Mutation::Keep => {}
            Mutation::Put(value) => {
                entries.insert(key.to_string(), Entry::new(value, ttl, now));
            }
            Mutation::Delete => {
                entries.remove(key);
            }
        }
        Ok(())
    }
}

/// Bounded store that evicts the least recently used key when full.
///
/// Behaves like a memcache instance: any key may disappear under memory
/// pressure or on expiry, including index keys. The registry tolerates that.
pub struct LruStore {
    cache: Mutex<LruCache<String, Entry>>,
    clock: Arc<dyn Clock>,
}

impl LruStore {
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);

        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.cache.lock().cap().get()
    }
}

impl KeyValueStore for LruStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let now = self.clock.now();
        let mut cache = self.cache.lock();

        match cache.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                cache.pop(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let entry = Entry::new(value, ttl, self.clock.now());
        self.cache.lock().put(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        self.cache.lock().pop(key);
        Ok(())
    }

    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        apply: &mut dyn FnMut(Option<&[u8]>) -> Result<Mutation>,
    ) -> Result<()> {
        let now = self.clock.now();
        let mut cache = self.cache.lock();

        let mutation = {
            let current = cache
                .get(key)
                .filter(|e| e.is_live(now))
                .map(|e| e.value.as_slice());
            apply(current)?
        };

        match mutation {
            Mutation::Keep => {}
            Mutation::Put(value) => {
                cache.put(key.to_string(), Entry::new(value, ttl, now));
            }
            Mutation::Delete => {
                cache.pop(key);
            }
        }
        Ok(())
    }
}
