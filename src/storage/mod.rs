//! Key-value storage capability.
//!
//! The registry only needs get/put/delete on opaque byte values, with an
//! optional time-to-live on writes. Stores with no multi-key transactions
//! are fine: index maintenance goes through [`KeyValueStore::update`],
//! which defaults to a plain read-modify-write and may be overridden by
//! stores that can apply it atomically.

pub mod codec;
pub mod keys;
mod memory;

pub use codec::RecordEncoding;
pub use keys::KeySpace;
pub use memory::{LruStore, MemoryStore};

use crate::error::Result;
use std::time::Duration;

/// Outcome of an [`update`](KeyValueStore::update) closure.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    /// Leave the key as it is.
    Keep,
    /// Replace the value.
    Put(Vec<u8>),
    /// Remove the key.
    Delete,
}

/// Flat key-value store shared by every registry instance.
///
/// Implementations must be safe to call from many threads. Failures to
/// reach the backend are reported as `RegistryError::StorageUnavailable`;
/// missing or expired keys are `Ok(None)`, never an error.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Write a value. With a `ttl` the key disappears once that much time
    /// passes without it being written again.
    fn put(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;

    /// Delete a key. Deleting a missing key succeeds.
    fn delete(&self, key: &str) -> Result<()>;

    /// Read-modify-write of a single key. A `Mutation::Put` is written with `ttl`.
    ///
    /// The default is not atomic: a concurrent writer to the same key
    /// between the read and the write is overwritten (last writer wins).
    fn update(
        &self,
        key: &str,
        ttl: Option<Duration>,
        apply: &mut dyn FnMut(Option<&[u8]>) -> Result<Mutation>,
    ) -> Result<()> {
        let current = self.get(key)?;
        match apply(current.as_deref())? {
            Mutation::Keep => Ok(()),
            Mutation::Put(value) => self.put(key, value, ttl),
            Mutation::Delete => self.delete(key),
        }
    }
}
