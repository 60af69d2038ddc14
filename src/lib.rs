//! # Push Registry
//!
//! Server-side bookkeeping for a push-notification channel: which
//! subscriber listens to which event type, and since when.
//!
//! ## Core Concepts
//!
//! - **Event types**: a closed set of named categories, registered at startup
//! - **Subscriptions**: one record per `(event_type, subscriber)`, renewed by keep-alives
//! - **Repository**: compound-keyed records plus per-type and per-subscriber
//!   indexes over any flat key-value store
//! - **Lazy eviction**: expired subscriptions are removed when a dispatch
//!   query observes them, there is no background sweeper
//!
//! ## Example
//!
//! ```ignore
//! use push_registry::{EventType, EventTypeRegistry, PushEvent, PushRegistry, RegistryConfig};
//!
//! struct OrderShipped;
//!
//! impl PushEvent for OrderShipped {
//!     const TYPE: EventType = EventType::new("OrderShipped");
//! }
//!
//! let mut event_types = EventTypeRegistry::new();
//! event_types.register_event::<OrderShipped>()?;
//!
//! let registry = PushRegistry::in_memory(RegistryConfig::default(), event_types);
//!
//! registry.subscribe("john@gmail.com", OrderShipped::TYPE)?;
//! registry.keep_alive("john@gmail.com")?;
//!
//! for subscription in registry.active_subscriptions(OrderShipped::TYPE)? {
//!     println!("deliver to {}", subscription.subscriber());
//! }
//! ```

pub mod clock;
pub mod error;
pub mod events;
pub mod registry;
pub mod storage;
pub mod subscriptions;
pub mod types;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{RegistryError, Result};
pub use events::{EventType, EventTypeRegistry, PushEvent};
pub use registry::{PushRegistry, RegistryConfig};
pub use storage::{KeySpace, KeyValueStore, LruStore, MemoryStore, Mutation, RecordEncoding};
pub use subscriptions::{
    ActiveSubscriptionsFilter, Subscription, SubscriptionBuilder, SubscriptionRepository,
};
pub use types::Timestamp;
