//! Subscription registry.
//!
//! - [`Subscription`]: one subscriber's interest in one event type
//! - [`SubscriptionRepository`]: compound-keyed storage with lookups by
//!   event type and by subscriber
//! - [`ActiveSubscriptionsFilter`]: live subscriptions for dispatch, with
//!   lazy eviction of expired ones
//!
//! # Example
//!
//! ```ignore
//! let repository = Arc::new(SubscriptionRepository::new(store, event_types));
//! let filter = ActiveSubscriptionsFilter::new(
//!     repository.clone(),
//!     Arc::new(SystemClock),
//!     Duration::from_secs(30),
//! );
//!
//! repository.put(
//!     &Subscription::builder()
//!         .subscriber("john@gmail.com")
//!         .event_type(OrderShipped::TYPE)
//!         .renewed_at(Timestamp::now())
//!         .build()?,
//! )?;
//!
//! for subscription in filter.filter_subscriptions(OrderShipped::TYPE)? {
//!     deliver(subscription.subscriber());
//! }
//! ```

mod filter;
mod repository;
mod types;

pub use filter::ActiveSubscriptionsFilter;
pub use repository::SubscriptionRepository;
pub use types::{Subscription, SubscriptionBuilder};
