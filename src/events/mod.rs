//! Event type taxonomy.
//!
//! Every push event belongs to one named category. Categories are declared
//! as `const` [`EventType`] values (usually through [`PushEvent::TYPE`]) and
//! registered once in an [`EventTypeRegistry`]; nothing else in the crate
//! builds event type names at runtime.

mod registry;

pub use registry::{EventType, EventTypeRegistry, PushEvent};
