//! Event type identifiers and their registry.

use crate::error::{RegistryError, Result};
use std::collections::HashMap;
use std::fmt;

/// Separator used by the storage key layout; not allowed in names.
const KEY_SEPARATOR: char = ':';

/// Identifier of a push event category.
///
/// Declared once per category in `const` context and compared by name.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventType(&'static str);

impl EventType {
    pub const fn new(name: &'static str) -> Self {
        EventType(name)
    }

    /// Stable name, used as routing key and inside storage keys.
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Debug for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EventType({})", self.0)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// A push event carrying its category.
///
/// ```ignore
/// struct OrderShipped { order_id: u64 }
///
/// impl PushEvent for OrderShipped {
///     const TYPE: EventType = EventType::new("OrderShipped");
/// }
/// ```
pub trait PushEvent {
    const TYPE: EventType;

    fn event_type(&self) -> EventType {
        Self::TYPE
    }
}

/// The set of event types this deployment knows about.
///
/// Built once at startup; lookups by name resolve stored records back to
/// their `EventType`.
#[derive(Clone, Debug, Default)]
pub struct EventTypeRegistry {
    types: HashMap<&'static str, EventType>,
    /// Registration order, for stable iteration.
    order: Vec<EventType>,
}

impl EventTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an event type.
    pub fn register(&mut self, event_type: EventType) -> Result<()> {
        validate_name(event_type.name())?;

        if self.types.contains_key(event_type.name()) {
            return Err(RegistryError::EventTypeExists(event_type.name().to_string()));
        }

        self.types.insert(event_type.name(), event_type);
        self.order.push(event_type);
        Ok(())
    }

    /// Register the category of a `PushEvent` implementation.
    pub fn register_event<E: PushEvent>(&mut self) -> Result<()> {
        self.register(E::TYPE)
    }

    /// Builder form of [`register`](Self::register).
    pub fn with(mut self, event_type: EventType) -> Result<Self> {
        self.register(event_type)?;
        Ok(self)
    }

    pub fn contains(&self, event_type: EventType) -> bool {
        self.types.contains_key(event_type.name())
    }

    /// Look up a registered event type by name.
    pub fn resolve(&self, name: &str) -> Option<EventType> {
        self.types.get(name).copied()
    }

    /// Fail with `InvalidArgument` unless `event_type` is registered.
    pub fn ensure_registered(&self, event_type: EventType) -> Result<()> {
        if self.contains(event_type) {
            Ok(())
        } else {
            Err(RegistryError::InvalidArgument(format!(
                "unregistered event type: {}",
                event_type
            )))
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = EventType> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(RegistryError::InvalidArgument(
            "event type name must not be empty".into(),
        ));
    }
    if name.contains(KEY_SEPARATOR) {
        return Err(RegistryError::InvalidArgument(format!(
            "event type name must not contain '{}': {}",
            KEY_SEPARATOR, name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct SimpleEvent;

    impl PushEvent for SimpleEvent {
        const TYPE: EventType = EventType::new("SimpleEvent");
    }

    const ANOTHER: EventType = EventType::new("AnotherEvent");

    #[test]
    fn test_register_and_resolve() {
        let mut registry = EventTypeRegistry::new();
        registry.register_event::<SimpleEvent>().unwrap();
        registry.register(ANOTHER).unwrap();

        assert_eq!(registry.resolve("SimpleEvent"), Some(SimpleEvent::TYPE));
        assert_eq!(registry.resolve("Missing"), None);
        assert!(registry.contains(ANOTHER));
        assert_eq!(
            registry.iter().collect::<Vec<_>>(),
            vec![SimpleEvent::TYPE, ANOTHER]
        );
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let registry = EventTypeRegistry::new().with(ANOTHER).unwrap();
        let result = registry.with(EventType::new("AnotherEvent"));
        assert!(matches!(result, Err(RegistryError::EventTypeExists(_))));
    }

    #[test]
    fn test_invalid_names_rejected() {
        let mut registry = EventTypeRegistry::new();

        let empty = registry.register(EventType::new(""));
        assert!(matches!(empty, Err(RegistryError::InvalidArgument(_))));

        let separator = registry.register(EventType::new("a:b"));
        assert!(matches!(separator, Err(RegistryError::InvalidArgument(_))));

        assert!(registry.is_empty());
    }

    #[test]
    fn test_ensure_registered() {
        let registry = EventTypeRegistry::new().with(ANOTHER).unwrap();
        assert!(registry.ensure_registered(ANOTHER).is_ok());
        assert!(matches!(
            registry.ensure_registered(SimpleEvent::TYPE),
            Err(RegistryError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_event_type_of_instance() {
        assert_eq!(SimpleEvent.event_type().name(), "SimpleEvent");
    }
}
