//! Key layout.
//!
//! Three key families share one key space:
//!
//! - `sub:{event_type}:{subscriber}` - the subscription record
//! - `idx:type:{event_type}` - subscribers of an event type, in insertion order
//! - `idx:subscriber:{subscriber}` - event types of a subscriber, in insertion order
//!
//! An optional namespace is prepended as `{namespace}:` so several
//! deployments can share one cache.

use crate::events::EventType;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct KeySpace {
    prefix: String,
}

impl KeySpace {
    pub fn new(namespace: Option<&str>) -> Self {
        let prefix = match namespace {
            Some(ns) if !ns.is_empty() => format!("{}:", ns),
            _ => String::new(),
        };
        Self { prefix }
    }

    pub fn subscription(&self, event_type: EventType, subscriber: &str) -> String {
        self.subscription_named(event_type.name(), subscriber)
    }

    pub fn event_type_index(&self, event_type: EventType) -> String {
        self.event_type_index_named(event_type.name())
    }

    /// Record key for an event type known only by its stored name.
    pub fn subscription_named(&self, event_type: &str, subscriber: &str) -> String {
        format!("{}sub:{}:{}", self.prefix, event_type, subscriber)
    }

    pub fn event_type_index_named(&self, event_type: &str) -> String {
        format!("{}idx:type:{}", self.prefix, event_type)
    }

    pub fn subscriber_index(&self, subscriber: &str) -> String {
        format!("{}idx:subscriber:{}", self.prefix, subscriber)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SIMPLE: EventType = EventType::new("SimpleEvent");

    #[test]
    fn test_default_layout() {
        let keys = KeySpace::default();

        assert_eq!(
            keys.subscription(SIMPLE, "john@gmail.com"),
            "sub:SimpleEvent:john@gmail.com"
        );
        assert_eq!(keys.event_type_index(SIMPLE), "idx:type:SimpleEvent");
        assert_eq!(
            keys.subscriber_index("john@gmail.com"),
            "idx:subscriber:john@gmail.com"
        );
    }

    #[test]
    fn test_namespaced_layout() {
        let keys = KeySpace::new(Some("push"));
        assert_eq!(keys.event_type_index(SIMPLE), "push:idx:type:SimpleEvent");

        assert_eq!(KeySpace::new(Some("")), KeySpace::default());
    }
}
