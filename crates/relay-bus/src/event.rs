//! Event types carried on the bus.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single broker event, immutable after creation.
///
/// `owner_id` is the routing key: only sessions owned by the same identity
/// observe the event. The payload is opaque to the bus and forwarded
/// verbatim to matching sessions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TopicEvent {
    /// Topic the event was published on.
    pub topic: String,
    /// Identity id of the user this event belongs to.
    pub owner_id: String,
    /// Domain payload, forwarded verbatim.
    pub payload: Value,
}

impl TopicEvent {
    pub fn new(topic: impl Into<String>, owner_id: impl Into<String>, payload: Value) -> Self {
        Self {
            topic: topic.into(),
            owner_id: owner_id.into(),
            payload,
        }
    }
}

/// Narrows a session to events whose payload carries a specific value under
/// a given key, e.g. only messages of one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventScope {
    key: String,
    value: String,
}

impl EventScope {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }

    /// True if the payload carries the scoped value under the scope key.
    pub fn matches(&self, payload: &Value) -> bool {
        payload.get(&self.key).and_then(Value::as_str) == Some(self.value.as_str())
    }
}
