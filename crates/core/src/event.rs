//! Events and per-session subscriptions
//!
//! Events are fanned out to observers after a transaction commits (CHG) or
//! when a call changes state (CST), produces a value (CVA) or writes output
//! (OUP). A session's [`Subscriptions`] decide which events it receives.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

use crate::change::Change;
use crate::error::{Error, Result};
use crate::value::Value;

/// Wildcard accepted for both event types and event keys.
pub const WILDCARD: &str = "*";

/// Event type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EventType {
    /// A committed change
    Chg,
    /// Call output
    Oup,
    /// Call status changed
    Cst,
    /// Call value set
    Cva,
    /// Free-form message
    Msg,
}

impl EventType {
    /// Every event type.
    pub const ALL: [EventType; 5] = [
        EventType::Chg,
        EventType::Oup,
        EventType::Cst,
        EventType::Cva,
        EventType::Msg,
    ];

    /// Three-letter wire name.
    pub fn name(self) -> &'static str {
        match self {
            EventType::Chg => "CHG",
            EventType::Oup => "OUP",
            EventType::Cst => "CST",
            EventType::Cva => "CVA",
            EventType::Msg => "MSG",
        }
    }

    /// Look up an event type by name (case-insensitive).
    pub fn from_name(name: &str) -> Option<EventType> {
        let upper = name.to_ascii_uppercase();
        EventType::ALL.iter().copied().find(|t| t.name() == upper)
    }
}

/// A notification delivered to observers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Event type
    pub kind: EventType,
    /// Routing key: object id for CHG, call id for call events
    pub key: String,
    /// Payload
    pub data: Value,
}

impl Event {
    /// Create an event.
    pub fn new(kind: EventType, key: impl Into<String>, data: Value) -> Self {
        Self {
            kind,
            key: key.into(),
            data,
        }
    }

    /// CHG event for a committed change, keyed by the target object id.
    pub fn change(change: &Change) -> Self {
        let key = match &change.target {
            Value::Obj(id) => id.0.to_string(),
            _ => WILDCARD.to_string(),
        };
        Event::new(EventType::Chg, key, change.to_value())
    }

    /// Event keyed by a call id.
    pub fn call(kind: EventType, call_id: u64, data: Value) -> Self {
        Event::new(kind, call_id.to_string(), data)
    }
}

/// Event selection of a session: event type to set of keys.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Subscriptions {
    keys: HashMap<EventType, BTreeSet<String>>,
}

fn resolve_types(event_type: &str) -> Result<Vec<EventType>> {
    if event_type == WILDCARD {
        return Ok(EventType::ALL.to_vec());
    }
    EventType::from_name(event_type)
        .map(|t| vec![t])
        .ok_or_else(|| Error::UnknownEventType {
            event_type: event_type.to_string(),
        })
}

impl Subscriptions {
    /// Empty selection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to `key` for `event_type` (`*` type means all types).
    pub fn observe(&mut self, event_type: &str, key: &str) -> Result<()> {
        for t in resolve_types(event_type)? {
            self.keys.entry(t).or_default().insert(key.to_string());
        }
        Ok(())
    }

    /// Unsubscribe. A `*` key clears the type's whole key set.
    pub fn unobserve(&mut self, event_type: &str, key: &str) -> Result<()> {
        for t in resolve_types(event_type)? {
            if let Some(set) = self.keys.get_mut(&t) {
                if key == WILDCARD {
                    set.clear();
                } else {
                    set.remove(key);
                }
            }
        }
        Ok(())
    }

    /// Whether an event passes this selection.
    ///
    /// The event's key (or `*`) must be present for its type. An event keyed
    /// `*` reaches any selection holding at least one key for its type.
    pub fn accepts(&self, event: &Event) -> bool {
        match self.keys.get(&event.kind) {
            Some(set) if !set.is_empty() => {
                event.key == WILDCARD || set.contains(&event.key) || set.contains(WILDCARD)
            }
            _ => false,
        }
    }

    /// Keys held for an event type.
    pub fn keys(&self, event_type: EventType) -> impl Iterator<Item = &str> {
        self.keys
            .get(&event_type)
            .into_iter()
            .flat_map(|s| s.iter().map(String::as_str))
    }

    /// Whether nothing is subscribed.
    pub fn is_empty(&self) -> bool {
        self.keys.values().all(BTreeSet::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn evt(kind: EventType, key: &str) -> Event {
        Event::new(kind, key, Value::Null)
    }

    #[test]
    fn test_wildcard_type_subscribes_all_types() {
        let mut s = Subscriptions::new();
        s.observe("*", "key1").unwrap();
        for t in EventType::ALL {
            assert!(s.accepts(&evt(t, "key1")));
            assert!(s.accepts(&evt(t, "*")));
            assert!(!s.accepts(&evt(t, "key2")));
        }
    }

    #[test]
    fn test_wildcard_key() {
        let mut s = Subscriptions::new();
        s.observe("CHG", "*").unwrap();
        assert!(s.accepts(&evt(EventType::Chg, "42")));
        assert!(!s.accepts(&evt(EventType::Cst, "42")));
    }

    #[test]
    fn test_unobserve_wildcard_clears() {
        let mut s = Subscriptions::new();
        s.observe("CHG", "1").unwrap();
        s.observe("CHG", "2").unwrap();
        s.unobserve("CHG", "*").unwrap();
        assert!(s.is_empty());
        assert!(!s.accepts(&evt(EventType::Chg, "*")));
    }

    #[test]
    fn test_unobserve_missing_key_is_noop() {
        let mut s = Subscriptions::new();
        s.unobserve("OUP", "9").unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn test_unknown_event_type() {
        let mut s = Subscriptions::new();
        let err = s.observe("FOO", "1").unwrap_err();
        assert!(matches!(err, Error::UnknownEventType { .. }));
    }

    #[test]
    fn test_change_event_key() {
        use crate::change::{ChangeKind, Prior};
        use crate::value::ObjId;
        let c = Change::new(
            ChangeKind::Set,
            Value::Obj(ObjId(12)),
            "name".into(),
            "x".into(),
            Prior::default(),
            1,
        );
        assert_eq!(Event::change(&c).key, "12");
        let c = Change::new(ChangeKind::Set, Value::Int(5), "a".into(), "x".into(), Prior::default(), 1);
        assert_eq!(Event::change(&c).key, "*");
    }
}
