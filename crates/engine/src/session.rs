//! Session registry
//!
//! A session is a named client context carrying a user and an event
//! selection. Transactions bind to at most one session. Async calls get a
//! temporary session that inherits the user of the invoking one and is
//! closed when the call ends.

use parking_lot::RwLock;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;
use uuid::Uuid;

use modelbus_core::{Error, Event, Result, Subscriptions, Value};

/// One client session.
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    /// Session id
    pub id: String,
    /// User recorded by HEL
    pub user: Value,
    /// Event selection
    pub subscriptions: Subscriptions,
    /// Created for an async call and closed with it
    pub is_temp: bool,
}

impl Session {
    fn new(id: String, user: Value, is_temp: bool) -> Self {
        Self {
            id,
            user,
            subscriptions: Subscriptions::new(),
            is_temp,
        }
    }
}

/// All live sessions, keyed by id.
///
/// Ids of closed temporary sessions are remembered so that a late command
/// from a finished async call cannot bring the session back.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<FxHashMap<String, Session>>,
    retired: RwLock<FxHashSet<String>>,
}

impl SessionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a session with a fresh id.
    ///
    /// With `inherit`, the new session takes over that session's user.
    pub fn create(&self, inherit: Option<&str>, is_temp: bool) -> String {
        let id = Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write();
        let user = inherit
            .and_then(|parent| sessions.get(parent))
            .map(|s| s.user.clone())
            .unwrap_or(Value::Null);
        sessions.insert(id.clone(), Session::new(id.clone(), user, is_temp));
        debug!(target: "modelbus::session", session = %id, temp = is_temp, "Session created");
        id
    }

    /// Ensure a session named `id` exists. Returns `true` if it was created.
    ///
    /// Fails with [`Error::UnknownSession`] if `id` names a temporary
    /// session that has already been closed.
    pub fn ensure(&self, id: &str) -> Result<bool> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(id) {
            return Ok(false);
        }
        if self.retired.read().contains(id) {
            return Err(unknown(id));
        }
        sessions.insert(id.to_string(), Session::new(id.to_string(), Value::Null, false));
        debug!(target: "modelbus::session", session = id, "Session created on first use");
        Ok(true)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.sessions.read().contains_key(id)
    }

    /// Snapshot of a session.
    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().get(id).cloned()
    }

    /// Record the user of a session.
    pub fn set_user(&self, id: &str, user: Value) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id).ok_or_else(|| unknown(id))?;
        session.user = user;
        Ok(())
    }

    /// Delete a session.
    pub fn remove(&self, id: &str) -> Result<Session> {
        let removed = self.sessions.write().remove(id).ok_or_else(|| unknown(id))?;
        debug!(target: "modelbus::session", session = id, "Session removed");
        Ok(removed)
    }

    /// Delete a temporary session. Permanent sessions are left alone.
    pub fn close_temp(&self, id: &str) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get(id) {
            Some(s) if s.is_temp => {
                sessions.remove(id);
                self.retired.write().insert(id.to_string());
                debug!(target: "modelbus::session", session = id, "Temporary session closed");
                true
            }
            _ => false,
        }
    }

    /// Add `(event_type, key)` to a session's selection.
    pub fn observe(&self, id: &str, event_type: &str, key: &str) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id).ok_or_else(|| unknown(id))?;
        session.subscriptions.observe(event_type, key)
    }

    /// Remove `(event_type, key)` from a session's selection.
    pub fn unobserve(&self, id: &str, event_type: &str, key: &str) -> Result<()> {
        let mut sessions = self.sessions.write();
        let session = sessions.get_mut(id).ok_or_else(|| unknown(id))?;
        session.subscriptions.unobserve(event_type, key)
    }

    /// Whether `event` passes the selection of session `id`.
    ///
    /// Unknown sessions accept nothing.
    pub fn accepts(&self, id: &str, event: &Event) -> bool {
        self.sessions
            .read()
            .get(id)
            .map(|s| s.subscriptions.accepts(event))
            .unwrap_or(false)
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    /// Whether no session is live.
    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }
}

fn unknown(id: &str) -> Error {
    Error::UnknownSession {
        session: id.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelbus_core::EventType;

    #[test]
    fn test_create_generates_unique_ids() {
        let reg = SessionRegistry::new();
        let a = reg.create(None, false);
        let b = reg.create(None, false);
        assert_ne!(a, b);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn test_temp_session_inherits_user() {
        let reg = SessionRegistry::new();
        let parent = reg.create(None, false);
        reg.set_user(&parent, "alice".into()).unwrap();
        let child = reg.create(Some(&parent), true);
        let session = reg.get(&child).unwrap();
        assert_eq!(session.user, Value::from("alice"));
        assert!(session.is_temp);
    }

    #[test]
    fn test_close_temp_ignores_permanent_sessions() {
        let reg = SessionRegistry::new();
        let permanent = reg.create(None, false);
        let temp = reg.create(None, true);
        assert!(!reg.close_temp(&permanent));
        assert!(reg.close_temp(&temp));
        assert!(reg.contains(&permanent));
        assert!(!reg.contains(&temp));
    }

    #[test]
    fn test_ensure_creates_once() {
        let reg = SessionRegistry::new();
        assert!(reg.ensure("s1").unwrap());
        assert!(!reg.ensure("s1").unwrap());
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_ensure_refuses_closed_temp_session() {
        let reg = SessionRegistry::new();
        let temp = reg.create(None, true);
        assert!(reg.close_temp(&temp));
        let err = reg.ensure(&temp).unwrap_err();
        assert!(matches!(err, Error::UnknownSession { .. }));
        assert!(!reg.contains(&temp));
        assert!(reg.is_empty());
    }

    #[test]
    fn test_remove_unknown_session() {
        let reg = SessionRegistry::new();
        let err = reg.remove("nope").unwrap_err();
        assert!(matches!(err, Error::UnknownSession { .. }));
    }

    #[test]
    fn test_subscription_filtering() {
        let reg = SessionRegistry::new();
        let id = reg.create(None, false);
        reg.observe(&id, "*", "key1").unwrap();

        let hit = Event::new(EventType::Cst, "key1", Value::Null);
        let wildcard = Event::new(EventType::Msg, "*", Value::Null);
        let miss = Event::new(EventType::Chg, "key2", Value::Null);
        assert!(reg.accepts(&id, &hit));
        assert!(reg.accepts(&id, &wildcard));
        assert!(!reg.accepts(&id, &miss));
        assert!(!reg.accepts("other", &hit));

        reg.unobserve(&id, "*", "*").unwrap();
        assert!(!reg.accepts(&id, &hit));
    }

    #[test]
    fn test_unknown_event_type_rejected() {
        let reg = SessionRegistry::new();
        let id = reg.create(None, false);
        let err = reg.observe(&id, "FOO", "*").unwrap_err();
        assert!(matches!(err, Error::UnknownEventType { .. }));
    }
}
