//! Seams between the engine and the action layer
//!
//! The engine knows nothing about how actions are registered or run. CAL,
//! ASC, ABC, CST and GAA are forwarded to an installed [`ActionHost`]. While
//! an action runs it talks back to the model through a [`Domain`].

use modelbus_core::{CallOptions, Command, Event, Result, Value};

/// Handle through which a running action issues commands.
pub trait Domain {
    /// Execute a sub-command and return its value.
    fn execute(&mut self, cmd: Command) -> Result<Value>;

    /// Subscribe the call's session to events.
    fn observe(&mut self, event_type: &str, key: &str) -> Result<()>;

    /// Unsubscribe the call's session from events.
    fn unobserve(&mut self, event_type: &str, key: &str) -> Result<()>;

    /// Write action output to a named channel (`"STDOUT"`, `"STDERR"`, ...).
    fn output(&mut self, _channel: &str, _text: &str) {}

    /// Whether the call has been asked to stop.
    fn is_aborted(&self) -> bool {
        false
    }

    /// Events delivered to the call's session since the last drain.
    fn events(&mut self) -> Vec<Event> {
        Vec::new()
    }

    /// Session the call runs in.
    fn session_id(&self) -> Option<&str>;
}

/// A call as handed to the host.
#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    /// Action name
    pub name: String,
    /// Evaluated arguments
    pub args: Vec<Value>,
    /// Parsed options
    pub opts: CallOptions,
    /// Session the call runs in (the temporary session for async calls)
    pub session: Option<String>,
    /// Session that issued the call
    pub parent_session: Option<String>,
    /// Transaction that issued the call
    pub transaction_id: u64,
}

/// Registry and runner of actions.
pub trait ActionHost: Send + Sync {
    /// Descriptors of every registered action, as returned by GAA.
    fn list_actions(&self) -> Vec<Value>;

    /// Run an action on the calling thread. Sub-commands go through `domain`
    /// and join the caller's transaction.
    fn call_sync(&self, request: CallRequest, domain: &mut dyn Domain) -> Result<Value>;

    /// Start an action in the background and return its call id.
    fn call_async(&self, request: CallRequest) -> Result<u64>;

    /// Request cancellation of an async call.
    fn abort_call(&self, call_id: u64) -> Result<bool>;

    /// `[callId, status, info, value, outputs]` of a call.
    fn call_status(&self, call_id: u64) -> Result<Value>;
}
