//! Call manager
//!
//! Owns every call record and its status machine:
//!
//! ```text
//! INI -> RUN -> {WAI <-> RUN} -> {FIN | ERR | ABO}
//! ```
//!
//! Every status change emits a CST event, value updates emit CVA and output
//! emits OUP, all keyed by the call id. Setting the current status again is a
//! no-op, and terminal states are never left. When an async call reaches a
//! terminal state it is finalized: the parent's auto-subscription is removed
//! and the temporary session closed.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use chrono::Local;
use dashmap::DashMap;
use tracing::{debug, info, warn};

use modelbus_core::{CallStatus, CallType, Error, Event, EventType, Result, Value, WILDCARD};
use modelbus_engine::{CallRequest, Engine};

use crate::call::Call;

/// Output channel used for captured standard output.
pub const STDOUT: &str = "STDOUT";

fn transition_allowed(from: CallStatus, to: CallStatus) -> bool {
    use CallStatus::*;
    match (from, to) {
        (Ini, Run) | (Run, Wai) | (Wai, Run) => true,
        (Ini | Run | Wai, Abo | Err | Fin) => true,
        _ => false,
    }
}

/// Registry of calls.
pub struct CallManager {
    calls: DashMap<u64, Call>,
    next_id: AtomicU64,
    engine: Weak<Engine>,
}

impl std::fmt::Debug for CallManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallManager")
            .field("calls", &self.calls.len())
            .finish()
    }
}

impl CallManager {
    /// Manager delivering events through `engine`.
    pub fn new(engine: Weak<Engine>) -> Self {
        Self {
            calls: DashMap::new(),
            next_id: AtomicU64::new(0),
            engine,
        }
    }

    fn emit(&self, events: &[Event]) {
        if let Some(engine) = self.engine.upgrade() {
            engine.notify(events);
        }
    }

    fn unknown(call_id: u64) -> Error {
        Error::UnknownCall { call_id }
    }

    /// Register a new call in status INI.
    ///
    /// With `autoobserve`, the parent session is subscribed to the call's
    /// events until the call is finalized.
    pub fn create(&self, request: &CallRequest, call_type: CallType) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mut call = Call::new(
            id,
            request.name.clone(),
            request.args.clone(),
            request.opts.clone(),
            call_type,
            request.session.clone(),
            request.parent_session.clone(),
        );
        if request.opts.autoobserve {
            if let (Some(parent), Some(engine)) = (&request.parent_session, self.engine.upgrade()) {
                match engine.observe(parent, WILDCARD, &id.to_string()) {
                    Ok(()) => call.autoobserved = true,
                    Err(e) => {
                        warn!(target: "modelbus::calls", call_id = id, error = %e, "Auto-observe failed")
                    }
                }
            }
        }
        debug!(target: "modelbus::calls", call_id = id, action = %request.name, kind = ?call_type, "Call created");
        self.calls.insert(id, call);
        id
    }

    /// Snapshot of a call.
    pub fn get(&self, call_id: u64) -> Result<Call> {
        self.calls
            .get(&call_id)
            .map(|c| c.clone())
            .ok_or_else(|| Self::unknown(call_id))
    }

    /// Current status of a call.
    pub fn status(&self, call_id: u64) -> Result<CallStatus> {
        self.calls
            .get(&call_id)
            .map(|c| c.status)
            .ok_or_else(|| Self::unknown(call_id))
    }

    /// `[callId, status, info, value, outputs]`, as returned by CST.
    pub fn status_value(&self, call_id: u64) -> Result<Value> {
        self.calls
            .get(&call_id)
            .map(|c| c.to_status_value())
            .ok_or_else(|| Self::unknown(call_id))
    }

    /// Cancellation flag shared with the call's worker.
    pub fn abort_flag(&self, call_id: u64) -> Result<Arc<AtomicBool>> {
        self.calls
            .get(&call_id)
            .map(|c| c.abort_flag())
            .ok_or_else(|| Self::unknown(call_id))
    }

    /// Change the status of a call.
    ///
    /// Returns `false` when nothing changed: the status was already current
    /// or the call had already ended.
    ///
    /// # Errors
    ///
    /// [`Error::UnknownCall`] for an unknown id, [`Error::InvalidCallState`]
    /// for a transition the state machine does not allow.
    pub fn set_status(&self, call_id: u64, status: CallStatus, info: Option<String>) -> Result<bool> {
        let finalize = {
            let mut call = self
                .calls
                .get_mut(&call_id)
                .ok_or_else(|| Self::unknown(call_id))?;
            if call.status == status || call.status.is_terminal() {
                debug!(target: "modelbus::calls", call_id, current = %call.status, requested = %status, "Status unchanged");
                return Ok(false);
            }
            if !transition_allowed(call.status, status) {
                return Err(Error::InvalidCallState {
                    call_id,
                    reason: format!("cannot change status from {} to {}", call.status, status),
                });
            }
            call.status = status;
            if let Some(info) = info {
                call.info = info;
            }
            if status.is_terminal() {
                call.end_time = Some(Local::now());
            }
            info!(target: "modelbus::calls", call_id, action = %call.name, status = %status, "Call status changed");
            let event = Event::call(
                EventType::Cst,
                call_id,
                Value::List(vec![Value::from(status.name()), Value::from(call.info.as_str())]),
            );
            let finalize = status.is_terminal().then(|| {
                (
                    call.call_type,
                    call.autoobserved,
                    call.parent_session.clone(),
                    call.session.clone(),
                )
            });
            drop(call);
            self.emit(&[event]);
            finalize
        };
        if let Some((call_type, autoobserved, parent, session)) = finalize {
            self.finalize(call_id, call_type, autoobserved, parent, session);
        }
        Ok(true)
    }

    fn finalize(
        &self,
        call_id: u64,
        call_type: CallType,
        autoobserved: bool,
        parent: Option<String>,
        session: Option<String>,
    ) {
        let engine = match self.engine.upgrade() {
            Some(engine) => engine,
            None => return,
        };
        if autoobserved {
            if let Some(parent) = parent {
                if let Err(e) = engine.unobserve(&parent, WILDCARD, &call_id.to_string()) {
                    debug!(target: "modelbus::calls", call_id, error = %e, "Auto-observe already gone");
                }
            }
        }
        if call_type == CallType::Asy {
            if let Some(session) = session {
                engine.close_temp_session(&session);
            }
        }
        debug!(target: "modelbus::calls", call_id, "Call finalized");
    }

    /// Mark a call as running and stamp its start time.
    pub fn start(&self, call_id: u64) -> Result<bool> {
        let info = {
            let mut call = self
                .calls
                .get_mut(&call_id)
                .ok_or_else(|| Self::unknown(call_id))?;
            if call.status != CallStatus::Ini {
                return Ok(false);
            }
            call.mark_started();
            call.info.clone()
        };
        self.set_status(call_id, CallStatus::Run, Some(info))
    }

    /// End a call with the outcome of its action.
    ///
    /// A value sets FIN, an error sets ERR; both extend the info string with
    /// the end time and elapsed time.
    pub fn finish(&self, call_id: u64, outcome: std::result::Result<Value, String>) -> Result<bool> {
        match outcome {
            Ok(value) => {
                self.set_value(call_id, value)?;
                let info = self.get(call_id)?.ending_info("ended", None);
                self.set_status(call_id, CallStatus::Fin, Some(info))
            }
            Err(reason) => {
                let info = self.get(call_id)?.ending_info("failed", Some(&reason));
                self.set_status(call_id, CallStatus::Err, Some(info))
            }
        }
    }

    /// Record the value of a call. Ignored once the call has ended.
    pub fn set_value(&self, call_id: u64, value: Value) -> Result<()> {
        {
            let mut call = self
                .calls
                .get_mut(&call_id)
                .ok_or_else(|| Self::unknown(call_id))?;
            if call.status.is_terminal() {
                debug!(target: "modelbus::calls", call_id, "Value after end ignored");
                return Ok(());
            }
            call.value = value.clone();
            call.has_value = true;
        }
        self.emit(&[Event::call(EventType::Cva, call_id, value)]);
        Ok(())
    }

    /// Append output of a call.
    ///
    /// `silent` calls capture nothing; `eventsonly` calls emit OUP without
    /// storing the text.
    pub fn add_output(&self, call_id: u64, channel: &str, text: &str) -> Result<()> {
        {
            let mut call = self
                .calls
                .get_mut(&call_id)
                .ok_or_else(|| Self::unknown(call_id))?;
            if call.opts.silent || text.is_empty() {
                return Ok(());
            }
            if !call.opts.eventsonly {
                call.outputs
                    .entry(channel.to_string())
                    .or_default()
                    .push_str(text);
            }
        }
        self.emit(&[Event::call(
            EventType::Oup,
            call_id,
            Value::List(vec![Value::from(channel), Value::from(text)]),
        )]);
        Ok(())
    }

    /// Abort an async call.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidCallState`] for sync calls and calls that already
    /// ended.
    pub fn abort(&self, call_id: u64) -> Result<bool> {
        let info = {
            let call = self
                .calls
                .get(&call_id)
                .ok_or_else(|| Self::unknown(call_id))?;
            if call.call_type != CallType::Asy {
                return Err(Error::InvalidCallState {
                    call_id,
                    reason: "only async calls can be aborted".to_string(),
                });
            }
            if call.status.is_terminal() {
                return Err(Error::InvalidCallState {
                    call_id,
                    reason: format!("call already ended with {}", call.status),
                });
            }
            call.abort_flag().store(true, Ordering::SeqCst);
            call.ending_info("aborted", None)
        };
        warn!(target: "modelbus::calls", call_id, "Call aborted");
        self.set_status(call_id, CallStatus::Abo, Some(info))
    }

    /// Number of known calls.
    pub fn len(&self) -> usize {
        self.calls.len()
    }

    /// Whether no call is known.
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelbus_core::CallOptions;
    use modelbus_engine::InMemoryMdb;
    use parking_lot::Mutex;

    fn setup() -> (Arc<Engine>, CallManager, Arc<Mutex<Vec<Event>>>) {
        let engine = Arc::new(Engine::new(Box::new(InMemoryMdb::new()), 10));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        engine.subscribe(None, Arc::new(move |e: &Event| sink.lock().push(e.clone())));
        let manager = CallManager::new(Arc::downgrade(&engine));
        (engine, manager, seen)
    }

    fn request(opts: CallOptions, parent: Option<&str>, session: Option<&str>) -> CallRequest {
        CallRequest {
            name: "demo".into(),
            args: vec![],
            opts,
            session: session.map(str::to_string),
            parent_session: parent.map(str::to_string),
            transaction_id: 1,
        }
    }

    fn cst_count(seen: &Mutex<Vec<Event>>) -> usize {
        seen.lock().iter().filter(|e| e.kind == EventType::Cst).count()
    }

    #[test]
    fn test_same_status_emits_once() {
        let (_engine, manager, seen) = setup();
        let id = manager.create(&request(CallOptions::default(), None, None), CallType::Syn);
        assert!(manager.set_status(id, CallStatus::Run, None).unwrap());
        assert!(!manager.set_status(id, CallStatus::Run, None).unwrap());
        assert_eq!(cst_count(&seen), 1);
    }

    #[test]
    fn test_terminal_states_are_never_left() {
        let (_engine, manager, _seen) = setup();
        let id = manager.create(&request(CallOptions::default(), None, None), CallType::Syn);
        manager.start(id).unwrap();
        manager.finish(id, Ok(Value::Int(1))).unwrap();
        assert!(!manager.set_status(id, CallStatus::Run, None).unwrap());
        assert!(!manager.finish(id, Err("late".into())).unwrap());
        let call = manager.get(id).unwrap();
        assert_eq!(call.status, CallStatus::Fin);
        assert!(call.has_value);
        assert!(call.info.contains(" and ended "));
    }

    #[test]
    fn test_invalid_transition() {
        let (_engine, manager, _seen) = setup();
        let id = manager.create(&request(CallOptions::default(), None, None), CallType::Syn);
        let err = manager.set_status(id, CallStatus::Wai, None).unwrap_err();
        assert!(matches!(err, Error::InvalidCallState { .. }));
    }

    #[test]
    fn test_output_modes() {
        let (_engine, manager, seen) = setup();
        let normal = manager.create(&request(CallOptions::default(), None, None), CallType::Syn);
        let silent = manager.create(
            &request(CallOptions { silent: true, ..Default::default() }, None, None),
            CallType::Syn,
        );
        let events_only = manager.create(
            &request(CallOptions { eventsonly: true, ..Default::default() }, None, None),
            CallType::Syn,
        );
        for id in [normal, silent, events_only] {
            manager.add_output(id, STDOUT, "a").unwrap();
            manager.add_output(id, STDOUT, "b").unwrap();
        }
        assert_eq!(manager.get(normal).unwrap().outputs[STDOUT], "ab");
        assert!(manager.get(silent).unwrap().outputs.is_empty());
        assert!(manager.get(events_only).unwrap().outputs.is_empty());
        let oup = seen.lock().iter().filter(|e| e.kind == EventType::Oup).count();
        assert_eq!(oup, 4);
    }

    #[test]
    fn test_abort_rules() {
        let (_engine, manager, _seen) = setup();
        let sync = manager.create(&request(CallOptions::default(), None, None), CallType::Syn);
        assert!(manager.abort(sync).is_err());

        let id = manager.create(&request(CallOptions::default(), None, None), CallType::Asy);
        manager.start(id).unwrap();
        assert!(manager.abort(id).unwrap());
        assert!(manager.abort_flag(id).unwrap().load(Ordering::SeqCst));
        let call = manager.get(id).unwrap();
        assert_eq!(call.status, CallStatus::Abo);
        assert!(call.info.contains(" and aborted "));
        assert!(manager.abort(id).is_err());

        // A value arriving after the abort does not turn the call into FIN.
        manager.finish(id, Ok(Value::Int(5))).unwrap();
        let call = manager.get(id).unwrap();
        assert_eq!(call.status, CallStatus::Abo);
        assert!(!call.has_value);
    }

    #[test]
    fn test_async_finalization_closes_temp_session_and_autoobserve() {
        let (engine, manager, _seen) = setup();
        let parent = engine.create_session(None, false);
        let temp = engine.create_session(Some(parent.as_str()), true);
        let opts = CallOptions {
            autoobserve: true,
            ..Default::default()
        };
        let id = manager.create(&request(opts, Some(&parent), Some(&temp)), CallType::Asy);
        assert!(manager.get(id).unwrap().autoobserved);
        let key = id.to_string();
        let sample = Event::call(EventType::Cva, id, Value::Null);
        assert!(engine.sessions().accepts(&parent, &sample));

        manager.start(id).unwrap();
        manager.finish(id, Err("boom".into())).unwrap();
        assert!(!engine.sessions().contains(&temp));
        assert!(!engine.sessions().accepts(&parent, &sample));
        assert_eq!(manager.get(id).unwrap().status, CallStatus::Err);
        assert!(manager.get(id).unwrap().info.ends_with(": boom"));
        assert_eq!(key, sample.key);
    }

    #[test]
    fn test_unknown_call() {
        let (_engine, manager, _seen) = setup();
        assert!(matches!(
            manager.status_value(42),
            Err(Error::UnknownCall { call_id: 42 })
        ));
    }
}
