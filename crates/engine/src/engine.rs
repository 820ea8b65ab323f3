//! Transaction engine
//!
//! [`Engine::exec`] runs one command tree as one transaction:
//!
//! 1. Take the MDB lock and allocate a transaction id.
//! 2. Bind the session (creating it under the given id if unknown).
//! 3. Execute the tree. Every element-wise mutation is recorded as a
//!    provisional [`Change`].
//! 4. On success, assign change ids, append to the [`ChangeLog`] and collect
//!    one CHG event per change. On failure, undo the provisional changes in
//!    reverse order.
//! 5. Release the lock, then deliver the events.
//!
//! Query-valued arguments are resolved against the transaction history: the
//! values of the commands already executed in the same transaction.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, error, warn};

use modelbus_core::{
    CallOptions, Change, ChangeKind, CmdResult, Command, Error, Event, ObjId, Prior, Query,
    Result, Segment, Value,
};

use crate::accessor::{CloneMode, MdbAccessor};
use crate::bus::{Callback, EventBus, ObserverId};
use crate::changelog::ChangeLog;
use crate::config::RuntimeConfig;
use crate::eval::{DefaultEvaluator, QueryEvaluator};
use crate::host::{ActionHost, CallRequest, Domain};
use crate::session::SessionRegistry;
use crate::shape::{expand_add_rem, expand_set, pair_targets};

struct EngineState {
    mdb: Box<dyn MdbAccessor>,
    log: ChangeLog,
    last_tid: u64,
}

/// Per-transaction bookkeeping.
struct Txn {
    id: u64,
    session: Option<String>,
    history: Vec<Value>,
    changes: Vec<Change>,
}

/// Command executor over one model database.
///
/// All transactions serialize on a single lock around the accessor.
/// Notifications are delivered after the lock is released.
pub struct Engine {
    state: Mutex<EngineState>,
    evaluator: Box<dyn QueryEvaluator>,
    sessions: Arc<SessionRegistry>,
    bus: Arc<EventBus>,
    backend_events: Arc<Mutex<Vec<Event>>>,
    host: RwLock<Option<Arc<dyn ActionHost>>>,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("sessions", &self.sessions.len())
            .field("observers", &self.bus.len())
            .finish()
    }
}

impl Engine {
    /// Engine over `mdb` retaining `max_changes` change records.
    pub fn new(mut mdb: Box<dyn MdbAccessor>, max_changes: usize) -> Self {
        let sessions = Arc::new(SessionRegistry::new());
        let bus = Arc::new(EventBus::new(sessions.clone()));
        let backend_events = Arc::new(Mutex::new(Vec::new()));
        let sink = backend_events.clone();
        mdb.observe(Arc::new(move |event: Event| sink.lock().push(event)));
        Self {
            state: Mutex::new(EngineState {
                mdb,
                log: ChangeLog::new(max_changes),
                last_tid: 0,
            }),
            evaluator: Box::new(DefaultEvaluator::new()),
            sessions,
            bus,
            backend_events,
            host: RwLock::new(None),
        }
    }

    /// Engine configured from a [`RuntimeConfig`].
    pub fn with_config(mdb: Box<dyn MdbAccessor>, config: &RuntimeConfig) -> Self {
        Self::new(mdb, config.max_changes)
    }

    /// Replace the query evaluator.
    pub fn with_evaluator(mut self, evaluator: Box<dyn QueryEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Install the action host serving CAL, ASC, ABC, CST and GAA.
    pub fn install_host(&self, host: Arc<dyn ActionHost>) {
        *self.host.write() = Some(host);
    }

    /// Session registry.
    pub fn sessions(&self) -> &Arc<SessionRegistry> {
        &self.sessions
    }

    /// Register an event observer, optionally filtered through a session's
    /// subscriptions.
    pub fn subscribe(&self, session: Option<String>, callback: Callback) -> ObserverId {
        self.bus.subscribe(session, callback)
    }

    /// Remove an event observer.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.bus.unsubscribe(id)
    }

    /// Deliver events produced outside a transaction (call status, output).
    pub fn notify(&self, events: &[Event]) {
        self.bus.publish_all(events);
    }

    /// Subscribe a session to events.
    pub fn observe(&self, session: &str, event_type: &str, key: &str) -> Result<()> {
        self.sessions.observe(session, event_type, key)
    }

    /// Unsubscribe a session from events.
    pub fn unobserve(&self, session: &str, event_type: &str, key: &str) -> Result<()> {
        self.sessions.unobserve(session, event_type, key)
    }

    /// Id of the last committed change, `-1` when none.
    pub fn latest_change_id(&self) -> i64 {
        self.state.lock().log.last_id()
    }

    /// Run `f` against the accessor under the MDB lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&dyn MdbAccessor) -> R) -> R {
        let state = self.state.lock();
        f(state.mdb.as_ref())
    }

    /// Execute a command tree as one transaction.
    ///
    /// Never fails: errors are reported as an ERR result, and everything the
    /// transaction changed is rolled back.
    pub fn exec(&self, cmd: &Command, session: Option<&str>) -> CmdResult {
        let mut state = self.state.lock();
        state.last_tid += 1;
        let tid = state.last_tid;
        if let Some(id) = session {
            if let Err(e) = self.sessions.ensure(id) {
                warn!(target: "modelbus::txn", tid, session = id, error = %e, "Transaction refused");
                return CmdResult::err(cmd.kind(), e.to_string(), tid, state.log.last_id());
            }
        }
        let mut txn = Txn {
            id: tid,
            session: session.map(str::to_string),
            history: Vec::new(),
            changes: Vec::new(),
        };
        debug!(target: "modelbus::txn", tid, command = %cmd.kind(), session = ?txn.session, "Transaction started");

        let result = TxContext {
            engine: self,
            state: &mut *state,
            txn: &mut txn,
        }
        .run(cmd);

        let backend: Vec<Event> = std::mem::take(&mut *self.backend_events.lock());
        let events: Vec<Event> = if result.is_ok() {
            let committed = state.log.commit(std::mem::take(&mut txn.changes));
            debug!(target: "modelbus::txn", tid, changes = committed.len(), "Transaction committed");
            backend
                .into_iter()
                .chain(committed.iter().map(Event::change))
                .collect()
        } else {
            warn!(
                target: "modelbus::txn",
                tid,
                error = result.error_message().unwrap_or(""),
                changes = txn.changes.len(),
                "Transaction failed, rolling back"
            );
            rollback(state.mdb.as_mut(), &txn.changes);
            debug!(target: "modelbus::txn", tid, dropped = backend.len(), "Backend events discarded");
            Vec::new()
        };
        drop(state);

        self.bus.publish_all(&events);
        result
    }

    /// Create a session and return its id.
    pub fn create_session(&self, inherit: Option<&str>, is_temp: bool) -> String {
        self.sessions.create(inherit, is_temp)
    }

    /// Close a temporary session. Permanent sessions are left alone.
    pub fn close_temp_session(&self, id: &str) -> bool {
        self.sessions.close_temp(id)
    }
}

// ============================================================================
// Rollback
// ============================================================================

/// Undo `changes` in reverse order. Failures are logged and skipped.
fn rollback(mdb: &mut dyn MdbAccessor, changes: &[Change]) {
    for change in changes.iter().rev() {
        if let Err(e) = undo(mdb, change) {
            error!(
                target: "modelbus::txn",
                kind = change.kind.name(),
                target_obj = ?change.target,
                error = %e,
                "Rollback step failed"
            );
        }
    }
}

fn feature_str(v: &Value) -> Result<&str> {
    v.as_str()
        .ok_or_else(|| Error::internal(format!("change feature is a {}", v.type_name())))
}

fn obj(v: &Value) -> Result<ObjId> {
    v.as_obj()
        .ok_or_else(|| Error::internal(format!("change target is a {}", v.type_name())))
}

/// Put `value` back where it lived before the change, if it was contained.
fn restore_containment(mdb: &mut dyn MdbAccessor, change: &Change, value: &Value) -> Result<()> {
    if change.old_owner.is_null() {
        return Ok(());
    }
    let owner = obj(&change.old_owner)?;
    let feature = feature_str(&change.old_feature)?;
    match change.old_index {
        Some(index) => mdb.insert(owner, feature, index, value.clone()).map(|_| ()),
        None => mdb.set(owner, feature, value.clone()).map(|_| ()),
    }
}

fn undo(mdb: &mut dyn MdbAccessor, change: &Change) -> Result<()> {
    let target = obj(&change.target)?;
    match change.kind {
        ChangeKind::Set => {
            let feature = feature_str(&change.feature)?;
            mdb.set(target, feature, change.old_value.clone())?;
            restore_containment(mdb, change, &change.new_value)
        }
        ChangeKind::Add => {
            let feature = feature_str(&change.feature)?;
            mdb.remove(target, feature, &change.new_value)?;
            restore_containment(mdb, change, &change.new_value)
        }
        ChangeKind::Rem => {
            let feature = feature_str(&change.feature)?;
            match change.old_index {
                Some(index) => mdb.insert(target, feature, index, change.new_value.clone())?,
                None => mdb.set(target, feature, change.new_value.clone())?,
            };
            Ok(())
        }
        ChangeKind::Mov => {
            let index = change
                .old_index
                .ok_or_else(|| Error::internal("MOV change without previous index"))?;
            mdb.move_to(target, index).map(|_| ())
        }
    }
}

// ============================================================================
// Transaction context
// ============================================================================

struct TxContext<'a> {
    engine: &'a Engine,
    state: &'a mut EngineState,
    txn: &'a mut Txn,
}

fn expect_obj(v: &Value, what: &str) -> Result<ObjId> {
    v.as_obj().ok_or_else(|| {
        Error::invalid_argument(format!("{} must be an object, got {}", what, v.type_name()))
    })
}

fn expect_str<'v>(v: &'v Value, what: &str) -> Result<&'v str> {
    v.as_str().ok_or_else(|| {
        Error::invalid_argument(format!("{} must be a string, got {}", what, v.type_name()))
    })
}

fn expect_count(v: &Value, what: &str) -> Result<usize> {
    match v.as_int() {
        Some(n) if n >= 0 => Ok(n as usize),
        _ => Err(Error::invalid_argument(format!(
            "{} must be a non-negative integer, got {}",
            what,
            v.type_name()
        ))),
    }
}

/// Event routing key from an OBS/UBS argument.
fn event_key(v: &Value) -> Result<String> {
    match v {
        Value::Str(s) => Ok(s.clone()),
        Value::Int(i) => Ok(i.to_string()),
        Value::Obj(id) => Ok(id.0.to_string()),
        other => Err(Error::invalid_argument(format!(
            "event key must be a string, integer or object, got {}",
            other.type_name()
        ))),
    }
}

fn map_objects(v: &Value, f: &mut dyn FnMut(ObjId) -> Result<Value>) -> Result<Value> {
    match v {
        Value::Obj(id) => f(*id),
        Value::List(items) => items
            .iter()
            .map(|i| map_objects(i, f))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        other => Ok(other.clone()),
    }
}

impl<'a> TxContext<'a> {
    fn change_id(&self) -> i64 {
        if self.txn.changes.is_empty() {
            self.state.log.last_id()
        } else {
            (self.state.log.next_id() + self.txn.changes.len() as u64) as i64 - 1
        }
    }

    /// Run a command, producing its result. Compound commands stop at the
    /// first failing child.
    fn run(&mut self, cmd: &Command) -> CmdResult {
        let tid = self.txn.id;
        match cmd {
            Command::Cmp(children) => {
                let mut results = Vec::with_capacity(children.len());
                for child in children {
                    let result = self.run(child);
                    let failed = !result.is_ok();
                    results.push(result);
                    if failed {
                        break;
                    }
                }
                CmdResult::compound(results, tid, self.change_id())
            }
            _ => match self.execute(cmd) {
                Ok(value) => CmdResult::ok(cmd.kind(), value, tid, self.change_id()),
                Err(e) => {
                    warn!(target: "modelbus::txn", tid, command = %cmd.kind(), error = %e, "Command failed");
                    CmdResult::err(cmd.kind(), e.to_string(), tid, self.change_id())
                }
            },
        }
    }

    /// Execute a command and append its value to the history.
    fn execute(&mut self, cmd: &Command) -> Result<Value> {
        if let Command::Cmp(children) = cmd {
            return children
                .iter()
                .map(|c| self.execute(c))
                .collect::<Result<Vec<_>>>()
                .map(Value::List);
        }
        let value = self.dispatch(cmd)?;
        self.txn.history.push(value.clone());
        Ok(value)
    }

    fn eval(&self, v: &Value) -> Result<Value> {
        self.engine
            .evaluator
            .eval(self.state.mdb.as_ref(), v, &self.txn.history)
    }

    fn record(&mut self, kind: ChangeKind, target: ObjId, feature: Value, new_value: Value, prior: Prior) {
        self.txn.changes.push(Change::new(
            kind,
            Value::Obj(target),
            feature,
            new_value,
            prior,
            self.txn.id,
        ));
    }

    fn feature_name(&self, v: &Value) -> Result<String> {
        match v {
            Value::Str(s) => Ok(s.clone()),
            Value::Obj(f) => self.state.mdb.name_of(*f),
            other => Err(Error::invalid_argument(format!(
                "feature must be a name or a feature object, got {}",
                other.type_name()
            ))),
        }
    }

    fn host(&self) -> Option<Arc<dyn ActionHost>> {
        self.engine.host.read().clone()
    }

    fn dispatch(&mut self, cmd: &Command) -> Result<Value> {
        match cmd {
            Command::Get { target } => self.eval(target),
            Command::Qrf { target } => self.qrf(target),
            Command::Set {
                target,
                feature,
                value,
            } => self.set(target, feature, value),
            Command::Add {
                target,
                feature,
                value,
            } => self.add_rem(ChangeKind::Add, target, feature, value),
            Command::Rem {
                target,
                feature,
                value,
            } => self.add_rem(ChangeKind::Rem, target, feature, value),
            Command::Mov { target, index } => self.mov(target, index),
            Command::Del { target } => self.del(target),
            Command::Clo { target, mode } => self.clo(target, mode),
            Command::Crt { class, n, args } => self.crt(class, n, args),
            Command::Crn {
                package,
                class,
                n,
                args,
            } => self.crn(package, class, n, args),
            Command::Gmm => Ok(Value::List(
                self.state
                    .mdb
                    .metamodels()
                    .into_iter()
                    .map(Value::Obj)
                    .collect(),
            )),
            Command::Rmm { metamodel } => {
                let package = expect_obj(&self.eval(metamodel)?, "metamodel")?;
                self.state.mdb.register_metamodel(package)
            }
            Command::Umm { metamodel } => {
                let package = expect_obj(&self.eval(metamodel)?, "metamodel")?;
                self.state.mdb.unregister_metamodel(package)
            }
            Command::Hel { user, password } => self.hel(user, password),
            Command::Gby { session } => self.gby(session),
            Command::Ses { session } => self.ses(session),
            Command::Sts => Ok(Value::Int(self.state.log.last_id())),
            Command::Chg { change_id, n } => {
                let from = self.eval(change_id)?.as_int().ok_or_else(|| {
                    Error::invalid_argument("change id must be an integer")
                })?;
                let n = expect_count(&self.eval(n)?, "change count")?;
                Ok(Value::List(
                    self.state
                        .log
                        .since(from, n)
                        .iter()
                        .map(Change::to_value)
                        .collect(),
                ))
            }
            Command::Obs { event_type, key } => self.subscription(event_type, key, true),
            Command::Ubs { event_type, key } => self.subscription(event_type, key, false),
            Command::Gaa => Ok(Value::List(
                self.host().map(|h| h.list_actions()).unwrap_or_default(),
            )),
            Command::Cal { name, args, opts } => self.cal(name, args, opts),
            Command::Asc { name, args, opts } => self.asc(name, args, opts),
            Command::Abc { call_id } => {
                let id = expect_count(&self.eval(call_id)?, "call id")? as u64;
                let host = self.host().ok_or(Error::UnknownCall { call_id: id })?;
                host.abort_call(id).map(Value::Bool)
            }
            Command::Cst { call_id } => {
                let id = expect_count(&self.eval(call_id)?, "call id")? as u64;
                let host = self.host().ok_or(Error::UnknownCall { call_id: id })?;
                host.call_status(id)
            }
            Command::Cmp(_) => self.execute(cmd),
        }
    }

    // ==================== Read ====================

    /// Path query locating `id`: features and list indices from the topmost
    /// container down, prefixed with an object reference if that container
    /// is not the root.
    fn path_to(&self, id: ObjId) -> Result<Query> {
        let mdb = self.state.mdb.as_ref();
        let mut steps = Vec::new();
        let mut current = id;
        while let Some(parent) = mdb.parent(current)? {
            let feature = match mdb.containing_feature(current)? {
                Some(f) => mdb.name_of(f)?,
                None => break,
            };
            if let Some(index) = mdb.index(current)? {
                steps.push(Segment::Idx(Value::from(index)));
            }
            steps.push(Segment::Pth(Value::Str(feature)));
            current = parent;
        }
        if mdb.root() != Value::Obj(current) {
            steps.push(Segment::Obj(Value::Int(current.0 as i64)));
        }
        steps.reverse();
        Ok(Query::from_segments(steps))
    }

    fn qrf(&mut self, target: &Value) -> Result<Value> {
        let elements = self.eval(target)?;
        map_objects(&elements, &mut |id| self.path_to(id).map(Value::Qry))
    }

    // ==================== Mutation ====================

    fn set(&mut self, target: &Value, feature: &Value, value: &Value) -> Result<Value> {
        let t = self.eval(target)?;
        let f = self.eval(feature)?;
        let v = self.eval(value)?;
        for op in expand_set(&t, &f, &v)? {
            let obj = expect_obj(&op.target, "SET target")?;
            let name = self.feature_name(&op.feature)?;
            let prior = self.state.mdb.set(obj, &name, op.value.clone())?;
            self.record(ChangeKind::Set, obj, Value::Str(name), op.value, prior);
        }
        Ok(Value::List(vec![t, f, v]))
    }

    fn add_rem(
        &mut self,
        kind: ChangeKind,
        target: &Value,
        feature: &Value,
        value: &Value,
    ) -> Result<Value> {
        let t = self.eval(target)?;
        let f = self.eval(feature)?;
        let v = self.eval(value)?;
        for op in expand_add_rem(kind.name(), &t, &f, &v)? {
            let obj = expect_obj(&op.target, &format!("{} target", kind.name()))?;
            let name = self.feature_name(&op.feature)?;
            let prior = match kind {
                ChangeKind::Add => self.state.mdb.add(obj, &name, op.value.clone())?,
                _ => self.state.mdb.remove(obj, &name, &op.value)?,
            };
            self.record(kind, obj, Value::Str(name), op.value, prior);
        }
        Ok(Value::List(vec![t, f, v]))
    }

    fn mov(&mut self, target: &Value, index: &Value) -> Result<Value> {
        let t = self.eval(target)?;
        let i = self.eval(index)?;
        for (target, index) in pair_targets("MOV", "index", &t, &i)? {
            let obj = expect_obj(&target, "MOV target")?;
            let at = expect_count(&index, "MOV index")?;
            let prior = self.state.mdb.move_to(obj, at)?;
            let feature = prior.old_feature.clone();
            self.record(ChangeKind::Mov, obj, feature, Value::from(at), prior);
        }
        Ok(Value::List(vec![t, i]))
    }

    fn del(&mut self, target: &Value) -> Result<Value> {
        let t = self.eval(target)?;
        let targets = match &t {
            Value::List(items) => items.clone(),
            other => vec![other.clone()],
        };
        for target in targets {
            let child = expect_obj(&target, "DEL target")?;
            let mdb = self.state.mdb.as_ref();
            let (parent, feature) = match (mdb.parent(child)?, mdb.containing_feature(child)?) {
                (Some(parent), Some(feature)) => (parent, mdb.name_of(feature)?),
                _ => {
                    return Err(Error::mdb(format!(
                        "cannot delete {}: it is not contained",
                        child
                    )))
                }
            };
            let prior = self.state.mdb.remove(parent, &feature, &target)?;
            self.record(ChangeKind::Rem, parent, Value::Str(feature), target, prior);
        }
        Ok(t)
    }

    // ==================== Creation ====================

    fn clo(&mut self, target: &Value, mode: &Value) -> Result<Value> {
        let t = self.eval(target)?;
        let m = self.eval(mode)?;
        let mut clones = Vec::new();
        for (target, mode) in pair_targets("CLO", "mode", &t, &m)? {
            let obj = expect_obj(&target, "CLO target")?;
            let mode = CloneMode::from_value(&mode)?;
            clones.push(Value::Obj(self.state.mdb.clone_object(obj, mode)?));
        }
        Ok(match t {
            Value::List(_) => Value::List(clones),
            _ => clones.into_iter().next().unwrap_or(Value::Null),
        })
    }

    fn creation_args(&self, args: &Value) -> Result<Vec<Value>> {
        match self.eval(args)? {
            Value::Null => Ok(Vec::new()),
            Value::List(items) => Ok(items),
            other => Err(Error::invalid_argument(format!(
                "creation arguments must be a list, got {}",
                other.type_name()
            ))),
        }
    }

    fn created(n: usize, ids: Vec<ObjId>) -> Value {
        if n == 1 {
            ids.into_iter().next().map(Value::Obj).unwrap_or(Value::Null)
        } else {
            Value::List(ids.into_iter().map(Value::Obj).collect())
        }
    }

    fn crt(&mut self, class: &Value, n: &Value, args: &Value) -> Result<Value> {
        let class = match self.eval(class)? {
            Value::Obj(id) => id,
            Value::Str(name) => self.state.mdb.find_class(&name)?,
            other => {
                return Err(Error::invalid_argument(format!(
                    "class must be a class object or name, got {}",
                    other.type_name()
                )))
            }
        };
        let n = expect_count(&self.eval(n)?, "instance count")?;
        let args = self.creation_args(args)?;
        let ids = self.state.mdb.create(class, n, &args)?;
        Ok(Self::created(n, ids))
    }

    fn crn(&mut self, package: &Value, class: &Value, n: &Value, args: &Value) -> Result<Value> {
        let package = self.eval(package)?;
        let class = self.eval(class)?;
        let package = expect_str(&package, "package name")?;
        let class = expect_str(&class, "class name")?;
        let n = expect_count(&self.eval(n)?, "instance count")?;
        let args = self.creation_args(args)?;
        let ids = self.state.mdb.create_by_name(package, class, n, &args)?;
        Ok(Self::created(n, ids))
    }

    // ==================== Sessions ====================

    fn hel(&mut self, user: &Value, password: &Value) -> Result<Value> {
        let user = self.eval(user)?;
        self.eval(password)?;
        let id = match &self.txn.session {
            Some(id) => id.clone(),
            None => {
                let id = self.engine.sessions.create(None, false);
                self.txn.session = Some(id.clone());
                id
            }
        };
        self.engine.sessions.set_user(&id, user)?;
        debug!(target: "modelbus::session", session = %id, "Login");
        Ok(Value::Str(id))
    }

    fn session_arg(&self, session: &Value) -> Result<String> {
        let v = self.eval(session)?;
        Ok(expect_str(&v, "session id")?.to_string())
    }

    fn gby(&mut self, session: &Value) -> Result<Value> {
        let id = self.session_arg(session)?;
        self.engine.sessions.remove(&id)?;
        if self.txn.session.as_deref() == Some(id.as_str()) {
            self.txn.session = None;
        }
        debug!(target: "modelbus::session", session = %id, "Logout");
        Ok(Value::Bool(true))
    }

    fn ses(&mut self, session: &Value) -> Result<Value> {
        let id = self.session_arg(session)?;
        if !self.engine.sessions.contains(&id) {
            return Err(Error::UnknownSession { session: id });
        }
        self.txn.session = Some(id);
        Ok(Value::Bool(true))
    }

    fn subscription(&mut self, event_type: &Value, key: &Value, observe: bool) -> Result<Value> {
        let event_type = match self.eval(event_type)? {
            Value::Str(s) => s,
            other => {
                return Err(Error::invalid_argument(format!(
                    "event type must be a string, got {}",
                    other.type_name()
                )))
            }
        };
        let key = event_key(&self.eval(key)?)?;
        let session = self.txn.session.clone().ok_or_else(|| Error::NoSession {
            operation: "observing events".to_string(),
        })?;
        if observe {
            self.engine.sessions.observe(&session, &event_type, &key)?;
        } else {
            self.engine.sessions.unobserve(&session, &event_type, &key)?;
        }
        Ok(Value::Bool(true))
    }

    // ==================== Actions ====================

    fn call_request(&self, name: &Value, args: &Value, opts: &Value) -> Result<CallRequest> {
        let name = self.eval(name)?;
        let name = expect_str(&name, "action name")?.to_string();
        let args = match args {
            Value::List(items) => items
                .iter()
                .map(|a| self.eval(a))
                .collect::<Result<Vec<_>>>()?,
            Value::Null => Vec::new(),
            other => {
                return Err(Error::invalid_argument(format!(
                    "action arguments must be a list, got {}",
                    other.type_name()
                )))
            }
        };
        let opts = CallOptions::from_value(opts)?;
        Ok(CallRequest {
            name,
            args,
            opts,
            session: self.txn.session.clone(),
            parent_session: self.txn.session.clone(),
            transaction_id: self.txn.id,
        })
    }

    fn cal(&mut self, name: &Value, args: &Value, opts: &Value) -> Result<Value> {
        let request = self.call_request(name, args, opts)?;
        let host = self.host().ok_or_else(|| Error::UnknownAction {
            name: request.name.clone(),
        })?;
        host.call_sync(request, &mut TxDomain { ctx: self })
    }

    fn asc(&mut self, name: &Value, args: &Value, opts: &Value) -> Result<Value> {
        let mut request = self.call_request(name, args, opts)?;
        let host = self.host().ok_or_else(|| Error::UnknownAction {
            name: request.name.clone(),
        })?;
        let temp = self
            .engine
            .sessions
            .create(self.txn.session.as_deref(), true);
        request.session = Some(temp.clone());
        match host.call_async(request) {
            Ok(id) => Ok(Value::Int(id as i64)),
            Err(e) => {
                self.engine.sessions.close_temp(&temp);
                Err(e)
            }
        }
    }
}

/// Domain of a sync call: sub-commands join the caller's transaction.
struct TxDomain<'c, 'a> {
    ctx: &'c mut TxContext<'a>,
}

impl Domain for TxDomain<'_, '_> {
    fn execute(&mut self, cmd: Command) -> Result<Value> {
        self.ctx.execute(&cmd)
    }

    fn observe(&mut self, _event_type: &str, _key: &str) -> Result<()> {
        Err(Error::invalid_argument(
            "event observation is only available to async calls",
        ))
    }

    fn unobserve(&mut self, _event_type: &str, _key: &str) -> Result<()> {
        Err(Error::invalid_argument(
            "event observation is only available to async calls",
        ))
    }

    fn session_id(&self) -> Option<&str> {
        self.ctx.txn.session.as_deref()
    }
}
