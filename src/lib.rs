//! modelbus - transactional command protocol over in-memory model databases
//!
//! Clients send text-encoded command programs that run as transactions against
//! a model database (MDB). Mutations are recorded so a failed transaction can
//! be rolled back and committed ones can be queried as changes. Named actions
//! run synchronously inside the caller's transaction or asynchronously on a
//! worker thread.
//!
//! # Quick Start
//!
//! ```ignore
//! use modelbus::{InMemoryMdb, Runtime, RuntimeConfig};
//!
//! let runtime = Runtime::new(Box::new(InMemoryMdb::new()), RuntimeConfig::default())?;
//!
//! let result = runtime.exec_text("GET #17/name", None)?;
//! assert!(result.is_ok());
//! ```
//!
//! # Architecture
//!
//! | Crate | Role |
//! |-------|------|
//! | `modelbus-core` | Values, queries, commands, results, changes, events, errors |
//! | `modelbus-wire` | Text codec |
//! | `modelbus-engine` | Transactions, change log, sessions, evaluator, reference MDB |
//! | `modelbus-executor` | Action registry, call manager, async workers |
//!
//! A [`Runtime`] owns one instance of each registry; there is no global state.

#![warn(missing_docs)]
#![warn(clippy::all)]

use std::path::Path;
use std::sync::Arc;

use tracing::info;

pub use modelbus_core::{
    CallOptions, CallStatus, CallType, Change, ChangeKind, CmdResult, Command, CommandKind, Error,
    ErrorCategory, Event, EventType, ObjId, Query, Result, ResultStatus, ResultValue, Segment,
    SegmentKind, Value, WILDCARD,
};
pub use modelbus_engine::{
    ActionHost, CallRequest, Callback, CallsConfig, Domain, Engine, FeatureKind, InMemoryMdb,
    MdbAccessor, ObserverId, QueryEvaluator, RuntimeConfig, CONFIG_FILE_NAME,
};
pub use modelbus_executor::{
    native, ActionEntry, ActionManifest, ActionRegistry, Call, CallManager, ExecutorHost,
    ImportReport, ParamSpec, ScriptImporter, ScriptRunner, STDOUT,
};
pub use modelbus_wire::{des, des_each, ser, ser_value, PROTOCOL_VERSION};

/// One model database with its engine, action registry and call manager.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    engine: Arc<Engine>,
    host: Arc<ExecutorHost>,
}

impl Runtime {
    /// Runtime over `mdb`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the configuration does not validate.
    pub fn new(mdb: Box<dyn MdbAccessor>, config: RuntimeConfig) -> Result<Self> {
        config.validate()?;
        let engine = Arc::new(Engine::with_config(mdb, &config));
        let registry = Arc::new(ActionRegistry::new());
        let host = Arc::new(ExecutorHost::new(
            registry,
            Arc::downgrade(&engine),
            config.calls.clone(),
        ));
        engine.install_host(host.clone());
        info!(
            target: "modelbus::txn",
            max_changes = config.max_changes,
            "Runtime ready"
        );
        Ok(Self {
            config,
            engine,
            host,
        })
    }

    /// Runtime configured from a `modelbus.toml` file.
    pub fn from_config_file(mdb: Box<dyn MdbAccessor>, path: &Path) -> Result<Self> {
        Self::new(mdb, RuntimeConfig::from_file(path)?)
    }

    /// Configuration the runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Transaction engine.
    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    /// Registered actions.
    pub fn actions(&self) -> &Arc<ActionRegistry> {
        self.host.registry()
    }

    /// Call records.
    pub fn calls(&self) -> &Arc<CallManager> {
        self.host.manager()
    }

    /// Register a native action.
    pub fn register_action(&self, manifest: ActionManifest, entry: Arc<dyn ActionEntry>) -> Result<()> {
        self.actions().register(manifest, entry)
    }

    /// Import annotated scripts from `actions_dir`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if no `actions_dir` is configured.
    pub fn import_actions(&self, runner: Arc<dyn ScriptRunner>) -> Result<ImportReport> {
        let dir = self.config.actions_dir.as_deref().ok_or_else(|| Error::Config {
            reason: "actions_dir is not configured".to_string(),
        })?;
        Ok(self.import_actions_from(dir, runner))
    }

    /// Import annotated scripts from `dir`.
    pub fn import_actions_from(&self, dir: &Path, runner: Arc<dyn ScriptRunner>) -> ImportReport {
        ScriptImporter::new(dir, runner).import_into(self.actions())
    }

    /// Open a permanent session.
    pub fn open_session(&self) -> String {
        self.engine.create_session(None, false)
    }

    /// Register an event observer, optionally scoped to a session.
    pub fn subscribe(&self, session: Option<&str>, callback: Callback) -> ObserverId {
        self.engine.subscribe(session.map(str::to_string), callback)
    }

    /// Remove an event observer.
    pub fn unsubscribe(&self, id: ObserverId) -> bool {
        self.engine.unsubscribe(id)
    }

    /// Execute a command as one transaction.
    pub fn exec(&self, cmd: &Command, session: Option<&str>) -> CmdResult {
        self.engine.exec(cmd, session)
    }

    /// Decode and execute a text program.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Parse`] if the program does not decode. Execution
    /// errors are reported in the returned result.
    pub fn exec_text(&self, text: &str, session: Option<&str>) -> Result<CmdResult> {
        let cmd = des(text)?;
        Ok(self.exec(&cmd, session))
    }

    /// Decode and execute a text program, returning the result as JSON.
    pub fn exec_json(&self, text: &str, session: Option<&str>) -> Result<String> {
        let result = self.exec_text(text, session)?;
        serde_json::to_string(&result).map_err(|e| Error::internal(format!("cannot encode result: {e}")))
    }

    /// Text encoding of a result's value.
    pub fn encode_value(result: &CmdResult) -> String {
        ser_value(&result.to_value())
    }
}
