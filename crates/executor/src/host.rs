//! Action host
//!
//! [`ExecutorHost`] is the engine's [`ActionHost`]: it resolves actions in
//! the [`ActionRegistry`], tracks each invocation in the [`CallManager`] and
//! runs async calls on worker threads.

use std::sync::{Arc, Weak};

use tracing::{info, warn};

use modelbus_core::{CallType, Command, Error, Event, Result, Value};
use modelbus_engine::{ActionHost, CallRequest, CallsConfig, Domain, Engine};

use crate::action::ActionRegistry;
use crate::manager::CallManager;
use crate::worker::{self, AsyncJob};

/// Runs registered actions on behalf of the engine.
#[derive(Debug)]
pub struct ExecutorHost {
    registry: Arc<ActionRegistry>,
    manager: Arc<CallManager>,
    engine: Weak<Engine>,
    config: CallsConfig,
}

impl ExecutorHost {
    /// Host serving `registry` for `engine`.
    pub fn new(registry: Arc<ActionRegistry>, engine: Weak<Engine>, config: CallsConfig) -> Self {
        let manager = Arc::new(CallManager::new(engine.clone()));
        Self {
            registry,
            manager,
            engine,
            config,
        }
    }

    /// Registered actions.
    pub fn registry(&self) -> &Arc<ActionRegistry> {
        &self.registry
    }

    /// Call records.
    pub fn manager(&self) -> &Arc<CallManager> {
        &self.manager
    }
}

/// Domain of a sync call: sub-commands go to the caller's domain, output is
/// recorded on the call as it is written.
struct SyncCallDomain<'a> {
    call_id: u64,
    inner: &'a mut dyn Domain,
    manager: &'a CallManager,
}

impl Domain for SyncCallDomain<'_> {
    fn execute(&mut self, cmd: Command) -> Result<Value> {
        self.inner.execute(cmd)
    }

    fn observe(&mut self, event_type: &str, key: &str) -> Result<()> {
        self.inner.observe(event_type, key)
    }

    fn unobserve(&mut self, event_type: &str, key: &str) -> Result<()> {
        self.inner.unobserve(event_type, key)
    }

    fn output(&mut self, channel: &str, text: &str) {
        let channel = if channel.is_empty() {
            crate::manager::STDOUT
        } else {
            channel
        };
        if let Err(e) = self.manager.add_output(self.call_id, channel, text) {
            warn!(target: "modelbus::calls", call_id = self.call_id, error = %e, "Output dropped");
        }
    }

    fn events(&mut self) -> Vec<Event> {
        self.inner.events()
    }

    fn session_id(&self) -> Option<&str> {
        self.inner.session_id()
    }
}

impl ActionHost for ExecutorHost {
    fn list_actions(&self) -> Vec<Value> {
        self.registry.descriptors()
    }

    fn call_sync(&self, request: CallRequest, domain: &mut dyn Domain) -> Result<Value> {
        let action = self.registry.get(&request.name)?;
        if request.opts.timeout > 0.0 {
            warn!(
                target: "modelbus::calls",
                action = %request.name,
                timeout = request.opts.timeout,
                "Timeout ignored for sync call"
            );
        }
        let call_id = self.manager.create(&request, CallType::Syn);
        self.manager.start(call_id)?;
        info!(target: "modelbus::calls", call_id, action = %request.name, "Sync call started");

        let result = {
            let mut scoped = SyncCallDomain {
                call_id,
                inner: domain,
                manager: &self.manager,
            };
            action.entry.invoke(&mut scoped, &request.args)
        };
        let outcome = match &result {
            Ok(value) => Ok(value.clone()),
            Err(e) => Err(e.to_string()),
        };
        self.manager.finish(call_id, outcome)?;
        result
    }

    fn call_async(&self, request: CallRequest) -> Result<u64> {
        let action = self.registry.get(&request.name)?;
        let engine = self
            .engine
            .upgrade()
            .ok_or_else(|| Error::internal("engine is gone"))?;
        let session = request
            .session
            .clone()
            .ok_or_else(|| Error::internal("async call without a session"))?;
        let call_id = self.manager.create(&request, CallType::Asy);
        info!(target: "modelbus::calls", call_id, action = %request.name, "Async call scheduled");
        let job = AsyncJob {
            call_id,
            name: request.name,
            args: request.args,
            session,
            timeout_secs: request.opts.timeout,
            entry: action.entry,
            engine,
            manager: self.manager.clone(),
            config: self.config.clone(),
        };
        if let Err(e) = worker::spawn(job) {
            self.manager.finish(call_id, Err(e.to_string()))?;
            return Err(e);
        }
        Ok(call_id)
    }

    fn abort_call(&self, call_id: u64) -> Result<bool> {
        self.manager.abort(call_id)
    }

    fn call_status(&self, call_id: u64) -> Result<Value> {
        self.manager.status_value(call_id)
    }
}
