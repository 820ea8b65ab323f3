//! Async call workers
//!
//! Each async call owns two threads:
//!
//! - the worker (`modelbus-worker-<id>`) runs the action against a
//!   [`WorkerDomain`];
//! - the supervisor (`modelbus-call-<id>`) serves the worker's requests, each
//!   sub-command in its own transaction bound to the call's temporary session,
//!   and enforces the timeout.
//!
//! They talk over three one-way channels:
//!
//! ```text
//! worker --WorkerMessage--> supervisor    commands, subscriptions, output, result
//! worker <--ServerMessage-- supervisor    replies
//! worker <------Event------ supervisor    events for the temporary session
//! ```
//!
//! Cancellation is cooperative. Once the abort flag is set the supervisor
//! stops serving; the worker sees [`Error::Aborted`] on its next domain call
//! and its thread is detached.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use modelbus_core::{Command, Error, Event, Result, Value};
use modelbus_engine::{CallsConfig, Domain, Engine};

use crate::action::ActionEntry;
use crate::manager::{CallManager, STDOUT};

/// Worker to supervisor.
#[derive(Debug)]
pub enum WorkerMessage {
    /// Execute a sub-command
    Execute(Command),
    /// Subscribe the temporary session
    Observe {
        /// Event type or `*`
        event_type: String,
        /// Event key or `*`
        key: String,
    },
    /// Unsubscribe the temporary session
    Unobserve {
        /// Event type or `*`
        event_type: String,
        /// Event key or `*`
        key: String,
    },
    /// A coalesced chunk of output
    Output {
        /// Output channel
        channel: String,
        /// Text
        text: String,
    },
    /// The action returned
    Finished(Result<Value>),
}

/// Supervisor to worker.
#[derive(Debug)]
pub enum ServerMessage {
    /// Reply to [`WorkerMessage::Execute`]
    Value(Result<Value>),
    /// Reply to subscription changes
    Ack(Result<()>),
}

/// Coalesces output into chunks flushed at most once per period.
#[derive(Debug)]
pub(crate) struct OutputBuffer {
    period: Duration,
    last_flush: Instant,
    pending: Vec<(String, String)>,
}

impl OutputBuffer {
    pub(crate) fn new(period: Duration) -> Self {
        Self {
            period,
            last_flush: Instant::now(),
            pending: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, channel: &str, text: &str) {
        match self.pending.last_mut() {
            Some((last, buffered)) if last == channel => buffered.push_str(text),
            _ => self.pending.push((channel.to_string(), text.to_string())),
        }
    }

    pub(crate) fn is_due(&self) -> bool {
        !self.pending.is_empty() && self.last_flush.elapsed() >= self.period
    }

    pub(crate) fn take(&mut self) -> Vec<(String, String)> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.pending)
    }
}

/// Domain handed to an async action.
pub struct WorkerDomain {
    call_id: u64,
    session: String,
    abort: Arc<AtomicBool>,
    to_server: Sender<WorkerMessage>,
    from_server: Receiver<ServerMessage>,
    events: Receiver<Event>,
    output: OutputBuffer,
}

impl WorkerDomain {
    fn check_abort(&self) -> Result<()> {
        if self.abort.load(Ordering::SeqCst) {
            return Err(Error::Aborted {
                call_id: self.call_id,
            });
        }
        Ok(())
    }

    fn send(&self, message: WorkerMessage) -> Result<()> {
        self.to_server.send(message).map_err(|_| Error::Aborted {
            call_id: self.call_id,
        })
    }

    fn reply(&self) -> Result<ServerMessage> {
        self.from_server.recv().map_err(|_| Error::Aborted {
            call_id: self.call_id,
        })
    }

    fn flush(&mut self) {
        for (channel, text) in self.output.take() {
            if self.send(WorkerMessage::Output { channel, text }).is_err() {
                break;
            }
        }
    }

    fn subscription(&mut self, message: WorkerMessage) -> Result<()> {
        self.check_abort()?;
        self.flush();
        self.send(message)?;
        match self.reply()? {
            ServerMessage::Ack(result) => result,
            ServerMessage::Value(_) => Err(Error::internal("expected an acknowledgement")),
        }
    }
}

impl Domain for WorkerDomain {
    fn execute(&mut self, cmd: Command) -> Result<Value> {
        self.check_abort()?;
        self.flush();
        self.send(WorkerMessage::Execute(cmd))?;
        match self.reply()? {
            ServerMessage::Value(result) => result,
            ServerMessage::Ack(_) => Err(Error::internal("expected a command result")),
        }
    }

    fn observe(&mut self, event_type: &str, key: &str) -> Result<()> {
        self.subscription(WorkerMessage::Observe {
            event_type: event_type.to_string(),
            key: key.to_string(),
        })
    }

    fn unobserve(&mut self, event_type: &str, key: &str) -> Result<()> {
        self.subscription(WorkerMessage::Unobserve {
            event_type: event_type.to_string(),
            key: key.to_string(),
        })
    }

    fn output(&mut self, channel: &str, text: &str) {
        let channel = if channel.is_empty() { STDOUT } else { channel };
        self.output.push(channel, text);
        if self.output.is_due() {
            self.flush();
        }
    }

    fn is_aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn events(&mut self) -> Vec<Event> {
        self.events.try_iter().collect()
    }

    fn session_id(&self) -> Option<&str> {
        Some(self.session.as_str())
    }
}

/// Everything the supervisor of one async call needs.
pub(crate) struct AsyncJob {
    pub(crate) call_id: u64,
    pub(crate) name: String,
    pub(crate) args: Vec<Value>,
    pub(crate) session: String,
    pub(crate) timeout_secs: f64,
    pub(crate) entry: Arc<dyn ActionEntry>,
    pub(crate) engine: Arc<Engine>,
    pub(crate) manager: Arc<CallManager>,
    pub(crate) config: CallsConfig,
}

/// Start the supervisor thread of an async call.
pub(crate) fn spawn(job: AsyncJob) -> Result<()> {
    let name = format!("modelbus-call-{}", job.call_id);
    thread::Builder::new()
        .name(name)
        .spawn(move || supervise(job))
        .map(|_| ())
        .map_err(|e| Error::internal(format!("cannot start call thread: {e}")))
}

fn supervise(job: AsyncJob) {
    let call_id = job.call_id;
    let abort = match job.manager.abort_flag(call_id) {
        Ok(flag) => flag,
        Err(e) => {
            warn!(target: "modelbus::calls", call_id, error = %e, "Call vanished before start");
            return;
        }
    };
    if abort.load(Ordering::SeqCst) {
        debug!(target: "modelbus::calls", call_id, "Call aborted before start");
        return;
    }
    if let Err(e) = job.manager.start(call_id) {
        warn!(target: "modelbus::calls", call_id, error = %e, "Cannot start call");
        return;
    }

    let (to_server, from_worker) = mpsc::channel::<WorkerMessage>();
    let (to_worker, from_server) = mpsc::channel::<ServerMessage>();
    let (event_tx, event_rx) = mpsc::channel::<Event>();

    let forward = Mutex::new(event_tx);
    let observer = job.engine.subscribe(
        Some(job.session.clone()),
        Arc::new(move |event: &Event| {
            // The worker may already be gone.
            let _ = forward.lock().send(event.clone());
        }),
    );

    let domain = WorkerDomain {
        call_id,
        session: job.session.clone(),
        abort: abort.clone(),
        to_server,
        from_server,
        events: event_rx,
        output: OutputBuffer::new(job.config.output_buffer()),
    };
    let entry = job.entry.clone();
    let args = job.args.clone();
    let spawned = thread::Builder::new()
        .name(format!("modelbus-worker-{call_id}"))
        .spawn(move || {
            let mut domain = domain;
            let result = entry.invoke(&mut domain, &args);
            domain.flush();
            let _ = domain.to_server.send(WorkerMessage::Finished(result));
        });
    if let Err(e) = spawned {
        job.engine.unsubscribe(observer);
        if let Err(e) = job
            .manager
            .finish(call_id, Err(format!("cannot start worker thread: {e}")))
        {
            warn!(target: "modelbus::calls", call_id, error = %e, "Cannot record worker failure");
        }
        return;
    }

    serve(&job, &abort, &from_worker, &to_worker);
    job.engine.unsubscribe(observer);
}

fn serve(
    job: &AsyncJob,
    abort: &AtomicBool,
    from_worker: &Receiver<WorkerMessage>,
    to_worker: &Sender<ServerMessage>,
) {
    let call_id = job.call_id;
    let timeout_secs = if job.timeout_secs > 0.0 {
        job.timeout_secs
    } else {
        job.config.default_timeout_secs()
    };
    let deadline = if timeout_secs > 0.0 {
        Duration::try_from_secs_f64(timeout_secs)
            .ok()
            .and_then(|budget| Instant::now().checked_add(budget))
    } else {
        None
    };
    let poll = job.config.poll_interval();

    loop {
        if abort.load(Ordering::SeqCst) {
            info!(target: "modelbus::calls", call_id, "Worker detached after abort");
            return;
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            let err = Error::Timeout {
                call_id,
                seconds: timeout_secs,
            };
            warn!(target: "modelbus::calls", call_id, error = %err, "Requesting abort");
            if let Err(e) = job.manager.abort(call_id) {
                debug!(target: "modelbus::calls", call_id, error = %e, "Abort after timeout refused");
            }
            return;
        }

        let message = match from_worker.recv_timeout(poll) {
            Ok(message) => message,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                let _ = job
                    .manager
                    .finish(call_id, Err("worker exited without a result".to_string()));
                return;
            }
        };
        if abort.load(Ordering::SeqCst) {
            continue;
        }

        match message {
            WorkerMessage::Execute(cmd) => {
                let result = job.engine.exec(&cmd, Some(&job.session));
                let reply = if result.is_ok() {
                    Ok(result.to_value())
                } else {
                    Err(Error::Action {
                        name: job.name.clone(),
                        reason: result.error_message().unwrap_or("command failed").to_string(),
                    })
                };
                let _ = to_worker.send(ServerMessage::Value(reply));
            }
            WorkerMessage::Observe { event_type, key } => {
                let ack = job.engine.observe(&job.session, &event_type, &key);
                let _ = to_worker.send(ServerMessage::Ack(ack));
            }
            WorkerMessage::Unobserve { event_type, key } => {
                let ack = job.engine.unobserve(&job.session, &event_type, &key);
                let _ = to_worker.send(ServerMessage::Ack(ack));
            }
            WorkerMessage::Output { channel, text } => {
                if let Err(e) = job.manager.add_output(call_id, &channel, &text) {
                    debug!(target: "modelbus::calls", call_id, error = %e, "Output dropped");
                }
            }
            WorkerMessage::Finished(result) => {
                if let Err(e) = job.manager.finish(call_id, result.map_err(|e| e.to_string())) {
                    warn!(target: "modelbus::calls", call_id, error = %e, "Cannot record call result");
                }
                return;
            }
        }
    }
}
