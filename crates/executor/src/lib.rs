//! # Modelbus Executor
//!
//! Actions and the calls that run them.
//!
//! - [`ActionRegistry`]: actions by name, each with an [`ActionManifest`]
//!   and an [`ActionEntry`]
//! - [`ScriptImporter`]: discovers actions from an annotated script tree
//! - [`CallManager`]: call records and their status machine
//! - [`ExecutorHost`]: the engine's action host, running sync calls inline
//!   and async calls on worker threads
//!
//! ## Quick Start
//!
//! ```text
//! use modelbus_executor::{native, ActionManifest, ActionRegistry, ExecutorHost};
//!
//! let registry = Arc::new(ActionRegistry::new());
//! registry.register(
//!     ActionManifest::new("double").param(ParamSpec::new("x", "Int")),
//!     native(|_domain, args| Ok(Value::Int(args[0].as_int().unwrap_or(0) * 2))),
//! )?;
//!
//! let host = ExecutorHost::new(registry, Arc::downgrade(&engine), CallsConfig::default());
//! engine.install_host(Arc::new(host));
//! ```
//!
//! ## Call lifecycle
//!
//! | Status | Meaning |
//! |--------|---------|
//! | **INI** | Registered, not started |
//! | **RUN** | Running |
//! | **WAI** | Waiting |
//! | **FIN** | Returned a value |
//! | **ERR** | Failed |
//! | **ABO** | Aborted |

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod action;
pub mod annotation;
pub mod call;
pub mod host;
pub mod importer;
pub mod manager;
pub mod worker;

pub use action::{
    native, ActionEntry, ActionManifest, ActionRegistry, Choice, ParamSpec, RegisteredAction,
    ScriptAction, ScriptRunner, UNBOUNDED,
};
pub use annotation::{parse_annotation, AnnotationError};
pub use call::{timestamp, Call, TIMESTAMP_FORMAT};
pub use host::ExecutorHost;
pub use importer::{parse_script, ImportError, ImportReport, ScriptImporter};
pub use manager::{CallManager, STDOUT};
pub use worker::{ServerMessage, WorkerDomain, WorkerMessage};
