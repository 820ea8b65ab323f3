//! Transaction engine for modelbus
//!
//! This crate executes commands against a model database:
//! - MdbAccessor: the seam to the model database, plus an in-memory backend
//! - Evaluator: resolves query segment pipelines
//! - Engine: one transaction per command tree, with rollback on failure
//! - ChangeLog: bounded record of committed changes
//! - Sessions and the event bus: per-client subscriptions and delivery
//! - ActionHost: the seam to the call manager
//!
//! The engine is the only component that holds the MDB lock.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod accessor;
pub mod bus;
pub mod changelog;
pub mod config;
pub mod engine;
pub mod eval;
pub mod host;
pub mod memory;
pub mod session;
pub mod shape;

pub use accessor::{CloneMode, EventSink, FeatureFilter, MdbAccessor};
pub use bus::{Callback, EventBus, ObserverId};
pub use changelog::ChangeLog;
pub use config::{CallsConfig, RuntimeConfig, CONFIG_FILE_NAME, DEFAULT_MAX_CHANGES};
pub use engine::Engine;
pub use eval::{DefaultEvaluator, QueryEvaluator};
pub use host::{ActionHost, CallRequest, Domain};
pub use memory::{FeatureKind, InMemoryMdb};
pub use session::{Session, SessionRegistry};
