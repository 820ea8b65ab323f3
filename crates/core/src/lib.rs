//! Core types for modelbus
//!
//! This crate defines the data model shared by every other crate:
//! - Value: universal argument and result type, including object handles
//! - Query: segment pipelines resolved by the evaluator
//! - Command: the closed set of protocol commands
//! - CmdResult: per-command outcome, nested for compounds
//! - Change: reversible mutation records kept in the change log
//! - Event: notifications and per-session subscriptions
//! - Call types: status machine and call options
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod call;
pub mod change;
pub mod command;
pub mod error;
pub mod event;
pub mod query;
pub mod result;
pub mod value;

pub use call::{CallOptions, CallStatus, CallType};
pub use change::{Change, ChangeKind, Prior};
pub use command::{Command, CommandKind, Compound};
pub use error::{Error, ErrorCategory, Result};
pub use event::{Event, EventType, Subscriptions, WILDCARD};
pub use query::{ArithOp, CompareOp, Query, Segment, SegmentKind, SetOp};
pub use result::{CmdResult, ResultStatus, ResultValue};
pub use value::{ObjId, Value};
