//! Runtime Scenario Tests
//!
//! End-to-end tests through the public `modelbus` API:
//! - Text programs decoded, executed and re-encoded
//! - Transaction atomicity and the change log
//! - Session-scoped event delivery
//! - Actions, native and imported, sync and async
//! - Configuration files

mod common;

mod actions;
mod config;
mod events;
mod protocol;
mod transactions;
