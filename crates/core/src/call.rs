//! Action call types
//!
//! Status machine, call flavor and the options a client may pass with CAL/ASC.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::value::Value;

/// Lifecycle status of a call.
///
/// `INI -> RUN -> {WAI <-> RUN} -> {FIN | ERR | ABO}`. Terminal states are
/// never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallStatus {
    /// Registered, not started
    Ini,
    /// Running
    Run,
    /// Waiting
    Wai,
    /// Aborted
    Abo,
    /// Failed
    Err,
    /// Finished
    Fin,
}

impl CallStatus {
    /// Three-letter wire name.
    pub fn name(self) -> &'static str {
        match self {
            CallStatus::Ini => "INI",
            CallStatus::Run => "RUN",
            CallStatus::Wai => "WAI",
            CallStatus::Abo => "ABO",
            CallStatus::Err => "ERR",
            CallStatus::Fin => "FIN",
        }
    }

    /// Whether this status is final.
    pub fn is_terminal(self) -> bool {
        matches!(self, CallStatus::Abo | CallStatus::Err | CallStatus::Fin)
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Synchronous or asynchronous execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallType {
    /// Runs inside the caller's transaction
    Syn,
    /// Runs in an isolated worker
    Asy,
}

/// Options accepted by CAL and ASC.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CallOptions {
    /// Do not capture output at all
    pub silent: bool,
    /// Emit OUP events but do not store output on the call
    pub eventsonly: bool,
    /// Wall-clock budget in seconds; `0` means none
    pub timeout: f64,
    /// Subscribe the invoking session to the call's events while it runs
    pub autoobserve: bool,
}

impl CallOptions {
    /// Parse options from a list of `(name, value)` pairs.
    ///
    /// Unknown names are [`Error::UnknownCallOption`].
    pub fn from_value(opts: &Value) -> Result<Self> {
        let mut out = CallOptions::default();
        let items = match opts {
            Value::Null => return Ok(out),
            Value::List(items) => items,
            other => {
                return Err(Error::invalid_argument(format!(
                    "call options must be a list of (name,value) pairs, got {}",
                    other.type_name()
                )))
            }
        };
        for item in items {
            let pair = item.as_list().unwrap_or_default();
            let (name, value) = match pair {
                [Value::Str(name), value] => (name.as_str(), value),
                _ => {
                    return Err(Error::invalid_argument(
                        "call option must be a (name,value) pair",
                    ))
                }
            };
            match name {
                "silent" => out.silent = value.is_truthy(),
                "eventsonly" => out.eventsonly = value.is_truthy(),
                "autoobserve" => out.autoobserve = value.is_truthy(),
                "timeout" => {
                    out.timeout = value.as_number().ok_or_else(|| {
                        Error::invalid_argument("timeout must be a number of seconds")
                    })?
                }
                other => {
                    return Err(Error::UnknownCallOption {
                        option: other.to_string(),
                    })
                }
            }
        }
        Ok(out)
    }

    /// Inverse of [`CallOptions::from_value`].
    pub fn to_value(&self) -> Value {
        Value::List(vec![
            Value::List(vec!["silent".into(), self.silent.into()]),
            Value::List(vec!["eventsonly".into(), self.eventsonly.into()]),
            Value::List(vec!["timeout".into(), self.timeout.into()]),
            Value::List(vec!["autoobserve".into(), self.autoobserve.into()]),
        ])
    }
}
