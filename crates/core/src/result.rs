//! Command results
//!
//! Every executed command produces a [`CmdResult`]. A compound command
//! produces one result whose value is the ordered list of sub-results, so a
//! client can see how far the compound got even though one failure aborts the
//! whole transaction.

use serde::{Deserialize, Serialize};

use crate::command::CommandKind;
use crate::value::Value;

/// Outcome of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultStatus {
    /// Success
    Oky,
    /// Failure
    Err,
}

impl ResultStatus {
    /// Three-letter wire name.
    pub fn name(self) -> &'static str {
        match self {
            ResultStatus::Oky => "OKY",
            ResultStatus::Err => "ERR",
        }
    }
}

/// Payload of a [`CmdResult`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultValue {
    /// Value returned by a successful command
    Value(Value),
    /// Human-readable error message
    Message(String),
    /// Sub-results of a compound command, in execution order
    Compound(Vec<CmdResult>),
}

/// Result of executing one command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CmdResult {
    /// Kind of the command that produced this result
    pub kind: CommandKind,
    /// Success or failure
    pub status: ResultStatus,
    /// Payload
    pub value: ResultValue,
    /// Transaction that executed the command
    pub transaction_id: u64,
    /// Change id at the time of the result (-1 when no change was ever recorded)
    pub change_id: i64,
}

impl CmdResult {
    /// Successful result carrying a value.
    pub fn ok(kind: CommandKind, value: Value, transaction_id: u64, change_id: i64) -> Self {
        Self {
            kind,
            status: ResultStatus::Oky,
            value: ResultValue::Value(value),
            transaction_id,
            change_id,
        }
    }

    /// Failed result carrying a message.
    pub fn err(
        kind: CommandKind,
        message: impl Into<String>,
        transaction_id: u64,
        change_id: i64,
    ) -> Self {
        Self {
            kind,
            status: ResultStatus::Err,
            value: ResultValue::Message(message.into()),
            transaction_id,
            change_id,
        }
    }

    /// Compound result. The status is ERR if any sub-result failed.
    pub fn compound(results: Vec<CmdResult>, transaction_id: u64, change_id: i64) -> Self {
        let status = if results.iter().all(CmdResult::is_ok) {
            ResultStatus::Oky
        } else {
            ResultStatus::Err
        };
        Self {
            kind: CommandKind::Cmp,
            status,
            value: ResultValue::Compound(results),
            transaction_id,
            change_id,
        }
    }

    /// Whether the command succeeded.
    pub fn is_ok(&self) -> bool {
        self.status == ResultStatus::Oky
    }

    /// The returned value, if this is a successful non-compound result.
    pub fn value(&self) -> Option<&Value> {
        match &self.value {
            ResultValue::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The error message, if this result failed.
    ///
    /// For a failed compound this is the message of the failing sub-result.
    pub fn error_message(&self) -> Option<&str> {
        match &self.value {
            ResultValue::Message(m) => Some(m),
            ResultValue::Compound(subs) => subs.iter().find_map(CmdResult::error_message),
            ResultValue::Value(_) => None,
        }
    }

    /// The payload as a plain value: compound results become a list of their
    /// sub-values, messages become strings.
    pub fn to_value(&self) -> Value {
        match &self.value {
            ResultValue::Value(v) => v.clone(),
            ResultValue::Message(m) => Value::Str(m.clone()),
            ResultValue::Compound(subs) => Value::List(subs.iter().map(CmdResult::to_value).collect()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compound_status_reflects_failure() {
        let ok = CmdResult::ok(CommandKind::Get, Value::Int(1), 1, -1);
        let bad = CmdResult::err(CommandKind::Set, "boom", 1, -1);
        let cmp = CmdResult::compound(vec![ok.clone(), bad], 1, -1);
        assert!(!cmp.is_ok());
        assert_eq!(cmp.error_message(), Some("boom"));

        let cmp = CmdResult::compound(vec![ok], 1, -1);
        assert!(cmp.is_ok());
        assert_eq!(cmp.to_value(), Value::List(vec![Value::Int(1)]));
    }

    #[test]
    fn test_result_json_roundtrip() {
        let res = CmdResult::ok(CommandKind::Sts, Value::Int(-1), 4, -1);
        let json = serde_json::to_string(&res).unwrap();
        let back: CmdResult = serde_json::from_str(&json).unwrap();
        assert_eq!(res, back);
    }
}
