//! Error types for modelbus
//!
//! All failures surfaced by the codec, the transaction engine and the call
//! manager are represented by the [`Error`] enum. Variants are grouped by
//! [`ErrorCategory`]:
//!
//! | Category | Variants | Raised when |
//! |----------|----------|-------------|
//! | Parse | `Parse` | Wire text is malformed |
//! | Domain | `UnknownCommand`, `Arity`, `Shape`, `UnknownSession`, ... | A well-formed request names something that does not exist or has the wrong shape |
//! | Execution | `Mdb`, `Eval`, `Action`, `Aborted` | The accessor, evaluator or an action failed |
//! | Timeout | `Timeout` | An async call exceeded its budget |
//! | System | `Config`, `Internal` | Infrastructure problems |

use serde::{Deserialize, Serialize};

/// Result type alias for modelbus operations
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Malformed wire text
    Parse,
    /// Unknown names, arity or shape mismatches, invalid state transitions
    Domain,
    /// Failures raised by the MDB accessor, the evaluator or an action
    Execution,
    /// Async call budget exceeded
    Timeout,
    /// Configuration and internal invariant failures
    System,
}

/// Errors produced while decoding, executing or hosting commands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
pub enum Error {
    // ==================== Parse ====================
    /// Malformed wire text. `reason` carries a bounded context window.
    #[error("parse error: {reason}")]
    Parse { reason: String },

    // ==================== Domain ====================
    /// Unknown command mnemonic
    #[error("unknown command: {name}")]
    UnknownCommand { name: String },

    /// Unknown query segment or meta operation
    #[error("unknown segment: {name}")]
    UnknownSegment { name: String },

    /// Wrong number of arguments for a command
    #[error("{command} expects {expected} arguments, got {actual}")]
    Arity {
        command: String,
        expected: String,
        actual: usize,
    },

    /// Argument cardinality does not match any broadcasting rule
    #[error("error in {command}: {argument} {reason}")]
    Shape {
        command: String,
        argument: String,
        reason: String,
    },

    /// Argument has an unusable type or value
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// Session id is not registered
    #[error("unknown session: {session}")]
    UnknownSession { session: String },

    /// Command requires a bound session
    #[error("must specify session before {operation}")]
    NoSession { operation: String },

    /// Event type is not one of the known types or `*`
    #[error("unknown event type: {event_type}")]
    UnknownEventType { event_type: String },

    /// Action name is not registered
    #[error("unknown action: {name}")]
    UnknownAction { name: String },

    /// Call option name is not recognized
    #[error("unknown call option: {option}")]
    UnknownCallOption { option: String },

    /// Call id is not registered
    #[error("unknown call: {call_id}")]
    UnknownCall { call_id: u64 },

    /// Operation not legal in the call's current state
    #[error("call {call_id}: {reason}")]
    InvalidCallState { call_id: u64, reason: String },

    // ==================== Execution ====================
    /// The MDB accessor rejected an operation
    #[error("mdb error: {reason}")]
    Mdb { reason: String },

    /// Query evaluation failed
    #[error("evaluation error: {reason}")]
    Eval { reason: String },

    /// An action raised an error
    #[error("action {name} failed: {reason}")]
    Action { name: String, reason: String },

    /// Sub-command issued after the call was aborted
    #[error("call {call_id} was aborted")]
    Aborted { call_id: u64 },

    // ==================== Timeout ====================
    /// Async call exceeded its wall-clock budget
    #[error("call {call_id} timed out after {seconds} s")]
    Timeout { call_id: u64, seconds: f64 },

    // ==================== System ====================
    /// Configuration could not be read, parsed or validated
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// Internal error (bug or invariant violation)
    #[error("internal error: {reason}")]
    Internal { reason: String },
}

impl Error {
    /// Returns the category this error belongs to.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Parse { .. } => ErrorCategory::Parse,
            Error::UnknownCommand { .. }
            | Error::UnknownSegment { .. }
            | Error::Arity { .. }
            | Error::Shape { .. }
            | Error::InvalidArgument { .. }
            | Error::UnknownSession { .. }
            | Error::NoSession { .. }
            | Error::UnknownEventType { .. }
            | Error::UnknownAction { .. }
            | Error::UnknownCallOption { .. }
            | Error::UnknownCall { .. }
            | Error::InvalidCallState { .. } => ErrorCategory::Domain,
            Error::Mdb { .. } | Error::Eval { .. } | Error::Action { .. } | Error::Aborted { .. } => {
                ErrorCategory::Execution
            }
            Error::Timeout { .. } => ErrorCategory::Timeout,
            Error::Config { .. } | Error::Internal { .. } => ErrorCategory::System,
        }
    }

    /// Shorthand for [`Error::Parse`].
    pub fn parse(reason: impl Into<String>) -> Self {
        Error::Parse {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::Mdb`].
    pub fn mdb(reason: impl Into<String>) -> Self {
        Error::Mdb {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::Eval`].
    pub fn eval(reason: impl Into<String>) -> Self {
        Error::Eval {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::InvalidArgument`].
    pub fn invalid_argument(reason: impl Into<String>) -> Self {
        Error::InvalidArgument {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::Shape`].
    pub fn shape(
        command: impl Into<String>,
        argument: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Error::Shape {
            command: command.into(),
            argument: argument.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for [`Error::Internal`].
    pub fn internal(reason: impl Into<String>) -> Self {
        Error::Internal {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_parse() {
        let err = Error::parse("unexpected stopping symbol )");
        let msg = err.to_string();
        assert!(msg.contains("parse error"));
        assert!(msg.contains("stopping symbol"));
    }

    #[test]
    fn test_error_display_arity() {
        let err = Error::Arity {
            command: "SET".into(),
            expected: "3".into(),
            actual: 2,
        };
        assert_eq!(err.to_string(), "SET expects 3 arguments, got 2");
    }

    #[test]
    fn test_error_display_shape_names_argument() {
        let err = Error::shape("set", "value", "must be a single value or a list of len 2");
        let msg = err.to_string();
        assert!(msg.contains("set"));
        assert!(msg.contains("value"));
    }

    #[test]
    fn test_error_categories() {
        assert_eq!(Error::parse("x").category(), ErrorCategory::Parse);
        assert_eq!(
            Error::UnknownSession {
                session: "s".into()
            }
            .category(),
            ErrorCategory::Domain
        );
        assert_eq!(
            Error::UnknownCallOption {
                option: "fast".into()
            }
            .category(),
            ErrorCategory::Domain
        );
        assert_eq!(Error::mdb("boom").category(), ErrorCategory::Execution);
        assert_eq!(
            Error::Timeout {
                call_id: 1,
                seconds: 0.5
            }
            .category(),
            ErrorCategory::Timeout
        );
        assert_eq!(Error::internal("bug").category(), ErrorCategory::System);
    }

    #[test]
    fn test_error_serde_roundtrip() {
        let err = Error::UnknownCall { call_id: 7 };
        let json = serde_json::to_string(&err).unwrap();
        let back: Error = serde_json::from_str(&json).unwrap();
        assert_eq!(err, back);
    }
}
