//! Value types for modelbus
//!
//! [`Value`] is the single currency of the protocol: command arguments,
//! query segment arguments, evaluation results and change records are all
//! values. Two variants are specific to the object-graph domain:
//!
//! - [`Value::Obj`] is an opaque handle to an object living in the MDB. Only
//!   the accessor creates handles.
//! - [`Value::Qry`] is an unevaluated query embedded as an argument. It is
//!   resolved by the evaluator at execution time, never at construction.
//!
//! ## Type Equality
//!
//! Different types are never equal, so `Int(1) != Float(1.0)`. Float equality
//! follows IEEE-754 (`NaN != NaN`, `-0.0 == 0.0`).

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use crate::query::Query;

/// Opaque handle of an object stored in the MDB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjId(pub u64);

impl fmt::Display for ObjId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Universal value type for arguments and results.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum Value {
    /// Absent value
    #[default]
    Null,
    /// Boolean value
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit floating point (IEEE-754)
    Float(f64),
    /// UTF-8 string
    Str(String),
    /// Handle of an MDB object
    Obj(ObjId),
    /// Ordered list of values
    List(Vec<Value>),
    /// Unevaluated query
    Qry(Query),
}

// Custom PartialEq implementation for IEEE-754 float semantics
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Obj(a), Value::Obj(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Qry(a), Value::Qry(b)) => a == b,
            _ => false,
        }
    }
}

impl Value {
    /// Get the type name as a string
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::Str(_) => "Str",
            Value::Obj(_) => "Obj",
            Value::List(_) => "List",
            Value::Qry(_) => "Qry",
        }
    }

    /// Check if this is a null value
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this is a list value
    pub fn is_list(&self) -> bool {
        matches!(self, Value::List(_))
    }

    /// Check if this is an unevaluated query
    pub fn is_query(&self) -> bool {
        matches!(self, Value::Qry(_))
    }

    /// Check if this value still contains an unevaluated query anywhere
    pub fn contains_query(&self) -> bool {
        match self {
            Value::Qry(_) => true,
            Value::List(items) => items.iter().any(Value::contains_query),
            _ => false,
        }
    }

    /// Get as bool if this is a Bool value
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as i64 if this is an Int value
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as f64 if this is an Int or Float value
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as &str if this is a Str value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Get the object handle if this is an Obj value
    pub fn as_obj(&self) -> Option<ObjId> {
        match self {
            Value::Obj(id) => Some(*id),
            _ => None,
        }
    }

    /// Get as a slice if this is a List value
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    /// Get the query if this is a Qry value
    pub fn as_query(&self) -> Option<&Query> {
        match self {
            Value::Qry(q) => Some(q),
            _ => None,
        }
    }

    /// Consume into a vector: lists yield their items, scalars a single item.
    pub fn into_items(self) -> Vec<Value> {
        match self {
            Value::List(items) => items,
            other => vec![other],
        }
    }

    /// Truthiness used by selectors and the NOT segment.
    ///
    /// Null, `false`, zero, empty strings and empty lists are falsy.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::Obj(_) | Value::Qry(_) => true,
            Value::List(items) => !items.is_empty(),
        }
    }

    /// Ordering between comparable values.
    ///
    /// Numbers compare across Int and Float, strings lexically, booleans
    /// `false < true`, object handles by id. Anything else is unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Obj(a), Value::Obj(b)) => Some(a.cmp(b)),
            (Value::Null, Value::Null) => Some(Ordering::Equal),
            _ => match (self.as_number(), other.as_number()) {
                (Some(a), Some(b)) => a.partial_cmp(&b),
                _ => None,
            },
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<usize> for Value {
    fn from(i: usize) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<ObjId> for Value {
    fn from(id: ObjId) -> Self {
        Value::Obj(id)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<Query> for Value {
    fn from(q: Query) -> Self {
        Value::Qry(q)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_null() {
        assert_eq!(Value::default(), Value::Null);
    }

    #[test]
    fn test_int_never_equals_float() {
        assert_ne!(Value::Int(1), Value::Float(1.0));
    }

    #[test]
    fn test_float_ieee_equality() {
        assert_ne!(Value::Float(f64::NAN), Value::Float(f64::NAN));
        assert_eq!(Value::Float(-0.0), Value::Float(0.0));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::Obj(ObjId(3)).is_truthy());
        assert!(Value::from("x").is_truthy());
    }

    #[test]
    fn test_compare_mixed_numbers() {
        assert_eq!(
            Value::Int(2).compare(&Value::Float(2.5)),
            Some(Ordering::Less)
        );
        assert_eq!(Value::from("a").compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_into_items() {
        assert_eq!(Value::Int(1).into_items(), vec![Value::Int(1)]);
        assert_eq!(
            Value::List(vec![Value::Int(1), Value::Int(2)]).into_items().len(),
            2
        );
    }

    #[test]
    fn test_contains_query() {
        let v = Value::List(vec![Value::Int(1), Value::Qry(Query::new().obj(1))]);
        assert!(v.contains_query());
        assert!(!Value::List(vec![Value::Int(1)]).contains_query());
    }

    #[test]
    fn test_obj_display() {
        assert_eq!(ObjId(20).to_string(), "#20");
    }
}
