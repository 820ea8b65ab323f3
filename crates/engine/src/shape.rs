//! Argument broadcasting for mutating commands
//!
//! SET, ADD and REM take a target, a feature and a value, each of which may
//! be a single value or a list. Every argument is classified once into a
//! [`Shape`] and the triple of shapes selects how the arguments expand into
//! element-wise operations. Any combination not listed below is rejected with
//! an error naming the offending argument.
//!
//! | target | feature | SET value | ADD/REM value |
//! |--------|---------|-----------|---------------|
//! | one | one | anything | one, or list (each element) |
//! | one | list(f) | one, or list(f) | one, or list(f) of lists |
//! | list(t) | one | one, or list(t) | one, or list(t) of lists |
//! | list(t) | list(f) | one, list(f), or list(t) of list(f) | one, list(f), list(t) of list(f), or list(t) of list(f) of lists |

use modelbus_core::{Error, Result, Value};

/// Cardinality of an evaluated argument.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape<'a> {
    /// Not a list
    Scalar(&'a Value),
    /// List with no list elements (possibly empty)
    List(&'a [Value]),
    /// Non-empty list whose elements are all lists
    ListOfLists(&'a [Value]),
}

impl<'a> Shape<'a> {
    /// Classify a value.
    pub fn of(v: &'a Value) -> Shape<'a> {
        match v {
            Value::List(items) if !items.is_empty() && items.iter().all(Value::is_list) => {
                Shape::ListOfLists(items)
            }
            Value::List(items) => Shape::List(items),
            other => Shape::Scalar(other),
        }
    }

    fn flat_len(&self) -> Option<usize> {
        match self {
            Shape::List(items) => Some(items.len()),
            _ => None,
        }
    }
}

/// One element-wise operation produced by broadcasting.
#[derive(Debug, Clone, PartialEq)]
pub struct Op {
    /// Object to mutate
    pub target: Value,
    /// Feature name or handle
    pub feature: Value,
    /// Value to write, add or remove
    pub value: Value,
}

fn op(target: &Value, feature: &Value, value: &Value) -> Op {
    Op {
        target: target.clone(),
        feature: feature.clone(),
        value: value.clone(),
    }
}

/// Target and feature must each be a single value or a flat list.
fn operands<'a>(command: &str, target: &'a Value, feature: &'a Value) -> Result<(Shape<'a>, Shape<'a>)> {
    let t = Shape::of(target);
    let f = Shape::of(feature);
    if let Shape::ListOfLists(_) = t {
        return Err(Error::shape(
            command,
            "target",
            "must be a single object or a list of objects",
        ));
    }
    if let Shape::ListOfLists(_) = f {
        return Err(Error::shape(
            command,
            "feature",
            "must be a single feature or a list of features",
        ));
    }
    Ok((t, f))
}

fn value_error(command: &str, expected: String) -> Error {
    Error::shape(command, "value", format!("must be {}", expected))
}

/// Items of a list of `len` lists, or `None` when `v` has another shape.
fn nested(v: &Value, len: usize) -> Option<&[Value]> {
    match v.as_list() {
        Some(items) if items.len() == len && items.iter().all(Value::is_list) => Some(items),
        _ => None,
    }
}

/// Expand SET arguments.
pub fn expand_set(target: &Value, feature: &Value, value: &Value) -> Result<Vec<Op>> {
    const CMD: &str = "SET";
    let (t, f) = operands(CMD, target, feature)?;
    let v = Shape::of(value);
    let mut ops = Vec::new();
    match (t, f) {
        (Shape::Scalar(t), Shape::Scalar(f)) => ops.push(op(t, f, value)),
        (Shape::Scalar(t), Shape::List(fs)) => match v {
            Shape::Scalar(v) => ops.extend(fs.iter().map(|f| op(t, f, v))),
            Shape::List(vs) if vs.len() == fs.len() => {
                ops.extend(fs.iter().zip(vs).map(|(f, v)| op(t, f, v)))
            }
            _ => {
                return Err(value_error(
                    CMD,
                    format!("a single value or a list of {} values", fs.len()),
                ))
            }
        },
        (Shape::List(ts), Shape::Scalar(f)) => match v {
            Shape::Scalar(v) => ops.extend(ts.iter().map(|t| op(t, f, v))),
            Shape::List(vs) if vs.len() == ts.len() => {
                ops.extend(ts.iter().zip(vs).map(|(t, v)| op(t, f, v)))
            }
            _ => {
                return Err(value_error(
                    CMD,
                    format!("a single value or a list of {} values", ts.len()),
                ))
            }
        },
        (Shape::List(ts), Shape::List(fs)) => match v {
            Shape::Scalar(v) => {
                for t in ts {
                    ops.extend(fs.iter().map(|f| op(t, f, v)));
                }
            }
            Shape::List(vs) if vs.len() == fs.len() => {
                for t in ts {
                    ops.extend(fs.iter().zip(vs).map(|(f, v)| op(t, f, v)));
                }
            }
            _ => match nested(value, ts.len()) {
                Some(rows) => {
                    for (j, (t, row)) in ts.iter().zip(rows).enumerate() {
                        match Shape::of(row) {
                            Shape::List(vs) if vs.len() == fs.len() => {
                                ops.extend(fs.iter().zip(vs).map(|(f, v)| op(t, f, v)))
                            }
                            _ => {
                                return Err(value_error(
                                    CMD,
                                    format!("a list of {} values for target {}", fs.len(), j),
                                ))
                            }
                        }
                    }
                }
                None => {
                    return Err(value_error(
                        CMD,
                        format!(
                            "a single value, a list of {} values or a list of {} lists",
                            fs.len(),
                            ts.len()
                        ),
                    ))
                }
            },
        },
        _ => return Err(Error::internal("unclassified SET operands")),
    }
    Ok(ops)
}

/// Expand ADD or REM arguments. `command` names the command in errors.
pub fn expand_add_rem(
    command: &str,
    target: &Value,
    feature: &Value,
    value: &Value,
) -> Result<Vec<Op>> {
    let (t, f) = operands(command, target, feature)?;
    let mut ops = Vec::new();
    let each = |ops: &mut Vec<Op>, t: &Value, f: &Value, values: &Value| match values {
        Value::List(vs) => ops.extend(vs.iter().map(|v| op(t, f, v))),
        v => ops.push(op(t, f, v)),
    };
    match (t, f) {
        (Shape::Scalar(t), Shape::Scalar(f)) => each(&mut ops, t, f, value),
        (Shape::Scalar(t), Shape::List(fs)) => match (value, nested(value, fs.len())) {
            (v, _) if !v.is_list() => ops.extend(fs.iter().map(|f| op(t, f, v))),
            (_, Some(rows)) => {
                for (f, row) in fs.iter().zip(rows) {
                    each(&mut ops, t, f, row);
                }
            }
            _ => {
                return Err(value_error(
                    command,
                    format!("a single value or a list of {} lists", fs.len()),
                ))
            }
        },
        (Shape::List(ts), Shape::Scalar(f)) => match (value, nested(value, ts.len())) {
            (v, _) if !v.is_list() => ops.extend(ts.iter().map(|t| op(t, f, v))),
            (_, Some(rows)) => {
                for (t, row) in ts.iter().zip(rows) {
                    each(&mut ops, t, f, row);
                }
            }
            _ => {
                return Err(value_error(
                    command,
                    format!("a single value or a list of {} lists", ts.len()),
                ))
            }
        },
        (Shape::List(ts), Shape::List(fs)) => {
            let v = Shape::of(value);
            if let Shape::Scalar(v) = v {
                for t in ts {
                    ops.extend(fs.iter().map(|f| op(t, f, v)));
                }
            } else if v.flat_len() == Some(fs.len()) {
                let vs = value.as_list().unwrap_or_default();
                for t in ts {
                    ops.extend(fs.iter().zip(vs).map(|(f, v)| op(t, f, v)));
                }
            } else if let Some(rows) = nested(value, ts.len()) {
                for (j, (t, row)) in ts.iter().zip(rows).enumerate() {
                    match Shape::of(row) {
                        Shape::List(vs) if vs.len() == fs.len() => {
                            ops.extend(fs.iter().zip(vs).map(|(f, v)| op(t, f, v)))
                        }
                        Shape::ListOfLists(cells) if cells.len() == fs.len() => {
                            for (f, cell) in fs.iter().zip(cells) {
                                each(&mut ops, t, f, cell);
                            }
                        }
                        _ => {
                            return Err(value_error(
                                command,
                                format!(
                                    "a list of {} values or {} lists for target {}",
                                    fs.len(),
                                    fs.len(),
                                    j
                                ),
                            ))
                        }
                    }
                }
            } else {
                return Err(value_error(
                    command,
                    format!(
                        "a single value, a list of {} values or a list of {} lists",
                        fs.len(),
                        ts.len()
                    ),
                ));
            }
        }
        _ => return Err(Error::internal("unclassified operands")),
    }
    Ok(ops)
}

/// Pair each target with its argument for MOV and CLO: a single target takes
/// a single argument, a list of targets takes one argument or one per target.
pub fn pair_targets(
    command: &str,
    argument: &str,
    target: &Value,
    arg: &Value,
) -> Result<Vec<(Value, Value)>> {
    match (Shape::of(target), Shape::of(arg)) {
        (Shape::Scalar(t), Shape::Scalar(a)) => Ok(vec![(t.clone(), a.clone())]),
        (Shape::Scalar(_), _) => Err(Error::shape(
            command,
            argument,
            "must be a single value for a single target",
        )),
        (Shape::List(ts), Shape::Scalar(a)) => {
            Ok(ts.iter().map(|t| (t.clone(), a.clone())).collect())
        }
        (Shape::List(ts), Shape::List(args)) if args.len() == ts.len() => Ok(ts
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect()),
        (Shape::List(ts), _) => Err(Error::shape(
            command,
            argument,
            format!("must be a single value or a list of {} values", ts.len()),
        )),
        (Shape::ListOfLists(_), _) => Err(Error::shape(
            command,
            "target",
            "must be a single object or a list of objects",
        )),
    }
}
