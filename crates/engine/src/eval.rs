//! Query evaluation
//!
//! A query is a pipeline: every segment maps the current context to a new
//! one, starting from the accessor root. Most segments work element-wise, so
//! a path applied to a list of objects yields the list of their values and
//! lists of lists keep their nesting.
//!
//! Segment arguments that are themselves queries are evaluated against the
//! current context, not the root. This is what makes `{/size>3}` select by a
//! property of each element.

use std::cmp::Ordering;

use parking_lot::Mutex;
use regex::Regex;
use rustc_hash::FxHashMap;

use modelbus_core::{ArithOp, CompareOp, Error, ObjId, Result, Segment, SetOp, Value};

use crate::accessor::{FeatureFilter, MdbAccessor};

/// Resolves query values against a model database.
pub trait QueryEvaluator: Send + Sync {
    /// Evaluate `value`: queries run from the root, lists are evaluated
    /// item-wise, anything else is returned as is.
    ///
    /// `history` holds the results of the commands already executed in the
    /// current transaction.
    fn eval(&self, mdb: &dyn MdbAccessor, value: &Value, history: &[Value]) -> Result<Value>;
}

/// Evaluator implementing every segment kind and meta operation.
#[derive(Debug, Default)]
pub struct DefaultEvaluator {
    patterns: Mutex<FxHashMap<String, Regex>>,
}

impl DefaultEvaluator {
    /// Create an evaluator with an empty pattern cache.
    pub fn new() -> Self {
        Self::default()
    }

    fn regex(&self, pattern: &str) -> Result<Regex> {
        let mut cache = self.patterns.lock();
        if let Some(re) = cache.get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern)
            .map_err(|e| Error::eval(format!("invalid pattern {:?}: {}", pattern, e)))?;
        cache.insert(pattern.to_string(), re.clone());
        Ok(re)
    }
}

impl QueryEvaluator for DefaultEvaluator {
    fn eval(&self, mdb: &dyn MdbAccessor, value: &Value, history: &[Value]) -> Result<Value> {
        let run = Run {
            mdb,
            history,
            evaluator: self,
        };
        let root = mdb.root();
        run.arg(&root, value)
    }
}

struct Run<'a> {
    mdb: &'a dyn MdbAccessor,
    history: &'a [Value],
    evaluator: &'a DefaultEvaluator,
}

// ============================================================================
// Structure helpers
// ============================================================================

/// Apply `f` to every non-list element, keeping the list structure.
fn map_elements(v: &Value, f: &mut dyn FnMut(&Value) -> Result<Value>) -> Result<Value> {
    match v {
        Value::List(items) => items
            .iter()
            .map(|item| map_elements(item, f))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        other => f(other),
    }
}

fn is_flat(items: &[Value]) -> bool {
    !items.iter().any(Value::is_list)
}

/// Apply `f` to every innermost list.
fn map_lists(v: &Value, f: &mut dyn FnMut(&[Value]) -> Result<Value>) -> Result<Value> {
    match v {
        Value::List(items) if is_flat(items) => f(items),
        Value::List(items) => items
            .iter()
            .map(|item| match item {
                Value::List(_) => map_lists(item, f),
                other => Err(Error::eval(format!(
                    "mixed list: expected a list element, got {}",
                    other.type_name()
                ))),
            })
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        other => Err(Error::eval(format!(
            "operation requires a list context, got {}",
            other.type_name()
        ))),
    }
}

/// Combine two values of the same structure, broadcasting a scalar `b`.
fn broadcast(
    a: &Value,
    b: &Value,
    f: &mut dyn FnMut(&Value, &Value) -> Result<Value>,
) -> Result<Value> {
    match (a, b) {
        (Value::List(xs), Value::List(ys)) => {
            if xs.len() != ys.len() {
                return Err(Error::eval(format!(
                    "structure mismatch: {} elements against {}",
                    xs.len(),
                    ys.len()
                )));
            }
            xs.iter()
                .zip(ys)
                .map(|(x, y)| broadcast(x, y, f))
                .collect::<Result<Vec<_>>>()
                .map(Value::List)
        }
        (Value::List(xs), y) => xs
            .iter()
            .map(|x| broadcast(x, y, f))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        (x, Value::List(_)) => Err(Error::eval(format!(
            "cannot combine a single {} with a list",
            x.type_name()
        ))),
        (x, y) => f(x, y),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            a.compare(b) == Some(Ordering::Equal)
        }
        _ => a == b,
    }
}

fn ordering(a: &Value, b: &Value) -> Result<Ordering> {
    a.compare(b).ok_or_else(|| {
        Error::eval(format!(
            "cannot compare {} with {}",
            a.type_name(),
            b.type_name()
        ))
    })
}

fn expect_obj(v: &Value) -> Result<ObjId> {
    v.as_obj()
        .ok_or_else(|| Error::eval(format!("expected an object, got {}", v.type_name())))
}

fn handles(ids: Vec<ObjId>) -> Value {
    Value::List(ids.into_iter().map(Value::Obj).collect())
}

fn arith(op: ArithOp, a: &Value, b: &Value) -> Result<Value> {
    use ArithOp::*;
    let fail = || {
        Error::eval(format!(
            "cannot apply {:?} to {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))
    };
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => Ok(Value::Bool(match op {
            Add | Orr => *x || *y,
            Sub | Xor => *x ^ *y,
            Mul | And => *x && *y,
            Div | Nad => !(*x && *y),
        })),
        (Value::Int(x), Value::Int(y)) => {
            let r = match op {
                Add | Orr => x.checked_add(*y),
                Sub | Xor => x.checked_sub(*y),
                Mul | And => x.checked_mul(*y),
                Div | Nad => {
                    if *y == 0 {
                        return Err(Error::eval("division by zero"));
                    }
                    x.checked_div(*y)
                }
            };
            r.map(Value::Int)
                .ok_or_else(|| Error::eval("integer overflow"))
        }
        (Value::Int(_) | Value::Float(_), Value::Int(_) | Value::Float(_)) => {
            let (x, y) = match (a.as_number(), b.as_number()) {
                (Some(x), Some(y)) => (x, y),
                _ => return Err(fail()),
            };
            Ok(Value::Float(match op {
                Add | Orr => x + y,
                Sub | Xor => x - y,
                Mul | And => x * y,
                Div | Nad => {
                    if y == 0.0 {
                        return Err(Error::eval("division by zero"));
                    }
                    x / y
                }
            }))
        }
        (Value::Str(x), Value::Str(y)) => match op {
            Sub | Xor => Err(fail()),
            _ => Ok(Value::Str(format!("{}{}", x, y))),
        },
        (Value::Obj(_), Value::Obj(_)) => Ok(Value::List(vec![a.clone(), b.clone()])),
        _ => Err(fail()),
    }
}

fn set_op(op: SetOp, a: &[Value], b: &[Value]) -> Value {
    let items = match op {
        SetOp::Csp => a
            .iter()
            .flat_map(|x| b.iter().map(move |y| Value::List(vec![x.clone(), y.clone()])))
            .collect(),
        SetOp::Its => a.iter().filter(|x| b.contains(x)).cloned().collect(),
        SetOp::Dif => a.iter().filter(|x| !b.contains(x)).cloned().collect(),
        SetOp::Uni => {
            let mut out: Vec<Value> = Vec::with_capacity(a.len() + b.len());
            for x in a.iter().chain(b) {
                if !out.contains(x) {
                    out.push(x.clone());
                }
            }
            out
        }
        SetOp::Con => a.iter().chain(b).cloned().collect(),
    };
    Value::List(items)
}

fn set_apply(op: SetOp, a: &Value, b: &Value) -> Result<Value> {
    match (a, b) {
        (Value::List(xs), Value::List(ys)) if is_flat(xs) && is_flat(ys) => Ok(set_op(op, xs, ys)),
        (Value::List(xs), Value::List(ys)) if !is_flat(ys) && xs.len() == ys.len() => xs
            .iter()
            .zip(ys)
            .map(|(x, y)| set_apply(op, x, y))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        (Value::List(xs), Value::List(_)) if !is_flat(xs) => xs
            .iter()
            .map(|x| set_apply(op, x, b))
            .collect::<Result<Vec<_>>>()
            .map(Value::List),
        _ => Err(Error::eval(format!(
            "{:?} requires lists of matching structure, got {} and {}",
            op,
            a.type_name(),
            b.type_name()
        ))),
    }
}

fn flatten(v: &Value, out: &mut Vec<Value>) {
    match v {
        Value::List(items) => items.iter().for_each(|i| flatten(i, out)),
        other => out.push(other.clone()),
    }
}

fn slice(items: &[Value], lb: i64, ub: i64, step: i64) -> Result<Value> {
    if step == 0 {
        return Err(Error::eval("slice step cannot be zero"));
    }
    let len = items.len() as i64;
    let clamp = |i: i64, lo: i64, hi: i64| {
        let i = if i < 0 { i + len } else { i };
        i.max(lo).min(hi)
    };
    let mut out = Vec::new();
    if step > 0 {
        let (mut i, end) = (clamp(lb, 0, len), clamp(ub, 0, len));
        while i < end {
            out.push(items[i as usize].clone());
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    } else {
        let (mut i, end) = (clamp(lb, -1, len - 1), clamp(ub, -1, len - 1));
        while i > end {
            out.push(items[i as usize].clone());
            match i.checked_add(step) {
                Some(next) => i = next,
                None => break,
            }
        }
    }
    Ok(Value::List(out))
}

fn sorted(items: &[Value], descending: bool) -> Result<Value> {
    let mut out = items.to_vec();
    let mut failure = None;
    out.sort_by(|a, b| match a.compare(b) {
        Some(o) => o,
        None => {
            failure.get_or_insert_with(|| {
                Error::eval(format!(
                    "cannot sort {} with {}",
                    a.type_name(),
                    b.type_name()
                ))
            });
            Ordering::Equal
        }
    });
    if let Some(e) = failure {
        return Err(e);
    }
    if descending {
        out.reverse();
    }
    Ok(Value::List(out))
}

/// Keep elements of `items` whose mask entry is truthy; nested masks recurse.
fn select(items: &Value, mask: &Value) -> Result<Value> {
    match (items, mask) {
        (Value::List(xs), Value::List(ms)) => {
            if xs.len() != ms.len() {
                return Err(Error::eval(format!(
                    "selector yielded {} values for {} elements",
                    ms.len(),
                    xs.len()
                )));
            }
            let mut out = Vec::new();
            for (x, m) in xs.iter().zip(ms) {
                match (x, m) {
                    (Value::List(_), Value::List(_)) => out.push(select(x, m)?),
                    (_, m) if m.is_truthy() => out.push(x.clone()),
                    _ => {}
                }
            }
            Ok(Value::List(out))
        }
        _ => Err(Error::eval(format!(
            "selector must yield a list, got {}",
            mask.type_name()
        ))),
    }
}

// ============================================================================
// Evaluation
// ============================================================================

impl<'a> Run<'a> {
    /// Evaluate a segment argument against the current context.
    fn arg(&self, ctx: &Value, v: &Value) -> Result<Value> {
        match v {
            Value::Qry(q) => self.query(ctx.clone(), q.segments()),
            Value::List(items) => items
                .iter()
                .map(|i| self.arg(ctx, i))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            other => Ok(other.clone()),
        }
    }

    fn query(&self, mut ctx: Value, segments: &[Segment]) -> Result<Value> {
        for (i, seg) in segments.iter().enumerate() {
            if let Segment::Trm { cond, default } = seg {
                return self.terminate(ctx, cond, default, &segments[i + 1..]);
            }
            ctx = self.segment(&ctx, seg)?;
        }
        Ok(ctx)
    }

    fn holds(&self, elem: &Value, cond: &Value) -> Result<bool> {
        Ok(match cond {
            Value::Null => elem.is_null(),
            Value::Qry(q) => self.query(elem.clone(), q.segments())?.is_truthy(),
            other => values_equal(elem, other),
        })
    }

    /// A scalar context meeting the condition ends the pipeline with the
    /// default. In a list, terminated elements become the default and the
    /// others run the remaining segments one by one; if no element is
    /// terminated the list continues as a whole.
    fn terminate(
        &self,
        ctx: Value,
        cond: &Value,
        default: &Value,
        rest: &[Segment],
    ) -> Result<Value> {
        match &ctx {
            Value::List(items) => {
                let hits = items
                    .iter()
                    .map(|e| self.holds(e, cond))
                    .collect::<Result<Vec<_>>>()?;
                if !hits.iter().any(|h| *h) {
                    return self.query(ctx, rest);
                }
                items
                    .iter()
                    .zip(hits)
                    .map(|(e, hit)| {
                        if hit {
                            Ok(default.clone())
                        } else {
                            self.query(e.clone(), rest)
                        }
                    })
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List)
            }
            scalar => {
                if self.holds(scalar, cond)? {
                    Ok(default.clone())
                } else {
                    self.query(ctx, rest)
                }
            }
        }
    }

    fn feature_name(&self, ctx: &Value, v: &Value) -> Result<String> {
        match self.arg(ctx, v)? {
            Value::Str(s) => Ok(s),
            Value::Obj(f) => self.mdb.name_of(f),
            other => Err(Error::eval(format!(
                "feature name must be a string, got {}",
                other.type_name()
            ))),
        }
    }

    fn segment(&self, ctx: &Value, seg: &Segment) -> Result<Value> {
        match seg {
            Segment::Obj(v) => {
                let id = match self.arg(ctx, v)? {
                    Value::Int(i) if i >= 0 => ObjId(i as u64),
                    Value::Obj(id) => id,
                    other => {
                        return Err(Error::eval(format!(
                            "object reference must be a non-negative integer, got {}",
                            other.type_name()
                        )))
                    }
                };
                if !self.mdb.contains(id) {
                    return Err(Error::eval(format!("unknown object {}", id)));
                }
                Ok(Value::Obj(id))
            }
            Segment::His(v) => {
                let n = self.arg(ctx, v)?.as_int().ok_or_else(|| {
                    Error::eval("history reference must be an integer")
                })?;
                let len = self.history.len() as i64;
                let idx = if n < 0 { n + len } else { n };
                if idx < 0 || idx >= len {
                    return Err(Error::eval(format!(
                        "Error evaluating history {}: {} results available",
                        n, len
                    )));
                }
                Ok(self.history[idx as usize].clone())
            }
            Segment::Pth(v) => {
                let name = self.feature_name(ctx, v)?;
                map_elements(ctx, &mut |e| self.mdb.get(expect_obj(e)?, &name))
            }
            Segment::Cls(v) | Segment::Ino(v) => {
                let class = match self.arg(ctx, v)? {
                    Value::Str(s) => s,
                    Value::Obj(c) => self.mdb.name_of(c)?,
                    other => {
                        return Err(Error::eval(format!(
                            "class name must be a string, got {}",
                            other.type_name()
                        )))
                    }
                };
                let subclasses = matches!(seg, Segment::Ino(_));
                map_elements(ctx, &mut |e| {
                    self.mdb
                        .children_of_class(expect_obj(e)?, &class, subclasses)
                        .map(handles)
                })
            }
            Segment::Met { name, args } => self.meta(ctx, name, args),
            Segment::Not => map_elements(ctx, &mut |e| Ok(Value::Bool(!e.is_truthy()))),
            Segment::Trm { cond, default } => self.terminate(ctx.clone(), cond, default, &[]),
            Segment::Idx(v) => self.index(ctx, v),
            Segment::Sel(q) => match ctx {
                Value::List(items) if items.is_empty() => Ok(Value::List(Vec::new())),
                Value::List(_) => {
                    let mask = self.query(ctx.clone(), q.segments())?;
                    select(ctx, &mask)
                }
                other => Err(Error::eval(format!(
                    "selector requires a list context, got {}",
                    other.type_name()
                ))),
            },
            Segment::Arr(items) => items
                .iter()
                .map(|i| self.arg(ctx, i))
                .collect::<Result<Vec<_>>>()
                .map(Value::List),
            Segment::Zip(items) => {
                let columns = items
                    .iter()
                    .map(|i| self.arg(ctx, i))
                    .collect::<Result<Vec<_>>>()?;
                zip(ctx, columns)
            }
            Segment::Qry(q) => self.query(ctx.clone(), q.segments()),
            Segment::Any(v) | Segment::All(v) => {
                let wanted = self.arg(ctx, v)?.into_items();
                let all = matches!(seg, Segment::All(_));
                map_lists(ctx, &mut |items| {
                    let mut hits = wanted.iter().map(|w| items.iter().any(|i| values_equal(i, w)));
                    Ok(Value::Bool(if all {
                        hits.all(|h| h)
                    } else {
                        hits.any(|h| h)
                    }))
                })
            }
            Segment::Compare(op, v) => {
                let rhs = self.arg(ctx, v)?;
                let pattern = match (op, &rhs) {
                    (CompareOp::Rgx, Value::Str(p)) => Some(self.evaluator.regex(p)?),
                    (CompareOp::Rgx, other) => {
                        return Err(Error::eval(format!(
                            "pattern must be a string, got {}",
                            other.type_name()
                        )))
                    }
                    _ => None,
                };
                broadcast(ctx, &rhs, &mut |a, b| {
                    Ok(Value::Bool(match op {
                        CompareOp::Equ => values_equal(a, b),
                        CompareOp::Neq => !values_equal(a, b),
                        CompareOp::Les => ordering(a, b)? == Ordering::Less,
                        CompareOp::Gre => ordering(a, b)? == Ordering::Greater,
                        CompareOp::Rgx => match (a, &pattern) {
                            (Value::Str(s), Some(re)) => re.is_match(s),
                            (other, _) => {
                                return Err(Error::eval(format!(
                                    "pattern match requires a string, got {}",
                                    other.type_name()
                                )))
                            }
                        },
                    }))
                })
            }
            Segment::Eqa(items) => {
                let options = items
                    .iter()
                    .map(|i| self.arg(ctx, i))
                    .collect::<Result<Vec<_>>>()?;
                map_elements(ctx, &mut |e| {
                    Ok(Value::Bool(options.iter().any(|o| values_equal(e, o))))
                })
            }
            Segment::Arith(op, v) => {
                let rhs = self.arg(ctx, v)?;
                broadcast(ctx, &rhs, &mut |a, b| arith(*op, a, b))
            }
            Segment::Set(op, v) => {
                let rhs = self.arg(ctx, v)?;
                set_apply(*op, ctx, &rhs)
            }
        }
    }

    fn index(&self, ctx: &Value, v: &Value) -> Result<Value> {
        if !ctx.is_list() {
            return Err(Error::eval(format!(
                "index requires a list context, got {}",
                ctx.type_name()
            )));
        }
        match self.arg(ctx, v)? {
            Value::Int(n) => map_lists(ctx, &mut |items| {
                let len = items.len() as i64;
                let i = if n < 0 { n + len } else { n };
                if i < 0 || i >= len {
                    return Err(Error::eval(format!(
                        "index {} out of range for {} elements",
                        n, len
                    )));
                }
                Ok(items[i as usize].clone())
            }),
            Value::Str(s) => match s.to_ascii_uppercase().as_str() {
                "ASC" => map_lists(ctx, &mut |items| sorted(items, false)),
                "DSC" => map_lists(ctx, &mut |items| sorted(items, true)),
                "LEN" => map_lists(ctx, &mut |items| Ok(Value::from(items.len()))),
                "FLT" => {
                    let mut out = Vec::new();
                    flatten(ctx, &mut out);
                    Ok(Value::List(out))
                }
                other => Err(Error::eval(format!("unknown index operation {}", other))),
            },
            Value::List(bounds) => match bounds.as_slice() {
                [Value::Int(lb), Value::Int(ub), Value::Int(step)] => {
                    map_lists(ctx, &mut |items| slice(items, *lb, *ub, *step))
                }
                _ => Err(Error::eval("slice must be (lower,upper,step) integers")),
            },
            other => Err(Error::eval(format!(
                "invalid index argument of type {}",
                other.type_name()
            ))),
        }
    }

    fn objects(
        &self,
        ctx: &Value,
        f: &mut dyn FnMut(ObjId) -> Result<Value>,
    ) -> Result<Value> {
        map_elements(ctx, &mut |e| f(expect_obj(e)?))
    }

    fn feature_meta(
        &self,
        ctx: &Value,
        filter: FeatureFilter,
        form: FeatureForm,
    ) -> Result<Value> {
        self.objects(ctx, &mut |obj| {
            let features = self.mdb.features(obj, filter)?;
            match form {
                FeatureForm::Handles => Ok(handles(features)),
                FeatureForm::Names => features
                    .into_iter()
                    .map(|f| self.mdb.name_of(f).map(Value::Str))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List),
                FeatureForm::Values => features
                    .into_iter()
                    .map(|f| self.mdb.get(obj, &self.mdb.name_of(f)?))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::List),
            }
        })
    }

    fn meta(&self, ctx: &Value, name: &str, args: &[Value]) -> Result<Value> {
        let args = args
            .iter()
            .map(|a| self.arg(ctx, a))
            .collect::<Result<Vec<_>>>()?;
        let mdb = self.mdb;
        let opt = |o: Option<ObjId>| o.map(Value::Obj).unwrap_or(Value::Null);
        use FeatureFilter::*;
        use FeatureForm::*;
        match name.to_ascii_uppercase().as_str() {
            "CLS" => match args.as_slice() {
                [] => self.objects(ctx, &mut |o| mdb.class_of(o).map(Value::Obj)),
                [Value::Str(package), Value::Str(class)] => {
                    mdb.class_by_name(package, class).map(Value::Obj)
                }
                _ => Err(Error::eval("CLS takes no arguments or (package,class)")),
            },
            "CLN" => self.objects(ctx, &mut |o| mdb.name_of(mdb.class_of(o)?).map(Value::Str)),
            "LEN" => map_lists(ctx, &mut |items| Ok(Value::from(items.len()))),
            "PAR" | "CON" => self.objects(ctx, &mut |o| mdb.parent(o).map(opt)),
            "ALP" => self.objects(ctx, &mut |o| mdb.all_parents(o).map(handles)),
            "ASO" => {
                let root = match args.first() {
                    None | Some(Value::Null) => None,
                    Some(v) => Some(expect_obj(v)?),
                };
                self.objects(ctx, &mut |o| mdb.associates(o, root).map(handles))
            }
            "IDX" => self.objects(ctx, &mut |o| {
                mdb.index(o).map(|i| i.map(Value::from).unwrap_or(Value::Null))
            }),
            "CFT" => self.objects(ctx, &mut |o| mdb.containing_feature(o).map(opt)),
            "FEA" => self.feature_meta(ctx, All, Handles),
            "FEN" => self.feature_meta(ctx, All, Names),
            "FEV" => self.feature_meta(ctx, All, Values),
            "ATT" => self.feature_meta(ctx, Attributes, Handles),
            "ATN" => self.feature_meta(ctx, Attributes, Names),
            "ATV" => self.feature_meta(ctx, Attributes, Values),
            "REF" => self.feature_meta(ctx, References, Handles),
            "REN" => self.feature_meta(ctx, References, Names),
            "REV" => self.feature_meta(ctx, References, Values),
            "CNT" => self.feature_meta(ctx, Containments, Handles),
            "CNN" => self.feature_meta(ctx, Containments, Names),
            "CNV" => self.feature_meta(ctx, Containments, Values),
            "PAC" => self.objects(ctx, &mut |c| mdb.package_of(c).map(Value::Obj)),
            "STY" => self.objects(ctx, &mut |c| mdb.supertypes(c, false).map(handles)),
            "ALS" => self.objects(ctx, &mut |c| mdb.supertypes(c, true).map(handles)),
            "IMP" => self.objects(ctx, &mut |c| mdb.implementers(c, false).map(handles)),
            "ALI" => self.objects(ctx, &mut |c| mdb.implementers(c, true).map(handles)),
            "MMO" => Ok(handles(mdb.metamodels())),
            "IFF" => match args.as_slice() {
                [cond, then, otherwise] => iff(cond, then, otherwise),
                _ => Err(Error::eval("IFF takes (condition,then,else)")),
            },
            _ => Err(Error::UnknownSegment {
                name: format!("@{}", name),
            }),
        }
    }
}

#[derive(Clone, Copy)]
enum FeatureForm {
    Handles,
    Names,
    Values,
}

/// Pick `then` or `otherwise` per element of `cond`.
fn iff(cond: &Value, then: &Value, otherwise: &Value) -> Result<Value> {
    match cond {
        Value::List(cs) => {
            let pick = |branch: &Value, i: usize| match branch {
                Value::List(bs) if bs.len() == cs.len() => bs[i].clone(),
                other => other.clone(),
            };
            cs.iter()
                .enumerate()
                .map(|(i, c)| iff(c, &pick(then, i), &pick(otherwise, i)))
                .collect::<Result<Vec<_>>>()
                .map(Value::List)
        }
        c if c.is_truthy() => Ok(then.clone()),
        _ => Ok(otherwise.clone()),
    }
}

/// Pair up independently evaluated columns along the context's structure.
fn zip(ctx: &Value, columns: Vec<Value>) -> Result<Value> {
    match ctx {
        Value::List(items) => {
            let mut rows: Vec<Vec<Value>> = vec![Vec::with_capacity(columns.len()); items.len()];
            for column in columns {
                match column {
                    Value::List(cells) if cells.len() == items.len() => {
                        for (row, cell) in rows.iter_mut().zip(cells) {
                            row.push(cell);
                        }
                    }
                    other => {
                        return Err(Error::eval(format!(
                            "zip column does not match {} context elements (got {})",
                            items.len(),
                            other.type_name()
                        )))
                    }
                }
            }
            items
                .iter()
                .zip(rows)
                .map(|(item, row)| match item {
                    Value::List(_) => zip(item, row),
                    _ => Ok(Value::List(row)),
                })
                .collect::<Result<Vec<_>>>()
                .map(Value::List)
        }
        _ => Ok(Value::List(columns)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{FeatureKind, InMemoryMdb};
    use modelbus_core::Query;

    struct World {
        mdb: InMemoryMdb,
        root: ObjId,
        a: ObjId,
        b: ObjId,
        c: ObjId,
    }

    /// root.models = [a]; a.children = [b, c]; sizes 1, 5, 9; c is a Leaf.
    fn world() -> World {
        let mut mdb = InMemoryMdb::new();
        let root = mdb.root_id();
        let pkg = mdb.define_package("tree").unwrap();
        let node = mdb.define_class(pkg, "Node", &[]).unwrap();
        mdb.define_feature(node, "name", FeatureKind::Attribute, false)
            .unwrap();
        mdb.define_feature(node, "size", FeatureKind::Attribute, false)
            .unwrap();
        mdb.define_feature(node, "children", FeatureKind::Containment, true)
            .unwrap();
        mdb.define_feature(node, "link", FeatureKind::Reference, false)
            .unwrap();
        let leaf = mdb.define_class(pkg, "Leaf", &[node]).unwrap();
        let mk = |mdb: &mut InMemoryMdb, class, name: &str, size: i64| {
            mdb.create(
                class,
                1,
                &[
                    Value::List(vec!["name".into(), name.into()]),
                    Value::List(vec!["size".into(), size.into()]),
                ],
            )
            .unwrap()[0]
        };
        let a = mk(&mut mdb, node, "a", 1);
        let b = mk(&mut mdb, node, "b", 5);
        let c = mk(&mut mdb, leaf, "c", 9);
        mdb.add(root, "models", Value::Obj(a)).unwrap();
        mdb.add(a, "children", Value::Obj(b)).unwrap();
        mdb.add(a, "children", Value::Obj(c)).unwrap();
        mdb.set(c, "link", Value::Obj(b)).unwrap();
        World { mdb, root, a, b, c }
    }

    fn eval(w: &World, q: Query) -> Result<Value> {
        DefaultEvaluator::new().eval(&w.mdb, &Value::Qry(q), &[])
    }

    fn ints(xs: &[i64]) -> Value {
        Value::List(xs.iter().map(|x| Value::Int(*x)).collect())
    }

    fn children(w: &World) -> Query {
        Query::new().obj(w.a.0 as i64).pth("children")
    }

    #[test]
    fn test_object_and_path() {
        let w = world();
        let v = eval(&w, Query::new().obj(w.a.0 as i64).pth("name")).unwrap();
        assert_eq!(v, Value::from("a"));
        assert!(eval(&w, Query::new().obj(9999)).is_err());
    }

    #[test]
    fn test_empty_query_is_root() {
        let w = world();
        assert_eq!(eval(&w, Query::new()).unwrap(), Value::Obj(w.root));
    }

    #[test]
    fn test_path_is_element_wise() {
        let w = world();
        let v = eval(&w, children(&w).pth("size")).unwrap();
        assert_eq!(v, ints(&[5, 9]));
    }

    #[test]
    fn test_non_query_values_pass_through() {
        let w = world();
        let ev = DefaultEvaluator::new();
        let v = Value::List(vec![1.into(), Value::Qry(Query::new().obj(w.b.0 as i64).pth("size"))]);
        assert_eq!(ev.eval(&w.mdb, &v, &[]).unwrap(), ints(&[1, 5]));
    }

    #[test]
    fn test_history_reference() {
        let w = world();
        let ev = DefaultEvaluator::new();
        let history = vec![Value::Int(10), Value::Int(20)];
        let q = |n: i64| Value::Qry(Query::new().his(n));
        assert_eq!(ev.eval(&w.mdb, &q(0), &history).unwrap(), Value::Int(10));
        assert_eq!(ev.eval(&w.mdb, &q(-1), &history).unwrap(), Value::Int(20));
        let err = ev.eval(&w.mdb, &q(2), &history).unwrap_err();
        assert!(err.to_string().contains("Error evaluating history 2"));
    }

    #[test]
    fn test_class_and_instance_segments() {
        let w = world();
        let exact = eval(&w, Query::new().obj(w.a.0 as i64).cls("Node")).unwrap();
        assert_eq!(exact, Value::List(vec![Value::Obj(w.b)]));
        let all = eval(&w, Query::new().obj(w.a.0 as i64).ino("Node")).unwrap();
        assert_eq!(all, Value::List(vec![Value::Obj(w.b), Value::Obj(w.c)]));
    }

    #[test]
    fn test_select_by_property() {
        let w = world();
        let q = children(&w).sel(Query::new().pth("size").gre(6));
        assert_eq!(eval(&w, q).unwrap(), Value::List(vec![Value::Obj(w.c)]));

        let none = children(&w).sel(Query::new().pth("size").gre(100));
        assert_eq!(eval(&w, none).unwrap(), Value::List(vec![]));
    }

    #[test]
    fn test_select_requires_list() {
        let w = world();
        let q = Query::new().obj(w.a.0 as i64).sel(Query::new().pth("size"));
        assert!(eval(&w, q).is_err());
    }

    #[test]
    fn test_index_forms() {
        let w = world();
        let sizes = || children(&w).pth("size");
        assert_eq!(eval(&w, sizes().idx(0)).unwrap(), Value::Int(5));
        assert_eq!(eval(&w, sizes().idx(-1)).unwrap(), Value::Int(9));
        assert_eq!(eval(&w, sizes().idx("DSC")).unwrap(), ints(&[9, 5]));
        assert_eq!(eval(&w, sizes().idx("LEN")).unwrap(), Value::Int(2));
        assert!(eval(&w, sizes().idx(5)).is_err());
        assert!(eval(&w, Query::new().obj(w.a.0 as i64).idx(0)).is_err());
    }

    #[test]
    fn test_slice_and_flatten() {
        let w = world();
        let arr = Query::new().arr(vec![1.into(), 2.into(), 3.into(), 4.into()]);
        let slice = arr.clone().idx(ints(&[0, 4, 2]));
        assert_eq!(eval(&w, slice).unwrap(), ints(&[1, 3]));
        let rev = arr.idx(ints(&[-1, -5, -1]));
        assert_eq!(eval(&w, rev).unwrap(), ints(&[4, 3, 2, 1]));

        let nested = Query::new()
            .arr(vec![ints(&[1, 2]), ints(&[3])])
            .idx("FLT");
        assert_eq!(eval(&w, nested).unwrap(), ints(&[1, 2, 3]));
    }

    #[test]
    fn test_slice_with_huge_step_stops_at_bound() {
        let w = world();
        let arr = || Query::new().arr(vec![1.into(), 2.into(), 3.into()]);
        let up = arr().idx(ints(&[1, 3, i64::MAX]));
        assert_eq!(eval(&w, up).unwrap(), ints(&[2]));
        let down = arr().idx(ints(&[-1, -4, i64::MIN]));
        assert_eq!(eval(&w, down).unwrap(), ints(&[3]));
    }

    #[test]
    fn test_nested_lists_keep_structure() {
        let w = world();
        let q = Query::new().arr(vec![ints(&[3, 1]), ints(&[2, 5, 4])]).idx("ASC");
        assert_eq!(
            eval(&w, q).unwrap(),
            Value::List(vec![ints(&[1, 3]), ints(&[2, 4, 5])])
        );
        let len = Query::new()
            .arr(vec![ints(&[3, 1]), ints(&[2, 5, 4])])
            .met("LEN", vec![]);
        assert_eq!(eval(&w, len).unwrap(), ints(&[2, 3]));
    }

    #[test]
    fn test_array_arguments_use_context() {
        let w = world();
        let q = Query::new()
            .obj(w.b.0 as i64)
            .arr(vec![
                Value::Qry(Query::new().pth("name")),
                Value::Qry(Query::new().pth("size")),
                Value::Int(7),
            ]);
        assert_eq!(
            eval(&w, q).unwrap(),
            Value::List(vec!["b".into(), 5.into(), 7.into()])
        );
    }

    #[test]
    fn test_zip_rows() {
        let w = world();
        let q = children(&w).zip(vec![
            Value::Qry(Query::new().pth("name")),
            Value::Qry(Query::new().pth("size")),
        ]);
        assert_eq!(
            eval(&w, q).unwrap(),
            Value::List(vec![
                Value::List(vec!["b".into(), 5.into()]),
                Value::List(vec!["c".into(), 9.into()]),
            ])
        );
    }

    #[test]
    fn test_not_and_comparisons() {
        let w = world();
        let sizes = || children(&w).pth("size");
        assert_eq!(
            eval(&w, sizes().equ(5)).unwrap(),
            Value::List(vec![true.into(), false.into()])
        );
        assert_eq!(
            eval(&w, sizes().les(6).not()).unwrap(),
            Value::List(vec![false.into(), true.into()])
        );
        assert_eq!(
            eval(&w, sizes().equ(5.0)).unwrap(),
            Value::List(vec![true.into(), false.into()])
        );
        assert_eq!(
            eval(&w, sizes().eqa(vec![9.into(), 10.into()])).unwrap(),
            Value::List(vec![false.into(), true.into()])
        );
        assert!(eval(&w, sizes().les("x")).is_err());
    }

    #[test]
    fn test_element_wise_broadcast_with_list_operand() {
        let w = world();
        let q = children(&w).pth("size").neq(ints(&[5, 0]));
        assert_eq!(
            eval(&w, q).unwrap(),
            Value::List(vec![false.into(), true.into()])
        );
        let bad = children(&w).pth("size").neq(ints(&[5]));
        assert!(eval(&w, bad).is_err());
    }

    #[test]
    fn test_regex_search() {
        let w = world();
        let q = Query::new()
            .arr(vec!["apple".into(), "banana".into()])
            .rgx("an+a$");
        assert_eq!(
            eval(&w, q).unwrap(),
            Value::List(vec![false.into(), true.into()])
        );
        let bad = Query::new().arr(vec!["a".into()]).rgx("(");
        assert!(eval(&w, bad).is_err());
        let not_str = Query::new().arr(vec!["a".into()]).rgx(1);
        assert!(eval(&w, not_str).is_err());
    }

    #[test]
    fn test_arithmetic() {
        let w = world();
        let sizes = || children(&w).pth("size");
        assert_eq!(
            eval(&w, sizes().arith(ArithOp::Add, 1)).unwrap(),
            ints(&[6, 10])
        );
        assert_eq!(
            eval(&w, sizes().arith(ArithOp::Div, 2)).unwrap(),
            ints(&[2, 4])
        );
        assert_eq!(
            eval(&w, sizes().arith(ArithOp::Mul, 0.5)).unwrap(),
            Value::List(vec![2.5.into(), 4.5.into()])
        );
        assert!(eval(&w, sizes().arith(ArithOp::Div, 0)).is_err());

        let names = children(&w).pth("name").arith(ArithOp::Add, "!");
        assert_eq!(
            eval(&w, names).unwrap(),
            Value::List(vec!["b!".into(), "c!".into()])
        );
        let sub = children(&w).pth("name").arith(ArithOp::Sub, "x");
        assert!(eval(&w, sub).is_err());
    }

    #[test]
    fn test_boolean_operators() {
        let w = world();
        let bools = || Query::new().arr(vec![true.into(), false.into()]);
        assert_eq!(
            eval(&w, bools().arith(ArithOp::Orr, false)).unwrap(),
            Value::List(vec![true.into(), false.into()])
        );
        assert_eq!(
            eval(&w, bools().arith(ArithOp::Xor, true)).unwrap(),
            Value::List(vec![false.into(), true.into()])
        );
        assert_eq!(
            eval(&w, bools().arith(ArithOp::And, true)).unwrap(),
            Value::List(vec![true.into(), false.into()])
        );
        assert_eq!(
            eval(&w, bools().arith(ArithOp::Nad, true)).unwrap(),
            Value::List(vec![false.into(), true.into()])
        );
    }

    #[test]
    fn test_set_operations() {
        let w = world();
        let base = || Query::new().arr(vec![1.into(), 2.into(), 3.into()]);
        assert_eq!(
            eval(&w, base().set_op(SetOp::Its, ints(&[2, 3, 4]))).unwrap(),
            ints(&[2, 3])
        );
        assert_eq!(
            eval(&w, base().set_op(SetOp::Dif, ints(&[2]))).unwrap(),
            ints(&[1, 3])
        );
        assert_eq!(
            eval(&w, base().set_op(SetOp::Uni, ints(&[3, 4, 4]))).unwrap(),
            ints(&[1, 2, 3, 4])
        );
        assert_eq!(
            eval(&w, base().set_op(SetOp::Con, ints(&[1]))).unwrap(),
            ints(&[1, 2, 3, 1])
        );
        let csp = Query::new()
            .arr(vec![1.into(), 2.into()])
            .set_op(SetOp::Csp, ints(&[3]));
        assert_eq!(
            eval(&w, csp).unwrap(),
            Value::List(vec![ints(&[1, 3]), ints(&[2, 3])])
        );
        assert!(eval(&w, Query::new().obj(w.a.0 as i64).set_op(SetOp::Con, ints(&[1]))).is_err());
    }

    #[test]
    fn test_any_all() {
        let w = world();
        let sizes = || children(&w).pth("size");
        assert_eq!(eval(&w, sizes().any(ints(&[9, 100]))).unwrap(), true.into());
        assert_eq!(eval(&w, sizes().all(ints(&[9, 100]))).unwrap(), false.into());
        assert_eq!(eval(&w, sizes().all(ints(&[9, 5]))).unwrap(), true.into());
    }

    #[test]
    fn test_terminate_scalar() {
        let w = world();
        // a.link is null: the default is yielded and /name is never evaluated
        let q = Query::new()
            .obj(w.a.0 as i64)
            .pth("link")
            .trm(Value::Null, "none")
            .pth("name");
        assert_eq!(eval(&w, q).unwrap(), Value::from("none"));

        let q = Query::new()
            .obj(w.c.0 as i64)
            .pth("link")
            .trm(Value::Null, "none")
            .pth("name");
        assert_eq!(eval(&w, q).unwrap(), Value::from("b"));
    }

    #[test]
    fn test_terminate_per_element() {
        let w = world();
        let q = children(&w)
            .pth("link")
            .trm(Value::Null, "none")
            .pth("name");
        assert_eq!(
            eval(&w, q).unwrap(),
            Value::List(vec!["none".into(), "b".into()])
        );
    }

    #[test]
    fn test_terminate_with_query_condition() {
        let w = world();
        let q = children(&w)
            .pth("size")
            .trm(Value::Qry(Query::new().gre(6)), -1)
            .arith(ArithOp::Mul, 10);
        assert_eq!(eval(&w, q).unwrap(), ints(&[50, -1]));
    }

    #[test]
    fn test_meta_containment() {
        let w = world();
        let b = || Query::new().obj(w.b.0 as i64);
        assert_eq!(eval(&w, b().met("PAR", vec![])).unwrap(), Value::Obj(w.a));
        assert_eq!(eval(&w, b().met("IDX", vec![])).unwrap(), Value::Int(0));
        assert_eq!(
            eval(&w, b().met("ALP", vec![])).unwrap(),
            Value::List(vec![Value::Obj(w.root), Value::Obj(w.a)])
        );
        let cft = eval(&w, b().met("CFT", vec![]).pth("name")).unwrap();
        assert_eq!(cft, Value::from("children"));
        assert_eq!(
            eval(&w, b().met("ASO", vec![])).unwrap(),
            Value::List(vec![Value::Obj(w.c)])
        );
        assert_eq!(
            eval(&w, Query::new().met("PAR", vec![])).unwrap(),
            Value::Null
        );
    }

    #[test]
    fn test_meta_classes_and_features() {
        let w = world();
        let c = || Query::new().obj(w.c.0 as i64);
        assert_eq!(eval(&w, c().met("CLN", vec![])).unwrap(), Value::from("Leaf"));
        assert_eq!(
            eval(&w, c().met("CLS", vec![]).met("STY", vec![]).pth("name")).unwrap(),
            Value::List(vec!["Node".into()])
        );
        assert_eq!(
            eval(&w, c().met("ATN", vec![])).unwrap(),
            Value::List(vec!["name".into(), "size".into()])
        );
        assert_eq!(
            eval(&w, c().met("ATV", vec![])).unwrap(),
            Value::List(vec!["c".into(), 9.into()])
        );
        assert_eq!(
            eval(&w, c().met("REV", vec![])).unwrap(),
            Value::List(vec![Value::Obj(w.b)])
        );
        assert_eq!(
            eval(&w, c().met("CNN", vec![])).unwrap(),
            Value::List(vec!["children".into()])
        );
        assert_eq!(
            eval(&w, c().met("FEN", vec![])).unwrap(),
            Value::List(vec![
                "name".into(),
                "size".into(),
                "children".into(),
                "link".into()
            ])
        );
        let by_name = Query::new().met("CLS", vec!["tree".into(), "Node".into()]);
        let node = eval(&w, by_name).unwrap();
        let imp = eval(
            &w,
            Query::new()
                .met("CLS", vec!["tree".into(), "Node".into()])
                .met("IMP", vec![])
                .pth("name"),
        )
        .unwrap();
        assert!(node.as_obj().is_some());
        assert_eq!(imp, Value::List(vec!["Leaf".into()]));
        let pac = eval(&w, c().met("CLS", vec![]).met("PAC", vec![]).pth("name")).unwrap();
        assert_eq!(pac, Value::from("tree"));
        let mmo = eval(&w, Query::new().met("MMO", vec![]).pth("name")).unwrap();
        assert_eq!(mmo, Value::List(vec!["mdb".into(), "tree".into()]));
    }

    #[test]
    fn test_meta_iff() {
        let w = world();
        let q = children(&w).pth("size").gre(6).met(
            "IFF",
            vec![Value::Qry(Query::new()), "big".into(), "small".into()],
        );
        assert_eq!(
            eval(&w, q).unwrap(),
            Value::List(vec!["small".into(), "big".into()])
        );
    }

    #[test]
    fn test_unknown_meta() {
        let w = world();
        let err = eval(&w, Query::new().met("XYZ", vec![])).unwrap_err();
        assert!(matches!(err, Error::UnknownSegment { .. }));
        assert_eq!(err.to_string(), "unknown segment: @XYZ");
    }

    #[test]
    fn test_path_on_non_object_fails() {
        let w = world();
        let q = Query::new().obj(w.a.0 as i64).pth("name").pth("size");
        assert!(eval(&w, q).is_err());
    }

    #[test]
    fn test_nested_pipeline_runs_from_context() {
        let w = world();
        let q = Query::new()
            .obj(w.b.0 as i64)
            .qry(Query::new().pth("size"))
            .arith(ArithOp::Add, 1);
        assert_eq!(eval(&w, q).unwrap(), Value::Int(6));
    }
}
