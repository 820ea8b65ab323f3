//! Text encoding of commands, queries and values

use modelbus_core::{Command, CommandKind, Query, Segment, Value};

use super::token::is_reserved;

fn needs_quotes(s: &str) -> bool {
    let Some(first) = s.chars().next() else {
        return true;
    };
    if first.is_ascii_digit() || matches!(first, '-' | '+' | '.') {
        return true;
    }
    if s.chars().any(is_reserved) {
        return true;
    }
    if s.len() == 3 && CommandKind::from_mnemonic(s).is_some() {
        return true;
    }
    ["true", "false", "null"]
        .iter()
        .any(|kw| s.eq_ignore_ascii_case(kw))
}

/// Encode a string, quoting it when a bare word would read differently.
pub fn encode_string(s: &str) -> String {
    if !needs_quotes(s) {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' || c == '\\' {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

fn encode_float(f: f64) -> String {
    // Debug formatting always keeps a `.` or an exponent for finite values.
    format!("{f:?}")
}

fn join(items: &[Value]) -> String {
    items.iter().map(encode_value).collect::<Vec<_>>().join(",")
}

/// Written form of the empty pipeline.
const EMPTY_QUERY: &str = "(())";

/// Encode a value in value position.
///
/// Lists are written `(a,b)`, `(a,)` or `()`; object handles `#id`; queries
/// are wrapped in parentheses, the empty query as `(())`.
pub fn encode_value(v: &Value) -> String {
    match v {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => encode_float(*f),
        Value::Str(s) => encode_string(s),
        Value::Obj(id) => id.to_string(),
        Value::List(items) => match items.len() {
            0 => "()".to_string(),
            1 => format!("({},)", encode_value(&items[0])),
            _ => format!("({})", join(items)),
        },
        Value::Qry(q) => encode_group(q),
    }
}

fn encode_group(q: &Query) -> String {
    if q.is_empty() {
        EMPTY_QUERY.to_string()
    } else {
        format!("({})", encode_query(q))
    }
}

/// Encode the segments of a pipeline without surrounding parentheses.
pub fn encode_query(q: &Query) -> String {
    let segs = q.segments();
    let mut out = String::new();
    for (i, seg) in segs.iter().enumerate() {
        let next_is_group = matches!(segs.get(i + 1), Some(Segment::Qry(_)));
        encode_segment(&mut out, seg, next_is_group);
    }
    out
}

fn encode_segment(out: &mut String, seg: &Segment, next_is_group: bool) {
    let symbol = seg.kind().symbol();
    match seg {
        Segment::Obj(v)
        | Segment::His(v)
        | Segment::Pth(v)
        | Segment::Cls(v)
        | Segment::Ino(v)
        | Segment::Idx(v)
        | Segment::Any(v)
        | Segment::All(v)
        | Segment::Compare(_, v)
        | Segment::Arith(_, v)
        | Segment::Set(_, v) => {
            out.push_str(symbol);
            out.push_str(&encode_value(v));
        }
        Segment::Met { name, args } => {
            out.push_str(symbol);
            out.push_str(name);
            if !args.is_empty() || next_is_group {
                out.push('(');
                out.push_str(&join(args));
                out.push(')');
            }
        }
        Segment::Not => out.push_str(symbol),
        Segment::Trm { cond, default } => {
            out.push_str(symbol);
            if !(cond.is_null() && default.is_null()) {
                out.push('(');
                out.push_str(&encode_value(cond));
                out.push(',');
                out.push_str(&encode_value(default));
                out.push(')');
            }
        }
        Segment::Sel(q) => {
            out.push('{');
            out.push_str(&encode_query(q));
            out.push('}');
        }
        Segment::Arr(items) => {
            out.push('[');
            out.push_str(&join(items));
            out.push(']');
        }
        Segment::Zip(items) | Segment::Eqa(items) => {
            out.push_str(symbol);
            out.push('(');
            out.push_str(&join(items));
            out.push(')');
        }
        Segment::Qry(q) => out.push_str(&encode_group(q)),
    }
}

/// Encode a command argument. Pipelines that start with a segment symbol are
/// written without their outer parentheses, except a lone object reference,
/// which bare would read as an object handle.
fn encode_arg(v: &Value) -> String {
    match v {
        Value::Qry(q) => match q.segments() {
            [] | [Segment::Qry(_), ..] | [Segment::Obj(_)] => encode_value(v),
            _ => encode_query(q),
        },
        other => encode_value(other),
    }
}

/// Encode a command.
///
/// A compound with two or more children is written as its children joined by
/// `;`; otherwise as `CMP` followed by the child.
pub fn encode_command(cmd: &Command) -> String {
    match cmd {
        Command::Cmp(children) => {
            if children.len() >= 2 {
                children
                    .iter()
                    .map(encode_command)
                    .collect::<Vec<_>>()
                    .join(";")
            } else {
                let mut out = CommandKind::Cmp.mnemonic().to_string();
                for c in children {
                    out.push(' ');
                    out.push_str(&encode_command(c));
                }
                out
            }
        }
        other => {
            let mut out = other.kind().mnemonic().to_string();
            for part in other.to_parts() {
                out.push(' ');
                out.push_str(&encode_arg(&part));
            }
            out
        }
    }
}
