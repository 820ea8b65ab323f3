//! Reduction of the step tree into commands, queries and values
//!
//! The first step of a run goes through a *base* constructor that starts a
//! new node; every following step goes through a *bound* constructor that
//! appends a segment to the pipeline built so far.

use modelbus_core::{
    Command, CommandKind, Error, ObjId, Query, Result, Segment, SegmentKind, Value,
};

use super::nest::{context, CmdStep, Prim, Program, Step};
use super::token::{Bracket, Token};

struct Reducer<'a> {
    tokens: &'a [Token],
}

/// Interpret a bare word.
///
/// Words made only of numeric characters and starting with a digit, sign or
/// dot are numbers (float if they contain `.`, `e` or `E`); `true`, `false`
/// and `null` are keywords in any case; everything else is a string.
pub(crate) fn word_value(word: &str) -> std::result::Result<Value, String> {
    let numeric = word
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.' | 'e' | 'E'));
    let starts_numeric = word
        .chars()
        .next()
        .map(|c| c.is_ascii_digit() || matches!(c, '-' | '+' | '.'))
        .unwrap_or(false);
    let has_digit = word.chars().any(|c| c.is_ascii_digit());

    if numeric && starts_numeric && has_digit {
        if word.contains(|c| matches!(c, '.' | 'e' | 'E')) {
            return word
                .parse::<f64>()
                .map(Value::Float)
                .map_err(|_| format!("invalid number {word}"));
        }
        return word
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| format!("invalid number {word}"));
    }
    if word.eq_ignore_ascii_case("true") {
        return Ok(Value::Bool(true));
    }
    if word.eq_ignore_ascii_case("false") {
        return Ok(Value::Bool(false));
    }
    if word.eq_ignore_ascii_case("null") {
        return Ok(Value::Null);
    }
    Ok(Value::Str(word.to_string()))
}

/// `(())`: a paren group holding nothing but an empty paren group.
fn is_empty_pipeline(items: &[Vec<Step>], commas: usize) -> bool {
    commas == 0
        && matches!(items, [run] if matches!(
            run.as_slice(),
            [Step::Group { bracket: Bracket::Paren, items: inner, .. }] if inner.is_empty()
        ))
}

impl<'a> Reducer<'a> {
    fn error_at(&self, pos: usize, what: impl std::fmt::Display) -> Error {
        Error::parse(format!("{what} at token {pos}: {}", context(self.tokens, pos)))
    }

    fn prim(&self, prim: &Prim, pos: usize) -> Result<Value> {
        match prim {
            Prim::Quoted(s) => Ok(Value::Str(s.clone())),
            Prim::Word(w) => word_value(w).map_err(|e| self.error_at(pos, e)),
        }
    }

    // ---- values ----

    /// Object handle written as a lone `#<digits>`.
    fn handle(&self, run: &[Step]) -> Option<Result<Value>> {
        let [Step::Seg {
            kind: SegmentKind::Obj,
            args,
            ..
        }] = run
        else {
            return None;
        };
        match args.as_slice() {
            [Step::Prim {
                prim: Prim::Word(w),
                pos,
            }] if !w.is_empty() && w.bytes().all(|b| b.is_ascii_digit()) => Some(
                w.parse::<u64>()
                    .map(|id| Value::Obj(ObjId(id)))
                    .map_err(|_| self.error_at(*pos, format!("invalid object id {w}"))),
            ),
            _ => None,
        }
    }

    /// Value of a whole run: a lone atom is read as a value, anything longer
    /// is a pipeline. A lone `#<digits>` is an object handle.
    fn run_value(&self, run: &[Step]) -> Result<Value> {
        if let Some(handle) = self.handle(run) {
            return handle;
        }
        match run {
            [] => Err(Error::parse("empty argument")),
            [Step::Prim { prim, pos }] => self.prim(prim, *pos),
            [g @ Step::Group {
                bracket: Bracket::Paren,
                ..
            }] => self.paren_value(g),
            _ => Ok(Value::Qry(self.pipeline(run)?)),
        }
    }

    /// Value of a single atom used as a segment argument.
    fn atom_value(&self, step: &Step) -> Result<Value> {
        self.run_value(std::slice::from_ref(step))
    }

    /// A parenthesized group in value position: a list if it is empty or has
    /// a top-level comma, a parenthesized primitive, or a nested pipeline.
    fn paren_value(&self, group: &Step) -> Result<Value> {
        let Step::Group {
            items, commas, pos, ..
        } = group
        else {
            return Err(Error::internal("paren_value on a non-group step"));
        };
        if is_empty_pipeline(items, *commas) {
            return Ok(Value::Qry(Query::new()));
        }
        if *commas > 0 || items.is_empty() {
            return Ok(Value::List(self.list_items(items, *pos)?));
        }
        match items[0].as_slice() {
            [Step::Prim { prim, pos }] => self.prim(prim, *pos),
            run => Ok(Value::Qry(self.pipeline(run)?)),
        }
    }

    /// Items of a comma-separated group. A single trailing comma is allowed.
    fn list_items(&self, items: &[Vec<Step>], pos: usize) -> Result<Vec<Value>> {
        let mut items = items;
        if let Some((last, rest)) = items.split_last() {
            if last.is_empty() {
                items = rest;
            }
        }
        items
            .iter()
            .map(|run| {
                if run.is_empty() {
                    Err(self.error_at(pos, "empty list item"))
                } else {
                    self.run_value(run)
                }
            })
            .collect()
    }

    /// A group read as a list regardless of commas.
    fn forced_list(&self, step: &Step) -> Result<Vec<Value>> {
        match step {
            Step::Group { items, pos, .. } => self.list_items(items, *pos),
            other => Ok(vec![self.atom_value(other)?]),
        }
    }

    // ---- pipelines ----

    /// Paren group used as a pipeline step.
    fn nested(&self, items: &[Vec<Step>], commas: usize, pos: usize) -> Result<Segment> {
        if is_empty_pipeline(items, commas) {
            return Ok(Segment::Qry(Query::new()));
        }
        Ok(Segment::Qry(self.group_pipeline(items, commas, pos)?))
    }

    fn group_pipeline(&self, items: &[Vec<Step>], commas: usize, pos: usize) -> Result<Query> {
        if commas > 0 {
            return Err(self.error_at(pos, "a list cannot be used as a pipeline"));
        }
        match items.first() {
            None => Ok(Query::new()),
            Some(run) => self.pipeline(run),
        }
    }

    /// Build a pipeline from a run: base constructor for the first step,
    /// bound constructors for the rest.
    fn pipeline(&self, run: &[Step]) -> Result<Query> {
        let mut query = Query::new();
        for step in run {
            match step {
                Step::Prim { pos, .. } => {
                    return Err(self.error_at(*pos, "a primitive cannot be chained into a pipeline"));
                }
                Step::Group {
                    bracket,
                    items,
                    commas,
                    pos,
                } => {
                    let seg = match bracket {
                        Bracket::Paren => self.nested(items, *commas, *pos)?,
                        Bracket::Brace => Segment::Sel(self.group_pipeline(items, *commas, *pos)?),
                        Bracket::Square => Segment::Arr(self.list_items(items, *pos)?),
                    };
                    query.push(seg);
                }
                Step::Seg { kind, args, pos } => self.bind_segment(&mut query, *kind, args, *pos)?,
            }
        }
        Ok(query)
    }

    fn bind_segment(&self, query: &mut Query, kind: SegmentKind, args: &[Step], pos: usize) -> Result<()> {
        match kind {
            SegmentKind::Not => query.push(Segment::Not),
            SegmentKind::Met => {
                let name = match args.first() {
                    Some(Step::Prim {
                        prim: Prim::Word(w) | Prim::Quoted(w),
                        ..
                    }) => w.clone(),
                    _ => return Err(self.error_at(pos, "meta segment expects an operation name")),
                };
                let margs = match args.get(1) {
                    Some(group) => self.forced_list(group)?,
                    None => Vec::new(),
                };
                query.push(Segment::Met { name, args: margs });
            }
            SegmentKind::Trm => match args.first() {
                Some(Step::Group {
                    items, commas, pos, ..
                }) if *commas > 0 => {
                    let vals = self.list_items(items, *pos)?;
                    match <[Value; 2]>::try_from(vals) {
                        Ok([cond, default]) => query.push(Segment::Trm { cond, default }),
                        Err(_) => {
                            return Err(
                                self.error_at(*pos, "terminate expects (condition,default)")
                            )
                        }
                    }
                }
                // A group without commas after a bare &TRM is a nested pipeline.
                Some(Step::Group {
                    items, commas, pos, ..
                }) => {
                    query.push(Segment::Trm {
                        cond: Value::Null,
                        default: Value::Null,
                    });
                    query.push(self.nested(items, *commas, *pos)?);
                }
                _ => query.push(Segment::Trm {
                    cond: Value::Null,
                    default: Value::Null,
                }),
            },
            SegmentKind::Arr | SegmentKind::Zip | SegmentKind::Eqa => {
                let arg = args
                    .first()
                    .ok_or_else(|| self.error_at(pos, format!("{} expects a list", kind.name())))?;
                let items = self.forced_list(arg)?;
                query.push(match kind {
                    SegmentKind::Arr => Segment::Arr(items),
                    SegmentKind::Zip => Segment::Zip(items),
                    _ => Segment::Eqa(items),
                });
            }
            SegmentKind::Sel | SegmentKind::Qry => {
                let sub = match args.first() {
                    Some(Step::Group {
                        items, commas, pos, ..
                    }) => self.group_pipeline(items, *commas, *pos)?,
                    _ => {
                        return Err(
                            self.error_at(pos, format!("{} expects a pipeline", kind.name()))
                        )
                    }
                };
                query.push(if kind == SegmentKind::Sel {
                    Segment::Sel(sub)
                } else {
                    Segment::Qry(sub)
                });
            }
            _ => {
                let arg = args.first().ok_or_else(|| {
                    self.error_at(pos, format!("segment {} expects an argument", kind.name()))
                })?;
                let value = self.atom_value(arg)?;
                match Segment::with_value(kind, value) {
                    Some(seg) => query.push(seg),
                    None => return Err(Error::internal(format!("unhandled segment {}", kind.name()))),
                }
            }
        }
        Ok(())
    }

    // ---- commands ----

    fn command(&self, step: &CmdStep) -> Result<Command> {
        let args = step
            .args
            .iter()
            .map(|run| self.run_value(run))
            .collect::<Result<Vec<_>>>()?;
        Command::from_parts(step.kind, args)
    }

    fn program(&self, program: &Program) -> Result<Command> {
        let mut commands = Vec::new();
        let mut compound = false;
        for step in &program.commands {
            if step.kind == CommandKind::Cmp {
                if !step.args.is_empty() {
                    return Err(Error::Arity {
                        command: "CMP".into(),
                        expected: "0".into(),
                        actual: step.args.len(),
                    });
                }
                compound = true;
                continue;
            }
            commands.push(self.command(step)?);
        }
        if !compound && commands.len() == 1 {
            if let Some(cmd) = commands.pop() {
                return Ok(cmd);
            }
        }
        Ok(Command::cmp(commands))
    }
}

/// Reduce one nested program into a command.
pub fn reduce(program: &Program) -> Result<Command> {
    let reducer = Reducer {
        tokens: &program.tokens,
    };
    if program.commands.is_empty() {
        return Err(Error::parse("program contains no command"));
    }
    reducer.program(program)
}

/// Combine commands into one compound, flattening nested compounds.
pub fn compound(commands: Vec<Command>) -> Command {
    Command::cmp(commands)
}

#[cfg(test)]
mod tests {
    use super::super::{nest::nest, token::tokenize};
    use super::*;

    fn des(input: &str) -> Result<Command> {
        reduce(&nest(tokenize(input)?)?)
    }

    #[test]
    fn test_word_values() {
        assert_eq!(word_value("12"), Ok(Value::Int(12)));
        assert_eq!(word_value("-3"), Ok(Value::Int(-3)));
        assert_eq!(word_value("1.5"), Ok(Value::Float(1.5)));
        assert_eq!(word_value("2E3"), Ok(Value::Float(2000.0)));
        assert_eq!(word_value("TRUE"), Ok(Value::Bool(true)));
        assert_eq!(word_value("null"), Ok(Value::Null));
        assert_eq!(word_value("e5"), Ok(Value::from("e5")));
        assert_eq!(word_value("*"), Ok(Value::from("*")));
        assert!(word_value("1-2").is_err());
    }

    #[test]
    fn test_get_object_path() {
        let cmd = des("GET #1/name").unwrap();
        assert_eq!(cmd, Command::get(Query::new().obj(1).pth("name")));
    }

    #[test]
    fn test_set_with_quoted_value() {
        let cmd = des("SET #1 name 'bar'").unwrap();
        assert_eq!(cmd, Command::set(Value::Obj(ObjId(1)), "name", "bar"));
    }

    #[test]
    fn test_lone_object_reference_is_handle() {
        assert_eq!(des("GET #7").unwrap(), Command::get(Value::Obj(ObjId(7))));
        assert_eq!(des("GET (#7)").unwrap(), Command::get(Query::new().obj(7)));
        assert_eq!(
            des("GET #'7'").unwrap(),
            Command::get(Query::new().obj("7"))
        );
        let q = Query::new().pth("link").equ(Value::Obj(ObjId(3)));
        assert_eq!(des("GET /link=#3").unwrap(), Command::get(q));
        assert!(des("GET #99999999999999999999").is_err());
    }

    #[test]
    fn test_empty_pipeline() {
        assert_eq!(des("GET (())").unwrap(), Command::get(Query::new()));
        assert_eq!(des("GET ()").unwrap(), Command::get(Value::List(vec![])));
        assert_eq!(
            des("GET ((()))").unwrap(),
            Command::get(Query::new().qry(Query::new()))
        );
        assert_eq!(
            des("GET #1&TRM(())").unwrap(),
            Command::get(Query::new().obj(1).trm(Value::Null, Value::Null).qry(Query::new()))
        );
    }

    #[test]
    fn test_selector_and_index() {
        let cmd = des("GET #1/children{/name=foo}:0").unwrap();
        let expected = Query::new()
            .obj(1)
            .pth("children")
            .sel(Query::new().pth("name").equ("foo"))
            .idx(0);
        assert_eq!(cmd, Command::get(expected));
    }

    #[test]
    fn test_lists() {
        assert_eq!(
            des("GET (1,2)").unwrap(),
            Command::get(Value::List(vec![1.into(), 2.into()]))
        );
        assert_eq!(
            des("GET (1,)").unwrap(),
            Command::get(Value::List(vec![1.into()]))
        );
        assert_eq!(des("GET ()").unwrap(), Command::get(Value::List(vec![])));
        assert_eq!(des("GET (7)").unwrap(), Command::get(Value::Int(7)));
    }

    #[test]
    fn test_array_and_zip() {
        let cmd = des("GET [#1,(#2)]").unwrap();
        let q = Query::new().arr(vec![
            Value::Obj(ObjId(1)),
            Query::new().obj(2).into(),
        ]);
        assert_eq!(cmd, Command::get(q));

        let cmd = des("GET #1&ZIP(/a,/b)").unwrap();
        let q = Query::new().obj(1).zip(vec![
            Query::new().pth("a").into(),
            Query::new().pth("b").into(),
        ]);
        assert_eq!(cmd, Command::get(q));
    }

    #[test]
    fn test_meta_and_terminate() {
        let cmd = des("GET #1@PAR&TRM(null,0)@LEN").unwrap();
        let q = Query::new()
            .obj(1)
            .met("PAR", vec![])
            .trm(Value::Null, 0)
            .met("LEN", vec![]);
        assert_eq!(cmd, Command::get(q));
    }

    #[test]
    fn test_multiple_commands_form_compound() {
        let cmd = des("GET #1 GET #2").unwrap();
        assert_eq!(
            cmd,
            Command::cmp(vec![
                Command::get(Value::Obj(ObjId(1))),
                Command::get(Value::Obj(ObjId(2))),
            ])
        );
        let cmd = des("CMP STS").unwrap();
        assert_eq!(cmd, Command::cmp(vec![Command::Sts]));
    }

    #[test]
    fn test_arity_errors_name_command() {
        let err = des("SET #1 name").unwrap_err();
        assert!(matches!(err, Error::Arity { ref command, .. } if command == "SET"));
        let err = des("STS 1").unwrap_err();
        assert!(matches!(err, Error::Arity { .. }));
    }

    #[test]
    fn test_primitive_cannot_be_chained() {
        let err = des("GET foo/bar").unwrap_err();
        assert!(err.to_string().contains("cannot be chained"));
    }

    #[test]
    fn test_compound_flattens() {
        let c = compound(vec![Command::cmp(vec![Command::Sts]), Command::Gaa]);
        assert_eq!(c, Command::cmp(vec![Command::Sts, Command::Gaa]));
    }
}
