//! Step nesting
//!
//! Turns the flat token stream of one payload into a tree of [`Step`]s. Every
//! command and segment token opens an implicit step that closes either at an
//! explicit bracket or at the next sibling on the same level; this is what
//! lets `#20/name/first` chain without brackets.
//!
//! Bracket errors are reported here, with a window of tokens around the fault.

use modelbus_core::{CommandKind, Error, Result, SegmentKind};

use super::token::{Bracket, Tok, Token};

/// Number of tokens shown on either side of a fault.
const CONTEXT_TOKENS: usize = 3;

/// Leaf value as written.
#[derive(Debug, Clone, PartialEq)]
pub enum Prim {
    /// Quoted string
    Quoted(String),
    /// Bare word, interpreted during reduction
    Word(String),
}

/// Node of the step tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Primitive leaf
    Prim {
        /// Leaf value
        prim: Prim,
        /// Token index
        pos: usize,
    },
    /// Explicit bracket group; `items` are the comma-separated runs
    Group {
        /// Bracket flavor
        bracket: Bracket,
        /// Comma-separated runs
        items: Vec<Vec<Step>>,
        /// Number of top-level commas
        commas: usize,
        /// Token index of the opening bracket
        pos: usize,
    },
    /// Segment symbol with the atoms it consumed
    Seg {
        /// Segment kind
        kind: SegmentKind,
        /// Consumed atoms
        args: Vec<Step>,
        /// Token index
        pos: usize,
    },
}

/// A command token with its space-separated argument runs.
#[derive(Debug, Clone, PartialEq)]
pub struct CmdStep {
    /// Command kind
    pub kind: CommandKind,
    /// Argument runs
    pub args: Vec<Vec<Step>>,
    /// Token index
    pub pos: usize,
}

/// One top-level program: the commands between two separators.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// Commands in order
    pub commands: Vec<CmdStep>,
    /// Tokens of the program, kept for error context
    pub tokens: Vec<Token>,
}

/// Render the tokens around `idx` as `...a b c -->x<-- d e f...`.
pub(crate) fn context(tokens: &[Token], idx: usize) -> String {
    let render = |ts: &[Token]| ts.iter().map(|t| t.text.as_str()).collect::<Vec<_>>().join(" ");
    let start = idx.saturating_sub(CONTEXT_TOKENS);
    let end = (idx + 1 + CONTEXT_TOKENS).min(tokens.len());
    let before = render(&tokens[start..idx.min(tokens.len())]);
    let fault = tokens.get(idx).map(|t| t.text.as_str()).unwrap_or("<end>");
    let after = if idx + 1 < end {
        render(&tokens[idx + 1..end])
    } else {
        String::new()
    };
    format!("...{before} -->{fault}<-- {after}...")
}

struct Nester<'a> {
    tokens: &'a [Token],
    idx: usize,
}

impl<'a> Nester<'a> {
    fn peek(&self) -> Option<&'a Tok> {
        self.tokens.get(self.idx).map(|t| &t.tok)
    }

    fn error_at(&self, idx: usize, what: impl std::fmt::Display) -> Error {
        Error::parse(format!(
            "{what} at token {idx}: {}",
            context(self.tokens, idx)
        ))
    }

    /// Read one atom: a primitive, a bracket group or a segment.
    /// Returns `None` if the current token does not start an atom.
    fn atom(&mut self) -> Result<Option<Step>> {
        let pos = self.idx;
        let step = match self.peek() {
            Some(Tok::Quoted(s)) => {
                self.idx += 1;
                Step::Prim {
                    prim: Prim::Quoted(s.clone()),
                    pos,
                }
            }
            Some(Tok::Word(w)) => {
                self.idx += 1;
                Step::Prim {
                    prim: Prim::Word(w.clone()),
                    pos,
                }
            }
            Some(Tok::Open(bracket)) => {
                let bracket = *bracket;
                self.idx += 1;
                self.group(bracket, pos)?
            }
            Some(Tok::Seg(kind)) => {
                let kind = *kind;
                self.idx += 1;
                self.segment(kind, pos)?
            }
            _ => return Ok(None),
        };
        Ok(Some(step))
    }

    /// Atom directly following a segment symbol. A command mnemonic in this
    /// position is read as a plain word; an object segment is an object
    /// handle operand (`=#3`).
    fn segment_operand(&mut self) -> Result<Option<Step>> {
        let pos = self.idx;
        match self.tokens.get(pos) {
            Some(Token {
                tok: Tok::Cmd(_),
                text,
            }) => {
                self.idx += 1;
                Ok(Some(Step::Prim {
                    prim: Prim::Word(text.clone()),
                    pos,
                }))
            }
            Some(Token {
                tok:
                    Tok::Quoted(_)
                    | Tok::Word(_)
                    | Tok::Open(Bracket::Paren)
                    | Tok::Seg(SegmentKind::Obj),
                ..
            }) => self.atom(),
            _ => Ok(None),
        }
    }

    fn segment(&mut self, kind: SegmentKind, pos: usize) -> Result<Step> {
        let mut args = Vec::new();
        match kind {
            SegmentKind::Not => {}
            SegmentKind::Met => {
                match self.segment_operand()? {
                    Some(name @ Step::Prim { .. }) => args.push(name),
                    _ => return Err(self.error_at(pos, "meta segment expects an operation name")),
                }
                if let Some(Tok::Open(Bracket::Paren)) = self.peek() {
                    let gpos = self.idx;
                    self.idx += 1;
                    args.push(self.group(Bracket::Paren, gpos)?);
                }
            }
            SegmentKind::Trm => {
                if let Some(Tok::Open(Bracket::Paren)) = self.peek() {
                    let gpos = self.idx;
                    self.idx += 1;
                    args.push(self.group(Bracket::Paren, gpos)?);
                }
            }
            _ => match self.segment_operand()? {
                Some(arg) => args.push(arg),
                None => {
                    return Err(self.error_at(
                        pos,
                        format!("segment {} expects an argument", kind.name()),
                    ))
                }
            },
        }
        Ok(Step::Seg { kind, args, pos })
    }

    fn group(&mut self, bracket: Bracket, pos: usize) -> Result<Step> {
        let mut items: Vec<Vec<Step>> = Vec::new();
        let mut run: Vec<Step> = Vec::new();
        let mut commas = 0;
        loop {
            match self.peek() {
                None => {
                    return Err(self.error_at(
                        pos,
                        format!("expected {} but reached end of code", bracket.close()),
                    ))
                }
                Some(Tok::Close(b)) if *b == bracket => {
                    self.idx += 1;
                    if commas > 0 || !run.is_empty() {
                        items.push(run);
                    }
                    return Ok(Step::Group {
                        bracket,
                        items,
                        commas,
                        pos,
                    });
                }
                Some(Tok::Close(b)) => {
                    let b = *b;
                    return Err(self.error_at(
                        self.idx,
                        format!("expected {}, got {}", bracket.close(), b.close()),
                    ));
                }
                Some(Tok::Comma) => {
                    self.idx += 1;
                    commas += 1;
                    items.push(std::mem::take(&mut run));
                }
                Some(Tok::Space) => self.idx += 1,
                Some(Tok::Sep) => {
                    return Err(self.error_at(self.idx, "separator inside brackets"));
                }
                Some(Tok::Cmd(_)) => {
                    return Err(self.error_at(self.idx, "command inside brackets"));
                }
                Some(_) => match self.atom()? {
                    Some(step) => run.push(step),
                    None => return Err(self.error_at(self.idx, "unexpected token")),
                },
            }
        }
    }

    fn program(&mut self) -> Result<Vec<CmdStep>> {
        let mut commands: Vec<CmdStep> = Vec::new();
        while let Some(tok) = self.peek() {
            match tok {
                Tok::Space => {
                    self.idx += 1;
                }
                Tok::Cmd(kind) => {
                    let kind = *kind;
                    let pos = self.idx;
                    self.idx += 1;
                    let args = self.command_args()?;
                    commands.push(CmdStep { kind, args, pos });
                }
                Tok::Close(b) => {
                    let b = *b;
                    return Err(self.error_at(
                        self.idx,
                        format!("unexpected stopping symbol {}", b.close()),
                    ));
                }
                _ => return Err(self.error_at(self.idx, "expected a command")),
            }
        }
        Ok(commands)
    }

    fn command_args(&mut self) -> Result<Vec<Vec<Step>>> {
        let mut args = Vec::new();
        loop {
            match self.peek() {
                Some(Tok::Space) => {
                    self.idx += 1;
                }
                None | Some(Tok::Cmd(_)) | Some(Tok::Sep) => return Ok(args),
                Some(Tok::Close(b)) => {
                    let b = *b;
                    return Err(self.error_at(
                        self.idx,
                        format!("unexpected stopping symbol {}", b.close()),
                    ));
                }
                Some(Tok::Comma) => {
                    return Err(self.error_at(self.idx, "unexpected , outside of brackets"));
                }
                Some(_) => {
                    let mut run = Vec::new();
                    while let Some(step) = self.atom()? {
                        run.push(step);
                    }
                    args.push(run);
                }
            }
        }
    }
}

/// Nest the tokens of one program.
pub fn nest(tokens: Vec<Token>) -> Result<Program> {
    let commands = {
        let mut nester = Nester {
            tokens: &tokens,
            idx: 0,
        };
        nester.program()?
    };
    Ok(Program { commands, tokens })
}

#[cfg(test)]
mod tests {
    use super::super::token::tokenize;
    use super::*;

    fn program(input: &str) -> Program {
        nest(tokenize(input).unwrap()).unwrap()
    }

    #[test]
    fn test_chained_segments_form_one_run() {
        let p = program("GET #1/name");
        assert_eq!(p.commands.len(), 1);
        assert_eq!(p.commands[0].args.len(), 1);
        assert_eq!(p.commands[0].args[0].len(), 2);
    }

    #[test]
    fn test_space_separated_args() {
        let p = program("SET #1 name 'bar'");
        assert_eq!(p.commands[0].args.len(), 3);
    }

    #[test]
    fn test_chained_commands_in_one_program() {
        let p = program("GET #1 GET #2");
        assert_eq!(p.commands.len(), 2);
    }

    #[test]
    fn test_group_items() {
        let p = program("GET (1, 2,3)");
        match &p.commands[0].args[0][0] {
            Step::Group { items, commas, .. } => {
                assert_eq!(items.len(), 3);
                assert_eq!(*commas, 2);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_meta_with_args() {
        let p = program("GET #1@IDX(2)");
        match &p.commands[0].args[0][1] {
            Step::Seg { kind, args, .. } => {
                assert_eq!(*kind, SegmentKind::Met);
                assert_eq!(args.len(), 2);
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_command_word_after_segment() {
        let p = program("GET /GET");
        match &p.commands[0].args[0][0] {
            Step::Seg { args, .. } => {
                assert_eq!(
                    args[0],
                    Step::Prim {
                        prim: Prim::Word("GET".into()),
                        pos: 3
                    }
                );
            }
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_unexpected_stopping_symbol_has_context() {
        let err = nest(tokenize("GET #1/name)").unwrap()).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("unexpected stopping symbol )"));
        assert!(msg.contains("-->)<--"));
    }

    #[test]
    fn test_mismatched_bracket() {
        let err = nest(tokenize("GET {/a=1)").unwrap()).unwrap_err();
        assert!(err.to_string().contains("expected }, got )"));
    }

    #[test]
    fn test_unclosed_bracket() {
        let err = nest(tokenize("GET (1,2").unwrap()).unwrap_err();
        assert!(err.to_string().contains("reached end of code"));
    }

    #[test]
    fn test_separator_inside_brackets() {
        let err = nest(tokenize("GET (1;2)").unwrap()).unwrap_err();
        assert!(err.to_string().contains("separator inside brackets"));
    }
}
