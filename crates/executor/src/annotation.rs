//! Parameter annotations of imported scripts
//!
//! Grammar, every part but the type optional:
//!
//! ```text
//! <type>[<min>..<max>]{<choice>,<choice>:<description>,...}=<default>:<description>
//! ```
//!
//! Multiplicity is `n` (exactly n), `*` (0 to unbounded) or `min..max` where
//! `max` may be `*`. A backslash makes the next character literal.

use crate::action::{Choice, ParamSpec, UNBOUNDED};

/// Annotation parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnnotationError {
    /// `[` or `{` without its closing bracket
    #[error("unclosed '{open}' in annotation {annotation:?}")]
    Unclosed { open: char, annotation: String },

    /// Multiplicity is not `n`, `*` or `min..max`
    #[error("invalid multiplicity {text:?} in annotation {annotation:?}")]
    Multiplicity { text: String, annotation: String },

    /// A section opener in an unexpected place
    #[error("unexpected '{found}' at position {position} in annotation {annotation:?}")]
    Unexpected {
        found: char,
        position: usize,
        annotation: String,
    },

    /// Backslash as the last character
    #[error("dangling escape in annotation {annotation:?}")]
    DanglingEscape { annotation: String },
}

/// A character and whether it was escaped.
type Lexeme = (char, bool);

fn lex(annotation: &str) -> Result<Vec<Lexeme>, AnnotationError> {
    let mut out = Vec::with_capacity(annotation.len());
    let mut chars = annotation.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next() {
                Some(next) => out.push((next, true)),
                None => {
                    return Err(AnnotationError::DanglingEscape {
                        annotation: annotation.to_string(),
                    })
                }
            }
        } else {
            out.push((c, false));
        }
    }
    Ok(out)
}

fn text(lexemes: &[Lexeme]) -> String {
    lexemes.iter().map(|(c, _)| *c).collect()
}

/// Split at every unescaped `sep`.
fn split<'a>(lexemes: &'a [Lexeme], sep: char) -> Vec<&'a [Lexeme]> {
    lexemes.split(|&(c, escaped)| c == sep && !escaped).collect()
}

/// Position of the first unescaped `target` at or after `from`.
fn find(lexemes: &[Lexeme], from: usize, target: char) -> Option<usize> {
    lexemes[from..]
        .iter()
        .position(|&(c, escaped)| c == target && !escaped)
        .map(|p| p + from)
}

fn multiplicity(spec: &str, annotation: &str) -> Result<(i64, i64), AnnotationError> {
    let invalid = || AnnotationError::Multiplicity {
        text: spec.to_string(),
        annotation: annotation.to_string(),
    };
    let bound = |s: &str| s.trim().parse::<i64>().map_err(|_| invalid());
    match spec.trim() {
        "*" => Ok((0, UNBOUNDED)),
        s => match s.split_once("..") {
            Some((min, "*")) => Ok((bound(min)?, UNBOUNDED)),
            Some((min, max)) => Ok((bound(min)?, bound(max)?)),
            None => {
                let n = bound(s)?;
                Ok((n, n))
            }
        },
    }
}

/// Parse the annotation of parameter `name`.
pub fn parse_annotation(name: &str, annotation: &str) -> Result<ParamSpec, AnnotationError> {
    let lexemes = lex(annotation)?;
    let mut param = ParamSpec::new(name, "*");

    let is_opener = |&(c, escaped): &Lexeme| !escaped && matches!(c, '[' | '{' | '=' | ':');
    let type_end = lexemes.iter().position(is_opener).unwrap_or(lexemes.len());
    let type_name = text(&lexemes[..type_end]).trim().to_string();
    if !type_name.is_empty() {
        param.type_name = type_name;
    }

    // Sections must appear in grammar order: [ { = :
    let mut pos = type_end;
    let mut rank = 0;
    while pos < lexemes.len() {
        let (c, _) = lexemes[pos];
        let section_rank = match c {
            '[' => 1,
            '{' => 2,
            '=' => 3,
            _ => 4,
        };
        if section_rank <= rank || !is_opener(&lexemes[pos]) {
            return Err(AnnotationError::Unexpected {
                found: c,
                position: pos,
                annotation: annotation.to_string(),
            });
        }
        rank = section_rank;
        match c {
            '[' | '{' => {
                let close = if c == '[' { ']' } else { '}' };
                let end = find(&lexemes, pos + 1, close).ok_or_else(|| {
                    AnnotationError::Unclosed {
                        open: c,
                        annotation: annotation.to_string(),
                    }
                })?;
                let body = &lexemes[pos + 1..end];
                if c == '[' {
                    let (min, max) = multiplicity(&text(body), annotation)?;
                    param.min = min;
                    param.max = max;
                } else if !body.is_empty() {
                    param.choices = split(body, ',')
                        .into_iter()
                        .map(|choice| match find(choice, 0, ':') {
                            Some(colon) => Choice {
                                value: text(&choice[..colon]).trim().to_string(),
                                description: text(&choice[colon + 1..]).trim().to_string(),
                            },
                            None => Choice::new(text(choice).trim()),
                        })
                        .collect();
                }
                pos = end + 1;
            }
            '=' => {
                let end = find(&lexemes, pos + 1, ':').unwrap_or(lexemes.len());
                param.default = text(&lexemes[pos + 1..end]);
                pos = end;
            }
            _ => {
                param.description = text(&lexemes[pos + 1..]);
                pos = lexemes.len();
            }
        }
    }
    Ok(param)
}
