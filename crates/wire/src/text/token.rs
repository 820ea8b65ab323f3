//! Tokenizer for the text protocol
//!
//! Splits wire text into [`Token`]s:
//! - quoted strings (`'…'` or `"…"`, backslash escapes the next character)
//! - bare words, with three-letter command mnemonics promoted to [`Tok::Cmd`]
//! - single-character segment symbols and `&`-escaped segment codes
//! - brackets, commas and program separators (`;`, CR, LF)
//! - runs of whitespace collapsed into one [`Tok::Space`]

use modelbus_core::{CommandKind, Error, Result, SegmentKind};

/// Bracket flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    /// `( )` nested pipeline or value list
    Paren,
    /// `{ }` selector
    Brace,
    /// `[ ]` array
    Square,
}

impl Bracket {
    pub(crate) fn open(self) -> char {
        match self {
            Bracket::Paren => '(',
            Bracket::Brace => '{',
            Bracket::Square => '[',
        }
    }

    pub(crate) fn close(self) -> char {
        match self {
            Bracket::Paren => ')',
            Bracket::Brace => '}',
            Bracket::Square => ']',
        }
    }
}

/// Token kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    /// Quoted string, unescaped
    Quoted(String),
    /// Bare word (number, bool, null or unquoted string)
    Word(String),
    /// Command mnemonic
    Cmd(CommandKind),
    /// Segment symbol or `&` code
    Seg(SegmentKind),
    /// Opening bracket
    Open(Bracket),
    /// Closing bracket
    Close(Bracket),
    /// `,`
    Comma,
    /// Collapsed whitespace
    Space,
    /// Program separator
    Sep,
}

/// A token together with the source text it was read from.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// Kind and payload
    pub tok: Tok,
    /// Source text
    pub text: String,
}

impl Token {
    fn new(tok: Tok, text: impl Into<String>) -> Self {
        Self {
            tok,
            text: text.into(),
        }
    }
}

/// Characters that end a bare word.
pub(crate) fn is_reserved(c: char) -> bool {
    matches!(
        c,
        '#' | '$'
            | '/'
            | '!'
            | '?'
            | '@'
            | ':'
            | '='
            | '~'
            | '<'
            | '>'
            | '&'
            | '('
            | ')'
            | '{'
            | '}'
            | '['
            | ']'
            | ','
            | ';'
            | '\''
            | '"'
            | '\\'
    ) || c.is_whitespace()
}

fn push_word(tokens: &mut Vec<Token>, word: &mut String) {
    if word.is_empty() {
        return;
    }
    let text = std::mem::take(word);
    let tok = if text.len() == 3 && text.chars().all(|c| c.is_ascii_alphabetic()) {
        match CommandKind::from_mnemonic(&text) {
            Some(kind) => Tok::Cmd(kind),
            None => Tok::Word(text.clone()),
        }
    } else {
        Tok::Word(text.clone())
    };
    tokens.push(Token::new(tok, text));
}

/// Split a payload into independent programs at `;`, CR and LF.
///
/// Separators inside quoted strings or brackets do not split. Blank programs
/// are dropped.
pub fn split_programs(input: &str) -> Vec<&str> {
    let mut programs = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    let mut start = 0;
    for (i, c) in input.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '{' | '[' => depth += 1,
            ')' | '}' | ']' => depth = depth.saturating_sub(1),
            ';' | '\r' | '\n' if depth == 0 => {
                programs.push(&input[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    programs.push(&input[start..]);
    programs
        .into_iter()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split `input` into tokens.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens: Vec<Token> = Vec::new();
    let mut word = String::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];

        if c == '\'' || c == '"' {
            push_word(&mut tokens, &mut word);
            let quote = c;
            let start = i;
            let mut s = String::new();
            i += 1;
            loop {
                match chars.get(i) {
                    None => {
                        return Err(Error::parse(format!(
                            "unterminated string starting at character {start}"
                        )))
                    }
                    Some('\\') => {
                        match chars.get(i + 1) {
                            Some(&esc) => s.push(esc),
                            None => {
                                return Err(Error::parse(format!(
                                    "dangling escape in string starting at character {start}"
                                )))
                            }
                        }
                        i += 2;
                    }
                    Some(&ch) if ch == quote => {
                        i += 1;
                        break;
                    }
                    Some(&ch) => {
                        s.push(ch);
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().collect();
            tokens.push(Token::new(Tok::Quoted(s), text));
            continue;
        }

        if c == ';' || c == '\r' || c == '\n' {
            push_word(&mut tokens, &mut word);
            if !matches!(tokens.last(), Some(Token { tok: Tok::Sep, .. })) {
                // Whitespace directly before a separator carries no meaning.
                if matches!(tokens.last(), Some(Token { tok: Tok::Space, .. })) {
                    tokens.pop();
                }
                tokens.push(Token::new(Tok::Sep, c.to_string()));
            }
            i += 1;
            continue;
        }

        if c.is_whitespace() {
            push_word(&mut tokens, &mut word);
            match tokens.last() {
                Some(Token {
                    tok: Tok::Space | Tok::Sep,
                    ..
                })
                | None => {}
                Some(_) => tokens.push(Token::new(Tok::Space, " ")),
            }
            i += 1;
            continue;
        }

        if c == '&' {
            push_word(&mut tokens, &mut word);
            let code: String = chars.iter().skip(i + 1).take(3).collect();
            let kind = if code.chars().count() == 3 {
                SegmentKind::from_name(&code)
            } else {
                None
            };
            match kind {
                Some(kind) => tokens.push(Token::new(Tok::Seg(kind), format!("&{}", code))),
                None => {
                    return Err(Error::UnknownSegment {
                        name: format!("&{code}"),
                    })
                }
            }
            i += 4;
            continue;
        }

        let single = match c {
            '(' => Some(Tok::Open(Bracket::Paren)),
            '{' => Some(Tok::Open(Bracket::Brace)),
            '[' => Some(Tok::Open(Bracket::Square)),
            ')' => Some(Tok::Close(Bracket::Paren)),
            '}' => Some(Tok::Close(Bracket::Brace)),
            ']' => Some(Tok::Close(Bracket::Square)),
            ',' => Some(Tok::Comma),
            _ => SegmentKind::from_char(c).map(Tok::Seg),
        };
        match single {
            Some(tok) => {
                push_word(&mut tokens, &mut word);
                tokens.push(Token::new(tok, c.to_string()));
            }
            None if c == '\\' => {
                return Err(Error::parse(format!(
                    "escape outside of a quoted string at character {i}"
                )))
            }
            None => word.push(c),
        }
        i += 1;
    }
    push_word(&mut tokens, &mut word);

    while matches!(
        tokens.last(),
        Some(Token {
            tok: Tok::Space | Tok::Sep,
            ..
        })
    ) {
        tokens.pop();
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Tok> {
        tokenize(input).unwrap().into_iter().map(|t| t.tok).collect()
    }

    #[test]
    fn test_get_object_path() {
        assert_eq!(
            kinds("GET #1/name"),
            vec![
                Tok::Cmd(CommandKind::Get),
                Tok::Space,
                Tok::Seg(SegmentKind::Obj),
                Tok::Word("1".into()),
                Tok::Seg(SegmentKind::Pth),
                Tok::Word("name".into()),
            ]
        );
    }

    #[test]
    fn test_mnemonics_case_insensitive_whole_word() {
        assert_eq!(kinds("get")[0], Tok::Cmd(CommandKind::Get));
        assert_eq!(kinds("getter")[0], Tok::Word("getter".into()));
    }

    #[test]
    fn test_whitespace_collapses() {
        assert_eq!(
            kinds("STS    \t  STS"),
            vec![Tok::Cmd(CommandKind::Sts), Tok::Space, Tok::Cmd(CommandKind::Sts)]
        );
    }

    #[test]
    fn test_quoted_strings_with_escapes() {
        assert_eq!(kinds(r#"'it\'s'"#), vec![Tok::Quoted("it's".into())]);
        assert_eq!(kinds("\"a;b\""), vec![Tok::Quoted("a;b".into())]);
    }

    #[test]
    fn test_ampersand_codes() {
        assert_eq!(kinds("&not")[0], Tok::Seg(SegmentKind::Not));
        assert_eq!(kinds("&OBJ")[0], Tok::Seg(SegmentKind::Obj));
        assert!(matches!(
            tokenize("&XYZ"),
            Err(Error::UnknownSegment { .. })
        ));
    }

    #[test]
    fn test_separators() {
        assert_eq!(
            kinds("STS ;\n STS\n"),
            vec![Tok::Cmd(CommandKind::Sts), Tok::Sep, Tok::Cmd(CommandKind::Sts)]
        );
    }

    #[test]
    fn test_split_programs() {
        assert_eq!(split_programs("STS;;GET #1\n"), vec!["STS", "GET #1"]);
        assert_eq!(split_programs("GET 'a;b'; STS"), vec!["GET 'a;b'", "STS"]);
        assert_eq!(split_programs("GET (1;2)"), vec!["GET (1;2)"]);
        assert!(split_programs("  ;\r\n").is_empty());
    }

    #[test]
    fn test_unterminated_string() {
        assert!(matches!(tokenize("GET 'abc"), Err(Error::Parse { .. })));
    }
}
