//! # modelbus-wire
//!
//! Text encoding of modelbus commands, queries and values.
//!
//! ```text
//! GET #1/name                      // object 1, feature "name"
//! SET #1 name 'bar'                // quoted string argument
//! GET !Node{/size&GRE 3}:0         // instances of Node with size > 3, first
//! STS; CHG 0                       // two programs, combined into one CMP
//! ```
//!
//! Segments own one symbol (`# $ / ! ? @ : = ~ < >`) or an `&`-escaped
//! three-letter code; commands are three-letter mnemonics followed by
//! space-separated arguments. `;`, CR and LF separate top-level programs.
//!
//! [`ser`] and [`des`] are inverses modulo whitespace and optional outer
//! parentheses.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod text;

use modelbus_core::{Command, Error, Query, Result, Value};
use tracing::debug;

/// Version of the mnemonic and symbol tables.
pub const PROTOCOL_VERSION: &str = "2.0";

/// Encode a command.
pub fn ser(cmd: &Command) -> String {
    text::encode::encode_command(cmd)
}

/// Encode a value in value position.
pub fn ser_value(value: &Value) -> String {
    text::encode::encode_value(value)
}

/// Encode a query without surrounding parentheses.
pub fn ser_query(query: &Query) -> String {
    text::encode::encode_query(query)
}

fn des_program(program: &str) -> Result<Command> {
    let tokens = text::token::tokenize(program)?;
    let nested = text::nest::nest(tokens)?;
    text::decode::reduce(&nested)
}

/// Decode every top-level program of `input` independently.
///
/// A malformed program yields an error in its slot and does not affect the
/// others.
pub fn des_each(input: &str) -> Vec<Result<Command>> {
    text::token::split_programs(input)
        .into_iter()
        .map(|program| {
            let result = des_program(program);
            if let Err(e) = &result {
                debug!(target: "modelbus::codec", program, error = %e, "Program rejected");
            }
            result
        })
        .collect()
}

/// Decode `input` into one command.
///
/// Several programs are combined into a compound once all of them decode. If
/// exactly one program is malformed its error is returned as is; otherwise a
/// parse error lists every failure.
pub fn des(input: &str) -> Result<Command> {
    let results = des_each(input);
    if results.is_empty() {
        return Err(Error::parse("no program in input"));
    }

    let mut commands = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (i, result) in results.into_iter().enumerate() {
        match result {
            Ok(cmd) => commands.push(cmd),
            Err(e) => failures.push((i, e)),
        }
    }

    match failures.len() {
        0 => {}
        1 => {
            let (_, e) = failures.remove(0);
            return Err(e);
        }
        _ => {
            let reasons = failures
                .iter()
                .map(|(i, e)| format!("program {i}: {e}"))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::parse(format!(
                "{} programs failed: {reasons}",
                failures.len()
            )));
        }
    }

    let cmd = if commands.len() == 1 {
        commands.remove(0)
    } else {
        text::decode::compound(commands)
    };
    debug!(target: "modelbus::codec", kind = %cmd.kind(), "Decoded command");
    Ok(cmd)
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelbus_core::CommandKind;

    #[test]
    fn test_single_program() {
        let cmd = des("GET #1/name").unwrap();
        assert_eq!(cmd, Command::get(Query::new().obj(1).pth("name")));
    }

    #[test]
    fn test_programs_are_compounded() {
        let cmd = des("STS\nGAA").unwrap();
        assert_eq!(cmd, Command::cmp(vec![Command::Sts, Command::Gaa]));
    }

    #[test]
    fn test_des_each_isolates_failures() {
        let results = des_each("GET #1; GET (1,2; STS");
        assert_eq!(results.len(), 2);
        // the unclosed bracket swallows the rest of the payload
        assert!(results[0].is_ok());
        assert!(results[1].is_err());

        let results = des_each("GET 'unterminated\nSTS");
        assert_eq!(results.len(), 1);
        assert!(results[0].is_err());

        let results = des_each("GET #1)\nSTS");
        assert_eq!(results.len(), 2);
        assert!(results[0].is_err());
        assert_eq!(results[1].as_ref().unwrap().kind(), CommandKind::Sts);
    }

    #[test]
    fn test_des_reports_every_failure() {
        let err = des("GET #1)\nSTS\nGET {)").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("2 programs failed"));
        assert!(msg.contains("program 0"));
        assert!(msg.contains("program 2"));
    }

    #[test]
    fn test_des_single_failure_keeps_error() {
        let err = des("STS\nSET #1 name").unwrap_err();
        assert!(matches!(err, Error::Arity { .. }));
    }

    #[test]
    fn test_empty_input() {
        assert!(des("  \n ;").is_err());
        assert!(des_each("").is_empty());
    }

    #[test]
    fn test_ser_is_inverse() {
        let text = "SET #1 name 'bar baz'";
        assert_eq!(ser(&des(text).unwrap()), text);
    }
}
