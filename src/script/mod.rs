/*
 * SPDX-FileCopyrightText: 2020 Stalwart Labs Ltd <hello@stalw.art>
 *
 * SPDX-License-Identifier: AGPL-3.0-only OR LicenseRef-SEL
 */

//! Script frontend: drives the parser over a stream or string against a
//! capability-registered interpreter and hands back either a [`Script`]
//! or the collected error report.

pub mod ast;
mod lexer;
mod parser;

use std::fmt::Write as _;
use std::io::Read;

use crate::{interp::Interpreter, ErrorKind};

/// Parsed form of a source program: the command tree plus the capability
/// mask accumulated from its `require` statements.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub(crate) commands: Vec<ast::Command>,
    pub(crate) support: u64,
}

impl Script {
    /// Extensions this script required, as a `CAPA_*` bit mask.
    pub fn support(&self) -> u64 {
        self.support
    }
}

/// Collected parse failure: one report string with one `line N: msg`
/// entry per error, CRLF separated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptErrors {
    pub kind: ErrorKind,
    pub report: String,
    pub count: usize,
}

impl std::fmt::Display for ScriptErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.report.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            f.write_str(&self.report)
        }
    }
}

/// Parses a script from a string against the given interpreter.
pub fn parse_string<SC, MC>(
    interp: &Interpreter<SC, MC>,
    src: &str,
) -> Result<Script, ScriptErrors> {
    interp.verify().map_err(|kind| ScriptErrors {
        kind,
        report: String::new(),
        count: 0,
    })?;

    let valid_list = |list: &str| {
        interp
            .list_validator
            .as_ref()
            .map_or(true, |validator| validator(list))
    };

    match parser::parse(src, |name| interp.extension_isactive(name), valid_list) {
        Ok(output) => Ok(Script {
            commands: output.commands,
            support: output.support,
        }),
        Err(errors) => {
            let mut report = String::new();
            for (line, message) in &errors {
                if let Some(parse_error) = &interp.parse_error {
                    parse_error(*line, message);
                }
                let _ = write!(report, "line {line}: {message}\r\n");
            }
            Err(ScriptErrors {
                kind: ErrorKind::Parse,
                report,
                count: errors.len(),
            })
        }
    }
}

/// Parses a script from a stream against the given interpreter.
pub fn parse<SC, MC>(
    interp: &Interpreter<SC, MC>,
    stream: &mut impl Read,
) -> Result<Script, ScriptErrors> {
    let mut src = String::new();
    stream.read_to_string(&mut src).map_err(|err| {
        tracing::debug!(
            context = "sieve_script_parse",
            event = "error",
            reason = %err,
            "Failed to read script",
        );
        ScriptErrors {
            kind: ErrorKind::Generic,
            report: format!("{err}\r\n"),
            count: 0,
        }
    })?;
    parse_string(interp, &src)
}

/// Syntactic validation without any ability to execute: parses against a
/// disposable interpreter whose every callback aborts if invoked. The
/// error report carries the historical `script errors:` banner.
pub fn parse_only(stream: &mut impl Read) -> Result<Script, ScriptErrors> {
    parse(&Interpreter::nonexec(), stream).map_err(|mut errors| {
        if errors.kind == ErrorKind::Parse {
            errors.report.insert_str(0, "script errors:\r\n");
        }
        errors
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_interp() -> Interpreter<(), ()> {
        let mut interp = Interpreter::new();
        interp.register_logger(|_, _, _| ());
        interp.register_execute_err(|_, _, _| Ok(()));
        interp.register_keep(|_, _, _| Ok(()));
        interp
    }

    #[test]
    fn unverified_interpreter_is_rejected() {
        let interp: Interpreter<(), ()> = Interpreter::new();
        let errors = parse_string(&interp, "keep;").unwrap_err();
        assert_eq!(errors.kind, ErrorKind::Generic);
        assert_eq!(errors.count, 0);
    }

    #[test]
    fn unsupported_require_report_format() {
        let errors = parse_string(&test_interp(), "require \"nosuchthing\";\nkeep;")
            .unwrap_err();
        assert_eq!(errors.kind, ErrorKind::Parse);
        assert_eq!(errors.count, 1);
        assert_eq!(errors.report, "line 1: Unsupported feature nosuchthing\r\n");
    }

    #[test]
    fn parse_error_callback_sees_each_error() {
        use std::{cell::RefCell, rc::Rc};

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut interp = test_interp();
        let sink = seen.clone();
        interp.register_parse_error(move |line, msg| {
            sink.borrow_mut().push((line, msg.to_string()));
        });

        parse_string(&interp, "bogus;\nkeep nope;").unwrap_err();
        let seen = seen.borrow();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, 1);
        assert_eq!(seen[1].0, 2);
    }

    #[test]
    fn parse_only_accepts_all_extensions_and_banners_errors() {
        let src = "require [\"fileinto\", \"vacation\", \"duplicate\"];\nfileinto \"a\";";
        let script = parse_only(&mut src.as_bytes()).expect("nonexec parse");
        assert_ne!(script.support() & crate::interp::CAPA_FILEINTO, 0);

        let errors = parse_only(&mut "keep".as_bytes()).unwrap_err();
        assert!(errors.report.starts_with("script errors:\r\n"), "{errors:?}");
    }
}
