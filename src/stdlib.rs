//! The embedded startup library.
//!
//! A small collection of Lisp sources is compiled into the binary and
//! evaluated into the root environment before any user code runs. Each file
//! must parse in isolation; ordering across files is unspecified.

use crate::env::EnvRef;
use crate::{eval, reader, Error};

/// Bundled sources, (name, text). Names only appear in diagnostics.
const SOURCES: &[(&str, &str)] = &[("prelude.lisp", include_str!("../lisp/prelude.lisp"))];

/// Parse and evaluate every bundled file into `env` (normally the root).
pub fn load_stdlib(env: &EnvRef) -> Result<(), Error> {
    for (name, source) in SOURCES.iter().copied() {
        tracing::debug!(file = name, "loading startup library");
        let forms = reader::parse_program(source)?;
        eval::eval_program(env, &forms)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;

    fn eval_source(env: &EnvRef, src: &str) -> String {
        let forms = reader::parse_program(src).expect("parse");
        eval::eval_program(env, &forms)
            .unwrap_or_else(|e| panic!("eval of {src:?} failed: {e}"))
            .to_string()
    }

    #[test]
    fn test_prelude_definitions() {
        let env = Env::root();
        load_stdlib(&env).expect("stdlib loads");

        let test_cases = vec![
            ("(first '(1 2 3))", "1"),
            ("(second '(1 2 3))", "2"),
            ("(third '(1 2 3))", "3"),
            ("(second '(1))", "nil"),
            ("(caar '((1 2) 3))", "1"),
            ("(cadr '(1 2 3))", "2"),
            ("(cddr '(1 2 3))", "(3)"),
            ("(zerop 0)", "t"),
            ("(zerop 3)", "nil"),
            ("(abs -4)", "4"),
            ("(abs 4)", "4"),
            ("(abs -2.5)", "2.5"),
            ("(when (= 1 1) 1 2)", "2"),
            ("(when (= 1 2) 1 2)", "nil"),
            ("(unless (= 1 2) 'a 'b)", "b"),
            ("(unless (= 1 1) 'a)", "nil"),
        ];
        for (src, want) in test_cases {
            assert_eq!(eval_source(&env, src), want, "prelude case {src:?}");
        }
    }

    #[test]
    fn test_each_file_parses_in_isolation() {
        for (name, source) in SOURCES {
            reader::parse_program(source)
                .unwrap_or_else(|e| panic!("{name} does not parse alone: {e}"));
        }
    }
}
