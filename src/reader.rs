//! The reader: S-expression source text to cons-cell trees.
//!
//! `parse_program` consumes a whole source text and returns the chain of
//! top-level forms as a single list (the program is itself a list), or `Nil`
//! for empty input. Sub-parsers thread a quasiquote flag: inside a
//! backquoted list, elements not marked with `,` are wrapped in `Quote` so
//! they stay literal, and `,@name` splices arrive as identifiers beginning
//! with `@`.
//!
//! Failures map to [`ParseError`] with a byte position; input that ends in
//! the middle of a form reports the recoverable `Eof` kind so a REPL can ask
//! for another line.

use crate::node::{self, NodeRef};
use crate::{ParseError, ParseErrorKind};
use nom::bytes::complete::take_while1;
use nom::error::{Error as NomError, ErrorKind};
use nom::{IResult, Parser};

/// Characters allowed in primitive tokens besides Unicode letters/digits.
const TOKEN_SPECIAL_CHARS: &str = "+-*/<>=&%?.@_#$:";

fn is_token_char(c: char) -> bool {
    c.is_alphabetic() || c.is_numeric() || TOKEN_SPECIAL_CHARS.contains(c)
}

/// Skip Unicode whitespace and `;` line comments.
fn ws(mut input: &str) -> IResult<&str, ()> {
    loop {
        let trimmed = input.trim_start();
        match trimmed.strip_prefix(';') {
            Some(comment) => {
                input = match comment.find('\n') {
                    Some(i) => &comment[i + 1..],
                    None => "",
                };
            }
            None => return Ok((trimmed, ())),
        }
    }
}

fn eof_failure(remaining: &str) -> nom::Err<NomError<&str>> {
    nom::Err::Failure(NomError::new(remaining, ErrorKind::Eof))
}

fn invalid_failure(remaining: &str) -> nom::Err<NomError<&str>> {
    nom::Err::Failure(NomError::new(remaining, ErrorKind::Char))
}

/// Classify a primitive token, in order: `nil`, `t`, integer, float,
/// identifier.
fn classify_token(token: &str) -> NodeRef {
    if token == "nil" {
        return node::nil();
    }
    if token == "t" {
        return node::t();
    }
    if let Ok(i) = token.parse::<i64>() {
        return node::int(i);
    }
    if let Ok(f) = token.parse::<f64>() {
        return node::float(f);
    }
    node::ident(token)
}

fn parse_primitive(input: &str) -> IResult<&str, NodeRef> {
    let (rest, token) = take_while1(is_token_char).parse(input)?;
    Ok((rest, classify_token(token)))
}

/// Parse a string body; the opening `"` is already consumed. Escapes:
/// `\\ \n \r \t \b \f \"`; an unknown escape keeps the literal character
/// after the backslash.
fn parse_string(input: &str) -> IResult<&str, NodeRef> {
    let mut out = String::new();
    let mut remaining = input;
    loop {
        let mut chars = remaining.chars();
        match chars.next() {
            Some('"') => return Ok((chars.as_str(), node::string(out))),
            Some('\\') => {
                match chars.next() {
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('b') => out.push('\u{8}'),
                    Some('f') => out.push('\u{c}'),
                    Some(other) => out.push(other),
                    None => return Err(eof_failure("")),
                }
                remaining = chars.as_str();
            }
            Some(c) => {
                out.push(c);
                remaining = chars.as_str();
            }
            None => return Err(eof_failure(remaining)),
        }
    }
}

/// Parse a list body; the opening `(` is already consumed. When `bq` is set
/// this list is the immediate child of a backquote: elements not preceded by
/// `,` get wrapped in `Quote`. A `.` token that is not the first element
/// introduces a dotted cdr.
fn parse_list(mut input: &str, bq: bool) -> IResult<&str, NodeRef> {
    let mut elems: Vec<NodeRef> = Vec::new();
    loop {
        let (rest, ()) = ws(input)?;
        input = rest;
        let mut chars = input.chars();
        match chars.next() {
            None => return Err(eof_failure(input)),
            Some(')') => {
                return Ok((chars.as_str(), node::list(elems)));
            }
            Some(c) => {
                let mut unquoted = false;
                if c == ',' {
                    unquoted = true;
                    input = chars.as_str();
                }
                let (rest, child) = parse_form(input, false)?;
                if child.as_ident() == Some(".") && !elems.is_empty() {
                    let (rest, tail) = parse_form(rest, false)?;
                    let (rest, ()) = ws(rest)?;
                    return match rest.strip_prefix(')') {
                        Some(after) => Ok((after, node::list_with_tail(elems, tail))),
                        None if rest.is_empty() => Err(eof_failure(rest)),
                        None => Err(invalid_failure(rest)),
                    };
                }
                let child = if bq && !unquoted {
                    node::quote(child)
                } else {
                    child
                };
                elems.push(child);
                input = rest;
            }
        }
    }
}

/// Parse one form. `bq` marks a form read directly under a backquote.
fn parse_form(input: &str, bq: bool) -> IResult<&str, NodeRef> {
    let (input, ()) = ws(input)?;
    let mut chars = input.chars();
    match chars.next() {
        None => Err(nom::Err::Error(NomError::new(input, ErrorKind::Eof))),
        Some('(') => parse_list(chars.as_str(), bq),
        Some('\'') => {
            let (rest, child) = parse_form(chars.as_str(), false)?;
            Ok((rest, node::quote(child)))
        }
        Some('`') => {
            let (rest, child) = parse_form(chars.as_str(), true)?;
            Ok((rest, node::bquote(child)))
        }
        Some('"') => parse_string(chars.as_str()),
        Some(c) if is_token_char(c) => parse_primitive(input),
        Some(_) => Err(invalid_failure(input)),
    }
}

fn to_parse_error(input: &str, err: nom::Err<NomError<&str>>) -> ParseError {
    match err {
        nom::Err::Incomplete(_) => ParseError::new(
            ParseErrorKind::Eof,
            "unexpected end of input",
            input.len(),
        ),
        nom::Err::Error(e) | nom::Err::Failure(e) => {
            let position = input.len() - e.input.len();
            if e.input.is_empty() {
                ParseError::new(ParseErrorKind::Eof, "unexpected end of input", position)
            } else {
                let found = e.input.chars().next().unwrap_or(' ');
                ParseError::new(
                    ParseErrorKind::InvalidToken,
                    format!("invalid token: '{found}' ({position})"),
                    position,
                )
            }
        }
    }
}

/// Parse all top-level forms of `input` into one cell chain; `Nil` when the
/// input holds no forms.
pub fn parse_program(input: &str) -> Result<NodeRef, ParseError> {
    let mut forms = Vec::new();
    let mut rest = input;
    loop {
        let (after_ws, ()) = ws(rest).map_err(|e| to_parse_error(input, e))?;
        if after_ws.is_empty() {
            break;
        }
        match parse_form(after_ws, false) {
            Ok((after, form)) => {
                forms.push(form);
                rest = after;
            }
            Err(e) => return Err(to_parse_error(input, e)),
        }
    }
    Ok(node::list(forms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::Node;

    /// Expected outcome of reading a whole program.
    #[derive(Debug)]
    enum ReadResult {
        /// Parse succeeds; the printed top-level chain equals this.
        Printed(&'static str),
        /// Parse fails with the recoverable `Eof` kind.
        Incomplete,
        /// Parse fails with `InvalidToken` at this byte position.
        InvalidAt(usize),
    }
    use ReadResult::*;

    fn run_read_tests(test_cases: Vec<(&str, ReadResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("read test #{}", i + 1);
            let result = parse_program(input);
            match (result, expected) {
                (Ok(chain), Printed(want)) => {
                    assert_eq!(chain.to_string(), *want, "{test_id}: print mismatch");
                }
                (Err(e), Incomplete) => {
                    assert!(
                        e.is_incomplete(),
                        "{test_id}: expected Eof kind, got {e:?}"
                    );
                }
                (Err(e), InvalidAt(pos)) => {
                    assert_eq!(e.kind, ParseErrorKind::InvalidToken, "{test_id}: kind");
                    assert_eq!(e.position, *pos, "{test_id}: position");
                }
                (got, want) => panic!("{test_id}: expected {want:?}, got {got:?}"),
            }
        }
    }

    #[test]
    fn test_reader_comprehensive() {
        let test_cases = vec![
            // Empty input and comments
            ("", Printed("nil")),
            ("   \t\n", Printed("nil")),
            ("; just a comment", Printed("nil")),
            // Primitives
            ("1", Printed("(1)")),
            ("-5", Printed("(-5)")),
            ("+12", Printed("(12)")),
            ("3.14", Printed("(3.14)")),
            ("-0.5", Printed("(-0.5)")),
            ("1e3", Printed("(1000.0)")),
            (".5", Printed("(0.5)")),
            ("t", Printed("(t)")),
            ("nil", Printed("(nil)")),
            ("foo", Printed("(foo)")),
            ("1+", Printed("(1+)")),
            ("foo-bar?", Printed("(foo-bar?)")),
            ("a:b#c$d", Printed("(a:b#c$d)")),
            (".", Printed("(.)")),
            // Unicode tokens and whitespace
            ("(λ 1)", Printed("((λ 1))")),
            ("\u{a0}42", Printed("(42)")),
            // Strings
            ("\"hello\"", Printed("(\"hello\")")),
            (r#""a\nb\tc""#, Printed("(\"a\\nb\\tc\")")),
            (r#""q\"q""#, Printed("(\"q\\\"q\")")),
            (r#""back\\slash""#, Printed("(\"back\\\\slash\")")),
            // Unknown escapes keep the character after the backslash
            (r#""a\qb""#, Printed("(\"aqb\")")),
            // Lists
            ("()", Printed("(nil)")),
            ("(1 2 3)", Printed("((1 2 3))")),
            ("(+ 1 (* 2 3))", Printed("((+ 1 (* 2 3)))")),
            ("( a\tb\nc )", Printed("((a b c))")),
            ("(a ; inline\n b)", Printed("((a b))")),
            // Multiple top-level forms read as one chain
            ("1 2", Printed("(1 2)")),
            ("(1)(2)", Printed("((1) (2))")),
            ("(defun f (x) x) (f 1)", Printed("((defun f (x) x) (f 1))")),
            // Dotted pairs
            ("(a . b)", Printed("((a . b))")),
            ("(1 2 . 3)", Printed("((1 2 . 3))")),
            ("(a . b )", Printed("((a . b))")),
            ("(. b)", Printed("((. b))")),
            // Quote and backquote
            ("'x", Printed("('x)")),
            ("'(1 2)", Printed("('(1 2))")),
            ("''x", Printed("(''x)")),
            ("`(a ,x b)", Printed("(`('a x 'b))")),
            ("`(a ,@xs)", Printed("(`('a @xs))")),
            ("`(a (b c))", Printed("(`('a '(b c)))")),
            // A comma outside backquote is consumed silently
            ("(a ,b)", Printed("((a b))")),
            // Recoverable end-of-input
            ("(1 2", Incomplete),
            ("((1 2)", Incomplete),
            ("\"abc", Incomplete),
            ("\"abc\\", Incomplete),
            ("'", Incomplete),
            ("(a . b", Incomplete),
            ("(a .", Incomplete),
            // Invalid tokens with byte positions
            (")", InvalidAt(0)),
            ("[", InvalidAt(0)),
            ("(a ] )", InvalidAt(3)),
            ("(a . b c)", InvalidAt(7)),
        ];

        run_read_tests(test_cases);
    }

    #[test]
    fn test_print_parse_round_trip() {
        // print(parse(P)) must re-parse to the same tree.
        let programs = vec![
            "42",
            "-3.5",
            "(a b c)",
            "(1 (2 (3)) \"s\")",
            "(a . b)",
            "(1 2 . 3)",
            "'(quote (1 2))",
            "(defun fact (n) (if (= n 0) 1 (* n (fact (1- n)))))",
            "\"tab\\there\\nnewline\"",
        ];
        for program in programs {
            let chain = parse_program(program).expect("first parse");
            for form in chain.list_iter() {
                let printed = form.to_string();
                let reparsed = parse_program(&printed)
                    .unwrap_or_else(|e| panic!("reparse of {printed:?} failed: {e:?}"));
                assert_eq!(
                    reparsed.list_len(),
                    1,
                    "printed form {printed:?} read back as several forms"
                );
                assert_eq!(*reparsed.car(), *form, "tree mismatch for {printed:?}");
            }
        }
    }

    #[test]
    fn test_backquote_structure() {
        // `(a ,x ,@xs) reads as Bquote over [Quote(a), x, @xs].
        let chain = parse_program("`(a ,x ,@xs)").unwrap();
        let bq = chain.car();
        let child = match &*bq {
            Node::Bquote(child) => child.clone(),
            other => panic!("expected bquote, got {other}"),
        };
        let elems: Vec<NodeRef> = child.list_iter().collect();
        assert_eq!(elems.len(), 3);
        assert!(matches!(&*elems[0], Node::Quote(_)));
        assert_eq!(elems[1].as_ident(), Some("x"));
        assert_eq!(elems[2].as_ident(), Some("@xs"));
    }
}
