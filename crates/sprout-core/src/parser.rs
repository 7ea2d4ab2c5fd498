//! Grammar parsing entry points
//!
//! Source text is lexed by [`crate::lexer`] and parsed with the chumsky
//! combinators in `parser_chumsky`. Parsing is fail-fast: the first problem
//! is reported and no partial grammar is returned.

use std::collections::HashMap;
use std::ops::Range;

use chumsky::span::{SimpleSpan, Span as _};
use thiserror::Error;
use tracing::{debug, trace};

use crate::ast::{Grammar, Step};
use crate::lexer::{LexError, Span, lex};
use crate::parser_chumsky::{parse_grammar_tokens, parse_steps_tokens};

/// Error produced while parsing grammar source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Parse error at line {}, column {}: {message}", .line + 1, .column + 1)]
pub struct ParseError {
    pub message: String,
    /// Zero-based line of the offending token
    pub line: usize,
    /// Zero-based column, counted in characters
    pub column: usize,
    pub offset: usize,
    pub length: usize,
    pub span: Range<usize>,
    pub kind: ParseErrorKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    Lexer,
    Parser,
    DuplicateRule,
}

impl ParseError {
    fn from_span(source: &str, message: String, span: Range<usize>, kind: ParseErrorKind) -> Self {
        let (line, column) = offset_to_line_col(source, span.start);
        let length = span.end.saturating_sub(span.start);
        Self {
            message,
            line,
            column,
            offset: span.start,
            length,
            span,
            kind,
        }
    }

    fn from_lex(source: &str, err: LexError) -> Self {
        let range = err.range();
        Self::from_span(source, err.to_string(), range, ParseErrorKind::Lexer)
    }
}

fn offset_to_line_col(source: &str, offset: usize) -> (usize, usize) {
    let mut line = 0usize;
    let mut column = 0usize;
    let mut current = 0usize;

    for ch in source.chars() {
        if current >= offset {
            break;
        }

        if ch == '\n' {
            line += 1;
            column = 0;
        } else {
            column += 1;
        }

        current += ch.len_utf8();
    }

    (line, column)
}

fn to_range(span: Span) -> Range<usize> {
    span.start()..span.end()
}

fn eof_span(source: &str) -> Span {
    SimpleSpan::new((), source.len()..source.len())
}

/// Parse a full grammar: a sequence of `Name -> Steps` rule definitions.
pub fn parse_grammar(source: &str) -> Result<Grammar, ParseError> {
    let tokens = lex(source).map_err(|err| ParseError::from_lex(source, err))?;
    trace!("lexed {} tokens", tokens.len());

    let (rules, errors) = parse_grammar_tokens(&tokens, eof_span(source));
    if let Some(err) = errors.into_iter().next() {
        return Err(ParseError::from_span(
            source,
            err.reason().to_string(),
            to_range(*err.span()),
            ParseErrorKind::Parser,
        ));
    }
    let rules = rules.unwrap_or_default();

    let mut seen: HashMap<&str, Range<usize>> = HashMap::new();
    for (name, span, _) in &rules {
        if seen.insert(name.as_str(), to_range(*span)).is_some() {
            return Err(ParseError::from_span(
                source,
                format!("rule '{}' is defined more than once", name),
                to_range(*span),
                ParseErrorKind::DuplicateRule,
            ));
        }
    }

    let grammar: Grammar = rules
        .into_iter()
        .map(|(name, _, step)| (name, step))
        .collect();
    debug!("parsed grammar with {} rules", grammar.len());
    Ok(grammar)
}

/// Parse a single step expression, as found on the right of `->`.
pub fn parse_steps(source: &str) -> Result<Step, ParseError> {
    let tokens = lex(source).map_err(|err| ParseError::from_lex(source, err))?;

    let (step, errors) = parse_steps_tokens(&tokens, eof_span(source));
    match (step, errors.into_iter().next()) {
        (_, Some(err)) => Err(ParseError::from_span(
            source,
            err.reason().to_string(),
            to_range(*err.span()),
            ParseErrorKind::Parser,
        )),
        (Some(step), None) => Ok(step),
        (None, None) => Err(ParseError::from_span(
            source,
            "expected a step".to_string(),
            0..source.len(),
            ParseErrorKind::Parser,
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_to_line_col() {
        let source = "A -> 1\nB -> 2";
        assert_eq!(offset_to_line_col(source, 0), (0, 0));
        assert_eq!(offset_to_line_col(source, 7), (1, 0));
        assert_eq!(offset_to_line_col(source, 12), (1, 5));
    }

    #[test]
    fn test_error_display_is_one_based() {
        let err = parse_grammar("A -> 1\nB -> )").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Parser);
        assert_eq!(err.line, 1);
        assert!(err.to_string().starts_with("Parse error at line 2"));
    }

    #[test]
    fn test_empty_source_is_empty_grammar() {
        let grammar = parse_grammar("   \n").unwrap();
        assert!(grammar.is_empty());
    }
}
