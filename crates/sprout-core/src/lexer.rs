//! Tokenizer for grammar source
//!
//! Produces `(Token, Span)` pairs with byte offsets. Lexing stops at the
//! first malformed character or string, since parsing is fail-fast anyway.

use std::ops::Range;

use chumsky::span::{SimpleSpan, Span as _};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Byte range of a token in the source
pub type Span = SimpleSpan<usize>;

/// A token with its location
pub type Spanned = (Token, Span);

/// Malformed grammar source
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    #[error("Unterminated string literal")]
    UnterminatedString { start: usize, end: usize },

    #[error("Unexpected character '{found}'")]
    UnexpectedCharacter { found: char, offset: usize },
}

impl LexError {
    /// Source range to underline
    pub fn range(&self) -> Range<usize> {
        match self {
            LexError::UnterminatedString { start, end } => *start..*end,
            LexError::UnexpectedCharacter { found, offset } => *offset..*offset + found.len_utf8(),
        }
    }
}

/// Grammar tokens
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Token {
    // Keywords
    This,
    Return,
    If,
    Then,
    Else,
    Switch,
    Case,
    True,
    False,

    // Literals and names
    Ident(String),
    /// Identifier immediately followed by `(`, opening an operation call
    Call(String),
    Str(String),
    Number(String),

    // Punctuation
    Arrow,  // ->
    LParen, // (
    RParen, // )
    LBrace, // {
    RBrace, // }
    Dot,    // .
    Comma,  // ,
    Colon,  // :

    // Operators
    SmallerEqual, // <=
    GreaterEqual, // >=
    Smaller,      // <
    Greater,      // >
    EqualEqual,   // ==
    Assign,       // =
    NotEqual,     // !=
    AndAnd,       // &&
    OrOr,         // ||
    Bang,         // !
    Pipe,         // |
    Plus,         // +
    Minus,        // -
    Star,         // *
    Percent,      // %
    Slash,        // /
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::This => write!(f, "this"),
            Token::Return => write!(f, "return"),
            Token::If => write!(f, "if"),
            Token::Then => write!(f, "then"),
            Token::Else => write!(f, "else"),
            Token::Switch => write!(f, "switch"),
            Token::Case => write!(f, "case"),
            Token::True => write!(f, "true"),
            Token::False => write!(f, "false"),
            Token::Ident(s) => write!(f, "{}", s),
            Token::Call(s) => write!(f, "{}(", s),
            Token::Str(s) => write!(f, "\"{}\"", s),
            Token::Number(n) => write!(f, "{}", n),
            Token::Arrow => write!(f, "->"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::Dot => write!(f, "."),
            Token::Comma => write!(f, ","),
            Token::Colon => write!(f, ":"),
            Token::SmallerEqual => write!(f, "<="),
            Token::GreaterEqual => write!(f, ">="),
            Token::Smaller => write!(f, "<"),
            Token::Greater => write!(f, ">"),
            Token::EqualEqual => write!(f, "=="),
            Token::Assign => write!(f, "="),
            Token::NotEqual => write!(f, "!="),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Bang => write!(f, "!"),
            Token::Pipe => write!(f, "|"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Percent => write!(f, "%"),
            Token::Slash => write!(f, "/"),
        }
    }
}

/// Split `input` into tokens.
pub fn lex(input: &str) -> Result<Vec<Spanned>, LexError> {
    let mut tokens = Vec::new();
    let mut i = 0usize;

    while let Some((current, size)) = next_char(input, i) {
        if current.is_whitespace() {
            i += size;
            continue;
        }

        let start = i;
        let next = next_char(input, i + size).map(|(c, _)| c);

        // Two-character operators first
        let pair = match (current, next) {
            ('-', Some('>')) => Some(Token::Arrow),
            ('<', Some('=')) => Some(Token::SmallerEqual),
            ('>', Some('=')) => Some(Token::GreaterEqual),
            ('=', Some('=')) => Some(Token::EqualEqual),
            ('!', Some('=')) => Some(Token::NotEqual),
            ('&', Some('&')) => Some(Token::AndAnd),
            ('|', Some('|')) => Some(Token::OrOr),
            _ => None,
        };
        if let Some(token) = pair {
            tokens.push((token, span(start, start + 2)));
            i += 2;
            continue;
        }

        let single = match current {
            '(' => Some(Token::LParen),
            ')' => Some(Token::RParen),
            '{' => Some(Token::LBrace),
            '}' => Some(Token::RBrace),
            '.' => Some(Token::Dot),
            ',' => Some(Token::Comma),
            ':' => Some(Token::Colon),
            '<' => Some(Token::Smaller),
            '>' => Some(Token::Greater),
            '=' => Some(Token::Assign),
            '!' => Some(Token::Bang),
            '|' => Some(Token::Pipe),
            '+' => Some(Token::Plus),
            '-' => Some(Token::Minus),
            '*' => Some(Token::Star),
            '%' => Some(Token::Percent),
            '/' => Some(Token::Slash),
            _ => None,
        };
        if let Some(token) = single {
            tokens.push((token, span(start, start + size)));
            i += size;
            continue;
        }

        if current == '"' {
            let (value, end) = read_string(input, start)?;
            tokens.push((Token::Str(value), span(start, end)));
            i = end;
        } else if current.is_ascii_digit() {
            let (literal, end) = read_number(input, start);
            tokens.push((literal, span(start, end)));
            i = end;
        } else if is_ident_start(current) {
            let (word, end) = read_word(input, start);
            match classify_keyword(&word) {
                Some(keyword) => {
                    tokens.push((keyword, span(start, end)));
                    i = end;
                }
                // `name(` with no whitespace is a call; `name (` is a symbol then a bracket
                None if next_char(input, end).map(|(c, _)| c) == Some('(') => {
                    tokens.push((Token::Call(word), span(start, end + 1)));
                    i = end + 1;
                }
                None => {
                    tokens.push((Token::Ident(word), span(start, end)));
                    i = end;
                }
            }
        } else {
            return Err(LexError::UnexpectedCharacter {
                found: current,
                offset: start,
            });
        }
    }

    Ok(tokens)
}

fn next_char(input: &str, start: usize) -> Option<(char, usize)> {
    input.get(start..)?.chars().next().map(|c| (c, c.len_utf8()))
}

fn span(start: usize, end: usize) -> Span {
    SimpleSpan::new((), start..end)
}

fn is_ident_start(ch: char) -> bool {
    ch.is_alphabetic() || ch == '_'
}

fn is_ident_continue(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}

fn read_string(input: &str, start: usize) -> Result<(String, usize), LexError> {
    let mut value = String::new();
    let mut i = start + 1; // Skip opening quote
    let mut escaped = false;

    while let Some((ch, size)) = next_char(input, i) {
        i += size;

        if escaped {
            let decoded = match ch {
                'n' => '\n',
                'r' => '\r',
                't' => '\t',
                other => other,
            };
            value.push(decoded);
            escaped = false;
            continue;
        }

        match ch {
            '\\' => escaped = true,
            '"' => return Ok((value, i)),
            other => value.push(other),
        }
    }

    Err(LexError::UnterminatedString {
        start,
        end: input.len(),
    })
}

fn read_number(input: &str, start: usize) -> (Token, usize) {
    let mut i = start;
    let mut literal = String::new();
    let mut has_dot = false;

    while let Some((ch, size)) = next_char(input, i) {
        if ch.is_ascii_digit() {
            literal.push(ch);
            i += size;
        } else if ch == '.' && !has_dot {
            // Only a fraction when a digit follows, otherwise the dot is punctuation
            let digit_follows = next_char(input, i + size)
                .map(|(c, _)| c.is_ascii_digit())
                .unwrap_or(false);
            if !digit_follows {
                break;
            }
            has_dot = true;
            literal.push(ch);
            i += size;
        } else {
            break;
        }
    }

    (Token::Number(literal), i)
}

fn read_word(input: &str, start: usize) -> (String, usize) {
    let mut i = start;
    while let Some((ch, size)) = next_char(input, i) {
        if !is_ident_continue(ch) {
            break;
        }
        i += size;
    }
    (input[start..i].to_string(), i)
}

fn classify_keyword(word: &str) -> Option<Token> {
    let token = match word {
        "this" => Token::This,
        "return" => Token::Return,
        "if" => Token::If,
        "then" => Token::Then,
        "else" => Token::Else,
        "switch" => Token::Switch,
        "case" => Token::Case,
        "true" => Token::True,
        "false" => Token::False,
        _ => return None,
    };
    Some(token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chumsky::span::Span as _;

    fn kinds(input: &str) -> Vec<Token> {
        lex(input)
            .unwrap()
            .into_iter()
            .map(|(token, _)| token)
            .collect()
    }

    #[test]
    fn lex_rule_definition() {
        assert_eq!(
            kinds("Start -> 1 + this.x"),
            vec![
                Token::Ident("Start".to_string()),
                Token::Arrow,
                Token::Number("1".to_string()),
                Token::Plus,
                Token::This,
                Token::Dot,
                Token::Ident("x".to_string()),
            ]
        );
    }

    #[test]
    fn lex_call_requires_adjacent_paren() {
        assert_eq!(
            kinds("scale(2) A (B)"),
            vec![
                Token::Call("scale".to_string()),
                Token::Number("2".to_string()),
                Token::RParen,
                Token::Ident("A".to_string()),
                Token::LParen,
                Token::Ident("B".to_string()),
                Token::RParen,
            ]
        );
    }

    #[test]
    fn lex_operators_prefer_longest_match() {
        assert_eq!(
            kinds("<= >= < > == = != && || ! | - %"),
            vec![
                Token::SmallerEqual,
                Token::GreaterEqual,
                Token::Smaller,
                Token::Greater,
                Token::EqualEqual,
                Token::Assign,
                Token::NotEqual,
                Token::AndAnd,
                Token::OrOr,
                Token::Bang,
                Token::Pipe,
                Token::Minus,
                Token::Percent,
            ]
        );
    }

    #[test]
    fn lex_numbers_and_strings() {
        assert_eq!(
            kinds("2.5 10 \"a \\\"b\\\"\\n\""),
            vec![
                Token::Number("2.5".to_string()),
                Token::Number("10".to_string()),
                Token::Str("a \"b\"\n".to_string()),
            ]
        );
    }

    #[test]
    fn lex_keywords_and_booleans() {
        assert_eq!(
            kinds("if true then switch case false else return"),
            vec![
                Token::If,
                Token::True,
                Token::Then,
                Token::Switch,
                Token::Case,
                Token::False,
                Token::Else,
                Token::Return,
            ]
        );
    }

    #[test]
    fn lex_spans_are_byte_offsets() {
        let tokens = lex("A ->\n  B").unwrap();
        let spans: Vec<(usize, usize)> = tokens
            .iter()
            .map(|(_, span)| (span.start(), span.end()))
            .collect();
        assert_eq!(spans, vec![(0, 1), (2, 4), (7, 8)]);
    }

    #[test]
    fn lex_reports_unterminated_string() {
        let err = lex("A -> \"open").unwrap_err();
        assert_eq!(err, LexError::UnterminatedString { start: 5, end: 10 });
        assert_eq!(err.range(), 5..10);
    }

    #[test]
    fn lex_stops_at_unexpected_character() {
        let err = lex("A -> 1 # 2 $").unwrap_err();
        assert_eq!(err, LexError::UnexpectedCharacter { found: '#', offset: 7 });
        assert_eq!(err.to_string(), "Unexpected character '#'");
    }
}
