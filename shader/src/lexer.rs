// Lexer for seexpr expression source.
//
// Tokenizes expression text into numbers, strings, identifiers, `$`-variables
// and operators. Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans, plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// Expression token types.
///
/// Identifiers and variables carry no value; use the span to retrieve the
/// text from the source. Newlines are plain whitespace: statements end in `;`.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n]+|#[^\n]*")]
pub enum Token {
    // ── Grouping and punctuation ──
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token("=")]
    Assign,
    #[token("?")]
    Question,
    #[token(":")]
    Colon,

    // ── Operators ──
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("!")]
    Bang,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
    #[token("&&")]
    AndAnd,
    #[token("||")]
    OrOr,

    // ── Literals ──
    //
    // No sign in the literal: `a-1` must lex as a subtraction. Negation is
    // a unary operator in the parser.
    /// Numeric literal (int, float, exponent, leading-dot).
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?", parse_number)]
    #[regex(r"\.[0-9]+([eE][+-]?[0-9]+)?", parse_number)]
    Number(f64),

    /// String literal with `\"` and `\\` escapes.
    #[regex(r#""([^"\\]|\\.)*""#, parse_string)]
    StringLit(String),

    // ── Names ──
    /// Free variable: `$name`, optionally namespaced (`$sg::P`, `$user_f::w`).
    #[regex(r"\$[a-zA-Z_][a-zA-Z0-9_]*(::[a-zA-Z_][a-zA-Z0-9_]*)*")]
    Variable,

    /// Identifier: local variable or function name.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Comma => write!(f, ","),
            Token::Semicolon => write!(f, ";"),
            Token::Assign => write!(f, "="),
            Token::Question => write!(f, "?"),
            Token::Colon => write!(f, ":"),
            Token::Plus => write!(f, "+"),
            Token::Minus => write!(f, "-"),
            Token::Star => write!(f, "*"),
            Token::Slash => write!(f, "/"),
            Token::Percent => write!(f, "%"),
            Token::Caret => write!(f, "^"),
            Token::Bang => write!(f, "!"),
            Token::EqEq => write!(f, "=="),
            Token::NotEq => write!(f, "!="),
            Token::Lt => write!(f, "<"),
            Token::Le => write!(f, "<="),
            Token::Gt => write!(f, ">"),
            Token::Ge => write!(f, ">="),
            Token::AndAnd => write!(f, "&&"),
            Token::OrOr => write!(f, "||"),
            Token::Number(v) => write!(f, "{v}"),
            Token::StringLit(s) => write!(f, "\"{s}\""),
            Token::Variable => write!(f, "<variable>"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Callbacks ──

fn parse_number(lex: &mut logos::Lexer<'_, Token>) -> Option<f64> {
    lex.slice().parse().ok()
}

fn parse_string(lex: &mut logos::Lexer<'_, Token>) -> Option<String> {
    let slice = lex.slice();
    let inner = &slice[1..slice.len() - 1]; // strip quotes
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                'n' => result.push('\n'),
                't' => result.push('\t'),
                _ => return None,
            }
        } else {
            result.push(c);
        }
    }
    Some(result)
}

// ── Public API ──

/// Lex an expression string into tokens.
///
/// Returns all successfully parsed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", &source[span.start..span.end]),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn arithmetic() {
        let tokens = lex_ok("1.0 + 2.0 * .5");
        assert_eq!(
            tokens,
            vec![
                Token::Number(1.0),
                Token::Plus,
                Token::Number(2.0),
                Token::Star,
                Token::Number(0.5),
            ]
        );
    }

    #[test]
    fn minus_is_never_part_of_a_literal() {
        let tokens = lex_ok("a-1");
        assert_eq!(tokens, vec![Token::Ident, Token::Minus, Token::Number(1.0)]);
    }

    #[test]
    fn comparison_operators_prefer_longest_match() {
        let tokens = lex_ok("< <= > >= == != = && || !");
        assert_eq!(
            tokens,
            vec![
                Token::Lt,
                Token::Le,
                Token::Gt,
                Token::Ge,
                Token::EqEq,
                Token::NotEq,
                Token::Assign,
                Token::AndAnd,
                Token::OrOr,
                Token::Bang,
            ]
        );
    }

    #[test]
    fn namespaced_variable_is_one_token() {
        let result = lex("$sg::P + $user_f::weight");
        assert!(result.errors.is_empty());
        assert_eq!(result.tokens.len(), 3);
        assert_eq!(result.tokens[0].0, Token::Variable);
        assert_eq!(result.tokens[0].1, Span { start: 0, end: 6 });
        assert_eq!(result.tokens[2].1, Span { start: 9, end: 24 });
    }

    #[test]
    fn ternary_colon_is_not_a_namespace() {
        let tokens = lex_ok("$a ? 1 : 2");
        assert_eq!(
            tokens,
            vec![
                Token::Variable,
                Token::Question,
                Token::Number(1.0),
                Token::Colon,
                Token::Number(2.0),
            ]
        );
    }

    #[test]
    fn string_escapes() {
        let tokens = lex_ok(r#""say \"hi\"""#);
        assert_eq!(tokens, vec![Token::StringLit(r#"say "hi""#.into())]);
    }

    #[test]
    fn comments_and_newlines_skipped() {
        let tokens = lex_ok("x = 1; # set x\nx");
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::Assign,
                Token::Number(1.0),
                Token::Semicolon,
                Token::Ident,
            ]
        );
    }

    #[test]
    fn error_recovery() {
        let result = lex("1 ~ 2");
        let tokens: Vec<Token> = result.tokens.into_iter().map(|(t, _)| t).collect();
        assert_eq!(tokens, vec![Token::Number(1.0), Token::Number(2.0)]);
        assert_eq!(result.errors.len(), 1);
        assert_eq!(result.errors[0].span, Span { start: 2, end: 3 });
    }
}
