// Parser for seexpr expression source.
//
// Parses a token stream (from the lexer) into an AST. Uses chumsky
// combinators. Precedence, loosest first: `?:`, `||`, `&&`, `== !=`,
// `< <= > >=`, `+ -`, `* / %`, unary `- !`, `^` (right-associative),
// postfix `[index]`.
//
// Preconditions: input is a valid token stream from `lexer::lex()`.
// Postconditions: returns an AST plus any parse errors (non-fatal).
// Failure modes: syntax errors produce `Rich` diagnostics.
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::ast::*;
use crate::lexer::Token;

/// Result of parsing: AST plus any errors.
#[derive(Debug)]
pub struct ParseResult {
    pub program: Option<Program>,
    pub errors: Vec<Rich<'static, Token, SimpleSpan>>,
}

/// Parse an expression string. Lexes then parses.
///
/// Returns an AST (if parsing succeeded) plus any errors.
pub fn parse(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let len = source.len();

    // Convert lexer output to chumsky stream.
    let token_iter = lex_result.tokens.into_iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (tok, cspan)
    });
    let eoi: SimpleSpan = (len..len).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    let parser = program_parser(source);
    let (program, parse_errors) = parser.parse(stream).into_output_errors();

    // Merge lex errors + parse errors.
    let mut all_errors: Vec<Rich<'static, Token, SimpleSpan>> = lex_result
        .errors
        .into_iter()
        .map(|e| {
            let span: SimpleSpan = (e.span.start..e.span.end).into();
            Rich::custom(span, e.message)
        })
        .collect();
    all_errors.extend(parse_errors.into_iter().map(|e| e.into_owned()));

    // A lex error leaves a hole in the token stream; never hand the compiler
    // an AST built around it.
    let program = if all_errors.is_empty() { program } else { None };

    ParseResult {
        program,
        errors: all_errors,
    }
}

fn join(a: Span, b: Span) -> Span {
    (a.start()..b.end()).into()
}

fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Expr {
    Expr {
        span: join(lhs.span, rhs.span),
        kind: ExprKind::Binary(op, Box::new(lhs), Box::new(rhs)),
    }
}

// ── Main parser builder ──
//
// All grammar rules are built inside `program_parser` so that the `source`
// reference is captured once and shared by all combinators.

fn program_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Program, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    // ── Names ──

    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            name: source[span.start()..span.end()].to_string(),
            span,
        }
    });

    let variable = just(Token::Variable).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        Ident {
            // strip the leading `$`
            name: source[span.start() + 1..span.end()].to_string(),
            span,
        }
    });

    // ── Expression ──

    let expr = recursive({
        let ident = ident.clone();
        move |expr| {
            let literal = select! {
                Token::Number(n) => ExprKind::Number(n),
                Token::StringLit(s) => ExprKind::Str(s),
            }
            .map_with(|kind, e| Expr {
                kind,
                span: e.span(),
            });

            let vector = expr
                .clone()
                .separated_by(just(Token::Comma))
                .at_least(1)
                .collect::<Vec<_>>()
                .delimited_by(just(Token::LBracket), just(Token::RBracket))
                .map_with(|items, e| Expr {
                    kind: ExprKind::Vector(items),
                    span: e.span(),
                });

            let call = ident
                .clone()
                .then(
                    expr.clone()
                        .separated_by(just(Token::Comma))
                        .collect::<Vec<_>>()
                        .delimited_by(just(Token::LParen), just(Token::RParen)),
                )
                .map_with(|(name, args), e| Expr {
                    kind: ExprKind::Call(name, args),
                    span: e.span(),
                });

            let local = ident.clone().map(|id| Expr {
                span: id.span,
                kind: ExprKind::Local(id),
            });

            let var = variable.map(|id| Expr {
                span: id.span,
                kind: ExprKind::Variable(id),
            });

            let parens = expr
                .clone()
                .delimited_by(just(Token::LParen), just(Token::RParen));

            // `call` must be tried before `local`: both start with an identifier.
            let atom = choice((literal, vector, call, local, var, parens)).boxed();

            // ── Postfix component index ──

            let indexed = atom
                .foldl(
                    expr.clone()
                        .delimited_by(just(Token::LBracket), just(Token::RBracket))
                        .map_with(|index, e| (index, e.span()))
                        .repeated(),
                    |base: Expr, (index, span): (Expr, SimpleSpan)| Expr {
                        span: join(base.span, span),
                        kind: ExprKind::Index(Box::new(base), Box::new(index)),
                    },
                )
                .boxed();

            // ── Power (right-associative) ──

            let power = indexed
                .separated_by(just(Token::Caret))
                .at_least(1)
                .collect::<Vec<Expr>>()
                .map(|mut operands| {
                    let mut acc = operands.pop().unwrap_or(Expr {
                        kind: ExprKind::Number(0.0),
                        span: (0..0).into(),
                    });
                    while let Some(lhs) = operands.pop() {
                        acc = binary(BinaryOp::Pow, lhs, acc);
                    }
                    acc
                })
                .boxed();

            // ── Unary prefix ──

            let unary = select! {
                Token::Minus => UnaryOp::Neg,
                Token::Bang => UnaryOp::Not,
            }
            .map_with(|op, e| (op, e.span()))
            .repeated()
            .foldr(power, |(op, span): (UnaryOp, SimpleSpan), rhs: Expr| Expr {
                span: join(span, rhs.span),
                kind: ExprKind::Unary(op, Box::new(rhs)),
            })
            .boxed();

            // ── Binary levels ──

            let product = unary
                .clone()
                .foldl(
                    select! {
                        Token::Star => BinaryOp::Mul,
                        Token::Slash => BinaryOp::Div,
                        Token::Percent => BinaryOp::Rem,
                    }
                    .then(unary)
                    .repeated(),
                    |lhs, (op, rhs)| binary(op, lhs, rhs),
                )
                .boxed();

            let sum = product
                .clone()
                .foldl(
                    select! {
                        Token::Plus => BinaryOp::Add,
                        Token::Minus => BinaryOp::Sub,
                    }
                    .then(product)
                    .repeated(),
                    |lhs, (op, rhs)| binary(op, lhs, rhs),
                )
                .boxed();

            let comparison = sum
                .clone()
                .foldl(
                    select! {
                        Token::Lt => BinaryOp::Lt,
                        Token::Le => BinaryOp::Le,
                        Token::Gt => BinaryOp::Gt,
                        Token::Ge => BinaryOp::Ge,
                    }
                    .then(sum)
                    .repeated(),
                    |lhs, (op, rhs)| binary(op, lhs, rhs),
                )
                .boxed();

            let equality = comparison
                .clone()
                .foldl(
                    select! {
                        Token::EqEq => BinaryOp::Eq,
                        Token::NotEq => BinaryOp::Ne,
                    }
                    .then(comparison)
                    .repeated(),
                    |lhs, (op, rhs)| binary(op, lhs, rhs),
                )
                .boxed();

            let and = equality
                .clone()
                .foldl(
                    just(Token::AndAnd).to(BinaryOp::And).then(equality).repeated(),
                    |lhs, (op, rhs)| binary(op, lhs, rhs),
                )
                .boxed();

            let or = and
                .clone()
                .foldl(
                    just(Token::OrOr).to(BinaryOp::Or).then(and).repeated(),
                    |lhs, (op, rhs)| binary(op, lhs, rhs),
                )
                .boxed();

            // ── Ternary ──

            or.then(
                just(Token::Question)
                    .ignore_then(expr.clone())
                    .then_ignore(just(Token::Colon))
                    .then(expr)
                    .or_not(),
            )
            .map(|(cond, branches)| match branches {
                Some((then, otherwise)) => Expr {
                    span: join(cond.span, otherwise.span),
                    kind: ExprKind::Ternary(Box::new(cond), Box::new(then), Box::new(otherwise)),
                },
                None => cond,
            })
        }
    });

    // ── Statements ──

    let assign = ident
        .then_ignore(just(Token::Assign))
        .then(expr.clone())
        .then_ignore(just(Token::Semicolon))
        .map_with(|(name, value), e| Assign {
            name,
            value,
            span: e.span(),
        });

    // ── Program ──

    assign
        .repeated()
        .collect::<Vec<_>>()
        .then(expr)
        .then_ignore(just(Token::Semicolon).or_not())
        .map_with(|(assignments, result), e| Program {
            assignments,
            result,
            span: e.span(),
        })
}

// ── Tests ──
