// AST node types for seexpr expression source.
//
// An expression is a list of local assignments followed by one result
// expression. Every node carries a `SimpleSpan` for error reporting in the
// compiler.
//
// Preconditions: produced by the parser from a valid or partially-valid token stream.
// Postconditions: each node's span covers the source range of the construct.
// Failure modes: none (data-only module).
// Side effects: none.

use chumsky::span::SimpleSpan;

/// Byte-offset span (alias for chumsky's `SimpleSpan`).
pub type Span = SimpleSpan;

// ── Root ──

/// A complete expression: `name = expr;`* followed by the result expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub assignments: Vec<Assign>,
    pub result: Expr,
    pub span: Span,
}

/// Local assignment `name = value;`.
#[derive(Debug, Clone, PartialEq)]
pub struct Assign {
    pub name: Ident,
    pub value: Expr,
    pub span: Span,
}

/// A name with its source location. For free variables the leading `$` is
/// stripped from `name` but included in `span`.
#[derive(Debug, Clone, PartialEq)]
pub struct Ident {
    pub name: String,
    pub span: Span,
}

// ── Expressions ──

#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    Number(f64),
    Str(String),
    /// `[a, b, c]`
    Vector(Vec<Expr>),
    /// `$name`, resolved through the node's variable resolver.
    Variable(Ident),
    /// Bare identifier: a local assigned earlier in the program.
    Local(Ident),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    /// `cond ? then : else`
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    /// `base[index]`, vector component access.
    Index(Box<Expr>, Box<Expr>),
    Call(Ident, Vec<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}
