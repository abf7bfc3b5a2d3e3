// diag.rs — Rebuild diagnostics
//
// Everything a rebuild finds wrong with a node is collected here: syntax and
// name errors from the compiler, parameter-table conflicts, and the warnings
// that accompany a valid but degraded configuration. A rebuild logs each
// diagnostic once; the node config keeps them for hosts to display.
//
// Codes are grouped by hundreds:
//   E01xx  syntax
//   E02xx  names and calls in the expression
//   E03xx  node parameter tables
//   W04xx  warnings
// A code is never reused for a different problem.

use std::fmt;

use chumsky::span::Span as _;

use crate::ast::Span;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    pub const E0101: DiagCode = DiagCode("E0101"); // syntax error

    pub const E0201: DiagCode = DiagCode("E0201"); // unresolvable free variable
    pub const E0202: DiagCode = DiagCode("E0202"); // local read before assignment
    pub const E0203: DiagCode = DiagCode("E0203"); // unknown function
    pub const E0204: DiagCode = DiagCode("E0204"); // wrong argument count
    pub const E0205: DiagCode = DiagCode("E0205"); // vector literal arity

    pub const E0301: DiagCode = DiagCode("E0301"); // duplicate parameter name

    pub const W0401: DiagCode = DiagCode("W0401"); // parameter name/value count mismatch
    pub const W0402: DiagCode = DiagCode("W0402"); // expression is not thread safe
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagLevel {
    Error,
    Warning,
}

impl DiagLevel {
    fn label(self) -> &'static str {
        match self {
            DiagLevel::Error => "error",
            DiagLevel::Warning => "warning",
        }
    }
}

/// One finding of a rebuild.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub code: Option<DiagCode>,
    pub level: DiagLevel,
    /// Byte range in the expression text; empty for problems that live
    /// outside it, such as the parameter tables.
    pub span: Span,
    pub message: String,
    pub hint: Option<String>,
}

impl Diagnostic {
    pub fn new(level: DiagLevel, span: Span, message: impl Into<String>) -> Self {
        Diagnostic {
            code: None,
            level,
            span,
            message: message.into(),
            hint: None,
        }
    }

    /// A diagnostic with no location in the expression text.
    pub fn detached(level: DiagLevel, message: impl Into<String>) -> Self {
        Diagnostic::new(level, (0..0).into(), message)
    }

    pub fn with_code(mut self, code: DiagCode) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.level == DiagLevel::Error
    }

    /// The expression text the diagnostic points at. `None` for detached
    /// diagnostics or a span that does not fit `source`.
    pub fn snippet<'a>(&self, source: &'a str) -> Option<&'a str> {
        let (start, end) = (self.span.start(), self.span.end());
        if start >= end {
            return None;
        }
        source.get(start..end)
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.level.label())?;
        if let Some(code) = self.code {
            write!(f, "[{code}]")?;
        }
        write!(f, ": {}", self.message)?;
        if let Some(hint) = &self.hint {
            write!(f, "\n  hint: {hint}")?;
        }
        Ok(())
    }
}
