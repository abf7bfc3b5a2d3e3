// compile.rs — Name resolution and lowering of parsed expressions
//
// Walks the AST once, resolves every `$variable` through a caller-supplied
// `VarResolver`, checks local use-before-assignment and built-in arity, and
// lowers the tree into slot-addressed `Node`s the evaluator runs directly.
//
// Preconditions: `source` is the node's expression text.
// Postconditions: on success, free variables are numbered in first-occurrence
//                 order and the resolver was asked about each name exactly once.
// Failure modes: syntax and name errors produce `Diagnostic` entries;
//                compilation continues past errors to report them all.
// Side effects: calls into the resolver.

use std::collections::HashMap;

use crate::ast::{self, BinaryOp, ExprKind, Span, UnaryOp};
use crate::builtins::Builtin;
use crate::diag::{codes, DiagLevel, Diagnostic};
use crate::id::{LocalSlot, SlotAllocator, VarSlot};
use crate::parser;
use crate::value::{Value, VarType};

// ── Resolver seam ───────────────────────────────────────────────────────────

/// Decides what a `$name` in the expression refers to. The compiler calls
/// `resolve_var` once per distinct name, in first-occurrence order; an `Err`
/// carries the message reported for an unknown name.
pub trait VarResolver {
    fn resolve_var(&mut self, name: &str) -> Result<VarType, String>;
}

// ── Compiled form ───────────────────────────────────────────────────────────

/// Lowered expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Const(Value),
    Var(VarSlot),
    Local(LocalSlot),
    Vector(Box<[Node; 3]>),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    Ternary(Box<Node>, Box<Node>, Box<Node>),
    Index(Box<Node>, Box<Node>),
    Call(Builtin, Vec<Node>),
}

/// A free variable the expression reads, indexed by its `VarSlot`.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeVariable {
    pub name: String,
    pub ty: VarType,
}

#[derive(Debug, Clone)]
pub struct CompiledExpr {
    pub(crate) assignments: Vec<(LocalSlot, Node)>,
    pub(crate) result: Node,
    pub(crate) local_count: usize,
    variables: Vec<FreeVariable>,
    thread_safe: bool,
    pure: bool,
}

impl CompiledExpr {
    pub fn variables(&self) -> &[FreeVariable] {
        &self.variables
    }

    pub fn uses_variable(&self, name: &str) -> bool {
        self.variables.iter().any(|v| v.name == name)
    }

    /// No free variables and no stateful calls: every evaluation gives the
    /// same value.
    pub fn is_constant(&self) -> bool {
        self.variables.is_empty() && self.pure
    }

    /// No built-in in the tree mutates per-instance state.
    pub fn is_thread_safe(&self) -> bool {
        self.thread_safe
    }
}

// ── Entry point ─────────────────────────────────────────────────────────────

/// Parse and compile `source`. Returns every diagnostic on failure.
pub fn compile(
    source: &str,
    resolver: &mut dyn VarResolver,
) -> Result<CompiledExpr, Vec<Diagnostic>> {
    let parsed = parser::parse(source);
    let program = match parsed.program {
        Some(p) if parsed.errors.is_empty() => p,
        _ => {
            let mut diags: Vec<Diagnostic> = parsed
                .errors
                .iter()
                .map(|e| {
                    Diagnostic::new(DiagLevel::Error, *e.span(), e.to_string())
                        .with_code(codes::E0101)
                })
                .collect();
            if diags.is_empty() {
                diags.push(
                    Diagnostic::detached(DiagLevel::Error, "expression did not parse")
                        .with_code(codes::E0101),
                );
            }
            return Err(diags);
        }
    };

    let mut compiler = Compiler::new(resolver);
    let mut assignments = Vec::with_capacity(program.assignments.len());
    for assign in &program.assignments {
        let value = compiler.lower(&assign.value);
        let slot = compiler.assign_local(&assign.name.name);
        assignments.push((slot, value));
    }
    let result = compiler.lower(&program.result);

    if !compiler.diagnostics.is_empty() {
        return Err(compiler.diagnostics);
    }

    Ok(CompiledExpr {
        assignments,
        result,
        local_count: compiler.slots.local_count(),
        variables: compiler.variables,
        thread_safe: compiler.thread_safe,
        pure: compiler.pure,
    })
}

// ── Compiler state ──────────────────────────────────────────────────────────

struct Compiler<'a> {
    resolver: &'a mut dyn VarResolver,
    slots: SlotAllocator,
    var_slots: HashMap<String, Option<VarSlot>>,
    variables: Vec<FreeVariable>,
    locals: HashMap<String, LocalSlot>,
    thread_safe: bool,
    pure: bool,
    diagnostics: Vec<Diagnostic>,
}

impl<'a> Compiler<'a> {
    fn new(resolver: &'a mut dyn VarResolver) -> Self {
        Compiler {
            resolver,
            slots: SlotAllocator::new(),
            var_slots: HashMap::new(),
            variables: Vec::new(),
            locals: HashMap::new(),
            thread_safe: true,
            pure: true,
            diagnostics: Vec::new(),
        }
    }

    fn error(&mut self, span: Span, code: crate::diag::DiagCode, message: String) {
        self.diagnostics
            .push(Diagnostic::new(DiagLevel::Error, span, message).with_code(code));
    }

    fn assign_local(&mut self, name: &str) -> LocalSlot {
        if let Some(slot) = self.locals.get(name) {
            return *slot;
        }
        let slot = self.slots.alloc_local();
        self.locals.insert(name.to_string(), slot);
        slot
    }

    fn variable(&mut self, ident: &ast::Ident) -> Node {
        if let Some(known) = self.var_slots.get(&ident.name) {
            return match known {
                Some(slot) => Node::Var(*slot),
                None => Node::Const(Value::ZERO),
            };
        }
        match self.resolver.resolve_var(&ident.name) {
            Ok(ty) => {
                let slot = self.slots.alloc_var();
                self.var_slots.insert(ident.name.clone(), Some(slot));
                self.variables.push(FreeVariable {
                    name: ident.name.clone(),
                    ty,
                });
                Node::Var(slot)
            }
            Err(message) => {
                self.var_slots.insert(ident.name.clone(), None);
                self.error(ident.span, codes::E0201, message);
                Node::Const(Value::ZERO)
            }
        }
    }

    fn lower(&mut self, expr: &ast::Expr) -> Node {
        match &expr.kind {
            ExprKind::Number(n) => Node::Const(Value::Float(*n)),
            ExprKind::Str(s) => Node::Const(Value::Str(s.clone())),
            ExprKind::Vector(items) => {
                if items.len() != 3 {
                    self.error(
                        expr.span,
                        codes::E0205,
                        format!("vector literal needs 3 components, found {}", items.len()),
                    );
                    return Node::Const(Value::ZERO);
                }
                let [a, b, c] = [&items[0], &items[1], &items[2]].map(|e| self.lower(e));
                Node::Vector(Box::new([a, b, c]))
            }
            ExprKind::Variable(ident) => self.variable(ident),
            ExprKind::Local(ident) => match self.locals.get(&ident.name) {
                Some(slot) => Node::Local(*slot),
                None => {
                    self.error(
                        ident.span,
                        codes::E0202,
                        format!("local '{}' used before assignment", ident.name),
                    );
                    Node::Const(Value::ZERO)
                }
            },
            ExprKind::Unary(op, operand) => Node::Unary(*op, Box::new(self.lower(operand))),
            ExprKind::Binary(op, lhs, rhs) => {
                let l = self.lower(lhs);
                let r = self.lower(rhs);
                Node::Binary(*op, Box::new(l), Box::new(r))
            }
            ExprKind::Ternary(cond, then, other) => {
                let c = self.lower(cond);
                let t = self.lower(then);
                let o = self.lower(other);
                Node::Ternary(Box::new(c), Box::new(t), Box::new(o))
            }
            ExprKind::Index(base, index) => {
                let b = self.lower(base);
                let i = self.lower(index);
                Node::Index(Box::new(b), Box::new(i))
            }
            ExprKind::Call(name, args) => {
                let lowered: Vec<Node> = args.iter().map(|a| self.lower(a)).collect();
                let Some(func) = Builtin::from_name(&name.name) else {
                    self.error(
                        name.span,
                        codes::E0203,
                        format!("unknown function '{}'", name.name),
                    );
                    return Node::Const(Value::ZERO);
                };
                if !func.accepts(args.len()) {
                    let (min, max) = func.arity();
                    let expected = if min == max {
                        format!("{min}")
                    } else {
                        format!("{min} to {max}")
                    };
                    self.error(
                        expr.span,
                        codes::E0204,
                        format!(
                            "'{}' takes {} argument(s), found {}",
                            name.name,
                            expected,
                            args.len()
                        ),
                    );
                    return Node::Const(Value::ZERO);
                }
                self.thread_safe &= func.is_thread_safe();
                self.pure &= func.is_pure();
                Node::Call(func, lowered)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts any name, recording the order it was asked in.
    #[derive(Default)]
    struct Recorder {
        asked: Vec<String>,
        reject: Vec<&'static str>,
    }

    impl VarResolver for Recorder {
        fn resolve_var(&mut self, name: &str) -> Result<VarType, String> {
            self.asked.push(name.to_string());
            if self.reject.iter().any(|r| *r == name) {
                Err(format!("unknown variable '{name}'"))
            } else {
                Ok(VarType::Float)
            }
        }
    }

    fn codes_of(diags: &[Diagnostic]) -> Vec<&'static str> {
        diags.iter().filter_map(|d| d.code.map(|c| c.0)).collect()
    }

    #[test]
    fn literal_expression_is_constant() {
        let c = compile("1 + 2", &mut Recorder::default()).unwrap();
        assert!(c.is_constant());
        assert!(c.is_thread_safe());
    }

    #[test]
    fn variables_resolved_once_in_source_order() {
        let mut r = Recorder::default();
        let c = compile("$b + $a * $b", &mut r).unwrap();
        assert_eq!(r.asked, vec!["b", "a"]);
        let names: Vec<_> = c.variables().iter().map(|v| v.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
        assert!(c.uses_variable("a"));
        assert!(!c.uses_variable("c"));
        assert!(!c.is_constant());
    }

    #[test]
    fn unknown_variable_reported() {
        let mut r = Recorder {
            reject: vec!["foo"],
            ..Default::default()
        };
        let diags = compile("$foo + $foo", &mut r).unwrap_err();
        assert_eq!(codes_of(&diags), vec!["E0201"]);
        assert_eq!(r.asked, vec!["foo"]);
    }

    #[test]
    fn local_before_assignment() {
        let diags = compile("a = a + 1; a", &mut Recorder::default()).unwrap_err();
        assert_eq!(codes_of(&diags), vec!["E0202"]);
    }

    #[test]
    fn locals_reuse_slot_on_reassignment() {
        let c = compile("a = 1; a = a + 1; a", &mut Recorder::default()).unwrap();
        assert_eq!(c.local_count, 1);
    }

    #[test]
    fn unknown_function_and_arity() {
        let diags = compile("frob(1) + sin(1, 2)", &mut Recorder::default()).unwrap_err();
        assert_eq!(codes_of(&diags), vec!["E0203", "E0204"]);
    }

    #[test]
    fn vector_literal_needs_three() {
        let diags = compile("[1, 2]", &mut Recorder::default()).unwrap_err();
        assert_eq!(codes_of(&diags), vec!["E0205"]);
    }

    #[test]
    fn rand_is_neither_constant_nor_thread_safe() {
        let c = compile("rand()", &mut Recorder::default()).unwrap();
        assert!(!c.is_constant());
        assert!(!c.is_thread_safe());
    }

    #[test]
    fn syntax_error_reported() {
        let diags = compile("1 +", &mut Recorder::default()).unwrap_err();
        assert!(!diags.is_empty());
        assert!(diags.iter().all(|d| d.code == Some(codes::E0101)));
    }
}
