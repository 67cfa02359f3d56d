//! Capture analysis.
//!
//! For every function definition, compute the set of identifiers its body
//! references that are defined in enclosing scopes, together with the scope
//! depth of each binding (0 = program scope). A side table tracks every
//! binding with the depth it was introduced at; a reference whose defining
//! depth does not exceed the enclosing function's own depth is a capture.
//!
//! Function-valued bindings lower to module-level functions, so capturing
//! one is always sound. Capturing any other binding that lives inside an
//! enclosing function's body would require an environment the calling
//! convention does not carry, and is rejected here.

use crate::error::SemError;
use crate::{Compilation, External};
use melc_ast::*;
use melc_util::ScopeStack;
use std::collections::BTreeMap;

/// Run capture analysis over the program, storing each function's external
/// set in the compilation context. Fails on a function that captures an
/// enclosing function's local.
pub fn analyze_liveness(ctx: &mut Compilation, program: &Program) -> Result<(), SemError> {
    let mut lv = Liveness {
        // value: whether the binding is a function definition
        table: ScopeStack::new(),
        stack: Vec::new(),
        done: Vec::new(),
    };
    for def in &program.defs {
        if let Definition::Let(l) = def {
            lv.letdef(ctx, l);
        }
    }
    debug_assert!(lv.stack.is_empty());

    for frame in &lv.done {
        for (name, binding) in &frame.externals {
            if binding.depth > 0 && !binding.is_function {
                return Err(SemError::NestedClosure {
                    function: frame.name.clone(),
                    name: name.clone(),
                    line: frame.line,
                });
            }
        }
    }

    for frame in lv.done {
        let externals = frame
            .externals
            .into_iter()
            .map(|(name, b)| External {
                name,
                depth: b.depth,
            })
            .collect();
        ctx.externals.insert(frame.id, externals);
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct Captured {
    depth: usize,
    is_function: bool,
}

#[derive(Debug)]
struct Frame {
    id: NodeId,
    name: String,
    line: u32,
    /// Scope depth at the function's definition site.
    scope: usize,
    externals: BTreeMap<String, Captured>,
}

struct Liveness {
    table: ScopeStack<bool>,
    stack: Vec<Frame>,
    done: Vec<Frame>,
}

impl Liveness {
    fn current_depth(&self) -> usize {
        self.table.depth() - 1
    }

    fn letdef(&mut self, ctx: &Compilation, l: &LetDef) {
        if l.recursive {
            for d in &l.defs {
                self.insert_def(ctx, d);
            }
            for d in &l.defs {
                self.def_body(ctx, d);
            }
            self.share_group_externals(l);
        } else {
            for d in &l.defs {
                self.def_body(ctx, d);
            }
            for d in &l.defs {
                self.insert_def(ctx, d);
            }
        }
    }

    /// A recursive group behaves as one unit: any capture of one member is
    /// a capture of all of them.
    fn share_group_externals(&mut self, l: &LetDef) {
        let ids: Vec<NodeId> = l.defs.iter().map(|d| d.id()).collect();
        let names: Vec<String> = l.defs.iter().map(|d| d.name().to_string()).collect();
        let mut union: BTreeMap<String, Captured> = BTreeMap::new();
        for frame in self.done.iter().filter(|f| ids.contains(&f.id)) {
            for (name, captured) in &frame.externals {
                // a sibling of the group is not a capture
                if !names.contains(name) {
                    union.insert(name.clone(), *captured);
                }
            }
        }
        for frame in self.done.iter_mut().filter(|f| ids.contains(&f.id)) {
            frame.externals = union.clone();
        }
    }

    fn insert_def(&mut self, ctx: &Compilation, d: &DefStmt) {
        let is_function = match d {
            DefStmt::Function(_) => true,
            // a constant may alias a function; its binding is then a
            // module-level value too
            DefStmt::Constant(c) => ctx
                .node_types
                .get(&c.id)
                .is_some_and(|tg| ctx.types.is_function(*tg)),
            _ => false,
        };
        self.table.insert(d.name(), is_function);
    }

    fn def_body(&mut self, ctx: &Compilation, d: &DefStmt) {
        match d {
            DefStmt::Constant(c) => self.expr(ctx, &c.expr),
            DefStmt::Variable(_) => {}
            DefStmt::Array(a) => {
                for e in &a.sizes {
                    self.expr(ctx, e);
                }
            }
            DefStmt::Function(f) => self.function(ctx, f),
        }
    }

    fn function(&mut self, ctx: &Compilation, f: &FunctionDef) {
        self.stack.push(Frame {
            id: f.id,
            name: f.name.clone(),
            line: f.line,
            scope: self.current_depth(),
            externals: BTreeMap::new(),
        });
        self.table.open_scope();
        for p in &f.params {
            self.table.insert(&p.name, false);
        }
        self.expr(ctx, &f.body);
        self.table.close_scope();

        let frame = self.stack.pop().expect("function frame underflow");
        if let Some(parent) = self.stack.last_mut() {
            // the caller of a nested function needs its captures too, as
            // long as they are not the caller's own locals
            for (name, captured) in &frame.externals {
                if captured.depth <= parent.scope {
                    parent.externals.insert(name.clone(), *captured);
                }
            }
        }
        self.done.push(frame);
    }

    fn reference(&mut self, name: &str) {
        let Some(frame) = self.stack.last_mut() else {
            return;
        };
        // names missing from the table are standard-library bindings
        let Some((depth, is_function)) = self.table.lookup_with_depth(name) else {
            return;
        };
        if depth <= frame.scope && name != frame.name {
            frame.externals.insert(
                name.to_string(),
                Captured {
                    depth,
                    is_function: *is_function,
                },
            );
        }
    }

    fn expr(&mut self, ctx: &Compilation, e: &Expr) {
        match &e.kind {
            ExprKind::IntLit(_)
            | ExprKind::FloatLit(_)
            | ExprKind::CharLit(_)
            | ExprKind::StringLit(_)
            | ExprKind::BoolLit(_)
            | ExprKind::UnitLit
            | ExprKind::New(_) => {}
            ExprKind::Ident(name) => self.reference(name),
            ExprKind::Call { name, args } => {
                for a in args {
                    self.expr(ctx, a);
                }
                self.reference(name);
            }
            ExprKind::ConstrCall { args, .. } => {
                for a in args {
                    self.expr(ctx, a);
                }
            }
            ExprKind::ArrayAccess { name, indices } => {
                for i in indices {
                    self.expr(ctx, i);
                }
                self.reference(name);
            }
            ExprKind::Dim { array, .. } => self.reference(array),
            ExprKind::Unop { expr, .. } => self.expr(ctx, expr),
            ExprKind::Binop { lhs, rhs, .. } => {
                self.expr(ctx, lhs);
                self.expr(ctx, rhs);
            }
            ExprKind::LetIn { def, body } => {
                self.table.open_scope();
                self.letdef(ctx, def);
                self.expr(ctx, body);
                self.table.close_scope();
            }
            ExprKind::If {
                cond,
                then_expr,
                else_expr,
            } => {
                self.expr(ctx, cond);
                self.expr(ctx, then_expr);
                if let Some(els) = else_expr {
                    self.expr(ctx, els);
                }
            }
            ExprKind::While { cond, body } => {
                self.expr(ctx, cond);
                self.expr(ctx, body);
            }
            ExprKind::For {
                var,
                start,
                finish,
                body,
                ..
            } => {
                self.table.open_scope();
                self.table.insert(var, false);
                self.expr(ctx, start);
                self.expr(ctx, finish);
                self.expr(ctx, body);
                self.table.close_scope();
            }
            ExprKind::Match { scrutinee, clauses } => {
                self.expr(ctx, scrutinee);
                for c in clauses {
                    self.table.open_scope();
                    self.pattern(&c.pattern);
                    self.expr(ctx, &c.body);
                    self.table.close_scope();
                }
            }
        }
    }

    fn pattern(&mut self, p: &Pattern) {
        match &p.kind {
            PatternKind::Id(name) => self.table.insert(name, false),
            PatternKind::Constr { args, .. } => {
                for a in args {
                    self.pattern(a);
                }
            }
            _ => {}
        }
    }
}
