//! Source-syntax printer.
//!
//! Prints a [`Program`](crate::Program) back as valid source text. The
//! output is what `-ast` shows, and printing then re-parsing is a fixpoint
//! (the parser crate tests this), which is why the printer emits real syntax
//! instead of a structural debug dump.

use crate::*;

// Binding strength of an expression in its context. A child is wrapped in
// parentheses whenever its own strength is below the context's.
const PREC_OPEN: u8 = 0; // let-in, if, match: extend to the right
const PREC_SEQ: u8 = 1;
const PREC_ASSIGN: u8 = 2;
const PREC_OR: u8 = 3;
const PREC_AND: u8 = 4;
const PREC_CMP: u8 = 5;
const PREC_ADD: u8 = 6;
const PREC_MUL: u8 = 7;
const PREC_POW: u8 = 8;
const PREC_UNARY: u8 = 9;
const PREC_APP: u8 = 10;
const PREC_ATOM: u8 = 11;

pub fn print_program(p: &Program) -> String {
    let mut out = String::new();
    for def in &p.defs {
        match def {
            Definition::Let(l) => print_letdef(&mut out, l),
            Definition::Type(t) => print_typedef(&mut out, t),
        }
        out.push('\n');
    }
    out
}

fn print_letdef(out: &mut String, l: &LetDef) {
    out.push_str(if l.recursive { "let rec " } else { "let " });
    for (i, d) in l.defs.iter().enumerate() {
        if i > 0 {
            out.push_str(" and ");
        }
        print_defstmt(out, d);
    }
}

fn print_defstmt(out: &mut String, d: &DefStmt) {
    match d {
        DefStmt::Constant(c) => {
            out.push_str(&c.name);
            print_opt_annot(out, &c.ty);
            out.push_str(" = ");
            print_expr(out, &c.expr, PREC_OPEN);
        }
        DefStmt::Function(f) => {
            out.push_str(&f.name);
            for p in &f.params {
                out.push(' ');
                if p.ty.is_unknown() {
                    out.push_str(&p.name);
                } else {
                    out.push('(');
                    out.push_str(&p.name);
                    out.push_str(" : ");
                    print_type(out, &p.ty, 1);
                    out.push(')');
                }
            }
            print_opt_annot(out, &f.ret_ty);
            out.push_str(" = ");
            print_expr(out, &f.body, PREC_OPEN);
        }
        DefStmt::Variable(v) => {
            out.push_str("mutable ");
            out.push_str(&v.name);
            print_opt_annot(out, &v.ty);
        }
        DefStmt::Array(a) => {
            out.push_str("mutable ");
            out.push_str(&a.name);
            out.push_str(" [");
            for (i, e) in a.sizes.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_expr(out, e, PREC_SEQ);
            }
            out.push(']');
            print_opt_annot(out, &a.elem_ty);
        }
    }
}

fn print_opt_annot(out: &mut String, ty: &TypeExpr) {
    if !ty.is_unknown() {
        out.push_str(" : ");
        print_type(out, ty, 1);
    }
}

fn print_typedef(out: &mut String, t: &TypeDef) {
    out.push_str("type ");
    for (i, decl) in t.decls.iter().enumerate() {
        if i > 0 {
            out.push_str(" and ");
        }
        out.push_str(&decl.name);
        out.push_str(" = ");
        for (j, c) in decl.constructors.iter().enumerate() {
            if j > 0 {
                out.push_str(" | ");
            }
            out.push_str(&c.name);
            if !c.fields.is_empty() {
                out.push_str(" of");
                for f in &c.fields {
                    out.push(' ');
                    print_type(out, f, 3);
                }
            }
        }
    }
}

// Type precedence: 1 = arrow, 2 = array-of, 3 = ref postfix, 4 = atoms.
fn print_type(out: &mut String, t: &TypeExpr, prec: u8) {
    match &t.kind {
        TypeExprKind::Unknown => out.push('_'),
        TypeExprKind::Unit => out.push_str("unit"),
        TypeExprKind::Int => out.push_str("int"),
        TypeExprKind::Char => out.push_str("char"),
        TypeExprKind::Bool => out.push_str("bool"),
        TypeExprKind::Float => out.push_str("float"),
        TypeExprKind::Named(n) => out.push_str(n),
        TypeExprKind::Ref(inner) => {
            paren_type(out, prec > 3, |out| {
                print_type(out, inner, 3);
                out.push_str(" ref");
            });
        }
        TypeExprKind::Array { dims, elem } => {
            paren_type(out, prec > 2, |out| {
                if *dims == 1 {
                    out.push_str("array of ");
                } else {
                    out.push_str("array [*");
                    for _ in 1..*dims {
                        out.push_str(", *");
                    }
                    out.push_str("] of ");
                }
                print_type(out, elem, 3);
            });
        }
        TypeExprKind::Fn(l, r) => {
            paren_type(out, prec > 1, |out| {
                print_type(out, l, 2);
                out.push_str(" -> ");
                print_type(out, r, 1);
            });
        }
    }
}

fn paren_type(out: &mut String, wrap: bool, f: impl FnOnce(&mut String)) {
    if wrap {
        out.push('(');
        f(out);
        out.push(')');
    } else {
        f(out);
    }
}

fn binop_prec(op: BinOp) -> (u8, u8, u8) {
    // (own, lhs context, rhs context)
    match op {
        BinOp::Seq => (PREC_SEQ, PREC_SEQ, PREC_SEQ + 1),
        BinOp::Assign => (PREC_ASSIGN, PREC_ASSIGN + 1, PREC_ASSIGN),
        BinOp::Or => (PREC_OR, PREC_OR, PREC_OR + 1),
        BinOp::And => (PREC_AND, PREC_AND, PREC_AND + 1),
        BinOp::Eq
        | BinOp::Neq
        | BinOp::StructEq
        | BinOp::StructNeq
        | BinOp::Lt
        | BinOp::Gt
        | BinOp::Le
        | BinOp::Ge => (PREC_CMP, PREC_CMP + 1, PREC_CMP + 1),
        BinOp::Add | BinOp::Sub | BinOp::FAdd | BinOp::FSub => {
            (PREC_ADD, PREC_ADD, PREC_ADD + 1)
        }
        BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::FMul | BinOp::FDiv => {
            (PREC_MUL, PREC_MUL, PREC_MUL + 1)
        }
        BinOp::Pow => (PREC_POW, PREC_POW + 1, PREC_POW),
    }
}

fn print_expr(out: &mut String, e: &Expr, prec: u8) {
    match &e.kind {
        ExprKind::IntLit(n) => out.push_str(&n.to_string()),
        ExprKind::FloatLit(v) => out.push_str(&print_float(*v)),
        ExprKind::CharLit(c) => {
            out.push('\'');
            out.push_str(&escape_char(*c, '\''));
            out.push('\'');
        }
        ExprKind::StringLit(s) => {
            out.push('"');
            for b in s.bytes() {
                out.push_str(&escape_char(b, '"'));
            }
            out.push('"');
        }
        ExprKind::BoolLit(b) => out.push_str(if *b { "true" } else { "false" }),
        ExprKind::UnitLit => out.push_str("()"),
        ExprKind::Ident(n) => out.push_str(n),
        ExprKind::Call { name, args } | ExprKind::ConstrCall { name, args } => {
            if args.is_empty() {
                out.push_str(name);
            } else {
                paren(out, prec > PREC_APP, |out| {
                    out.push_str(name);
                    for a in args {
                        out.push(' ');
                        print_expr(out, a, PREC_ATOM);
                    }
                });
            }
        }
        ExprKind::ArrayAccess { name, indices } => {
            out.push_str(name);
            out.push('[');
            for (i, ix) in indices.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                print_expr(out, ix, PREC_SEQ);
            }
            out.push(']');
        }
        ExprKind::Dim { index, array } => {
            paren(out, prec > PREC_APP, |out| {
                out.push_str("dim ");
                out.push_str(&index.to_string());
                out.push(' ');
                out.push_str(array);
            });
        }
        ExprKind::Unop { op, expr } => match op {
            UnOp::Deref => {
                out.push('!');
                print_expr(out, expr, PREC_ATOM);
            }
            _ => {
                paren(out, prec > PREC_UNARY, |out| {
                    out.push_str(op.token());
                    out.push(' ');
                    print_expr(out, expr, PREC_UNARY);
                });
            }
        },
        ExprKind::Binop { lhs, op, rhs } => {
            let (own, lp, rp) = binop_prec(*op);
            paren(out, prec > own, |out| {
                print_expr(out, lhs, lp);
                if *op == BinOp::Seq {
                    out.push_str("; ");
                } else {
                    out.push(' ');
                    out.push_str(op.token());
                    out.push(' ');
                }
                print_expr(out, rhs, rp);
            });
        }
        ExprKind::New(t) => {
            paren(out, prec > PREC_APP, |out| {
                out.push_str("new ");
                print_type(out, t, 3);
            });
        }
        ExprKind::LetIn { def, body } => {
            paren(out, prec > PREC_OPEN, |out| {
                print_letdef(out, def);
                out.push_str(" in ");
                print_expr(out, body, PREC_OPEN);
            });
        }
        ExprKind::If {
            cond,
            then_expr,
            else_expr,
        } => {
            paren(out, prec > PREC_OPEN, |out| {
                out.push_str("if ");
                print_expr(out, cond, PREC_SEQ);
                out.push_str(" then ");
                // an else-less `if` inside the then-branch would capture our
                // `else`; force parentheses around it
                let shield = else_expr.is_some()
                    && matches!(
                        then_expr.kind,
                        ExprKind::If { else_expr: None, .. }
                    );
                print_expr(out, then_expr, if shield { PREC_ATOM } else { PREC_SEQ });
                if let Some(els) = else_expr {
                    out.push_str(" else ");
                    print_expr(out, els, PREC_OPEN);
                }
            });
        }
        ExprKind::While { cond, body } => {
            out.push_str("while ");
            print_expr(out, cond, PREC_OPEN);
            out.push_str(" do ");
            print_expr(out, body, PREC_OPEN);
            out.push_str(" done");
        }
        ExprKind::For {
            var,
            start,
            ascending,
            finish,
            body,
            ..
        } => {
            out.push_str("for ");
            out.push_str(var);
            out.push_str(" = ");
            print_expr(out, start, PREC_OPEN);
            out.push_str(if *ascending { " to " } else { " downto " });
            print_expr(out, finish, PREC_OPEN);
            out.push_str(" do ");
            print_expr(out, body, PREC_OPEN);
            out.push_str(" done");
        }
        ExprKind::Match { scrutinee, clauses } => {
            paren(out, prec > PREC_OPEN, |out| {
                out.push_str("match ");
                print_expr(out, scrutinee, PREC_SEQ);
                out.push_str(" with ");
                for (i, c) in clauses.iter().enumerate() {
                    if i > 0 {
                        out.push_str(" | ");
                    }
                    print_pattern(out, &c.pattern, false);
                    out.push_str(" -> ");
                    // a nested match would swallow the following clauses
                    let shield = matches!(c.body.kind, ExprKind::Match { .. });
                    print_expr(out, &c.body, if shield { PREC_ATOM } else { PREC_SEQ });
                }
            });
        }
    }
}

fn paren(out: &mut String, wrap: bool, f: impl FnOnce(&mut String)) {
    if wrap {
        out.push('(');
        f(out);
        out.push(')');
    } else {
        f(out);
    }
}

fn print_pattern(out: &mut String, p: &Pattern, atomic: bool) {
    match &p.kind {
        PatternKind::Int(n) => out.push_str(&n.to_string()),
        PatternKind::Float(v) => out.push_str(&print_float(*v)),
        PatternKind::Char(c) => {
            out.push('\'');
            out.push_str(&escape_char(*c, '\''));
            out.push('\'');
        }
        PatternKind::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        PatternKind::Id(n) => out.push_str(n),
        PatternKind::Constr { name, args } => {
            let wrap = atomic && !args.is_empty();
            paren(out, wrap, |out| {
                out.push_str(name);
                for a in args {
                    out.push(' ');
                    print_pattern(out, a, true);
                }
            });
        }
    }
}

fn print_float(v: f64) -> String {
    if v.fract() == 0.0 && v.is_finite() && v.abs() < 1e15 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

fn escape_char(b: u8, quote: char) -> String {
    match b {
        b'\n' => "\\n".to_string(),
        b'\t' => "\\t".to_string(),
        b'\r' => "\\r".to_string(),
        b'\\' => "\\\\".to_string(),
        b'\'' if quote == '\'' => "\\'".to_string(),
        b'"' if quote == '"' => "\\\"".to_string(),
        0x20..=0x7e => (b as char).to_string(),
        _ => format!("\\x{:02x}", b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn e(kind: ExprKind) -> Expr {
        Expr::new(0, 1, kind)
    }

    #[test]
    fn binop_precedence_omits_redundant_parens() {
        // 1 + 2 * 3
        let expr = e(ExprKind::Binop {
            lhs: Box::new(e(ExprKind::IntLit(1))),
            op: BinOp::Add,
            rhs: Box::new(e(ExprKind::Binop {
                lhs: Box::new(e(ExprKind::IntLit(2))),
                op: BinOp::Mul,
                rhs: Box::new(e(ExprKind::IntLit(3))),
            })),
        });
        let mut out = String::new();
        print_expr(&mut out, &expr, PREC_OPEN);
        assert_eq!(out, "1 + 2 * 3");
    }

    #[test]
    fn binop_precedence_keeps_needed_parens() {
        // (1 + 2) * 3
        let expr = e(ExprKind::Binop {
            lhs: Box::new(e(ExprKind::Binop {
                lhs: Box::new(e(ExprKind::IntLit(1))),
                op: BinOp::Add,
                rhs: Box::new(e(ExprKind::IntLit(2))),
            })),
            op: BinOp::Mul,
            rhs: Box::new(e(ExprKind::IntLit(3))),
        });
        let mut out = String::new();
        print_expr(&mut out, &expr, PREC_OPEN);
        assert_eq!(out, "(1 + 2) * 3");
    }

    #[test]
    fn call_arguments_are_atomic() {
        let expr = e(ExprKind::Call {
            name: "f".to_string(),
            args: vec![e(ExprKind::Binop {
                lhs: Box::new(e(ExprKind::Ident("n".to_string()))),
                op: BinOp::Sub,
                rhs: Box::new(e(ExprKind::IntLit(1))),
            })],
        });
        let mut out = String::new();
        print_expr(&mut out, &expr, PREC_OPEN);
        assert_eq!(out, "f (n - 1)");
    }

    #[test]
    fn float_literals_keep_a_decimal_point() {
        assert_eq!(print_float(3.0), "3.0");
        assert_eq!(print_float(0.5), "0.5");
    }

    #[test]
    fn array_type_under_ref_is_parenthesized() {
        let t = TypeExpr {
            line: 1,
            kind: TypeExprKind::Ref(Box::new(TypeExpr {
                line: 1,
                kind: TypeExprKind::Array {
                    dims: 2,
                    elem: Box::new(TypeExpr {
                        line: 1,
                        kind: TypeExprKind::Int,
                    }),
                },
            })),
        };
        let mut out = String::new();
        print_type(&mut out, &t, 1);
        assert_eq!(out, "(array [*, *] of int) ref");
    }
}
