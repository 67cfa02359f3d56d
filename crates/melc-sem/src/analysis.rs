//! The semantic analyzer.
//!
//! One pass over the AST that resolves names against the tables, attaches a
//! type to every node, and emits the equality constraints the inferencer
//! solves afterwards. Where the source elides a type a fresh Unknown is
//! minted; where a rule is already decidable (arity, duplicate names,
//! aggregate equality) it is checked here and the failure is immediate.

use crate::error::SemError;
use crate::infer::ErrorCtx;
use crate::types::{TypeRef, T_BOOL, T_CHAR, T_FLOAT, T_INT, T_UNIT};
use crate::{Compilation, IdentInfo};
use melc_ast::*;
use rustc_hash::FxHashSet;

/// Analyze a whole program, filling the tables, the per-node type map, and
/// the inferencer's work-list.
pub fn analyze(ctx: &mut Compilation, program: &Program) -> Result<(), SemError> {
    for def in &program.defs {
        match def {
            Definition::Let(l) => sem_letdef(ctx, l)?,
            Definition::Type(t) => sem_typedef(ctx, t)?,
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Helpers
// ----------------------------------------------------------------------

fn fresh(ctx: &mut Compilation, can_be_array: bool, can_be_func: bool, only_icf: bool) -> TypeRef {
    let Compilation { types, inf, .. } = ctx;
    inf.fresh_unknown(types, can_be_array, can_be_func, only_icf)
}

fn constrain(ctx: &mut Compilation, lhs: TypeRef, rhs: TypeRef, line: u32, err: Option<ErrorCtx>) {
    let Compilation { types, inf, .. } = ctx;
    inf.add_constraint(types, lhs, rhs, line, err);
}

/// Require `tg == expected`, reporting `template, <observed type> given` at
/// the given line if the constraint is eventually rejected.
fn type_check(ctx: &mut Compilation, tg: TypeRef, expected: TypeRef, line: u32, template: &str) {
    constrain(
        ctx,
        tg,
        expected,
        line,
        Some(ErrorCtx::new(template, tg)),
    );
}

fn record_ident(ctx: &mut Compilation, name: &str, line: u32, tg: TypeRef) {
    ctx.identifiers.push(IdentInfo {
        name: name.to_string(),
        line,
        tg,
    });
}

/// Resolve a source-spelled type to a type-graph node. An omitted type
/// becomes a fresh unconstrained Unknown.
fn resolve_type_expr(ctx: &mut Compilation, te: &TypeExpr) -> Result<TypeRef, SemError> {
    match &te.kind {
        TypeExprKind::Unknown => Ok(fresh(ctx, true, true, false)),
        TypeExprKind::Unit => Ok(T_UNIT),
        TypeExprKind::Int => Ok(T_INT),
        TypeExprKind::Char => Ok(T_CHAR),
        TypeExprKind::Bool => Ok(T_BOOL),
        TypeExprKind::Float => Ok(T_FLOAT),
        TypeExprKind::Named(name) => match ctx.type_table.lookup_type(name) {
            Some(entry) => Ok(entry.tg),
            None => Err(SemError::UnknownType {
                name: name.clone(),
                line: te.line,
            }),
        },
        TypeExprKind::Ref(inner) => {
            let t = resolve_type_expr(ctx, inner)?;
            if ctx.types.is_array(t) {
                return Err(SemError::RefOfArray { line: te.line });
            }
            Ok(ctx.types.new_ref(t))
        }
        TypeExprKind::Array { dims, elem } => {
            let t = resolve_type_expr(ctx, elem)?;
            if ctx.types.is_array(t) {
                return Err(SemError::ArrayOfArray { line: te.line });
            }
            let r = ctx.types.new_ref(t);
            Ok(ctx.types.new_array(*dims as i32, r))
        }
        TypeExprKind::Fn(l, r) => {
            let lt = resolve_type_expr(ctx, l)?;
            let rt = resolve_type_expr(ctx, r)?;
            // the arrow is right associative: a -> b -> c folds its
            // parameters into one n-ary function node
            if ctx.types.is_function(rt) {
                ctx.types.add_param(rt, lt, false);
                Ok(rt)
            } else {
                Ok(ctx.types.new_function_with(vec![lt], rt))
            }
        }
    }
}

// ----------------------------------------------------------------------
// Definitions
// ----------------------------------------------------------------------

fn sem_letdef(ctx: &mut Compilation, l: &LetDef) -> Result<(), SemError> {
    for d in &l.defs {
        prepare_def(ctx, d)?;
    }
    if l.recursive {
        // names first, so the bodies can refer to every binding of the
        // group; only functions may be recursive
        for d in &l.defs {
            if !d.is_function() {
                return Err(SemError::NonFunctionRecursive { line: d.line() });
            }
        }
        for d in &l.defs {
            insert_def(ctx, d)?;
        }
        for d in &l.defs {
            sem_def_body(ctx, d)?;
        }
    } else {
        // bodies are analyzed in the enclosing scope; the names become
        // visible only after the whole group
        for d in &l.defs {
            sem_def_body(ctx, d)?;
        }
        for d in &l.defs {
            insert_def(ctx, d)?;
        }
    }
    Ok(())
}

/// Resolve the declared (or omitted) types of a binding and store them in
/// the node-type map, before anything is analyzed or inserted.
fn prepare_def(ctx: &mut Compilation, d: &DefStmt) -> Result<(), SemError> {
    match d {
        DefStmt::Constant(c) => {
            let tg = resolve_type_expr(ctx, &c.ty)?;
            ctx.node_types.insert(c.id, tg);
        }
        DefStmt::Function(f) => {
            let ret = resolve_type_expr(ctx, &f.ret_ty)?;
            let func = ctx.types.new_function(ret);
            for p in &f.params {
                let ptg = resolve_type_expr(ctx, &p.ty)?;
                ctx.node_types.insert(p.id, ptg);
                ctx.types.add_param(func, ptg, true);
            }
            ctx.node_types.insert(f.id, func);
        }
        DefStmt::Variable(v) => {
            let t = resolve_type_expr(ctx, &v.ty)?;
            if ctx.types.is_array(t) {
                return Err(SemError::RefOfArray { line: v.line });
            }
            let r = ctx.types.new_ref(t);
            ctx.node_types.insert(v.id, r);
        }
        DefStmt::Array(a) => {
            let elem = resolve_type_expr(ctx, &a.elem_ty)?;
            if ctx.types.is_array(elem) {
                return Err(SemError::ArrayOfArray { line: a.line });
            }
            let contained = ctx.types.new_ref(elem);
            let arr = ctx.types.new_array(a.sizes.len() as i32, contained);
            ctx.node_types.insert(a.id, arr);
        }
    }
    Ok(())
}

fn sem_def_body(ctx: &mut Compilation, d: &DefStmt) -> Result<(), SemError> {
    match d {
        DefStmt::Constant(c) => {
            let decl = ctx.node_tg(c.id);
            let t = sem_expr(ctx, &c.expr)?;
            let template = format!("must be of the declared type {}", ctx.types.display(decl));
            type_check(ctx, t, decl, c.line, &template);
        }
        DefStmt::Function(f) => {
            let func = ctx.node_tg(f.id);
            ctx.symbols.open_scope();
            for p in &f.params {
                let ptg = ctx.node_tg(p.id);
                ctx.symbols.insert_basic(&p.name, ptg);
                record_ident(ctx, &p.name, p.line, ptg);
            }
            let body_t = sem_expr(ctx, &f.body)?;
            let ret = ctx.types.result(func);
            type_check(
                ctx,
                body_t,
                ret,
                f.line,
                "function body must be of the declared result type",
            );
            ctx.symbols.close_scope();
        }
        DefStmt::Variable(_) => {}
        DefStmt::Array(a) => {
            for e in &a.sizes {
                let t = sem_expr(ctx, e)?;
                type_check(ctx, t, T_INT, e.line, "array dimension sizes must be int");
            }
        }
    }
    Ok(())
}

fn insert_def(ctx: &mut Compilation, d: &DefStmt) -> Result<(), SemError> {
    match d {
        DefStmt::Constant(c) => {
            let tg = ctx.node_tg(c.id);
            ctx.symbols.insert_basic(&c.name, tg);
            record_ident(ctx, &c.name, c.line, tg);
        }
        DefStmt::Function(f) => {
            let func = ctx.node_tg(f.id);
            ctx.symbols.insert_basic(&f.name, func);
            record_ident(ctx, &f.name, f.line, func);
        }
        DefStmt::Variable(v) => {
            let ref_tg = ctx.node_tg(v.id);
            let t = ctx.types.inner(ref_tg);
            let sym_tg = if !ctx.types.is_unknown(t) {
                let Compilation { types, symbols, .. } = ctx;
                symbols.insert_ref(types, &v.name, t)
            } else {
                // the pointee is open: bind an unknown constrained to be
                // the matching ref
                let u = fresh(ctx, false, true, false);
                ctx.symbols.insert_basic(&v.name, u);
                constrain(ctx, u, ref_tg, v.line, None);
                u
            };
            record_ident(ctx, &v.name, v.line, sym_tg);
        }
        DefStmt::Array(a) => {
            let arr_tg = ctx.node_tg(a.id);
            let contained = ctx.types.inner(arr_tg);
            let elem = ctx.types.inner(contained);
            let dims = a.sizes.len() as i32;
            let sym_tg = if !ctx.types.is_unknown(elem) {
                let Compilation { types, symbols, .. } = ctx;
                symbols.insert_array(types, &a.name, contained, dims)
            } else {
                let u = fresh(ctx, false, true, false);
                let sym = {
                    let Compilation { types, symbols, .. } = ctx;
                    symbols.insert_array(types, &a.name, u, dims)
                };
                constrain(ctx, u, contained, a.line, None);
                sym
            };
            record_ident(ctx, &a.name, a.line, sym_tg);
        }
    }
    Ok(())
}

fn sem_typedef(ctx: &mut Compilation, td: &TypeDef) -> Result<(), SemError> {
    // all names first, so mutually recursive types can refer to each other
    for decl in &td.decls {
        let Compilation {
            types, type_table, ..
        } = ctx;
        if type_table.insert_type(types, &decl.name).is_none() {
            return Err(SemError::DuplicateType {
                name: decl.name.clone(),
                line: decl.line,
            });
        }
    }
    for decl in &td.decls {
        let custom = ctx
            .type_table
            .lookup_type(&decl.name)
            .expect("type was just inserted")
            .tg;
        for c in &decl.constructors {
            let constr = {
                let Compilation {
                    types,
                    constructors,
                    ..
                } = ctx;
                constructors.insert_constructor(types, &c.name)
            };
            let Some(constr) = constr else {
                let owner = ctx
                    .constructors
                    .lookup_constructor(&c.name)
                    .map(|e| e.type_name.clone())
                    .unwrap_or_default();
                return Err(SemError::DuplicateConstructor {
                    name: c.name.clone(),
                    owner,
                    line: c.line,
                });
            };
            for f in &c.fields {
                let ft = resolve_type_expr(ctx, f)?;
                ctx.types.add_field(constr, ft);
            }
            ctx.types.add_constructor(custom, constr);
            ctx.type_table.record_constructor(&decl.name, &c.name);
            ctx.constructors.set_owner(&c.name, &decl.name);
        }
    }
    Ok(())
}

// ----------------------------------------------------------------------
// Expressions
// ----------------------------------------------------------------------

fn sem_expr(ctx: &mut Compilation, e: &Expr) -> Result<TypeRef, SemError> {
    let tg = sem_expr_kind(ctx, e)?;
    ctx.node_types.insert(e.id, tg);
    Ok(tg)
}

fn sem_expr_kind(ctx: &mut Compilation, e: &Expr) -> Result<TypeRef, SemError> {
    let line = e.line;
    match &e.kind {
        ExprKind::IntLit(_) => Ok(T_INT),
        ExprKind::FloatLit(_) => Ok(T_FLOAT),
        ExprKind::CharLit(_) => Ok(T_CHAR),
        ExprKind::BoolLit(_) => Ok(T_BOOL),
        ExprKind::UnitLit => Ok(T_UNIT),
        ExprKind::StringLit(_) => {
            let r = ctx.types.new_ref(T_CHAR);
            Ok(ctx.types.new_array(1, r))
        }

        ExprKind::Ident(name) => match ctx.symbols.lookup(name) {
            Some(entry) => Ok(entry.tg),
            None => Err(SemError::UnknownIdentifier {
                name: name.clone(),
                line,
            }),
        },

        ExprKind::Call { name, args } => {
            let def_tg = match ctx.symbols.lookup(name) {
                Some(entry) => entry.tg,
                None => {
                    return Err(SemError::UnknownIdentifier {
                        name: name.clone(),
                        line,
                    })
                }
            };
            if ctx.types.is_unknown(def_tg) {
                // build the function shape this call site demands and let
                // inference reconcile it with the definition
                let result = fresh(ctx, true, false, false);
                let call_tg = ctx.types.new_function(result);
                for a in args {
                    let at = sem_expr(ctx, a)?;
                    ctx.types.add_param(call_tg, at, true);
                }
                constrain(ctx, def_tg, call_tg, line, None);
                Ok(result)
            } else if ctx.types.is_function(def_tg) {
                let params = ctx.types.params(def_tg).to_vec();
                if params.len() > args.len() {
                    return Err(SemError::PartialApplication { line });
                }
                if params.len() < args.len() {
                    return Err(SemError::TooManyArguments {
                        name: name.clone(),
                        line,
                    });
                }
                for (i, (arg, correct)) in args.iter().zip(&params).enumerate() {
                    let at = sem_expr(ctx, arg)?;
                    let template = format!(
                        "type mismatch on parameter {} of {}: {} expected",
                        i + 1,
                        name,
                        ctx.types.display(*correct)
                    );
                    type_check(ctx, at, *correct, arg.line, &template);
                }
                Ok(ctx.types.result(def_tg))
            } else {
                Err(SemError::NotAFunction {
                    name: name.clone(),
                    line,
                })
            }
        }

        ExprKind::ConstrCall { name, args } => {
            let constr = match ctx.constructors.lookup_constructor(name) {
                Some(entry) => entry.tg,
                None => {
                    return Err(SemError::UnknownConstructor {
                        name: name.clone(),
                        line,
                    })
                }
            };
            let fields = ctx.types.fields(constr).to_vec();
            if fields.len() != args.len() {
                return Err(SemError::PartialConstructor { line });
            }
            for (i, (arg, field)) in args.iter().zip(&fields).enumerate() {
                let at = sem_expr(ctx, arg)?;
                let template = format!("type mismatch on field {} of {}", i + 1, name);
                type_check(ctx, at, *field, arg.line, &template);
            }
            // remember which constructor this call names; lowering needs
            // its tag and payload shape
            ctx.constructor_uses.insert(e.id, constr);
            Ok(ctx.types.parent_custom(constr))
        }

        ExprKind::ArrayAccess { name, indices } => {
            let entry_tg = match ctx.symbols.lookup(name) {
                Some(entry) => entry.tg,
                None => {
                    return Err(SemError::UnknownIdentifier {
                        name: name.clone(),
                        line,
                    })
                }
            };
            ctx.array_uses.insert(e.id, entry_tg);
            if !ctx.types.is_unknown(entry_tg) {
                if !ctx.types.is_array(entry_tg) {
                    return Err(SemError::NotAnArray {
                        ty: ctx.types.display(entry_tg),
                        line,
                    });
                }
                let dims = ctx.types.dims(entry_tg);
                if dims != indices.len() as i32 {
                    return Err(SemError::ArrayIndexCount { line });
                }
                for ix in indices {
                    let it = sem_expr(ctx, ix)?;
                    type_check(ctx, it, T_INT, ix.line, "array indices can only be int");
                }
                // accesses denote the element value; assignment goes
                // through the computed element location
                let contained = ctx.types.inner(entry_tg);
                if ctx.types.is_ref(contained) {
                    Ok(ctx.types.inner(contained))
                } else {
                    let elem = fresh(ctx, false, true, false);
                    let r = ctx.types.new_ref(elem);
                    constrain(ctx, contained, r, line, None);
                    Ok(elem)
                }
            } else {
                let elem = fresh(ctx, false, true, false);
                let r = ctx.types.new_ref(elem);
                let arr = ctx.types.new_array(indices.len() as i32, r);
                constrain(ctx, entry_tg, arr, line, None);
                for ix in indices {
                    let it = sem_expr(ctx, ix)?;
                    type_check(ctx, it, T_INT, ix.line, "array indices can only be int");
                }
                Ok(elem)
            }
        }

        ExprKind::Dim { index, array } => {
            let entry_tg = match ctx.symbols.lookup(array) {
                Some(entry) => entry.tg,
                None => {
                    return Err(SemError::UnknownIdentifier {
                        name: array.clone(),
                        line,
                    })
                }
            };
            ctx.array_uses.insert(e.id, entry_tg);
            if *index < 1 {
                return Err(SemError::DimOutOfBounds { line });
            }
            if !ctx.types.is_unknown(entry_tg) {
                if !ctx.types.is_array(entry_tg) {
                    return Err(SemError::NotAnArray {
                        ty: ctx.types.display(entry_tg),
                        line,
                    });
                }
                let dims = ctx.types.dims(entry_tg);
                if dims != crate::types::UNKNOWN_DIMS && *index > dims {
                    return Err(SemError::DimOutOfBounds { line });
                }
            }
            let u = fresh(ctx, false, false, false);
            let arr = ctx.types.new_array_with_bound(u, *index);
            let template = format!("needs an array of at least {} dimensions", index);
            constrain(
                ctx,
                entry_tg,
                arr,
                line,
                Some(ErrorCtx::new(template, entry_tg)),
            );
            Ok(T_INT)
        }

        ExprKind::Unop { op, expr } => {
            let t = sem_expr(ctx, expr)?;
            match op {
                UnOp::Plus | UnOp::Minus => {
                    type_check(ctx, t, T_INT, line, "only int allowed");
                    Ok(T_INT)
                }
                UnOp::FPlus | UnOp::FMinus => {
                    type_check(ctx, t, T_FLOAT, line, "only float allowed");
                    Ok(T_FLOAT)
                }
                UnOp::Not => {
                    type_check(ctx, t, T_BOOL, line, "only bool allowed");
                    Ok(T_BOOL)
                }
                UnOp::Deref => {
                    let a = fresh(ctx, false, true, false);
                    let r = ctx.types.new_ref(a);
                    constrain(ctx, t, r, line, Some(ErrorCtx::new("expected a ref", t)));
                    Ok(a)
                }
                UnOp::Delete => {
                    let a = fresh(ctx, false, true, false);
                    let r = ctx.types.new_ref(a);
                    constrain(ctx, t, r, line, Some(ErrorCtx::new("expected a ref", t)));
                    Ok(T_UNIT)
                }
            }
        }

        ExprKind::Binop { lhs, op, rhs } => {
            let lt = sem_expr(ctx, lhs)?;
            let rt = sem_expr(ctx, rhs)?;
            match op {
                BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
                    type_check(ctx, lt, T_INT, line, "only int allowed");
                    type_check(ctx, rt, T_INT, line, "only int allowed");
                    Ok(T_INT)
                }
                BinOp::FAdd | BinOp::FSub | BinOp::FMul | BinOp::FDiv | BinOp::Pow => {
                    type_check(ctx, lt, T_FLOAT, line, "only float allowed");
                    type_check(ctx, rt, T_FLOAT, line, "only float allowed");
                    Ok(T_FLOAT)
                }
                BinOp::And | BinOp::Or => {
                    type_check(ctx, lt, T_BOOL, line, "only bool allowed");
                    type_check(ctx, rt, T_BOOL, line, "only bool allowed");
                    Ok(T_BOOL)
                }
                BinOp::Eq | BinOp::Neq | BinOp::StructEq | BinOp::StructNeq => {
                    if ctx.types.is_array(lt)
                        || ctx.types.is_function(lt)
                        || ctx.types.is_array(rt)
                        || ctx.types.is_function(rt)
                    {
                        return Err(SemError::EqualityOnAggregate { line });
                    }
                    if matches!(op, BinOp::StructEq | BinOp::StructNeq) {
                        check_structural_fields(ctx, lt, line)?;
                        check_structural_fields(ctx, rt, line)?;
                    }
                    type_check(ctx, lt, rt, line, "equality operands must have the same type");
                    Ok(T_BOOL)
                }
                BinOp::Lt | BinOp::Gt | BinOp::Le | BinOp::Ge => {
                    check_int_char_float(ctx, lt, line)?;
                    check_int_char_float(ctx, rt, line)?;
                    type_check(
                        ctx,
                        lt,
                        rt,
                        line,
                        "comparison operands must have the same type",
                    );
                    Ok(T_BOOL)
                }
                BinOp::Assign => {
                    if matches!(lhs.kind, ExprKind::ArrayAccess { .. }) {
                        // assignment through an element location
                        type_check(
                            ctx,
                            rt,
                            lt,
                            line,
                            "assigned value must match the element type",
                        );
                    } else {
                        let correct = ctx.types.new_ref(rt);
                        type_check(
                            ctx,
                            lt,
                            correct,
                            line,
                            "assignment target must be a ref of the assigned type",
                        );
                    }
                    Ok(T_UNIT)
                }
                BinOp::Seq => Ok(rt),
            }
        }

        ExprKind::New(te) => {
            let t = resolve_type_expr(ctx, te)?;
            if ctx.types.is_array(t) {
                return Err(SemError::NewOfArray { line });
            }
            Ok(ctx.types.new_ref(t))
        }

        ExprKind::LetIn { def, body } => {
            ctx.symbols.open_scope();
            sem_letdef(ctx, def)?;
            let t = sem_expr(ctx, body)?;
            ctx.symbols.close_scope();
            Ok(t)
        }

        ExprKind::If {
            cond,
            then_expr,
            else_expr,
        } => {
            let ct = sem_expr(ctx, cond)?;
            type_check(ctx, ct, T_BOOL, line, "condition of if must be bool");
            let tt = sem_expr(ctx, then_expr)?;
            match else_expr {
                None => {
                    type_check(
                        ctx,
                        tt,
                        T_UNIT,
                        line,
                        "if without else must be unit",
                    );
                }
                Some(els) => {
                    let et = sem_expr(ctx, els)?;
                    type_check(
                        ctx,
                        tt,
                        et,
                        line,
                        "if and else must return the same type",
                    );
                }
            }
            Ok(tt)
        }

        ExprKind::While { cond, body } => {
            let ct = sem_expr(ctx, cond)?;
            let bt = sem_expr(ctx, body)?;
            type_check(ctx, ct, T_BOOL, line, "while condition must be bool");
            type_check(ctx, bt, T_UNIT, line, "while body must be unit");
            Ok(T_UNIT)
        }

        ExprKind::For {
            var,
            var_id,
            start,
            finish,
            body,
            ..
        } => {
            ctx.symbols.open_scope();
            ctx.symbols.insert_basic(var, T_INT);
            ctx.node_types.insert(*var_id, T_INT);
            record_ident(ctx, var, line, T_INT);
            let st = sem_expr(ctx, start)?;
            let ft = sem_expr(ctx, finish)?;
            let bt = sem_expr(ctx, body)?;
            type_check(ctx, st, T_INT, line, "start value of iterator must be int");
            type_check(ctx, ft, T_INT, line, "finish value of iterator must be int");
            type_check(ctx, bt, T_UNIT, line, "for body must be unit");
            ctx.symbols.close_scope();
            Ok(T_UNIT)
        }

        ExprKind::Match { scrutinee, clauses } => {
            let st = sem_expr(ctx, scrutinee)?;
            let mut prev: Option<TypeRef> = None;
            for c in clauses {
                ctx.symbols.open_scope();
                check_pattern(ctx, &c.pattern, st)?;
                let bt = sem_expr(ctx, &c.body)?;
                ctx.symbols.close_scope();
                if let Some(p) = prev {
                    type_check(
                        ctx,
                        p,
                        bt,
                        c.line,
                        "results of match have different types",
                    );
                }
                prev = Some(bt);
            }
            Ok(prev.unwrap_or(T_UNIT))
        }
    }
}

/// `<` family operands: known types must be int, char or float; unknown
/// ones get the restriction flag.
fn check_int_char_float(ctx: &mut Compilation, t: TypeRef, line: u32) -> Result<(), SemError> {
    if ctx.types.is_unknown(t) {
        ctx.types.set_int_char_float(t);
        Ok(())
    } else if ctx.types.equals(t, T_INT)
        || ctx.types.equals(t, T_CHAR)
        || ctx.types.equals(t, T_FLOAT)
    {
        Ok(())
    } else {
        Err(SemError::NotComparable { line })
    }
}

/// Structural equality is only defined for sums whose payloads contain no
/// arrays or functions, transitively through nested sums.
fn check_structural_fields(ctx: &mut Compilation, t: TypeRef, line: u32) -> Result<(), SemError> {
    if !ctx.types.is_custom(t) {
        return Ok(());
    }
    let mut visited: FxHashSet<TypeRef> = FxHashSet::default();
    let mut stack = vec![t];
    while let Some(custom) = stack.pop() {
        if !visited.insert(custom) {
            continue;
        }
        for constr in ctx.types.constructors(custom).to_vec() {
            for field in ctx.types.fields(constr).to_vec() {
                if ctx.types.is_array(field) || ctx.types.is_function(field) {
                    return Err(SemError::StructuralEqOnAggregateFields {
                        ty: ctx.types.type_name(t).to_string(),
                        line,
                    });
                }
                if ctx.types.is_custom(field) {
                    stack.push(field);
                }
            }
        }
    }
    Ok(())
}

fn check_pattern(ctx: &mut Compilation, p: &Pattern, expected: TypeRef) -> Result<(), SemError> {
    let line = p.line;
    match &p.kind {
        PatternKind::Int(_) => {
            type_check(
                ctx,
                expected,
                T_INT,
                line,
                "literal is not a valid pattern for the matched type",
            );
        }
        PatternKind::Float(_) => {
            type_check(
                ctx,
                expected,
                T_FLOAT,
                line,
                "literal is not a valid pattern for the matched type",
            );
        }
        PatternKind::Char(_) => {
            type_check(
                ctx,
                expected,
                T_CHAR,
                line,
                "literal is not a valid pattern for the matched type",
            );
        }
        PatternKind::Bool(_) => {
            type_check(
                ctx,
                expected,
                T_BOOL,
                line,
                "literal is not a valid pattern for the matched type",
            );
        }
        PatternKind::Id(name) => {
            ctx.symbols.insert_basic(name, expected);
            ctx.node_types.insert(p.id, expected);
            record_ident(ctx, name, line, expected);
        }
        PatternKind::Constr { name, args } => {
            let constr = match ctx.constructors.lookup_constructor(name) {
                Some(entry) => entry.tg,
                None => {
                    return Err(SemError::UnknownConstructor {
                        name: name.clone(),
                        line,
                    })
                }
            };
            let parent = ctx.types.parent_custom(constr);
            type_check(
                ctx,
                expected,
                parent,
                line,
                "constructor is not of the same type as the matched expression",
            );
            let fields = ctx.types.fields(constr).to_vec();
            if fields.len() != args.len() {
                return Err(SemError::PartialConstructorPattern { line });
            }
            ctx.constructor_uses.insert(p.id, constr);
            for (sub, field) in args.iter().zip(&fields) {
                check_pattern(ctx, sub, *field)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
