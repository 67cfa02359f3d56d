use super::*;
use melc_ast::print_program;

fn parse_ok(src: &str) -> Program {
    match parse(src) {
        Ok(p) => p,
        Err(e) => panic!("parse of {:?} failed: {}", src, e),
    }
}

/// Printing then re-parsing must be a fixpoint on the printed form.
fn roundtrip(src: &str) {
    let once = print_program(&parse_ok(src));
    let twice = print_program(&parse_ok(&once));
    assert_eq!(once, twice, "printer/parser fixpoint violated for {:?}", src);
}

#[test]
fn parses_simple_function() {
    let p = parse_ok("let id x = x");
    assert_eq!(p.defs.len(), 1);
    let Definition::Let(l) = &p.defs[0] else {
        panic!("expected let definition")
    };
    assert!(!l.recursive);
    let DefStmt::Function(f) = &l.defs[0] else {
        panic!("expected function")
    };
    assert_eq!(f.name, "id");
    assert_eq!(f.params.len(), 1);
    assert!(f.params[0].ty.is_unknown());
}

#[test]
fn parses_let_rec_and_group() {
    let p = parse_ok(
        "let rec even n = if n = 0 then true else odd (n - 1) \
         and odd n = if n = 0 then false else even (n - 1)",
    );
    let Definition::Let(l) = &p.defs[0] else {
        panic!("expected let definition")
    };
    assert!(l.recursive);
    assert_eq!(l.defs.len(), 2);
    assert_eq!(l.defs[1].name(), "odd");
}

#[test]
fn parses_type_definition() {
    let p = parse_ok("type intpair = Pair of int int");
    let Definition::Type(t) = &p.defs[0] else {
        panic!("expected type definition")
    };
    assert_eq!(t.decls[0].name, "intpair");
    let c = &t.decls[0].constructors[0];
    assert_eq!(c.name, "Pair");
    assert_eq!(c.fields.len(), 2);
}

#[test]
fn parses_multi_constructor_type() {
    let p = parse_ok("type color = Red | Green | Blue");
    let Definition::Type(t) = &p.defs[0] else {
        panic!("expected type definition")
    };
    assert_eq!(t.decls[0].constructors.len(), 3);
    assert!(t.decls[0].constructors.iter().all(|c| c.fields.is_empty()));
}

#[test]
fn new_array_sugar_becomes_array_definition() {
    let p = parse_ok("let a = new array [3, 4] of int");
    let Definition::Let(l) = &p.defs[0] else {
        panic!("expected let definition")
    };
    let DefStmt::Array(a) = &l.defs[0] else {
        panic!("expected array definition, got {:?}", l.defs[0])
    };
    assert_eq!(a.name, "a");
    assert_eq!(a.sizes.len(), 2);
    assert!(matches!(a.elem_ty.kind, TypeExprKind::Int));
}

#[test]
fn mutable_forms() {
    let p = parse_ok("let mutable x : int and mutable row [10] : float");
    let Definition::Let(l) = &p.defs[0] else {
        panic!("expected let definition")
    };
    assert!(matches!(&l.defs[0], DefStmt::Variable(_)));
    assert!(matches!(&l.defs[1], DefStmt::Array(a) if a.sizes.len() == 1));
}

#[test]
fn application_binds_tighter_than_operators() {
    let p = parse_ok("let x = f 1 + 2");
    let Definition::Let(l) = &p.defs[0] else {
        panic!("expected let")
    };
    let DefStmt::Constant(c) = &l.defs[0] else {
        panic!("expected constant")
    };
    let ExprKind::Binop { lhs, op, .. } = &c.expr.kind else {
        panic!("expected binop at top, got {:?}", c.expr.kind)
    };
    assert_eq!(*op, BinOp::Add);
    assert!(matches!(&lhs.kind, ExprKind::Call { name, args } if name == "f" && args.len() == 1));
}

#[test]
fn multiplication_binds_tighter_than_addition() {
    let p = parse_ok("let x = 1 + 2 * 3");
    let Definition::Let(l) = &p.defs[0] else {
        panic!("expected let")
    };
    let DefStmt::Constant(c) = &l.defs[0] else {
        panic!("expected constant")
    };
    let ExprKind::Binop { op, rhs, .. } = &c.expr.kind else {
        panic!("expected binop")
    };
    assert_eq!(*op, BinOp::Add);
    assert!(matches!(&rhs.kind, ExprKind::Binop { op: BinOp::Mul, .. }));
}

#[test]
fn assignment_through_array_access() {
    let p = parse_ok("let u = a[1, 2] := 7");
    let Definition::Let(l) = &p.defs[0] else {
        panic!("expected let")
    };
    let DefStmt::Constant(c) = &l.defs[0] else {
        panic!("expected constant")
    };
    let ExprKind::Binop { lhs, op, .. } = &c.expr.kind else {
        panic!("expected binop")
    };
    assert_eq!(*op, BinOp::Assign);
    assert!(
        matches!(&lhs.kind, ExprKind::ArrayAccess { name, indices } if name == "a" && indices.len() == 2)
    );
}

#[test]
fn match_with_clauses() {
    let p = parse_ok("let fst p = match p with Pair a b -> a");
    let Definition::Let(l) = &p.defs[0] else {
        panic!("expected let")
    };
    let DefStmt::Function(f) = &l.defs[0] else {
        panic!("expected function")
    };
    let ExprKind::Match { clauses, .. } = &f.body.kind else {
        panic!("expected match")
    };
    assert_eq!(clauses.len(), 1);
    let PatternKind::Constr { name, args } = &clauses[0].pattern.kind else {
        panic!("expected constructor pattern")
    };
    assert_eq!(name, "Pair");
    assert_eq!(args.len(), 2);
}

#[test]
fn negative_literal_patterns() {
    let p = parse_ok("let f x = match x with -1 -> true | 0 -> false | n -> true");
    let Definition::Let(l) = &p.defs[0] else {
        panic!("expected let")
    };
    let DefStmt::Function(f) = &l.defs[0] else {
        panic!("expected function")
    };
    let ExprKind::Match { clauses, .. } = &f.body.kind else {
        panic!("expected match")
    };
    assert!(matches!(clauses[0].pattern.kind, PatternKind::Int(-1)));
    assert!(matches!(clauses[2].pattern.kind, PatternKind::Id(_)));
}

#[test]
fn for_and_while_loops() {
    let p = parse_ok(
        "let main = for i = 1 to 10 do print_int i done; \
         while true do () done",
    );
    let Definition::Let(l) = &p.defs[0] else {
        panic!("expected let")
    };
    let DefStmt::Constant(c) = &l.defs[0] else {
        panic!("expected constant")
    };
    assert!(matches!(
        &c.expr.kind,
        ExprKind::Binop { op: BinOp::Seq, .. }
    ));
}

#[test]
fn let_in_with_function_types() {
    let p = parse_ok("let apply (f : int -> int) x = f x");
    let Definition::Let(l) = &p.defs[0] else {
        panic!("expected let")
    };
    let DefStmt::Function(d) = &l.defs[0] else {
        panic!("expected function")
    };
    assert!(matches!(d.params[0].ty.kind, TypeExprKind::Fn(_, _)));
}

#[test]
fn dim_defaults_to_first_dimension() {
    let p = parse_ok("let n = dim a let m = dim 2 a");
    let get = |d: &Definition| -> (i32, String) {
        let Definition::Let(l) = d else { panic!() };
        let DefStmt::Constant(c) = &l.defs[0] else {
            panic!()
        };
        let ExprKind::Dim { index, array } = &c.expr.kind else {
            panic!("expected dim")
        };
        (*index, array.clone())
    };
    assert_eq!(get(&p.defs[0]), (1, "a".to_string()));
    assert_eq!(get(&p.defs[1]), (2, "a".to_string()));
}

#[test]
fn syntax_error_carries_line() {
    let err = parse("let a = 1\nlet = 2").unwrap_err();
    match err {
        ParseError::Unexpected { line, .. } => assert_eq!(line, 2),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn print_parse_fixpoint() {
    roundtrip("let id x = x");
    roundtrip("type intpair = Pair of int int let fst p = match p with Pair a b -> a");
    roundtrip(
        "let rec even n = if n = 0 then true else odd (n - 1) \
         and odd n = if n = 0 then false else even (n - 1)",
    );
    roundtrip("let a = new array [3, 4] of int let u = a[1, 2] := 7 let v = print_int a[1, 2]");
    roundtrip("let mutable x : int let u = x := 41; incr x; print_int !x");
    roundtrip("let f (g : int -> int) (s : array of char) = g (strlen s)");
    roundtrip("let m x = match x with Cons h t -> (match h with 0 -> t | n -> t) | Nil -> x");
    roundtrip("let c = if 'a' < 'b' then \"a\\nb\" else \"\"");
    roundtrip("let r = new float let u = r := 3.5 ** 2.0");
}
