use crate::error::SemError;
use crate::infer::InferError;
use crate::{analyze, analyze_liveness, Compilation};
use melc_ast::{DefStmt, Definition, Program};

fn parse(src: &str) -> Program {
    melc_par::parse(src).expect("test source must parse")
}

fn analyzed(src: &str) -> Result<(Compilation, Program), SemError> {
    let program = parse(src);
    let mut ctx = Compilation::new();
    analyze(&mut ctx, &program)?;
    analyze_liveness(&mut ctx, &program)?;
    Ok((ctx, program))
}

fn inferred(src: &str) -> (Compilation, Program) {
    let (mut ctx, program) = analyzed(src).expect("semantic analysis must succeed");
    let Compilation { types, inf, .. } = &mut ctx;
    inf.solve_all(types, true).expect("inference must succeed");
    (ctx, program)
}

fn infer_err(src: &str) -> InferError {
    let (mut ctx, _) = analyzed(src).expect("semantic analysis must succeed");
    let Compilation { types, inf, .. } = &mut ctx;
    inf.solve_all(types, true)
        .expect_err("inference was expected to fail")
}

/// The `DefStmt` of the n-th top-level `let`.
fn nth_def(program: &Program, n: usize) -> &DefStmt {
    let lets: Vec<_> = program
        .defs
        .iter()
        .filter_map(|d| match d {
            Definition::Let(l) => Some(l),
            _ => None,
        })
        .collect();
    &lets[n].defs[0]
}

fn def_type(ctx: &mut Compilation, program: &Program, n: usize) -> String {
    let id = nth_def(program, n).id();
    let tg = ctx.node_tg(id);
    let Compilation { types, inf, .. } = ctx;
    let t = inf.deep_substitute(types, tg);
    types.display(t)
}

// ----------------------------------------------------------------------
// Inference scenarios
// ----------------------------------------------------------------------

#[test]
fn identity_stays_polymorphic() {
    let (mut ctx, program) = inferred("let id x = x");
    let id = nth_def(&program, 0).id();
    let tg = ctx.node_tg(id);
    assert!(ctx.types.is_function(tg));
    let param = ctx.types.params(tg)[0];
    let result = ctx.types.result(tg);
    let p = ctx.inf.try_apply(&ctx.types, param);
    let r = ctx.inf.try_apply(&ctx.types, result);
    assert!(ctx.types.is_unknown(p), "identity's type must stay open");
    assert!(
        ctx.types.equals(p, r),
        "parameter and result must share the same type variable"
    );
}

#[test]
fn pair_projection_through_sum_type() {
    let (mut ctx, program) = inferred(
        "type intpair = Pair of int int \
         let fst p = match p with Pair a b -> a \
         let main = print_int (fst (Pair 3 5))",
    );
    assert_eq!(def_type(&mut ctx, &program, 0), "intpair -> int");
}

#[test]
fn mutually_recursive_functions_resolve() {
    let (mut ctx, program) = inferred(
        "let rec even n = if n = 0 then true else odd (n - 1) \
         and odd n = if n = 0 then false else even (n - 1)",
    );
    assert_eq!(def_type(&mut ctx, &program, 0), "int -> bool");
}

#[test]
fn array_definition_and_lvalue_access() {
    let (mut ctx, program) = inferred(
        "let a = new array [3, 4] of int \
         let u = a[1, 2] := 7 \
         let v = print_int a[1, 2]",
    );
    assert_eq!(def_type(&mut ctx, &program, 0), "(array [*, *] of int)");
    assert_eq!(def_type(&mut ctx, &program, 1), "unit");
}

#[test]
fn call_against_unknown_definition_infers_the_function_shape() {
    let (mut ctx, program) = inferred("let apply f x = f (x + 0)");
    // @1 is the still-open result variable; x was pinned to int by the body
    assert_eq!(def_type(&mut ctx, &program, 0), "(int -> @1) -> int -> @1");
}

#[test]
fn inferred_element_type_flows_from_assignment() {
    let (mut ctx, program) = inferred(
        "let mutable x \
         let u = x := 3",
    );
    // x's symbol type resolves to int ref
    let _ = program;
    let info = ctx
        .identifiers
        .iter()
        .find(|i| i.name == "x")
        .cloned()
        .expect("x must be recorded");
    let Compilation { types, inf, .. } = &mut ctx;
    let t = inf.deep_substitute(types, info.tg);
    assert_eq!(types.display(t), "int ref");
}

#[test]
fn dim_constrains_the_lower_bound() {
    // the array reaches dim through an unannotated parameter
    let (mut ctx, program) = inferred("let a = new array [3, 4] of int let n = dim 2 a");
    assert_eq!(def_type(&mut ctx, &program, 1), "int");
}

#[test]
fn string_literals_are_char_arrays() {
    let (mut ctx, program) = inferred("let greeting = \"hi\" let n = strlen greeting");
    assert_eq!(def_type(&mut ctx, &program, 0), "(array of char)");
    assert_eq!(def_type(&mut ctx, &program, 1), "int");
}

// ----------------------------------------------------------------------
// Inference failures
// ----------------------------------------------------------------------

#[test]
fn branch_type_mismatch_fails_with_the_origin_line() {
    let err = infer_err("let f x =\n  if x then 1\n  else 'c'");
    match err {
        InferError::Mismatch { line, .. } => assert_eq!(line, 2),
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn match_results_must_agree() {
    assert!(matches!(
        infer_err("let f x = match x with 1 -> 2 | 2 -> 'c' | n -> 4"),
        InferError::Mismatch { .. }
    ));
}

#[test]
fn occurs_check_fires_on_self_application() {
    assert!(matches!(
        infer_err("let selfapply f = f f"),
        InferError::Occurs { .. }
    ));
}

#[test]
fn ambiguous_comparison_is_rejected_in_strict_mode() {
    assert!(matches!(
        infer_err("let f x y = x < y"),
        InferError::Ambiguous(_)
    ));
    // the same program passes a non-strict pass
    let (mut ctx, _) = analyzed("let f x y = x < y").unwrap();
    let Compilation { types, inf, .. } = &mut ctx;
    assert!(inf.solve_all(types, false).is_ok());
}

#[test]
fn assignment_to_a_non_ref_fails() {
    assert!(matches!(
        infer_err("let u = 1 := 5"),
        InferError::Mismatch { .. }
    ));
}

// ----------------------------------------------------------------------
// Semantic rejections
// ----------------------------------------------------------------------

#[test]
fn unknown_identifier_is_reported() {
    assert!(matches!(
        analyzed("let a = b + 1"),
        Err(SemError::UnknownIdentifier { .. })
    ));
}

#[test]
fn let_in_scopes_close() {
    assert!(matches!(
        analyzed("let a = let x = 1 in x let b = x"),
        Err(SemError::UnknownIdentifier { .. })
    ));
}

#[test]
fn let_bindings_are_not_visible_within_their_own_group() {
    // non-recursive: the body of the second binding must not see the first
    assert!(matches!(
        analyzed("let a = 1 and b = a"),
        Err(SemError::UnknownIdentifier { .. })
    ));
}

#[test]
fn let_rec_requires_functions() {
    assert!(matches!(
        analyzed("let rec x = 5"),
        Err(SemError::NonFunctionRecursive { .. })
    ));
}

#[test]
fn duplicate_types_and_constructors_are_semantic_errors() {
    assert!(matches!(
        analyzed("type t = A type t = B"),
        Err(SemError::DuplicateType { .. })
    ));
    match analyzed("type t = A type s = A of int") {
        Err(SemError::DuplicateConstructor { owner, .. }) => assert_eq!(owner, "t"),
        other => panic!("unexpected result {:?}", other.map(|_| ())),
    }
}

#[test]
fn mutually_recursive_types_resolve_within_one_block() {
    let (ctx, _) = analyzed(
        "type tree = Leaf | Node of forest \
         and forest = Empty | Grove of tree",
    )
    .unwrap();
    assert!(ctx.type_table.lookup_type("tree").is_some());
    assert!(ctx.type_table.lookup_type("forest").is_some());
}

#[test]
fn call_arity_is_exact() {
    assert!(matches!(
        analyzed("let f x y = x + y let g = f 1"),
        Err(SemError::PartialApplication { .. })
    ));
    assert!(matches!(
        analyzed("let f x = x let g = f 1 2"),
        Err(SemError::TooManyArguments { .. })
    ));
}

#[test]
fn constructor_arity_is_exact() {
    assert!(matches!(
        analyzed("type t = C of int int let a = C 1"),
        Err(SemError::PartialConstructor { .. })
    ));
    assert!(matches!(
        analyzed("type t = C of int let f x = match x with C -> 1"),
        Err(SemError::PartialConstructorPattern { .. })
    ));
}

#[test]
fn equality_on_arrays_and_functions_is_rejected() {
    assert!(matches!(
        analyzed("let f (a : array of int) (b : array of int) = a = b"),
        Err(SemError::EqualityOnAggregate { .. })
    ));
    assert!(matches!(
        analyzed("let f (g : int -> int) (h : int -> int) = g == h"),
        Err(SemError::EqualityOnAggregate { .. })
    ));
}

#[test]
fn structural_equality_needs_plain_payloads() {
    assert!(matches!(
        analyzed(
            "type t = Boxed of (array of int) \
             let f (x : t) (y : t) = x == y"
        ),
        Err(SemError::StructuralEqOnAggregateFields { .. })
    ));
    // reference equality on the same type is fine
    assert!(analyzed(
        "type t = Boxed of (array of int) \
         let f (x : t) (y : t) = x = y"
    )
    .is_ok());
}

#[test]
fn known_comparison_operands_must_be_int_char_float() {
    assert!(matches!(
        analyzed("let a = true < false"),
        Err(SemError::NotComparable { .. })
    ));
}

#[test]
fn array_of_array_and_new_of_array_are_rejected() {
    assert!(matches!(
        analyzed("let mutable m [2] : array of int"),
        Err(SemError::ArrayOfArray { .. })
    ));
    assert!(matches!(
        analyzed("let r = new (array of int)"),
        Err(SemError::NewOfArray { .. })
    ));
}

#[test]
fn dim_bounds_are_checked_when_dims_are_known() {
    assert!(matches!(
        analyzed("let a = new array [3, 4] of int let n = dim 5 a"),
        Err(SemError::DimOutOfBounds { .. })
    ));
    assert!(matches!(
        analyzed("let a = new array [3] of int let n = dim 0 a"),
        Err(SemError::DimOutOfBounds { .. })
    ));
}

#[test]
fn array_access_needs_one_index_per_dimension() {
    assert!(matches!(
        analyzed("let a = new array [3, 4] of int let x = a[1]"),
        Err(SemError::ArrayIndexCount { .. })
    ));
}

// ----------------------------------------------------------------------
// Liveness
// ----------------------------------------------------------------------

#[test]
fn top_level_captures_are_allowed_and_recorded() {
    let (ctx, program) = analyzed("let k = 5 let add x = x + k").unwrap();
    let add_id = nth_def(&program, 1).id();
    let externals = &ctx.externals[&add_id];
    assert_eq!(externals.len(), 1);
    assert_eq!(externals[0].name, "k");
    assert_eq!(externals[0].depth, 0);
}

#[test]
fn nested_closures_are_rejected() {
    assert!(matches!(
        analyzed("let outer x = let helper y = y + x in helper 3"),
        Err(SemError::NestedClosure { .. })
    ));
}

#[test]
fn nested_functions_may_call_sibling_functions() {
    // helper captures only the top-level function g, which is fine
    let result = analyzed(
        "let g y = y + 1 \
         let outer x = let helper z = g z in helper x",
    );
    assert!(result.is_ok(), "got {:?}", result.err());
}

#[test]
fn recursive_reference_is_not_a_capture() {
    let (ctx, program) = analyzed("let rec fact n = if n = 0 then 1 else n * fact (n - 1)").unwrap();
    let fact_id = nth_def(&program, 0).id();
    assert!(ctx.externals[&fact_id].is_empty());
}

// ----------------------------------------------------------------------
// The -idtypes view
// ----------------------------------------------------------------------

#[test]
fn idtypes_lists_open_type_variables() {
    let (mut ctx, _) = inferred("let f x = x");
    let table = ctx.idtypes_table();
    assert!(table.contains('f'));
    assert!(table.contains('@'), "open variables print as @n: {}", table);
    assert!(table.contains("->"));
}
