//! End-to-end tests of the `melc` binary: the flag surface, the stage
//! gating, the exit codes, and the emitted artifacts.

use assert_cmd::Command;
use predicates::prelude::*;

fn melc() -> Command {
    Command::cargo_bin("melc").expect("binary builds")
}

#[test]
fn help_exits_zero_and_lists_options() {
    melc()
        .arg("-help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Usage"))
        .stdout(predicate::str::contains("frontend"));
}

#[test]
fn syntax_stage_accepts_a_valid_program() {
    melc()
        .args(["-frontend", "syntax"])
        .write_stdin("let id x = x")
        .assert()
        .success();
}

#[test]
fn parse_errors_exit_one_with_a_line() {
    melc()
        .args(["-frontend", "syntax"])
        .write_stdin("let a = 1\nlet = 2")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("line 2"))
        .stderr(predicate::str::contains("syntax error"));
}

#[test]
fn ast_dump_prints_the_program_back() {
    melc()
        .args(["-ast", "-frontend", "syntax"])
        .write_stdin("let id x = x")
        .assert()
        .success()
        .stdout(predicate::str::contains("let id x = x"));
}

#[test]
fn semantic_errors_exit_one() {
    melc()
        .args(["-frontend", "sem"])
        .write_stdin("let a = b + 1")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn idtypes_shows_open_type_variables_under_non_strict_inference() {
    melc()
        .args(["-idtypes", "-frontend", "inf"])
        .write_stdin("let f x = x")
        .assert()
        .success()
        .stdout(predicate::str::contains("f"))
        .stdout(predicate::str::contains("@"));
}

#[test]
fn type_mismatches_are_reported_at_their_origin_line() {
    melc()
        .args(["-frontend", "inf"])
        .write_stdin("let f x =\n  if x then 1\n  else 'c'")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("line 2"));
}

#[test]
fn ambiguous_comparisons_pass_inf_but_fail_compile() {
    melc()
        .args(["-frontend", "inf"])
        .write_stdin("let f x y = x < y")
        .assert()
        .success();
    melc()
        .args(["-frontend", "compile"])
        .write_stdin("let f x y = x < y")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("ambiguous"));
}

#[test]
fn ir_output_contains_main() {
    melc()
        .arg("-i")
        .write_stdin("let main = print_int 42")
        .assert()
        .success()
        .stdout(predicate::str::contains("define i32 @main"))
        .stdout(predicate::str::contains("@print_int"));
}

#[test]
fn optimized_ir_still_emits() {
    melc()
        .args(["-O", "-i"])
        .write_stdin(
            "let rec fact n = if n = 0 then 1 else n * fact (n - 1) \
             let main = print_int (fact 10)",
        )
        .assert()
        .success()
        .stdout(predicate::str::contains("@fact"));
}

#[test]
fn object_output_lands_in_the_given_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("prog.o");
    melc()
        .args(["-f", "-o", path.to_str().expect("utf8 path")])
        .write_stdin("let main = print_int 7")
        .assert()
        .success();
    let meta = std::fs::metadata(&path).expect("object file exists");
    assert!(meta.len() > 0, "object file must not be empty");
}

#[test]
fn assembly_output_mentions_main() {
    melc()
        .arg("-S")
        .write_stdin("let main = print_int 7")
        .assert()
        .success()
        .stdout(predicate::str::contains("main"));
}

#[test]
fn whole_scenario_program_compiles() {
    melc()
        .write_stdin(
            "type intpair = Pair of int int \
             let fst p = match p with Pair a b -> a \
             let a = new array [3, 4] of int \
             let u = a[1, 2] := fst (Pair 7 9) \
             let main = print_int a[1, 2]",
        )
        .assert()
        .success();
}

#[test]
fn closures_are_rejected_with_a_clear_error() {
    melc()
        .args(["-frontend", "sem"])
        .write_stdin("let outer x = let helper y = y + x in helper 3")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("closures are not supported"));
}
