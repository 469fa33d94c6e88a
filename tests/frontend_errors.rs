use std::fs;
use std::path::PathBuf;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_ID: AtomicUsize = AtomicUsize::new(0);

fn compile(src: &str) -> (i32, String, String) {
    let path: PathBuf = std::env::temp_dir().join(format!(
        "wacc_frontend_{}_{}.wacc",
        std::process::id(),
        NEXT_ID.fetch_add(1, Ordering::Relaxed)
    ));
    fs::write(&path, src).expect("failed to write test source");
    let out = Command::new(env!("CARGO_BIN_EXE_wacc"))
        .arg(&path)
        .output()
        .expect("failed to spawn wacc");
    let _ = fs::remove_file(&path);
    (
        out.status.code().unwrap_or(-1),
        String::from_utf8(out.stdout).expect("stdout is not valid utf-8"),
        String::from_utf8(out.stderr).expect("stderr is not valid utf-8"),
    )
}

fn compile_ok(src: &str) -> String {
    let (code, stdout, stderr) = compile(src);
    assert_eq!(code, 0, "compiler failed.\nstderr:\n{stderr}");
    stdout
}

fn compile_fail(src: &str, expected_code: i32) -> String {
    let (code, _, stderr) = compile(src);
    assert_eq!(
        code, expected_code,
        "unexpected exit code.\nstderr:\n{stderr}"
    );
    stderr
}

#[test]
fn accepts_declare_and_exit() {
    compile_ok("begin int x = 3 ; exit x end");
}

#[test]
fn rejects_bool_initialiser_for_int() {
    let err = compile_fail("begin int x = true end", 200);
    assert!(err.contains("type mismatch"), "stderr:\n{err}");
    assert!(err.contains("expected int"), "stderr:\n{err}");
    assert!(err.contains("got bool"), "stderr:\n{err}");
    assert!(err.contains("line 1, column 15"), "stderr:\n{err}");
}

#[test]
fn renders_offending_line_with_caret() {
    let err = compile_fail("begin int x = true end", 200);
    assert!(err.contains("begin int x = true end"), "stderr:\n{err}");
    assert!(err.contains("\n              ^"), "stderr:\n{err}");
}

#[test]
fn inner_scope_declarations_do_not_escape() {
    let err = compile_fail("begin begin int x = 1 end ; exit x end", 200);
    assert!(err.contains("'x' is not in scope"), "stderr:\n{err}");
}

#[test]
fn shadowing_in_inner_scope_is_allowed() {
    compile_ok("begin int x = 1 ; begin bool x = true ; skip end ; exit x end");
}

#[test]
fn rejects_redeclaration_in_same_scope() {
    let err = compile_fail("begin int x = 1 ; bool x = true ; exit 0 end", 200);
    assert!(err.contains("already declared"), "stderr:\n{err}");
}

#[test]
fn rejects_duplicate_parameter_names() {
    let err = compile_fail(
        "begin int f(int a, bool a) is return 1 end exit 0 end",
        200,
    );
    assert!(err.contains("already declared"), "stderr:\n{err}");
}

#[test]
fn accepts_empty_array_literal_for_any_array_type() {
    compile_ok("begin int[] a = [] ; exit 0 end");
    compile_ok("begin char[] c = [] ; exit 0 end");
}

#[test]
fn rejects_wrong_argument_count() {
    let err = compile_fail(
        "begin int f(int x) is return x end int y = call f(1, 2) ; exit 0 end",
        200,
    );
    assert!(err.contains("'f'"), "stderr:\n{err}");
    assert!(err.contains("2 argument(s)"), "stderr:\n{err}");
    assert!(err.contains("takes 1"), "stderr:\n{err}");
}

#[test]
fn rejects_wrong_argument_type() {
    let err = compile_fail(
        "begin int f(int x) is return x end int y = call f('a') ; exit 0 end",
        200,
    );
    assert!(err.contains("argument 1 of call to 'f'"), "stderr:\n{err}");
}

#[test]
fn rejects_call_to_unknown_function() {
    let err = compile_fail("begin int y = call g(1) ; exit 0 end", 200);
    assert!(err.contains("'g' is not defined"), "stderr:\n{err}");
}

#[test]
fn rejects_duplicate_function_definition() {
    let err = compile_fail(
        "begin int f() is return 1 end int f() is return 2 end exit 0 end",
        200,
    );
    assert!(err.contains("defined more than once"), "stderr:\n{err}");
}

#[test]
fn rejects_return_in_program_body() {
    let err = compile_fail("begin return 1 end", 200);
    assert!(
        err.contains("only allowed inside a function body"),
        "stderr:\n{err}"
    );
}

#[test]
fn null_compares_equal_to_null() {
    compile_ok("begin bool b = null == null ; exit 0 end");
}

#[test]
fn null_is_assignable_to_pair_types() {
    compile_ok("begin pair(int, int) p = null ; exit 0 end");
}

#[test]
fn rejects_assignment_between_unknown_pair_elements() {
    let err = compile_fail(
        "begin pair(pair, pair) p = newpair(null, null) ; fst fst p = snd snd p ; exit 0 end",
        200,
    );
    assert!(err.contains("unknown"), "stderr:\n{err}");
}

#[test]
fn char_array_is_assignable_to_string() {
    compile_ok("begin char[] a = ['h', 'i'] ; string s = a ; exit 0 end");
}

#[test]
fn rejects_read_into_bool() {
    let err = compile_fail("begin bool b = true ; read b end", 200);
    assert!(err.contains("'read' target"), "stderr:\n{err}");
    assert!(err.contains("one of {int, char}"), "stderr:\n{err}");
}

#[test]
fn rejects_free_of_scalar() {
    let err = compile_fail("begin int x = 1 ; free x end", 200);
    assert!(err.contains("'free' argument"), "stderr:\n{err}");
}

#[test]
fn rejects_non_bool_condition() {
    let err = compile_fail("begin if 1 then skip else skip fi end", 200);
    assert!(err.contains("'if' condition"), "stderr:\n{err}");
    let err = compile_fail("begin while 'c' do skip done end", 200);
    assert!(err.contains("'while' condition"), "stderr:\n{err}");
}

#[test]
fn rejects_mixed_comparison_operands() {
    let err = compile_fail("begin bool b = 1 < 'a' ; exit 0 end", 200);
    assert!(err.contains("operand of '<'"), "stderr:\n{err}");
}

#[test]
fn rejects_over_indexing_an_array() {
    let err = compile_fail("begin int[] a = [1] ; int x = a[0][1] ; exit 0 end", 200);
    assert!(err.contains("2 subscript(s)"), "stderr:\n{err}");
    assert!(err.contains("1 dimension(s)"), "stderr:\n{err}");
}

#[test]
fn collects_multiple_errors_in_one_pass() {
    let err = compile_fail("begin int x = true ; bool b = 1 ; exit b end", 200);
    assert!(err.contains("expected int"), "stderr:\n{err}");
    assert!(err.contains("expected bool"), "stderr:\n{err}");
}

#[test]
fn rejects_trailing_semicolon() {
    let err = compile_fail("begin exit 0 ; end", 100);
    assert!(err.contains("syntax error"), "stderr:\n{err}");
}

#[test]
fn rejects_out_of_range_int_literal() {
    let err = compile_fail("begin int x = 2147483648 ; exit 0 end", 100);
    assert!(err.contains("out of range"), "stderr:\n{err}");
}

#[test]
fn accepts_int_literals_at_the_i32_bounds() {
    compile_ok("begin int x = -2147483648 ; int y = 2147483647 ; exit 0 end");
}

#[test]
fn rejects_function_without_trailing_return() {
    let err = compile_fail("begin int f(int x) is skip end exit 0 end", 100);
    assert!(err.contains("return or exit"), "stderr:\n{err}");
}

#[test]
fn accepts_function_ending_in_if_where_both_branches_return() {
    compile_ok(
        "begin int sign(int x) is if x < 0 then return -1 else return 1 fi end \
         int s = call sign(5) ; exit s end",
    );
}

#[test]
fn rejects_nested_concrete_pair_in_pair_element_type() {
    let err = compile_fail(
        "begin pair(pair(int, int), int) p = null ; exit 0 end",
        100,
    );
    assert!(err.contains("syntax error"), "stderr:\n{err}");
}

#[test]
fn rejects_keyword_glued_to_identifier() {
    // `beginx` must not tokenize as `begin x`.
    let err = compile_fail("beginx = 5 end", 100);
    assert!(err.contains("syntax error"), "stderr:\n{err}");
}

#[test]
fn reports_usage_error_without_arguments() {
    let out = Command::new(env!("CARGO_BIN_EXE_wacc"))
        .output()
        .expect("failed to spawn wacc");
    assert_eq!(out.status.code(), Some(255));
}

#[test]
fn reports_usage_error_for_missing_file() {
    let out = Command::new(env!("CARGO_BIN_EXE_wacc"))
        .arg("/nonexistent/missing.wacc")
        .output()
        .expect("failed to spawn wacc");
    assert_eq!(out.status.code(), Some(255));
}
