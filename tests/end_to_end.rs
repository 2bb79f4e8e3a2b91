//! End-to-end tests: compile a program, run it against a fixed stdin,
//! and check it completes with the expected outcome. These exercise the
//! compiler and interpreter together the way a user invoking `tacvm`
//! would.

use std::io::Cursor;

use tacvm::common::Error;
use tacvm::compile_and_run;

fn run(source: &str, input: &str) -> Result<(), Error> {
    compile_and_run(source, Cursor::new(input.as_bytes().to_vec()))
}

#[test]
fn arithmetic_and_variables() {
    run("a = 1 + 2 * 3\nprint(a)\n", "").unwrap();
}

#[test]
fn if_else_branches_both_ways() {
    run("a = 1\nif a > 0\n print(\"positive\")\nelse\n print(\"non-positive\")\nend\n", "").unwrap();
}

#[test]
fn while_loop_counts_to_ten() {
    run("i = 0\nwhile i < 10\n i = i + 1\nend\nprint(i)\n", "").unwrap();
}

#[test]
fn user_defined_function_with_recursion() {
    run(
        "function fib(n)\n if n < 2\n return n\n end\n return fib(n - 1) + fib(n - 2)\n end\nprint(fib(10))\n",
        "",
    )
    .unwrap();
}

#[test]
fn functions_can_be_called_before_their_definition_appears() {
    run("print(later(3))\nfunction later(x)\n return x + 1\n end\n", "").unwrap();
}

#[test]
fn mutual_recursion_across_two_functions() {
    run(
        "function is_even(n)\n if n == 0\n return true\n end\n return is_odd(n - 1)\n end\nfunction is_odd(n)\n if n == 0\n return false\n end\n return is_even(n - 1)\n end\nprint(is_even(10))\n",
        "",
    )
    .unwrap();
}

#[test]
fn string_concatenation_and_length() {
    run("s = \"foo\" + \"bar\"\nprint(len(s))\n", "").unwrap();
}

#[test]
fn string_plus_number_coerces_the_number_to_a_string() {
    run("s = \"x\" + 1\nprint(s)\n", "").unwrap();
}

#[test]
fn string_repetition_via_multiplication() {
    run("s = \"ab\" * 3\nprint(s, len(s))\n", "").unwrap();
}

#[test]
fn string_repetition_by_a_fractional_count_below_one_is_empty() {
    run("s = \"ab\" * 0.5\nprint(len(s))\n", "").unwrap();
}

#[test]
fn substring_full_and_partial_slices() {
    run("s = \"hello world\"\nprint(s[:])\nprint(s[6:])\nprint(s[:5])\nprint(s[0:5])\n", "").unwrap();
}

#[test]
fn substring_with_equal_bounds_is_empty() {
    run("s = \"hello\"\nprint(s[2:2])\n", "").unwrap();
}

#[test]
fn substring_clamps_bounds_past_the_end() {
    run("s = \"hi\"\nprint(s[0:1000])\n", "").unwrap();
}

#[test]
fn substring_clamps_a_negative_lower_bound_to_zero() {
    run("s = \"hello\"\nprint(s[-5:2])\n", "").unwrap();
}

#[test]
fn substring_with_a_non_numeric_bound_is_a_runtime_error() {
    let err = run("s = \"hello\"\nb = s[true:2]\n", "").unwrap_err();
    assert!(matches!(err, Error::RuntimeIncompatibleTypes { .. }));
}

#[test]
fn find_and_sort_builtins() {
    run("s = \"banana\"\nprint(find(s, \"na\"))\nprint(sort(s))\n", "").unwrap();
}

#[test]
fn len_of_a_non_string_is_zero() {
    run("print(len(42))\n", "").unwrap();
}

#[test]
fn type_of_reports_each_kind() {
    run(
        "print(typeOf(1))\nprint(typeOf(\"x\"))\nprint(typeOf(true))\nprint(typeOf(nil))\n",
        "",
    )
    .unwrap();
}

#[test]
fn type_of_accepts_a_bare_function_name() {
    run("function f()\n return 1\n end\nprint(typeOf(f))\n", "").unwrap();
}

#[test]
fn numeric_converts_a_numeric_looking_string() {
    run("a = numeric(\"42\")\nprint(a + 1)\n", "").unwrap();
}

#[test]
fn numeric_rejects_a_non_numeric_string() {
    let err = run("a = numeric(\"not a number\")\n", "").unwrap_err();
    assert!(matches!(err, Error::RuntimeNumericConversion));
}

#[test]
fn numeric_rejects_a_boolean() {
    let err = run("a = numeric(true)\n", "").unwrap_err();
    assert!(matches!(err, Error::RuntimeNumericConversion));
}

#[test]
fn numeric_rejects_nil() {
    let err = run("a = numeric(nil)\n", "").unwrap_err();
    assert!(matches!(err, Error::RuntimeNumericConversion));
}

#[test]
fn division_by_zero_is_a_runtime_error() {
    let err = run("a = 1 / 0\n", "").unwrap_err();
    assert!(matches!(err, Error::RuntimeZeroDivision));
}

#[test]
fn zero_to_the_zero_is_one() {
    run("print(0 ^ 0)\n", "").unwrap();
}

#[test]
fn input_reads_a_line_from_stdin() {
    run("a = input()\nprint(a)\n", "hello\n").unwrap();
}

#[test]
fn input_on_immediate_eof_is_a_runtime_error() {
    let err = run("a = input()\nprint(typeOf(a))\n", "").unwrap_err();
    assert!(matches!(err, Error::RuntimeOther(_)));
}

#[test]
fn input_on_empty_line_yields_an_empty_string() {
    run("a = input()\nprint(len(a))\n", "\n").unwrap();
}

#[test]
fn adding_incompatible_types_is_a_runtime_error() {
    let err = run("a = 1 + \"x\"\n", "").unwrap_err();
    assert!(matches!(err, Error::RuntimeIncompatibleTypes { .. }));
}

#[test]
fn undefined_variable_reference_is_a_semantic_error() {
    let err = run("print(nope)\n", "").unwrap_err();
    assert!(matches!(err, Error::SemanticsUndefinedVariable { .. }));
}

#[test]
fn calling_an_undeclared_function_is_a_semantic_error() {
    let err = run("print(nope())\n", "").unwrap_err();
    assert!(matches!(err, Error::SemanticsUndefinedFunction { .. }));
}

#[test]
fn function_name_used_as_a_bare_value_is_rejected() {
    let err = run("function f()\n return 1\n end\na = f\n", "").unwrap_err();
    assert!(matches!(err, Error::SemanticsOther { .. }));
}

#[test]
fn calling_a_function_with_fewer_arguments_pads_with_nil() {
    run("function describe(a, b)\n return typeOf(b)\n end\nprint(describe(1))\n", "").unwrap();
}

#[test]
fn return_in_main_stops_top_level_execution_early() {
    run("print(\"before\")\nreturn 0\nprint(\"after\")\n", "").unwrap();
}
