use foxely_core::error::ErrorKind;
use foxely_core::vm::InterpretResult;

use super::helpers::*;

#[test]
fn test_report_has_message_and_backtrace() {
    let report = run_fox_err(
        "fun inner() {
             return 1 + nil;
         }
         fun outer() { inner(); }
         outer();",
    );
    assert_eq!(
        report,
        "Operands must be two numbers or two strings.\n\
         [line 2] in inner()\n\
         [line 4] in outer()\n\
         [line 5] in script\n"
    );
}

#[test]
fn test_type_errors() {
    let cases = [
        ("print -\"x\";", "Operand must be a number."),
        ("print 1 - \"a\";", "Operands must be numbers."),
        ("print 1 < nil;", "Operands must be numbers."),
        ("print 5 % true;", "Operands must be numbers."),
        ("3();", "Can only call functions and classes."),
        ("nil.foo;", "Only instances have properties."),
        ("var x = 1; x.y = 2;", "Only instances have fields."),
        ("true.m();", "Only instances && module have methods."),
        ("var N = 3; class B : N {}", "Superclass must be a class."),
        ("print 1 is 1;", "Expected class type."),
        ("class A {} print 1 is A;", "Expected an instance before the keyword 'is'."),
        ("var s = \"abc\"; s[0] = \"x\";", "Strings are immutable."),
        ("print 1[0];", "Can only subscript on arrays, strings or maps."),
        ("print [1][\"a\"];", "Array index must be a number."),
        ("print nil[1:2];", "Can only slice on arrays and strings."),
        ("print [1][\"a\":];", "Slice index must be a number."),
    ];
    for (source, message) in cases {
        let report = run_fox_err(source);
        assert_eq!(error_message(&report), message, "source: {}", source);
    }
}

#[test]
fn test_name_errors() {
    assert_eq!(
        error_message(&run_fox_err("print missing;")),
        "Undefined variable 'missing'."
    );
    assert_eq!(
        error_message(&run_fox_err("missing = 1;")),
        "Undefined variable 'missing'."
    );
    assert_eq!(
        error_message(&run_fox_err("class A {} A().nope();")),
        "Undefined property 'nope'."
    );
    assert_eq!(
        error_message(&run_fox_err("class A {} print A().nope;")),
        "Undefined property 'nope'."
    );
    assert_eq!(
        error_message(&run_fox_err("[1].nope();")),
        "Undefined methods 'nope'."
    );
}

#[test]
fn test_index_errors() {
    assert_eq!(
        error_message(&run_fox_err("print [1, 2][2];")),
        "Array index out of bounds."
    );
    assert_eq!(
        error_message(&run_fox_err("print [1, 2][-3];")),
        "Array index out of bounds."
    );
    assert_eq!(
        error_message(&run_fox_err("print \"ab\"[5];")),
        "String index out of bounds."
    );
}

#[test]
fn test_non_finite_index_is_out_of_bounds() {
    let cases = [
        ("print [1, 2][0 / 0];", "Array index out of bounds."),
        ("var a = [1]; a[1 / 0] = 2;", "Array index out of bounds."),
        ("print \"ab\"[0 / 0];", "String index out of bounds."),
        ("[1, 2].remove(0 / 0);", "Array index out of bounds."),
        ("[1, 2].insert(0 / 0, 3);", "Array index out of bounds."),
    ];
    for (source, message) in cases {
        assert_eq!(error_message(&run_fox_err(source)), message, "source: {}", source);
    }
}

#[test]
fn test_arity_errors() {
    assert_eq!(
        error_message(&run_fox_err("fun f(a) {} f(1, 2);")),
        "Expected 1 arguments but got 2."
    );
    assert_eq!(
        error_message(&run_fox_err("fun f(a, b = 1) {} f();")),
        "Expected 1 arguments but got 0."
    );
    assert_eq!(
        error_message(&run_fox_err("class A {} A(1);")),
        "Expected 0 arguments but got 1."
    );
    assert_eq!(
        error_message(&run_fox_err("[].push();")),
        "Expected 1 arguments but got 0."
    );
}

#[test]
fn test_failed_call_does_not_run_callee() {
    let mut harness = Harness::new();
    let result = harness.run("fun f(a) { print \"ran\"; } print \"before\"; f(); print \"after\";");
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(harness.out.text(), "before\n");
}

#[test]
fn test_stack_overflow() {
    let report = run_fox_err("fun r() { return r(); } r();");
    assert_eq!(error_message(&report), "Stack overflow.");
    assert!(report.contains("[line 1] in r()"));
}

#[test]
fn test_error_kind_and_location_are_recorded() {
    let mut harness = Harness::new();
    harness.run("var a = 1;\nprint a + \"s\";");
    let error = harness.vm.last_error().unwrap();
    assert_eq!(error.kind, ErrorKind::TypeError);
    assert_eq!(error.span.start.line, 2);
    assert_eq!(error.file, "main");
    assert_eq!(error.backtrace.len(), 1);
}

#[test]
fn test_vm_recovers_after_runtime_error() {
    let mut harness = Harness::new();
    assert_eq!(harness.run("var kept = 1; print nope;"), InterpretResult::RuntimeError);
    assert_eq!(harness.run_ok("print kept + 1;"), "2\n");
}

#[test]
fn test_compile_error_reports_and_skips_execution() {
    let mut harness = Harness::new();
    let result = harness.run("print \"a\";\nvar = 3;");
    assert_eq!(result, InterpretResult::CompileError);
    assert_eq!(harness.out.text(), "");
    assert!(harness.err.text().contains("main:2"));
    let kind = harness.vm.last_error().map(|e| e.kind);
    assert_eq!(kind, Some(ErrorKind::SyntaxError));
}

#[test]
fn test_abort_stops_execution() {
    let mut harness = Harness::new();
    let result = harness.run("fun stop() { abort(\"boom\"); }\nprint 1;\nstop();\nprint 2;");
    assert_eq!(result, InterpretResult::Abort);
    assert_eq!(harness.out.text(), "1\n");
    assert_eq!(
        harness.err.text(),
        "[ABORT] boom\n[line 1] in stop()\n[line 3] in script\n"
    );
}

#[test]
fn test_print_placeholder_mismatch() {
    assert_eq!(
        error_message(&run_fox_err("print \"% %\", 1;")),
        "Expected 2 arguments but got 1 in print call."
    );
}

#[test]
fn test_error_inside_string_method_is_reported_once() {
    let report = run_fox_err(
        "class Bad { string() { return nil + 1; } }
         print Bad();",
    );
    assert_eq!(report.matches("Operands must be two numbers or two strings.").count(), 1);
    assert!(report.contains("in string()"));
}

#[test]
fn test_escaped_closure_survives_runtime_error() {
    let mut harness = Harness::new();
    let result = harness.run(
        "var g;
         {
             var a = 1;
             var b = 2;
             var x = 5;
             fun f() { return x + a + b; }
             g = f;
             print nil + 1;
         }",
    );
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(harness.run_ok("print g();"), "8\n");
    assert_eq!(harness.run_ok("print g();"), "8\n");
}

#[test]
fn test_shallow_escaped_closure_keeps_its_value() {
    let mut harness = Harness::new();
    harness.run("var g; { var x = 5; fun f() { return x; } g = f; print nil + 1; }");
    assert_eq!(harness.run_ok("var filler = 0; print g();"), "5\n");
}

#[test]
fn test_closure_escaping_failed_fiber_is_closed() {
    let mut harness = Harness::new();
    let result = harness.run(
        "var g;
         var f = Fiber.new(fun () {
             var n = 7;
             g = fun () { return n; };
             return nil - 1;
         });
         f.call();",
    );
    assert_eq!(result, InterpretResult::RuntimeError);
    assert_eq!(harness.run_ok("print g();"), "7\n");
}
