use std::fs;

use foxely_core::config::VmConfig;
use foxely_core::vm::InterpretResult;
use tempfile::TempDir;

use super::helpers::*;

/// A harness whose module search path is a fresh directory holding `files`
fn harness_with_modules(files: &[(&str, &str)]) -> (Harness, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    for (name, source) in files {
        fs::write(dir.path().join(format!("{}.fox", name)), source).unwrap();
    }
    let config = VmConfig::default().with_module_path(dir.path());
    (Harness::with_config(config), dir)
}

#[test]
fn test_import_brings_module_globals_into_scope() {
    let (mut harness, _dir) = harness_with_modules(&[(
        "util",
        "var greeting = \"hi\";
         fun shout(s) { return s.upper(); }",
    )]);
    assert_eq!(harness.run_ok("import \"util\"; print shout(greeting);"), "HI\n");
}

#[test]
fn test_bare_identifier_import() {
    let (mut harness, _dir) = harness_with_modules(&[("answer", "var answer = 42;")]);
    assert_eq!(harness.run_ok("import answer; print answer;"), "42\n");
}

#[test]
fn test_module_body_runs_once() {
    let (mut harness, _dir) = harness_with_modules(&[(
        "noisy",
        "print \"loading\";
         var value = 1;",
    )]);
    let out = harness.run_ok(
        "import \"noisy\";
         import \"noisy\";
         print value;",
    );
    assert_eq!(out, "loading\n1\n");
}

#[test]
fn test_module_functions_keep_their_own_globals() {
    let (mut harness, _dir) = harness_with_modules(&[(
        "counter",
        "var count = 0;
         fun bump() { count = count + 1; return count; }",
    )]);
    let out = harness.run_ok(
        "import \"counter\";
         bump();
         print bump();",
    );
    assert_eq!(out, "2\n");
    assert!(harness.vm.get_module("counter").is_some());
}

#[test]
fn test_nested_imports() {
    let (mut harness, _dir) = harness_with_modules(&[
        ("base", "fun twice(x) { return x * 2; }"),
        ("derived", "import \"base\"; fun quad(x) { return twice(twice(x)); }"),
    ]);
    assert_eq!(harness.run_ok("import \"derived\"; print quad(3);"), "12\n");
}

#[test]
fn test_missing_module_is_an_error() {
    let (mut harness, _dir) = harness_with_modules(&[]);
    assert_eq!(harness.run("import \"missing\";"), InterpretResult::RuntimeError);
    assert_eq!(error_message(&harness.err.text()), "Could not load module 'missing'.");
}

#[test]
fn test_module_with_syntax_error_is_reported() {
    let (mut harness, _dir) = harness_with_modules(&[("broken", "var = ;")]);
    assert_eq!(harness.run("import \"broken\";"), InterpretResult::RuntimeError);
    let report = harness.err.text();
    assert!(report.contains("broken"), "report:\n{}", report);
    assert!(report.contains("Could not compile module 'broken'."), "report:\n{}", report);
}

#[test]
fn test_defining_existing_module_warns() {
    let mut harness = Harness::new();
    harness.run_ok("var x = 1;");
    let first = harness.vm.get_module("main");
    let again = harness.vm.define_module("main");
    assert_eq!(first, Some(again));
    assert_eq!(harness.err.text(), "'main': This module already exist !!\n");
}
