use foxely_core::config::VmConfig;

use super::helpers::*;

const PING_PONG: &str = "
var f = Fiber.new(fun (x) {
    print x;
    var y = Fiber.yield(x + 1);
    print y;
    return \"done\";
});
print f.call(1);
print f.isDone();
print f.call(10);
print f.isDone();
";

#[test]
fn test_yield_and_resume_pass_values() {
    assert_eq!(run_fox(PING_PONG), "1\n2\nfalse\n10\ndone\ntrue\n");
}

#[test]
fn test_generator_loop() {
    let out = run_fox(
        "var gen = Fiber.new(fun () {
             for (var i = 0; i < 3; i = i + 1) Fiber.yield(i);
         });
         while (!gen.isDone()) {
             var v = gen.call();
             if (v != nil) print v;
         }",
    );
    assert_eq!(out, "0\n1\n2\n");
}

#[test]
fn test_nested_fibers() {
    let out = run_fox(
        "var inner = Fiber.new(fun () {
             Fiber.yield(\"inner 1\");
             return \"inner 2\";
         });
         var outer = Fiber.new(fun () {
             Fiber.yield(inner.call());
             Fiber.yield(inner.call());
         });
         print outer.call();
         print outer.call();",
    );
    assert_eq!(out, "inner 1\ninner 2\n");
}

#[test]
fn test_fiber_closure_sees_upvalues() {
    let out = run_fox(
        "fun make() {
             var total = 0;
             var f = Fiber.new(fun (n) {
                 while (true) { total = total + n; n = Fiber.yield(total); }
             });
             return f;
         }
         var acc = make();
         acc.call(1);
         acc.call(2);
         print acc.call(3);",
    );
    assert_eq!(out, "6\n");
}

#[test]
fn test_calling_finished_fiber_fails() {
    let report = run_fox_err(
        "var f = Fiber.new(fun () { return 1; });
         f.call();
         f.call();",
    );
    assert_eq!(error_message(&report), "Cannot call a finished fiber.");
}

#[test]
fn test_fiber_cannot_resume_itself() {
    let report = run_fox_err(
        "var f;
         f = Fiber.new(fun () { f.call(); });
         f.call();",
    );
    assert_eq!(error_message(&report), "Fiber has already been called.");
}

#[test]
fn test_yield_from_root_fails() {
    let report = run_fox_err("Fiber.yield(1);");
    assert_eq!(error_message(&report), "Cannot yield from the root fiber.");
}

#[test]
fn test_error_in_fiber_unwinds_to_script() {
    let mut harness = Harness::new();
    let result = harness.run(
        "var f = Fiber.new(fun () { return nil - 1; });
         print \"start\";
         f.call();
         print \"unreachable\";",
    );
    assert_eq!(result, foxely_core::vm::InterpretResult::RuntimeError);
    assert_eq!(harness.out.text(), "start\n");
    assert_eq!(error_message(&harness.err.text()), "Operands must be numbers.");
    // The VM stays usable afterwards
    assert_eq!(harness.run_ok("print f.isDone();"), "true\n");
}

#[test]
fn test_fibers_under_gc_stress() {
    let config = VmConfig {
        gc_stress: true,
        ..VmConfig::default()
    };
    let mut harness = Harness::with_config(config);
    assert_eq!(harness.run_ok(PING_PONG), "1\n2\nfalse\n10\ndone\ntrue\n");
}
