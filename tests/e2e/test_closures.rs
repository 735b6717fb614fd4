use super::helpers::*;

#[test]
fn test_closure_reads_enclosing_locals() {
    let out = run_fox(
        "var x = 1;
         {
             var y = 2;
             fun f() { return x + y; }
             print f();
         }",
    );
    assert_eq!(out, "3\n");
}

#[test]
fn test_counters_are_independent() {
    let out = run_fox(
        "fun makeCounter() {
             var count = 0;
             fun inc() { count = count + 1; return count; }
             return inc;
         }
         var a = makeCounter();
         var b = makeCounter();
         print a();
         print a();
         print b();",
    );
    assert_eq!(out, "1\n2\n1\n");
}

#[test]
fn test_closures_share_captured_variable() {
    let out = run_fox(
        "var get; var set;
         fun pair() {
             var value = \"before\";
             fun g() { return value; }
             fun s(v) { value = v; }
             get = g; set = s;
         }
         pair();
         set(\"after\");
         print get();",
    );
    assert_eq!(out, "after\n");
}

#[test]
fn test_nested_upvalues_close_in_order() {
    let out = run_fox(
        "fun outer() {
             var a = 1;
             fun middle() {
                 var b = 2;
                 fun inner() { return a + b; }
                 return inner;
             }
             return middle();
         }
         print outer()();",
    );
    assert_eq!(out, "3\n");
}

#[test]
fn test_loop_closures_capture_fresh_variable() {
    let out = run_fox(
        "var fns = [];
         for (var i = 0; i < 3; i = i + 1) {
             var j = i * 2;
             fns.push(fun () { return j; });
         }
         print fns[0]() + fns[1]() + fns[2]();",
    );
    assert_eq!(out, "6\n");
}

#[test]
fn test_default_parameters() {
    let out = run_fox(
        "fun greet(name, greeting = \"Hello\") { return greeting + \", \" + name; }
         print greet(\"Fox\");
         print greet(\"Fox\", \"Hi\");",
    );
    assert_eq!(out, "Hello, Fox\nHi, Fox\n");
}

#[test]
fn test_variadic_parameters_pack_extras() {
    let out = run_fox(
        "fun count(first, ...rest) { return rest.size(); }
         print count(1);
         print count(1, 2, 3);
         fun all(...items) { return items; }
         print all(4, 5);",
    );
    assert_eq!(out, "0\n2\n[4, 5]\n");
}

#[test]
fn test_recursion() {
    let out = run_fox(
        "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); }
         print fib(15);",
    );
    assert_eq!(out, "610\n");
}

#[test]
fn test_increment_operators() {
    let out = run_fox(
        "var i = 1;
         i++;
         print i;
         print i--;
         class Box { init() { this.n = 10; } }
         var b = Box();
         b.n++;
         print b.n;",
    );
    assert_eq!(out, "2\n1\n11\n");
}
