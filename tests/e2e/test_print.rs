use super::helpers::*;

#[test]
fn test_format_placeholders() {
    let out = run_fox(
        "print \"% + % = %\", 1, 2, 1 + 2;
         print \"%%: %\", 5;
         print \"[%]\", [1, \"a\"];",
    );
    assert_eq!(out, "1 + 2 = 3\n%: 5\n[[1, a]]\n");
}

#[test]
fn test_number_formatting() {
    let out = run_fox(
        "print 1.5;
         print 5 / 2;
         print 1;
         print 10 / 5;
         print -0.25;
         print 7 % 3;",
    );
    assert_eq!(out, "1.5\n2.5\n1\n2\n-0.25\n1\n");
}

#[test]
fn test_literal_values() {
    let out = run_fox("print nil; print true; print !true; print \"text\";");
    assert_eq!(out, "nil\ntrue\nfalse\ntext\n");
}

#[test]
fn test_callables_and_classes() {
    let out = run_fox(
        "fun f() {}
         class A {}
         print f;
         print A;
         print A();
         print clock;
         print Fiber;
         print Fiber.new(f);",
    );
    assert_eq!(out, "<fn f>\nA\nA instance\n<native fn clock>\n<lib Fiber>\n<fiber>\n");
}

#[test]
fn test_type_names() {
    let out = run_fox(
        "print type(nil);
         print type(1);
         print type(true);
         print type(\"s\");
         print type([]);
         print type({});
         print type(clock);
         print type(Fiber.new(fun () {}));",
    );
    assert_eq!(
        out,
        "nil\nnumber\nbool\nstring\narray\nmap\nfunction\nfiber\n"
    );
}

#[test]
fn test_str_converts_values() {
    let out = run_fox("print str(12) + str(nil) + str([true]);");
    assert_eq!(out, "12nil[true]\n");
}

#[test]
fn test_nested_collections() {
    let out = run_fox("print {\"k\": [1, {\"n\": nil}]};");
    assert_eq!(out, "{k: [1, {n: nil}]}\n");
}
