use super::helpers::*;

#[test]
fn test_counter_instances_keep_their_own_fields() {
    let out = run_fox(
        "class Counter {
             init() { this.n = 0; }
             inc() { this.n = this.n + 1; return this.n; }
         }
         var a = Counter();
         print a.inc();
         print a.inc();
         var b = Counter();
         print b.inc();",
    );
    assert_eq!(out, "1\n2\n1\n");
}

#[test]
fn test_initializer_returns_instance() {
    let out = run_fox(
        "class Point { init(x, y) { this.x = x; this.y = y; } }
         var p = Point(1, 2);
         print p.x + p.y;
         print p;
         print p.init(5, 6).x;",
    );
    assert_eq!(out, "3\nPoint instance\n5\n");
}

#[test]
fn test_inheritance_and_super_calls() {
    let out = run_fox(
        "class A {
             init(x) { this.x = x; }
             describe() { return \"A\" + str(this.x); }
             base() { return \"base\"; }
         }
         class B : A {
             init(x) { super.init(x * 2); }
             describe() { return \"B\" + super.describe(); }
         }
         var b = B(2);
         print b.describe();
         print b.base();",
    );
    assert_eq!(out, "BA4\nbase\n");
}

#[test]
fn test_bound_method_keeps_receiver() {
    let out = run_fox(
        "class Greeter {
             init(name) { this.name = name; }
             hello() { return \"hi \" + this.name; }
         }
         var f = Greeter(\"fox\").hello;
         print f();
         print f;",
    );
    assert_eq!(out, "hi fox\n<fn hello>\n");
}

#[test]
fn test_field_shadows_method_on_invoke() {
    let out = run_fox(
        "class A { m() { return \"method\"; } }
         var a = A();
         a.m = fun () { return \"field\"; };
         print a.m();",
    );
    assert_eq!(out, "field\n");
}

#[test]
fn test_is_compares_classes() {
    let out = run_fox(
        "class A {}
         class B : A {}
         print B() is B;
         print A() is B;",
    );
    assert_eq!(out, "true\nfalse\n");
}

#[test]
fn test_instanceof_walks_superclasses() {
    let out = run_fox(
        "class A {}
         class B : A {}
         class C : B {}
         print instanceof(C(), A);
         print instanceof(C(), B);
         print instanceof(A(), C);
         print instanceof(1, A);",
    );
    assert_eq!(out, "true\ntrue\nfalse\nfalse\n");
}

#[test]
fn test_operator_overloads() {
    let out = run_fox(
        "class Vec {
             init(x, y) { this.x = x; this.y = y; }
             operator + (o) { return Vec(this.x + o.x, this.y + o.y); }
             operator - (o) { return Vec(this.x - o.x, this.y - o.y); }
             operator * (k) { return Vec(this.x * k, this.y * k); }
             string() { return \"(\" + str(this.x) + \", \" + str(this.y) + \")\"; }
         }
         print Vec(1, 2) + Vec(3, 4);
         print Vec(5, 5) - Vec(1, 2);
         print Vec(1, 2) * 3;",
    );
    assert_eq!(out, "(4, 6)\n(4, 3)\n(3, 6)\n");
}

#[test]
fn test_operators_are_inherited() {
    let out = run_fox(
        "class Num {
             init(v) { this.v = v; }
             operator + (o) { return this.v + o.v; }
         }
         class Other : Num {}
         print Other(1) + Other(2);",
    );
    assert_eq!(out, "3\n");
}

#[test]
fn test_string_method_used_by_str() {
    let out = run_fox(
        "class Name { string() { return \"fox\"; } }
         print str(Name()) + \"!\";
         print [Name(), 1];",
    );
    assert_eq!(out, "fox!\n[fox, 1]\n");
}

#[test]
fn test_class_values_print_their_name() {
    let out = run_fox("class Fox {} print Fox; print type(Fox); print type(Fox());");
    assert_eq!(out, "Fox\nclass\ninstance\n");
}
