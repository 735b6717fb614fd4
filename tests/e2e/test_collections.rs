use super::helpers::*;

#[test]
fn test_array_literal_and_indexing() {
    let out = run_fox(
        "var a = [1, 2, 3];
         print a[0];
         print a[-1];
         a[1] = 20;
         print a;
         print [];",
    );
    assert_eq!(out, "1\n3\n[1, 20, 3]\n[]\n");
}

#[test]
fn test_array_methods() {
    let out = run_fox(
        "var a = [1, 2];
         print a.push(3);
         print a.pop();
         a.insert(0, 0);
         print a;
         print a.remove(-1);
         print a.size();
         print a.contains(1);
         print a.contains(5);
         print [\"x\", \"y\", 3].join(\"-\");
         print [1, 2].join();",
    );
    assert_eq!(out, "3\n3\n[0, 1, 2]\n2\n2\ntrue\nfalse\nx-y-3\n12\n");
}

#[test]
fn test_array_contains_compares_strings_by_content() {
    let out = run_fox("var a = [\"fo\" + \"x\"]; print a.contains(\"fox\");");
    assert_eq!(out, "true\n");
}

#[test]
fn test_slices() {
    let out = run_fox(
        "var a = [1, 2, 3, 4];
         print a[1:3];
         print a[:2];
         print a[2:];
         print a[3:1];
         print a[-5:10];
         print \"hello\"[1:3];
         print \"hello\"[:1];",
    );
    assert_eq!(out, "[2, 3]\n[1, 2]\n[3, 4]\n[]\n[1, 2, 3, 4]\nel\nh\n");
}

#[test]
fn test_string_indexing_and_methods() {
    let out = run_fox(
        "var s = \"Fox\";
         print s[0];
         print s[-1];
         print s.size();
         print s.upper();
         print s.lower();
         print s.contains(\"ox\");
         print \"a,b,c\".split(\",\");
         print \"ab\".split(\"\");",
    );
    assert_eq!(out, "F\nx\n3\nFOX\nfox\ntrue\n[a, b, c]\n[a, b]\n");
}

#[test]
fn test_string_concatenation_is_interned() {
    let out = run_fox(
        "var m = {};
         m[\"ab\"] = 1;
         print m[\"a\" + \"b\"];",
    );
    assert_eq!(out, "1\n");
}

#[test]
fn test_map_literal_and_lookup() {
    let out = run_fox(
        "var m = {\"a\": 1, 2: \"two\", true: nil};
         print m[\"a\"];
         print m[2];
         print m[\"missing\"];
         m[\"b\"] = 3;
         print m.size();
         print m;",
    );
    assert_eq!(out, "1\ntwo\nnil\n4\n{a: 1, 2: two, true: nil, b: 3}\n");
}

#[test]
fn test_map_methods_keep_insertion_order() {
    let out = run_fox(
        "var m = {\"z\": 1, \"y\": 2, \"x\": 3};
         print m.keys();
         print m.values();
         print m.has(\"y\");
         print m.remove(\"y\");
         print m.remove(\"y\");
         print m.keys();
         m[\"y\"] = 4;
         print m.keys();",
    );
    assert_eq!(
        out,
        "[z, y, x]\n[1, 2, 3]\ntrue\n2\nnil\n[z, x]\n[z, x, y]\n"
    );
}

#[test]
fn test_map_number_keys_normalize_zero() {
    let out = run_fox("var m = {}; m[0] = \"zero\"; print m[-0];");
    assert_eq!(out, "zero\n");
}

#[test]
fn test_self_referencing_array_prints() {
    let out = run_fox("var a = [1]; a.push(a); print a;");
    assert_eq!(out, "[1, [...]]\n");
}

#[test]
fn test_subscript_assign_mutates_in_place() {
    let out = run_fox(
        "var a = [5];
         var b = a;
         a[0] = a[0] + 1;
         print a;
         print b;
         b[0] = b[0] * 2;
         print a;",
    );
    assert_eq!(out, "[6]\n[6]\n[12]\n");
}
