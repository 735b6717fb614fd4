use foxely_core::vm::{InterpretResult, Value, VM};

use super::helpers::*;

fn twice(_vm: &mut VM, _receiver: Value, args: &[Value]) -> Result<Value, String> {
    match args {
        [Value::Number(n)] => Ok(Value::Number(n * 2.0)),
        _ => Err("twice() takes one number.".to_string()),
    }
}

#[test]
fn test_native_function() {
    let mut harness = Harness::new();
    harness.vm.define_native("main", "twice", twice);
    assert_eq!(harness.run_ok("print twice(21);"), "42\n");

    assert_eq!(harness.run("twice(\"x\");"), InterpretResult::RuntimeError);
    assert_eq!(error_message(&harness.err.text()), "twice() takes one number.");
}

struct Point {
    x: f64,
    y: f64,
}

fn point_new(vm: &mut VM, _receiver: Value, args: &[Value]) -> Result<Value, String> {
    let [Value::Number(x), Value::Number(y)] = args else {
        return Err("Point.new expects two numbers.".to_string());
    };
    let Some(Value::Object(class)) = vm.get_variable("main", "Point") else {
        return Err("Point class is not defined.".to_string());
    };
    Ok(vm.new_foreign_instance(class, Box::new(Point { x: *x, y: *y })))
}

fn point_x(vm: &mut VM, receiver: Value, _args: &[Value]) -> Result<Value, String> {
    let point = vm.foreign::<Point>(receiver).ok_or("Expected a Point.")?;
    Ok(Value::Number(point.x))
}

fn point_set_x(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    let Some(Value::Number(x)) = args.first().copied() else {
        return Err("x must be a number.".to_string());
    };
    let point = vm.foreign_mut::<Point>(receiver).ok_or("Expected a Point.")?;
    point.x = x;
    Ok(Value::Number(x))
}

fn point_length_squared(vm: &mut VM, receiver: Value, _args: &[Value]) -> Result<Value, String> {
    let point = vm.foreign::<Point>(receiver).ok_or("Expected a Point.")?;
    Ok(Value::Number(point.x * point.x + point.y * point.y))
}

fn register_point(vm: &mut VM) {
    let class = vm.define_class("main", "Point");
    vm.define_getter(class, "x", point_x);
    vm.define_setter(class, "x", point_set_x);
    vm.define_method(class, "lengthSquared", point_length_squared);
    vm.define_native("main", "makePoint", point_new);
}

#[test]
fn test_foreign_class_with_accessors() {
    let mut harness = Harness::new();
    register_point(&mut harness.vm);
    let out = harness.run_ok(
        "var p = makePoint(1, 2);
         print p.x;
         p.x = 5;
         print p.x;
         print p.lengthSquared();
         print p;",
    );
    assert_eq!(out, "1\n5\n29\nPoint instance\n");
}

#[test]
fn test_foreign_payload_visible_to_host() {
    let mut harness = Harness::new();
    register_point(&mut harness.vm);
    harness.run_ok("var p = makePoint(3, 4); p.x = 6;");
    let p = harness.vm.get_variable("main", "p").unwrap();
    let point = harness.vm.foreign::<Point>(p).unwrap();
    assert_eq!((point.x, point.y), (6.0, 4.0));
}

fn math_sq(_vm: &mut VM, _receiver: Value, args: &[Value]) -> Result<Value, String> {
    match args {
        [Value::Number(n)] => Ok(Value::Number(n * n)),
        _ => Err("sq() takes one number.".to_string()),
    }
}

#[test]
fn test_native_library() {
    let mut harness = Harness::new();
    harness.vm.define_lib("main", "math", &[("sq", math_sq)]);
    let out = harness.run_ok(
        "print math.sq(3);
         var f = math.sq;
         print f(4);",
    );
    assert_eq!(out, "9\n16\n");
    assert_eq!(harness.run("math.cube(2);"), InterpretResult::RuntimeError);
}

#[test]
fn test_call_handle_from_host() {
    let mut harness = Harness::new();
    harness.run_ok("fun greet(name) { print \"hello \" + name; return name.size(); }");
    let greet = harness.vm.make_call_handle("greet(_)");
    assert_eq!(greet.arity(), 1);

    let callee = harness.vm.get_variable("main", "greet").unwrap();
    harness.vm.ensure_slots(2);
    harness.vm.set_slot(0, callee);
    harness.vm.set_slot_string(1, "fox");
    assert_eq!(harness.vm.call(&greet), InterpretResult::Ok);
    assert_eq!(harness.vm.get_slot_number(0), Some(3.0));
    harness.vm.release_slots();
    greet.release(&mut harness.vm);
    assert_eq!(harness.out.text(), "hello fox\n");
}

#[test]
fn test_callable_invokes_script_function() {
    let mut harness = Harness::new();
    harness.run_ok("var calls = 0; fun add(a, b) { calls = calls + 1; return a + b; }");
    let add = harness.vm.function("main", "add").unwrap();
    for _ in 0..3 {
        let sum = add.call(&mut harness.vm, &[Value::Number(2.0), Value::Number(3.0)]).unwrap();
        assert_eq!(sum, Value::Number(5.0));
    }
    add.release(&mut harness.vm);
    assert_eq!(harness.vm.get_variable("main", "calls"), Some(Value::Number(3.0)));
}

#[test]
fn test_callable_error_leaves_vm_usable() {
    let mut harness = Harness::new();
    harness.run_ok("fun fail() { return nil + 1; }");
    let fail = harness.vm.function("main", "fail").unwrap();
    let error = fail.call(&mut harness.vm, &[]).unwrap_err();
    assert_eq!(error.message, "Operands must be two numbers or two strings.");
    fail.release(&mut harness.vm);
    assert_eq!(harness.run_ok("print 1 + 1;"), "2\n");
}

fn apply(vm: &mut VM, _receiver: Value, args: &[Value]) -> Result<Value, String> {
    let [callee, arg] = args else {
        return Err("apply(f, x) takes two arguments.".to_string());
    };
    vm.call_value_sync(*callee, &[*arg]).map_err(|e| e.message)
}

#[test]
fn test_native_calls_back_into_script() {
    let mut harness = Harness::new();
    harness.vm.define_native("main", "apply", apply);
    let out = harness.run_ok(
        "fun inc(x) { return x + 1; }
         print apply(inc, 41);
         print apply(fun (s) { return s + \"!\"; }, \"hey\");",
    );
    assert_eq!(out, "42\nhey!\n");
}

#[test]
fn test_host_values_survive_collection() {
    let mut harness = Harness::new();
    let list = harness.vm.new_array(vec![Value::Number(7.0)]);
    let handle = harness.vm.make_handle(list);
    harness.vm.collect_garbage();
    let held = harness.vm.handle_value(&handle);
    harness.vm.define_variable("main", "held", held);
    harness.vm.release_handle(handle);
    assert_eq!(harness.run_ok("print held;"), "[7]\n");
}
