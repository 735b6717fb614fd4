// Fiber built-in library
// `Fiber.new` / `Fiber.yield` plus the methods every fiber object has

use super::{check_arity, check_arity_range, receiver_of};
use crate::vm::{MethodTable, Object, Value, VM};

pub fn register(vm: &mut VM, module: &str) {
    vm.define_lib(
        module,
        "Fiber",
        &[("new", fiber_new), ("yield", fiber_yield)],
    );

    vm.define_builtin(MethodTable::Fiber, "call", fiber_call);
    vm.define_builtin(MethodTable::Fiber, "isDone", fiber_is_done);
}

/// Fiber.new(fn) - A fiber that runs `fn` on its first call
fn fiber_new(vm: &mut VM, _receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    match args[0] {
        Value::Object(r) if matches!(vm.heap().get(r), Object::Closure(_)) => {
            Ok(Value::Object(vm.new_fiber(r)))
        }
        _ => Err("Argument to Fiber.new must be a function.".to_string()),
    }
}

/// Fiber.yield(value?) - Suspend the running fiber, handing `value` to its caller
fn fiber_yield(vm: &mut VM, _receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity_range(0, 1, args.len())?;
    vm.yield_fiber(args.first().copied().unwrap_or_default())
}

/// fiber.call(value?) - Resume the fiber; `value` becomes its argument or the
/// result of the `yield` it is suspended in
fn fiber_call(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity_range(0, 1, args.len())?;
    let fiber = receiver_of(vm, receiver, "fiber")?;
    vm.resume_fiber(fiber, args.first().copied())
}

fn fiber_is_done(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(0, args.len())?;
    let fiber = receiver_of(vm, receiver, "fiber")?;
    Ok(Value::Bool(vm.heap().fiber(fiber).is_done()))
}
