// Core library
// Natives bound in the `core` module and inherited by every other module

use std::time::{SystemTime, UNIX_EPOCH};

use super::{check_arity, get_string_arg, type_name};
use crate::vm::{Object, Value, VM};

pub fn register(vm: &mut VM, module: &str) {
    vm.define_native(module, "clock", core_clock);
    vm.define_native(module, "str", core_str);
    vm.define_native(module, "type", core_type);
    vm.define_native(module, "instanceof", core_instanceof);
    vm.define_native(module, "abort", core_abort);
}

/// clock() - Seconds since the Unix epoch, with sub-second precision
fn core_clock(_vm: &mut VM, _receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(0, args.len())?;
    let elapsed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?;
    Ok(Value::Number(elapsed.as_secs_f64()))
}

/// str(value) - The text `print` would show
fn core_str(vm: &mut VM, _receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    if vm.heap().as_str(args[0]).is_some() {
        return Ok(args[0]);
    }
    let text = vm.stringify(args[0]).map_err(|e| e.message)?;
    Ok(vm.new_string(&text))
}

fn core_type(vm: &mut VM, _receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let name = type_name(vm, args[0]);
    Ok(vm.new_string(name))
}

/// instanceof(instance, Class) - True when Class is the instance's class or an ancestor
fn core_instanceof(vm: &mut VM, _receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let heap = vm.heap();

    let target = match args[1] {
        Value::Object(r) if matches!(heap.get(r), Object::Class(_)) => r,
        _ => return Err("Expected class type.".to_string()),
    };
    let class = match args[0] {
        Value::Object(r) => match heap.get(r) {
            Object::Instance(instance) => instance.class,
            _ => return Ok(Value::Bool(false)),
        },
        _ => return Ok(Value::Bool(false)),
    };

    // A class sits `derived_count` links below its root, so only that many
    // steps up the chain can reach the target
    let depth = heap.class(class).derived_count;
    let target_depth = heap.class(target).derived_count;
    if depth < target_depth {
        return Ok(Value::Bool(false));
    }
    let mut current = class;
    for _ in 0..depth - target_depth {
        match heap.class(current).superclass {
            Some(superclass) => current = superclass,
            None => return Ok(Value::Bool(false)),
        }
    }
    Ok(Value::Bool(current == target))
}

/// abort(message) - Stop the program, reporting `message` and a backtrace
fn core_abort(vm: &mut VM, _receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let message = get_string_arg(vm, args[0], "message")?;
    vm.abort(&message);
    Ok(Value::Nil)
}
