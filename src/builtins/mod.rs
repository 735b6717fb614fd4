// Foxely Built-in Library
// Core natives and the method tables of the builtin types

mod array;
mod fiber;
mod map;
mod string;
mod system;

use crate::vm::{ObjRef, Value, CORE_MODULE, VM};

/// Install every builtin into a fresh VM. Runs before any user module
/// exists, so all of `core` is inherited by them.
pub fn register(vm: &mut VM) {
    system::register(vm, CORE_MODULE);
    fiber::register(vm, CORE_MODULE);
    array::register(vm);
    string::register(vm);
    map::register(vm);
}

pub(crate) fn check_arity(expected: usize, got: usize) -> Result<(), String> {
    if expected != got {
        return Err(format!("Expected {} arguments but got {}.", expected, got));
    }
    Ok(())
}

pub(crate) fn check_arity_range(min: usize, max: usize, got: usize) -> Result<(), String> {
    if got < min {
        return Err(format!("Expected {} arguments but got {}.", min, got));
    }
    if got > max {
        return Err(format!("Expected {} arguments but got {}.", max, got));
    }
    Ok(())
}

/// Name `type()` reports for a value
pub(crate) fn type_name(vm: &VM, value: Value) -> &'static str {
    match value {
        Value::Nil => "nil",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::Object(r) => vm.heap().get(r).type_name(),
    }
}

pub(crate) fn get_number_arg(vm: &VM, value: Value, name: &str) -> Result<f64, String> {
    match value {
        Value::Number(n) => Ok(n),
        other => Err(format!(
            "Argument '{}' must be a number, got {}.",
            name,
            type_name(vm, other)
        )),
    }
}

pub(crate) fn get_string_arg(vm: &VM, value: Value, name: &str) -> Result<String, String> {
    match vm.heap().as_str(value) {
        Some(s) => Ok(s.to_string()),
        None => Err(format!(
            "Argument '{}' must be a string, got {}.",
            name,
            type_name(vm, value)
        )),
    }
}

/// Index argument counted from the end when negative
pub(crate) fn get_index_arg(vm: &VM, value: Value, len: usize) -> Result<usize, String> {
    let n = get_number_arg(vm, value, "index")?;
    if !n.is_finite() {
        return Err("Array index out of bounds.".to_string());
    }
    let mut index = n as i64;
    if index < 0 {
        index += len as i64;
    }
    if index < 0 || index >= len as i64 {
        return Err("Array index out of bounds.".to_string());
    }
    Ok(index as usize)
}

/// Receiver of a builtin method, checked against the variant the table expects
pub(crate) fn receiver_of(vm: &VM, receiver: Value, expected: &str) -> Result<ObjRef, String> {
    match receiver {
        Value::Object(r) if vm.heap().get(r).type_name() == expected => Ok(r),
        other => Err(format!("Expected {} receiver, got {}.", expected, type_name(vm, other))),
    }
}
