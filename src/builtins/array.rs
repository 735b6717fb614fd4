// Array built-in methods
// Receivers arrive in the callee slot; every method checks it is an array

use super::{check_arity, check_arity_range, get_index_arg, get_number_arg, get_string_arg, receiver_of};
use crate::vm::{MethodTable, Value, VM};

pub fn register(vm: &mut VM) {
    vm.define_builtin(MethodTable::Array, "push", array_push);
    vm.define_builtin(MethodTable::Array, "pop", array_pop);
    vm.define_builtin(MethodTable::Array, "size", array_size);
    vm.define_builtin(MethodTable::Array, "insert", array_insert);
    vm.define_builtin(MethodTable::Array, "remove", array_remove);
    vm.define_builtin(MethodTable::Array, "contains", array_contains);
    vm.define_builtin(MethodTable::Array, "join", array_join);
}

/// push(item) - Append and return the new size
fn array_push(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let array = receiver_of(vm, receiver, "array")?;
    let values = vm.heap.array_mut(array);
    values.push(args[0]);
    Ok(Value::Number(values.len() as f64))
}

/// pop() - Remove the last item, nil when empty
fn array_pop(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(0, args.len())?;
    let array = receiver_of(vm, receiver, "array")?;
    Ok(vm.heap.array_mut(array).pop().unwrap_or_default())
}

fn array_size(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(0, args.len())?;
    let array = receiver_of(vm, receiver, "array")?;
    Ok(Value::Number(vm.heap().array(array).len() as f64))
}

/// insert(index, item) - Insert before `index`; `size()` appends
fn array_insert(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(2, args.len())?;
    let array = receiver_of(vm, receiver, "array")?;
    let len = vm.heap().array(array).len();
    let index = get_number_arg(vm, args[0], "index")?;
    if !(0.0..=len as f64).contains(&index) {
        return Err("Array index out of bounds.".to_string());
    }
    vm.heap.array_mut(array).insert(index as usize, args[1]);
    Ok(Value::Nil)
}

/// remove(index) - Remove and return the item at `index`
fn array_remove(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let array = receiver_of(vm, receiver, "array")?;
    let len = vm.heap().array(array).len();
    let index = get_index_arg(vm, args[0], len)?;
    Ok(vm.heap.array_mut(array).remove(index))
}

/// contains(item) - Numbers and strings by value, other objects by identity
fn array_contains(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let array = receiver_of(vm, receiver, "array")?;
    let found = vm.heap().array(array).iter().any(|v| *v == args[0]);
    Ok(Value::Bool(found))
}

/// join(separator?) - Concatenate the items' printed forms
fn array_join(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity_range(0, 1, args.len())?;
    let array = receiver_of(vm, receiver, "array")?;
    let separator = match args.first() {
        Some(sep) => get_string_arg(vm, *sep, "separator")?,
        None => String::new(),
    };

    let items = vm.heap().array(array).clone();
    let mut parts = Vec::with_capacity(items.len());
    for item in items {
        parts.push(vm.stringify(item).map_err(|e| e.message)?);
    }
    Ok(vm.new_string(&parts.join(&separator)))
}
