// Map built-in methods
// Maps keep insertion order, which `keys` and `values` preserve

use super::{check_arity, receiver_of};
use crate::vm::{MethodTable, Value, VM};

pub fn register(vm: &mut VM) {
    vm.define_builtin(MethodTable::Map, "size", map_size);
    vm.define_builtin(MethodTable::Map, "has", map_has);
    vm.define_builtin(MethodTable::Map, "remove", map_remove);
    vm.define_builtin(MethodTable::Map, "keys", map_keys);
    vm.define_builtin(MethodTable::Map, "values", map_values);
}

fn map_size(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(0, args.len())?;
    let map = receiver_of(vm, receiver, "map")?;
    Ok(Value::Number(vm.heap().map(map).len() as f64))
}

fn map_has(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let map = receiver_of(vm, receiver, "map")?;
    Ok(Value::Bool(vm.heap().map(map).contains(args[0])))
}

/// remove(key) - Remove the entry, returning its value or nil
fn map_remove(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let map = receiver_of(vm, receiver, "map")?;
    Ok(vm.heap.map_mut(map).remove(args[0]).unwrap_or_default())
}

fn map_keys(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(0, args.len())?;
    let map = receiver_of(vm, receiver, "map")?;
    let keys = vm.heap().map(map).keys().collect();
    Ok(vm.new_array(keys))
}

fn map_values(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(0, args.len())?;
    let map = receiver_of(vm, receiver, "map")?;
    let values = vm.heap().map(map).values().collect();
    Ok(vm.new_array(values))
}
