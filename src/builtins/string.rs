// String built-in methods
// Strings are interned and immutable, so every transform returns a new string

use super::{check_arity, get_string_arg, receiver_of};
use crate::vm::{MethodTable, Value, VM};

pub fn register(vm: &mut VM) {
    vm.define_builtin(MethodTable::String, "size", string_size);
    vm.define_builtin(MethodTable::String, "upper", string_upper);
    vm.define_builtin(MethodTable::String, "lower", string_lower);
    vm.define_builtin(MethodTable::String, "contains", string_contains);
    vm.define_builtin(MethodTable::String, "split", string_split);
}

fn receiver_str(vm: &VM, receiver: Value) -> Result<String, String> {
    let string = receiver_of(vm, receiver, "string")?;
    Ok(vm.heap().str(string).to_string())
}

/// size() - Number of characters
fn string_size(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(0, args.len())?;
    let string = receiver_of(vm, receiver, "string")?;
    Ok(Value::Number(vm.heap().str(string).chars().count() as f64))
}

fn string_upper(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(0, args.len())?;
    let s = receiver_str(vm, receiver)?;
    Ok(vm.new_string(&s.to_uppercase()))
}

fn string_lower(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(0, args.len())?;
    let s = receiver_str(vm, receiver)?;
    Ok(vm.new_string(&s.to_lowercase()))
}

fn string_contains(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let s = receiver_str(vm, receiver)?;
    let needle = get_string_arg(vm, args[0], "substring")?;
    Ok(Value::Bool(s.contains(&needle)))
}

/// split(separator) - Array of the pieces; an empty separator splits into characters
fn string_split(vm: &mut VM, receiver: Value, args: &[Value]) -> Result<Value, String> {
    check_arity(1, args.len())?;
    let s = receiver_str(vm, receiver)?;
    let separator = get_string_arg(vm, args[0], "separator")?;

    let pieces: Vec<String> = if separator.is_empty() {
        s.chars().map(String::from).collect()
    } else {
        s.split(separator.as_str()).map(String::from).collect()
    };

    // The array is rooted while the pieces are interned into it
    let array = vm.new_array(Vec::with_capacity(pieces.len()));
    vm.push_root(array);
    for piece in pieces {
        let piece = vm.new_string(&piece);
        if let Value::Object(r) = array {
            vm.heap.array_mut(r).push(piece);
        }
    }
    vm.pop_root();
    Ok(array)
}
