// Foxely Embedding API
// Slot-based access for host code, pinned handles and host-side calls

use std::any::Any;
use std::rc::Rc;

use super::fiber::CallFrame;
use super::map::ValueMap;
use super::object::*;
use super::value::{ObjRef, Value};
use super::vm::{InterpretResult, MethodTable, VM};
use crate::compiler::OpCode;
use crate::error::{FoxError, FoxResult, Span};

/// A value pinned against collection until released with `VM::release_handle`
#[derive(Debug)]
pub struct Handle(ObjRef);

/// Stub that calls slot 0 with the arguments in slots `1..=arity`
#[derive(Debug)]
pub struct CallHandle {
    handle: Handle,
    arity: usize,
}

impl CallHandle {
    pub fn arity(&self) -> usize {
        self.arity
    }

    /// Unpin the stub so the collector can reclaim it
    pub fn release(self, vm: &mut VM) {
        vm.release_handle(self.handle);
    }
}

/// A script function looked up by the host
#[derive(Debug)]
pub struct Callable {
    handle: Handle,
}

impl Callable {
    pub fn call(&self, vm: &mut VM, args: &[Value]) -> FoxResult<Value> {
        let callee = vm.handle_value(&self.handle);
        vm.call_value_sync(callee, args)
    }

    pub fn release(self, vm: &mut VM) {
        vm.release_handle(self.handle);
    }
}

impl VM {
    // ==================== Slots ====================

    /// Make at least `count` slots available, starting a slot window on the
    /// current fiber's stack when none is open
    pub fn ensure_slots(&mut self, count: usize) {
        let base = match self.api_base {
            Some(base) => base,
            None => {
                let base = self.stack_len();
                self.api_base = Some(base);
                base
            }
        };
        let stack = &mut self.current_mut().stack;
        if stack.len() < base + count {
            stack.resize(base + count, Value::Nil);
        }
    }

    pub fn slot_count(&self) -> usize {
        match self.api_base {
            Some(base) => self.stack_len() - base,
            None => 0,
        }
    }

    /// Close the slot window, dropping its values
    pub fn release_slots(&mut self) {
        if let Some(base) = self.api_base.take() {
            self.current_mut().stack.truncate(base);
        }
    }

    fn slot_index(&self, slot: usize) -> usize {
        let base = self.api_base.unwrap_or_default();
        assert!(slot < self.slot_count(), "slot {} out of range", slot);
        base + slot
    }

    pub fn get_slot(&self, slot: usize) -> Value {
        self.current().stack[self.slot_index(slot)]
    }

    pub fn set_slot(&mut self, slot: usize, value: Value) {
        let index = self.slot_index(slot);
        self.current_mut().stack[index] = value;
    }

    pub fn get_slot_bool(&self, slot: usize) -> Option<bool> {
        match self.get_slot(slot) {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    pub fn get_slot_number(&self, slot: usize) -> Option<f64> {
        match self.get_slot(slot) {
            Value::Number(n) => Some(n),
            _ => None,
        }
    }

    pub fn get_slot_string(&self, slot: usize) -> Option<&str> {
        self.heap.as_str(self.get_slot(slot))
    }

    pub fn set_slot_bool(&mut self, slot: usize, value: bool) {
        self.set_slot(slot, Value::Bool(value));
    }

    pub fn set_slot_number(&mut self, slot: usize, value: f64) {
        self.set_slot(slot, Value::Number(value));
    }

    pub fn set_slot_string(&mut self, slot: usize, value: &str) {
        let string = self.new_string(value);
        self.set_slot(slot, string);
    }

    pub fn set_slot_nil(&mut self, slot: usize) {
        self.set_slot(slot, Value::Nil);
    }

    pub fn set_slot_new_list(&mut self, slot: usize) {
        let list = self.new_array(Vec::new());
        self.set_slot(slot, list);
    }

    pub fn set_slot_new_map(&mut self, slot: usize) {
        let map = self.alloc(Object::Map(ValueMap::new()));
        self.set_slot(slot, Value::Object(map));
    }

    fn slot_list(&self, slot: usize) -> FoxResult<ObjRef> {
        match self.get_slot(slot) {
            Value::Object(r) if matches!(self.heap.get(r), Object::Array(_)) => Ok(r),
            _ => Err(FoxError::type_error(format!("Slot {} does not hold an array.", slot))),
        }
    }

    pub fn get_list_count(&self, slot: usize) -> FoxResult<usize> {
        let list = self.slot_list(slot)?;
        Ok(self.heap.array(list).len())
    }

    /// Copy element `index` of the list in `list_slot` into `element_slot`
    pub fn get_list_element(&mut self, list_slot: usize, index: usize, element_slot: usize) -> FoxResult<()> {
        let list = self.slot_list(list_slot)?;
        let value = self
            .heap
            .array(list)
            .get(index)
            .copied()
            .ok_or_else(|| FoxError::index_error("Array index out of bounds."))?;
        self.set_slot(element_slot, value);
        Ok(())
    }

    pub fn set_list_element(&mut self, list_slot: usize, index: usize, element_slot: usize) -> FoxResult<()> {
        let list = self.slot_list(list_slot)?;
        let value = self.get_slot(element_slot);
        let values = self.heap.array_mut(list);
        match values.get_mut(index) {
            Some(element) => {
                *element = value;
                Ok(())
            }
            None => Err(FoxError::index_error("Array index out of bounds.")),
        }
    }

    /// Insert the value in `element_slot` before `index`. Negative indices
    /// count from the end, so -1 appends.
    pub fn insert_in_list(&mut self, list_slot: usize, index: isize, element_slot: usize) -> FoxResult<()> {
        let list = self.slot_list(list_slot)?;
        let value = self.get_slot(element_slot);
        let values = self.heap.array_mut(list);
        let len = values.len() as isize;
        let position = if index < 0 { len + 1 + index } else { index };
        if !(0..=len).contains(&position) {
            return Err(FoxError::index_error("Array index out of bounds."));
        }
        values.insert(position as usize, value);
        Ok(())
    }

    // ==================== Variables ====================

    pub fn get_variable(&self, module: &str, name: &str) -> Option<Value> {
        let module = self.get_module(module)?;
        let key = self.heap.find_string(name, hash_string(name))?;
        self.heap.module(module).variables.get(key)
    }

    /// Bind `name` in `module`, creating the module when needed
    pub fn define_variable(&mut self, module: &str, name: &str, value: Value) {
        self.push_root(value);
        let module = match self.get_module(module) {
            Some(module) => module,
            None => self.define_module(module),
        };
        let key = self.intern(name);
        self.heap.module_mut(module).variables.set(key, value);
        self.pop_root();
    }

    // ==================== Handles ====================

    pub fn make_handle(&mut self, value: Value) -> Handle {
        let handle = self.alloc(Object::Handle(value));
        self.handles.push(handle);
        Handle(handle)
    }

    pub fn release_handle(&mut self, handle: Handle) {
        if let Some(index) = self.handles.iter().rposition(|h| *h == handle.0) {
            self.handles.swap_remove(index);
        }
    }

    pub fn handle_value(&self, handle: &Handle) -> Value {
        match self.heap.get(handle.0) {
            Object::Handle(value) => *value,
            other => panic!("expected Handle, found {}", other.type_name()),
        }
    }

    /// Build a stub calling slot 0 with as many arguments as `signature` has
    /// `_` placeholders, e.g. `"update(_,_)"` or `"[_]"`
    pub fn make_call_handle(&mut self, signature: &str) -> CallHandle {
        let arity = signature.chars().filter(|c| *c == '_').count().min(u8::MAX as usize);

        let name = self.intern(signature);
        self.push_root(Value::Object(name));
        let code = [OpCode::Call as u8, arity as u8, OpCode::Return as u8];
        let function = self.alloc(Object::Function(ObjFunction {
            name: Some(name),
            min_arity: arity,
            max_arity: arity,
            is_variadic: false,
            upvalues: Vec::new(),
            code: Rc::from(&code[..]),
            spans: vec![Span::default(); code.len()],
            constants: Vec::new(),
            module: self.core_module,
        }));
        self.pop_root();

        self.push_root(Value::Object(function));
        let closure = self.alloc(Object::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.pop_root();

        CallHandle {
            handle: self.make_handle(Value::Object(closure)),
            arity,
        }
    }

    /// Run a call handle over the current slot window. Slot 0 holds the
    /// callee on entry and the result on success.
    pub fn call(&mut self, method: &CallHandle) -> InterpretResult {
        self.prepare_host_entry();
        self.ensure_slots(method.arity + 1);
        let base = self.api_base.unwrap_or_default();

        let Value::Object(closure) = self.handle_value(&method.handle) else {
            return InterpretResult::RuntimeError;
        };
        let function = self.heap.closure(closure).function;
        let code = self.heap.function(function).code.clone();

        self.current_mut().stack.resize(base + method.arity + 1, Value::Nil);
        let depth = self.current().frames.len();
        self.current_mut()
            .frames
            .push(CallFrame::new(closure, function, code, base));

        let result = self.run(depth);
        if result != InterpretResult::Ok && depth == 0 {
            self.reset_main_fiber();
        }
        result
    }

    /// Look up a global function the host wants to call repeatedly
    pub fn function(&mut self, module: &str, name: &str) -> Option<Callable> {
        let value = self.get_variable(module, name)?;
        let Value::Object(r) = value else {
            return None;
        };
        let callable = matches!(
            self.heap.get(r),
            Object::Closure(_) | Object::Native(_) | Object::BoundMethod(_) | Object::Class(_)
        );
        callable.then(|| Callable {
            handle: self.make_handle(value),
        })
    }

    // ==================== Natives ====================

    fn make_native(&mut self, name: &str, function: NativeFn) -> (ObjRef, ObjRef) {
        let native = self.alloc(Object::Native(ObjNative {
            name: name.to_string(),
            function,
        }));
        self.push_root(Value::Object(native));
        let key = self.intern(name);
        self.pop_root();
        (key, native)
    }

    pub fn define_native(&mut self, module: &str, name: &str, function: NativeFn) {
        let (_, native) = self.make_native(name, function);
        self.define_variable(module, name, Value::Object(native));
    }

    /// Register a named table of natives, reachable as `name.method(...)`
    pub fn define_lib(&mut self, module: &str, name: &str, natives: &[(&str, NativeFn)]) -> ObjRef {
        let lib_name = self.intern(name);
        self.push_root(Value::Object(lib_name));
        let lib = self.alloc(Object::Lib(ObjLib {
            name: lib_name,
            methods: Default::default(),
        }));
        self.pop_root();

        self.push_root(Value::Object(lib));
        for (method, function) in natives {
            let (key, native) = self.make_native(method, *function);
            self.heap.lib_mut(lib).methods.set(key, Value::Object(native));
        }
        self.define_variable(module, name, Value::Object(lib));
        self.pop_root();
        lib
    }

    /// Native method on a builtin type, e.g. `Array.push`
    pub fn define_builtin(&mut self, table: MethodTable, name: &str, function: NativeFn) {
        let (key, native) = self.make_native(name, function);
        self.method_table_mut(table).set(key, Value::Object(native));
    }

    pub fn define_class(&mut self, module: &str, name: &str) -> ObjRef {
        let class_name = self.intern(name);
        self.push_root(Value::Object(class_name));
        let class = self.alloc(Object::Class(ObjClass::new(class_name)));
        self.pop_root();
        self.define_variable(module, name, Value::Object(class));
        class
    }

    pub fn define_method(&mut self, class: ObjRef, name: &str, function: NativeFn) {
        let (key, native) = self.make_native(name, function);
        self.heap.class_mut(class).methods.set(key, Value::Object(native));
    }

    /// Getter consulted by property reads on foreign instances
    pub fn define_getter(&mut self, class: ObjRef, name: &str, function: NativeFn) {
        let (key, native) = self.make_native(name, function);
        self.heap.class_mut(class).getters.set(key, Value::Object(native));
    }

    pub fn define_setter(&mut self, class: ObjRef, name: &str, function: NativeFn) {
        let (key, native) = self.make_native(name, function);
        self.heap.class_mut(class).setters.set(key, Value::Object(native));
    }

    /// Instance carrying host data; property access goes through the class's
    /// getters and setters
    pub fn new_foreign_instance(&mut self, class: ObjRef, payload: Box<dyn Any>) -> Value {
        let mut instance = ObjInstance::new(class);
        instance.foreign = Some(payload);
        Value::Object(self.alloc(Object::Instance(instance)))
    }

    pub fn foreign<T: 'static>(&self, value: Value) -> Option<&T> {
        match value {
            Value::Object(r) => match self.heap.get(r) {
                Object::Instance(instance) => instance.foreign.as_ref()?.downcast_ref::<T>(),
                _ => None,
            },
            _ => None,
        }
    }

    pub fn foreign_mut<T: 'static>(&mut self, value: Value) -> Option<&mut T> {
        match value {
            Value::Object(r) => match self.heap.get_mut(r) {
                Object::Instance(instance) => instance.foreign.as_mut()?.downcast_mut::<T>(),
                _ => None,
            },
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;

    fn quiet_vm() -> VM {
        let mut vm = VM::new(VmConfig::default());
        vm.set_output(Box::new(std::io::sink()));
        vm.set_error_output(Box::new(std::io::sink()));
        vm
    }

    #[test]
    fn test_typed_slots() {
        let mut vm = quiet_vm();
        vm.ensure_slots(3);
        assert_eq!(vm.slot_count(), 3);
        vm.set_slot_bool(0, true);
        vm.set_slot_number(1, 2.5);
        vm.set_slot_string(2, "fox");

        assert_eq!(vm.get_slot_bool(0), Some(true));
        assert_eq!(vm.get_slot_number(1), Some(2.5));
        assert_eq!(vm.get_slot_string(2), Some("fox"));
        assert_eq!(vm.get_slot_number(2), None);

        vm.release_slots();
        assert_eq!(vm.slot_count(), 0);
    }

    #[test]
    fn test_list_slots() {
        let mut vm = quiet_vm();
        vm.ensure_slots(2);
        vm.set_slot_new_list(0);
        for n in [1.0, 2.0, 3.0] {
            vm.set_slot_number(1, n);
            vm.insert_in_list(0, -1, 1).unwrap();
        }
        vm.set_slot_number(1, 0.0);
        vm.insert_in_list(0, 0, 1).unwrap();
        assert_eq!(vm.get_list_count(0).unwrap(), 4);

        vm.get_list_element(0, 3, 1).unwrap();
        assert_eq!(vm.get_slot_number(1), Some(3.0));

        vm.set_slot_number(1, 9.0);
        vm.set_list_element(0, 0, 1).unwrap();
        vm.get_list_element(0, 0, 1).unwrap();
        assert_eq!(vm.get_slot_number(1), Some(9.0));

        assert!(vm.get_list_element(0, 10, 1).is_err());
        assert!(vm.get_list_count(1).is_err());
    }

    #[test]
    fn test_variables_round_trip_through_modules() {
        let mut vm = quiet_vm();
        vm.define_variable("main", "answer", Value::Number(42.0));
        assert_eq!(vm.get_variable("main", "answer"), Some(Value::Number(42.0)));
        assert_eq!(vm.get_variable("main", "missing"), None);
        assert_eq!(vm.get_variable("nowhere", "answer"), None);
    }

    #[test]
    fn test_handle_survives_collection() {
        let mut vm = quiet_vm();
        let list = vm.new_array(vec![Value::Number(1.0)]);
        let handle = vm.make_handle(list);
        vm.collect_garbage();
        let Value::Object(r) = vm.handle_value(&handle) else {
            panic!("expected object");
        };
        assert_eq!(vm.heap.array(r).len(), 1);

        vm.release_handle(handle);
        vm.collect_garbage();
        assert!(!vm.heap.contains(r));
    }

    #[test]
    fn test_call_handle_arity_from_signature() {
        let mut vm = quiet_vm();
        assert_eq!(vm.make_call_handle("update(_,_)").arity(), 2);
        assert_eq!(vm.make_call_handle("[_]").arity(), 1);
        assert_eq!(vm.make_call_handle("run()").arity(), 0);
    }

    #[test]
    fn test_call_handle_runs_script_function() {
        let mut vm = quiet_vm();
        assert_eq!(
            vm.interpret("main", "fun add(a, b) { return a + b; }"),
            InterpretResult::Ok
        );
        let add = vm.make_call_handle("add(_,_)");

        vm.ensure_slots(3);
        let callee = vm.get_variable("main", "add").unwrap();
        vm.set_slot(0, callee);
        vm.set_slot_number(1, 2.0);
        vm.set_slot_number(2, 3.0);
        assert_eq!(vm.call(&add), InterpretResult::Ok);
        assert_eq!(vm.get_slot_number(0), Some(5.0));
        vm.release_slots();
    }

    #[test]
    fn test_released_call_handle_is_collected() {
        let mut vm = quiet_vm();
        let pinned = vm.handles.len();
        let handle = vm.make_call_handle("run()");
        assert_eq!(vm.handles.len(), pinned + 1);
        let Value::Object(stub) = vm.handle_value(&handle.handle) else {
            panic!("expected object");
        };

        vm.collect_garbage();
        assert!(vm.heap.contains(stub));

        handle.release(&mut vm);
        assert_eq!(vm.handles.len(), pinned);
        vm.collect_garbage();
        assert!(!vm.heap.contains(stub));
    }

    #[test]
    fn test_callable_lookup() {
        let mut vm = quiet_vm();
        vm.interpret("main", "fun twice(x) { return x * 2; } var n = 1;");
        let twice = vm.function("main", "twice").unwrap();
        assert_eq!(twice.call(&mut vm, &[Value::Number(4.0)]).unwrap(), Value::Number(8.0));
        assert!(vm.function("main", "n").is_none());
        twice.release(&mut vm);
    }

    #[test]
    fn test_foreign_payload() {
        let mut vm = quiet_vm();
        let class = vm.define_class("main", "Point");
        let point = vm.new_foreign_instance(class, Box::new((1.0f64, 2.0f64)));
        assert_eq!(vm.foreign::<(f64, f64)>(point), Some(&(1.0, 2.0)));
        vm.foreign_mut::<(f64, f64)>(point).unwrap().0 = 5.0;
        assert_eq!(vm.foreign::<(f64, f64)>(point).map(|p| p.0), Some(5.0));
        assert_eq!(vm.foreign::<String>(point), None);
    }
}
