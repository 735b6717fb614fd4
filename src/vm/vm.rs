// Foxely Virtual Machine
// Stack-based bytecode interpreter running cooperative fibers over a collected heap

use std::io::Write;
use std::rc::Rc;

use smallvec::SmallVec;

use super::fiber::{CallFrame, FiberState, ObjFiber, FRAMES_MAX, STACK_MAX};
use super::gc::{GcStats, Heap};
use super::map::ValueMap;
use super::object::*;
use super::table::Table;
use super::value::{format_number, ObjRef, Value};
use crate::builtins;
use crate::compiler::{compile_source, Constant, FunctionConstant, OpCode};
use crate::config::VmConfig;
use crate::error::{FoxError, FoxResult, Span, StackFrame};

/// Outcome of `interpret` and of host calls into the VM
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretResult {
    Ok,
    CompileError,
    RuntimeError,
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    RuntimeError,
    Abort,
}

/// Builtin method tables consulted by `invoke` for non-instance receivers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodTable {
    Array,
    String,
    Map,
    Fiber,
}

/// Operator symbols a class may overload, in `operator_names` order
const OPERATOR_SYMBOLS: [&str; 4] = ["+", "-", "*", "/"];
const OP_ADD: usize = 0;
const OP_SUB: usize = 1;
const OP_MUL: usize = 2;
const OP_DIV: usize = 3;

/// Name of the module every other module is seeded from
pub const CORE_MODULE: &str = "core";

/// The Foxely Virtual Machine
pub struct VM {
    pub(crate) heap: Heap,
    pub(crate) config: VmConfig,
    /// Fiber currently executing
    pub(crate) fiber: ObjRef,
    main_fiber: ObjRef,
    /// Module name to module object
    modules: Table,
    pub(crate) core_module: ObjRef,
    array_methods: Table,
    string_methods: Table,
    map_methods: Table,
    fiber_methods: Table,
    /// Objects allocated while compiler output becomes heap functions
    compiler_roots: Vec<ObjRef>,
    /// Handle objects pinned by the host
    pub(crate) handles: Vec<ObjRef>,
    /// Temporaries natives keep alive across allocations
    temp_roots: Vec<Value>,
    init_string: ObjRef,
    string_string: ObjRef,
    operator_names: [ObjRef; 4],
    state: RunState,
    /// Entry fiber of every active `run`, innermost last
    run_entries: Vec<ObjRef>,
    /// Stack index of API slot 0
    pub(crate) api_base: Option<usize>,
    out: Box<dyn Write>,
    err: Box<dyn Write>,
    last_error: Option<FoxError>,
}

impl VM {
    pub fn new(config: VmConfig) -> Self {
        let mut heap = Heap::new(&config);

        // Nothing can be collected yet, so these go straight into the heap
        let main_fiber = heap.insert(Object::Fiber(ObjFiber::new(None)));
        let init_string = heap.insert(Object::String(ObjString::new("init")));
        let string_string = heap.insert(Object::String(ObjString::new("string")));
        let operator_names = OPERATOR_SYMBOLS.map(|s| heap.insert(Object::String(ObjString::new(s))));
        let core_name = heap.insert(Object::String(ObjString::new(CORE_MODULE)));
        let core_module = heap.insert(Object::Module(ObjModule {
            name: core_name,
            variables: Table::new(),
        }));
        heap.fiber_mut(main_fiber).state = FiberState::Running;

        let mut modules = Table::new();
        modules.set(core_name, Value::Object(core_module));

        let mut vm = Self {
            heap,
            config,
            fiber: main_fiber,
            main_fiber,
            modules,
            core_module,
            array_methods: Table::new(),
            string_methods: Table::new(),
            map_methods: Table::new(),
            fiber_methods: Table::new(),
            compiler_roots: Vec::new(),
            handles: Vec::new(),
            temp_roots: Vec::new(),
            init_string,
            string_string,
            operator_names,
            state: RunState::Running,
            run_entries: Vec::new(),
            api_base: None,
            out: Box::new(std::io::stdout()),
            err: Box::new(std::io::stderr()),
            last_error: None,
        };

        builtins::register(&mut vm);
        vm
    }

    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Where `print` writes
    pub fn set_output(&mut self, out: Box<dyn Write>) {
        self.out = out;
    }

    /// Where runtime error reports and warnings are written
    pub fn set_error_output(&mut self, err: Box<dyn Write>) {
        self.err = err;
    }

    /// The most recent compile or runtime error
    pub fn last_error(&self) -> Option<&FoxError> {
        self.last_error.as_ref()
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    // ==================== Allocation and GC ====================

    /// Allocate `object`, collecting first when the heap is due. The pending
    /// object's references count as roots for that collection.
    pub(crate) fn alloc(&mut self, object: Object) -> ObjRef {
        if self.heap.should_collect() {
            self.collect(Some(&object));
        }
        self.heap.insert(object)
    }

    pub fn collect_garbage(&mut self) {
        self.collect(None);
    }

    fn collect(&mut self, pending: Option<&Object>) {
        self.mark_roots();
        if let Some(object) = pending {
            object.trace(&mut self.heap.marker());
        }
        self.heap.trace_references();
        let freed = self.heap.sweep();

        if self.config.log_gc {
            let stats = self.heap.stats();
            eprintln!(
                "[GC] collection #{}: freed {} objects, {} live, next at {}",
                stats.collections, freed, stats.live, stats.next_gc
            );
        }
    }

    fn mark_roots(&mut self) {
        let mut marker = self.heap.marker();

        marker.mark_object(self.fiber);
        marker.mark_object(self.main_fiber);
        for entry in &self.run_entries {
            marker.mark_object(*entry);
        }

        marker.mark_table(&self.modules);
        marker.mark_object(self.core_module);
        for table in [
            &self.array_methods,
            &self.string_methods,
            &self.map_methods,
            &self.fiber_methods,
        ] {
            marker.mark_table(table);
        }

        for r in self.compiler_roots.iter().chain(&self.handles) {
            marker.mark_object(*r);
        }
        for value in &self.temp_roots {
            marker.mark_value(*value);
        }

        marker.mark_object(self.init_string);
        marker.mark_object(self.string_string);
        for name in self.operator_names {
            marker.mark_object(name);
        }
    }

    /// Keep `value` alive until the matching `pop_root`
    pub fn push_root(&mut self, value: Value) {
        self.temp_roots.push(value);
    }

    pub fn pop_root(&mut self) {
        self.temp_roots.pop();
    }

    pub fn intern(&mut self, chars: &str) -> ObjRef {
        let hash = hash_string(chars);
        if let Some(r) = self.heap.find_string(chars, hash) {
            return r;
        }
        self.alloc(Object::String(ObjString {
            chars: chars.to_string(),
            hash,
        }))
    }

    pub fn intern_owned(&mut self, chars: String) -> ObjRef {
        let hash = hash_string(&chars);
        if let Some(r) = self.heap.find_string(&chars, hash) {
            return r;
        }
        self.alloc(Object::String(ObjString { chars, hash }))
    }

    pub fn new_string(&mut self, chars: &str) -> Value {
        Value::Object(self.intern(chars))
    }

    pub fn new_array(&mut self, values: Vec<Value>) -> Value {
        Value::Object(self.alloc(Object::Array(values)))
    }

    pub fn new_map(&mut self) -> Value {
        Value::Object(self.alloc(Object::Map(ValueMap::new())))
    }

    /// Heap contents, for hosts inspecting values
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    // ==================== Stack ====================

    pub(crate) fn current(&self) -> &ObjFiber {
        self.heap.fiber(self.fiber)
    }

    pub(crate) fn current_mut(&mut self) -> &mut ObjFiber {
        self.heap.fiber_mut(self.fiber)
    }

    pub(crate) fn push(&mut self, value: Value) {
        self.current_mut().stack.push(value);
    }

    pub(crate) fn pop(&mut self) -> Value {
        let value = self.current_mut().stack.pop();
        debug_assert!(value.is_some(), "stack underflow");
        value.unwrap_or_default()
    }

    pub(crate) fn peek(&self, distance: usize) -> Value {
        let stack = &self.current().stack;
        stack[stack.len() - 1 - distance]
    }

    fn set_peek(&mut self, distance: usize, value: Value) {
        let stack = &mut self.current_mut().stack;
        let index = stack.len() - 1 - distance;
        stack[index] = value;
    }

    pub(crate) fn stack_len(&self) -> usize {
        self.current().stack.len()
    }

    fn frame(&self) -> &CallFrame {
        self.current().frames.last().expect("no active call frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.current_mut().frames.last_mut().expect("no active call frame")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.frame_mut();
        let value = ((frame.code[frame.ip] as u16) << 8) | frame.code[frame.ip + 1] as u16;
        frame.ip += 2;
        value
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_u16() as usize;
        self.heap.function(self.frame().function).constants[index]
    }

    fn read_name(&mut self) -> FoxResult<ObjRef> {
        match self.read_constant() {
            Value::Object(r) if matches!(self.heap.get(r), Object::String(_)) => Ok(r),
            _ => Err(FoxError::runtime_error("Expected a name constant.")),
        }
    }

    /// Module whose globals the running code uses
    fn current_module(&self) -> ObjRef {
        self.heap.function(self.frame().function).module
    }

    // ==================== Entry points ====================

    /// Compile and run `source` in module `module`, creating the module on first use
    pub fn interpret(&mut self, module: &str, source: &str) -> InterpretResult {
        let function = match compile_source(source, module) {
            Ok(function) => function,
            Err(error) => {
                let _ = write!(self.err, "{}", error.format());
                self.last_error = Some(error);
                return InterpretResult::CompileError;
            }
        };

        if self.config.print_bytecode {
            eprint!("{}", function.chunk.disassemble(module));
        }

        let module = match self.get_module(module) {
            Some(existing) => existing,
            None => self.define_module(module),
        };

        self.reset_main_fiber();
        let closure = self.push_script(&function, module);

        let result = match self.call_closure(closure, 0) {
            Ok(()) => self.run(0),
            Err(error) => {
                self.runtime_error(error);
                InterpretResult::RuntimeError
            }
        };

        if result != InterpretResult::Ok {
            self.reset_main_fiber();
        }
        result
    }

    /// Clear execution state so the next entry starts clean
    pub(crate) fn reset_main_fiber(&mut self) {
        let main = self.main_fiber;
        // Closures that escaped into globals must not point into the cleared stack
        self.close_fiber_upvalues(main, 0);
        let fiber = self.heap.fiber_mut(main);
        fiber.reset();
        fiber.state = FiberState::Running;
        self.fiber = main;
        self.state = RunState::Running;
        self.run_entries.clear();
        self.temp_roots.clear();
        self.api_base = None;
    }

    /// Before a host-initiated call: forget a previous top-level failure
    pub(crate) fn prepare_host_entry(&mut self) {
        if self.run_entries.is_empty() && self.state != RunState::Running {
            self.reset_main_fiber();
        }
    }

    /// Turn compiler output into heap functions and push its closure
    fn push_script(&mut self, function: &FunctionConstant, module: ObjRef) -> ObjRef {
        let function = self.materialize(function, module);
        let closure = self.alloc(Object::Closure(ObjClosure {
            function,
            upvalues: Vec::new(),
        }));
        self.push(Value::Object(closure));
        self.compiler_roots.clear();
        closure
    }

    fn materialize(&mut self, function: &FunctionConstant, module: ObjRef) -> ObjRef {
        let mut constants = Vec::with_capacity(function.chunk.constants.len());
        for constant in &function.chunk.constants {
            let value = match constant {
                Constant::Number(n) => Value::Number(*n),
                Constant::String(s) => {
                    let r = self.intern(s);
                    self.compiler_roots.push(r);
                    Value::Object(r)
                }
                Constant::Function(inner) => Value::Object(self.materialize(inner, module)),
            };
            constants.push(value);
        }

        let name = if function.name.is_empty() {
            None
        } else {
            let r = self.intern(&function.name);
            self.compiler_roots.push(r);
            Some(r)
        };

        let r = self.alloc(Object::Function(ObjFunction {
            name,
            min_arity: function.min_arity,
            max_arity: function.max_arity,
            is_variadic: function.is_variadic,
            upvalues: function.upvalues.clone(),
            code: Rc::from(function.chunk.code.as_slice()),
            spans: function.chunk.spans.clone(),
            constants,
            module,
        }));
        self.compiler_roots.push(r);
        r
    }

    /// Run until the entry fiber drops back to `stop_depth` frames
    pub(crate) fn run(&mut self, stop_depth: usize) -> InterpretResult {
        let entry = self.fiber;
        self.run_entries.push(entry);

        let result = loop {
            match self.state {
                RunState::RuntimeError => break InterpretResult::RuntimeError,
                RunState::Abort => break InterpretResult::Abort,
                RunState::Running => {}
            }

            let frames = self.current().frames.len();
            if frames == 0 || (self.fiber == entry && frames <= stop_depth) {
                break InterpretResult::Ok;
            }

            if let Err(error) = self.step() {
                self.runtime_error(error);
            }
        };

        self.run_entries.pop();
        result
    }

    /// Call `callee` with `slot0` in its callee slot and wait for the result.
    /// Used by natives and hosts that need a value back synchronously.
    pub(crate) fn call_sync(&mut self, slot0: Value, callee: Value, args: &[Value]) -> FoxResult<Value> {
        let fiber = self.fiber;
        let depth = self.current().frames.len();
        let height = self.stack_len();

        self.push(slot0);
        for arg in args {
            self.push(*arg);
        }

        if let Err(error) = self.call_value(callee, args.len()) {
            self.heap.fiber_mut(fiber).stack.truncate(height);
            return Err(error);
        }

        if self.fiber != fiber {
            return Err(FoxError::runtime_error("Cannot switch fibers inside a native call."));
        }

        if self.current().frames.len() > depth {
            let result = self.run(depth);
            if result != InterpretResult::Ok {
                let error = self
                    .last_error
                    .clone()
                    .unwrap_or_else(|| FoxError::runtime_error("Call aborted."));
                return Err(error);
            }
        }

        let result = self.pop();
        self.heap.fiber_mut(fiber).stack.truncate(height);
        Ok(result)
    }

    /// Call any callable value from host code
    pub fn call_value_sync(&mut self, callee: Value, args: &[Value]) -> FoxResult<Value> {
        self.prepare_host_entry();
        let result = self.call_sync(callee, callee, args);
        if result.is_err() && self.run_entries.is_empty() {
            self.reset_main_fiber();
        }
        result
    }

    // ==================== Dispatch ====================

    fn step(&mut self) -> FoxResult<()> {
        if self.config.trace_execution {
            self.trace_instruction();
        }

        let byte = self.read_byte();
        let op = OpCode::try_from(byte).map_err(|b| FoxError::runtime_error(format!("Unknown opcode {}.", b)))?;

        match op {
            OpCode::Constant => {
                let value = self.read_constant();
                self.push(value);
            }
            OpCode::Nil => self.push(Value::Nil),
            OpCode::True => self.push(Value::Bool(true)),
            OpCode::False => self.push(Value::Bool(false)),
            OpCode::Pop => {
                self.pop();
            }
            OpCode::Dup => {
                let value = self.peek(0);
                self.push(value);
            }

            OpCode::GetLocal => {
                let slot = self.read_u16() as usize;
                let base = self.frame().base;
                let value = self.current().stack[base + slot];
                self.push(value);
            }
            OpCode::SetLocal => {
                let slot = self.read_u16() as usize;
                let base = self.frame().base;
                let value = self.peek(0);
                self.current_mut().stack[base + slot] = value;
            }
            OpCode::GetGlobal => {
                let name = self.read_name()?;
                let module = self.current_module();
                match self.heap.module(module).variables.get(name) {
                    Some(value) => self.push(value),
                    None => return Err(self.undefined_variable(name)),
                }
            }
            OpCode::DefineGlobal => {
                let name = self.read_name()?;
                let module = self.current_module();
                let value = self.peek(0);
                self.heap.module_mut(module).variables.set(name, value);
                self.pop();
            }
            OpCode::SetGlobal => {
                let name = self.read_name()?;
                let module = self.current_module();
                let value = self.peek(0);
                let variables = &mut self.heap.module_mut(module).variables;
                // Assignment never declares
                if variables.set(name, value) {
                    variables.delete(name);
                    return Err(self.undefined_variable(name));
                }
            }
            OpCode::GetUpvalue => {
                let index = self.read_u16() as usize;
                let upvalue = self.heap.closure(self.frame().closure).upvalues[index];
                let value = self.upvalue_get(upvalue);
                self.push(value);
            }
            OpCode::SetUpvalue => {
                let index = self.read_u16() as usize;
                let upvalue = self.heap.closure(self.frame().closure).upvalues[index];
                let value = self.peek(0);
                self.upvalue_set(upvalue, value);
            }

            OpCode::GetProperty => {
                let name = self.read_name()?;
                self.get_property(name)?;
            }
            OpCode::SetProperty => {
                let name = self.read_name()?;
                self.set_property(name)?;
            }
            OpCode::GetSuper => {
                let name = self.read_name()?;
                let superclass = self.pop();
                let class = self.expect_class(superclass)?;
                self.bind_method(class, name)?;
            }

            OpCode::Equal => {
                let b = self.pop();
                let a = self.pop();
                self.push(Value::Bool(a.equals(&b)));
            }
            OpCode::Greater => self.compare(|a, b| a > b)?,
            OpCode::Less => self.compare(|a, b| a < b)?,
            OpCode::Add => self.add()?,
            OpCode::Sub => self.arithmetic(OP_SUB, |a, b| a - b)?,
            OpCode::Mul => self.arithmetic(OP_MUL, |a, b| a * b)?,
            OpCode::Div => self.arithmetic(OP_DIV, |a, b| a / b)?,
            OpCode::Mod => self.number_op(|a, b| a % b)?,
            OpCode::Not => {
                let value = self.pop();
                self.push(Value::Bool(value.is_falsey()));
            }
            OpCode::Negate => match self.peek(0) {
                Value::Number(n) => {
                    self.pop();
                    self.push(Value::Number(-n));
                }
                _ => return Err(FoxError::type_error("Operand must be a number.")),
            },
            OpCode::Is => self.is_instance_of()?,

            OpCode::Print => {
                let argc = self.read_byte() as usize;
                self.print(argc)?;
            }

            OpCode::Jump => {
                let offset = self.read_u16() as usize;
                self.frame_mut().ip += offset;
            }
            OpCode::JumpIfFalse => {
                let offset = self.read_u16() as usize;
                if self.peek(0).is_falsey() {
                    self.frame_mut().ip += offset;
                }
            }
            OpCode::JumpIfNotNil => {
                let offset = self.read_u16() as usize;
                if !self.pop().is_nil() {
                    self.frame_mut().ip += offset;
                }
            }
            OpCode::Loop => {
                let offset = self.read_u16() as usize;
                self.frame_mut().ip -= offset;
            }

            OpCode::Call => {
                let argc = self.read_byte() as usize;
                let callee = self.peek(argc);
                self.call_value(callee, argc)?;
            }
            OpCode::Invoke => {
                let name = self.read_name()?;
                let argc = self.read_byte() as usize;
                self.invoke(name, argc)?;
            }
            OpCode::SuperInvoke => {
                let name = self.read_name()?;
                let argc = self.read_byte() as usize;
                let superclass = self.pop();
                let class = self.expect_class(superclass)?;
                self.invoke_from_class(class, name, argc)?;
            }

            OpCode::Closure => self.make_closure()?,
            OpCode::CloseUpvalue => {
                let top = self.stack_len() - 1;
                self.close_upvalues(top);
                self.pop();
            }
            OpCode::Return => self.return_from_frame(),

            OpCode::Class => {
                let name = self.read_name()?;
                let class = self.alloc(Object::Class(ObjClass::new(name)));
                self.push(Value::Object(class));
            }
            OpCode::Inherit => self.inherit()?,
            OpCode::Method => {
                let name = self.read_name()?;
                self.define_member(name, false)?;
            }
            OpCode::Operator => {
                let name = self.read_name()?;
                self.define_member(name, true)?;
            }

            OpCode::Import => {
                let name = self.read_name()?;
                self.import(name)?;
            }
            OpCode::EndModule => self.end_module(),

            OpCode::Array => {
                let array = self.alloc(Object::Array(Vec::new()));
                self.push(Value::Object(array));
            }
            OpCode::Map => {
                let map = self.alloc(Object::Map(ValueMap::new()));
                self.push(Value::Object(map));
            }
            OpCode::AddList => {
                let count = self.read_u16() as usize;
                self.add_list(count);
            }
            OpCode::AddMap => {
                let count = self.read_u16() as usize;
                self.add_map(count);
            }
            OpCode::Subscript => self.subscript()?,
            OpCode::SubscriptAssign => self.subscript_assign()?,
            OpCode::Slice => self.slice()?,
        }

        Ok(())
    }

    fn trace_instruction(&self) {
        let fiber = self.current();
        let mut line = String::from("          ");
        for value in &fiber.stack {
            line.push_str(&format!("[ {} ]", self.describe(*value)));
        }
        eprintln!("{}", line);
        if let Some(frame) = fiber.frames.last() {
            match OpCode::try_from(frame.code[frame.ip]) {
                Ok(op) => eprintln!("{:04} {:?}", frame.ip, op),
                Err(byte) => eprintln!("{:04} unknown opcode {}", frame.ip, byte),
            }
        }
    }

    // ==================== Calls ====================

    pub(crate) fn call_value(&mut self, callee: Value, argc: usize) -> FoxResult<()> {
        let Value::Object(r) = callee else {
            return Err(FoxError::type_error("Can only call functions and classes."));
        };

        match self.heap.get(r) {
            Object::Closure(_) => self.call_closure(r, argc),
            Object::Native(native) => {
                let function = native.function;
                self.call_native(function, argc)
            }
            Object::BoundMethod(bound) => {
                let (receiver, method) = (bound.receiver, bound.method);
                self.set_peek(argc, receiver);
                self.call_value(method, argc)
            }
            Object::Class(class) => {
                let initializer = class.methods.get(self.init_string);
                if initializer.is_none() && argc != 0 {
                    return Err(FoxError::argument_error(format!(
                        "Expected 0 arguments but got {}.",
                        argc
                    )));
                }
                let instance = self.alloc(Object::Instance(ObjInstance::new(r)));
                self.set_peek(argc, Value::Object(instance));
                match initializer {
                    Some(initializer) => self.call_value(initializer, argc),
                    None => Ok(()),
                }
            }
            _ => Err(FoxError::type_error("Can only call functions and classes.")),
        }
    }

    pub(crate) fn call_closure(&mut self, closure: ObjRef, argc: usize) -> FoxResult<()> {
        let function_ref = self.heap.closure(closure).function;
        let function = self.heap.function(function_ref);
        let (min, max, variadic) = (function.min_arity, function.max_arity, function.is_variadic);
        let code = function.code.clone();

        if argc < min {
            return Err(FoxError::argument_error(format!(
                "Expected {} arguments but got {}.",
                min, argc
            )));
        }
        if argc > max && !variadic {
            return Err(FoxError::argument_error(format!(
                "Expected {} arguments but got {}.",
                max, argc
            )));
        }
        if self.current().frames.len() >= FRAMES_MAX || self.stack_len() + max >= STACK_MAX {
            return Err(FoxError::runtime_error("Stack overflow."));
        }

        // Missing optional arguments arrive as nil
        for _ in argc..max {
            self.push(Value::Nil);
        }

        if variadic {
            let extra = argc.saturating_sub(max);
            let len = self.stack_len();
            let rest = self.current().stack[len - extra..].to_vec();
            let array = self.alloc(Object::Array(rest));
            self.current_mut().stack.truncate(len - extra);
            self.push(Value::Object(array));
        }

        let base = self.stack_len() - max - usize::from(variadic) - 1;
        self.current_mut()
            .frames
            .push(CallFrame::new(closure, function_ref, code, base));
        Ok(())
    }

    fn call_native(&mut self, function: NativeFn, argc: usize) -> FoxResult<()> {
        let fiber = self.fiber;
        let base = self.stack_len() - argc - 1;
        let (receiver, args) = {
            let stack = &self.current().stack;
            let args: SmallVec<[Value; 8]> = stack[base + 1..].iter().copied().collect();
            (stack[base], args)
        };

        let result = function(self, receiver, &args).map_err(FoxError::runtime_error)?;

        // An abort or nested error already reported itself
        if self.state != RunState::Running {
            return Ok(());
        }

        self.heap.fiber_mut(fiber).stack.truncate(base);
        // Natives that switch fibers deliver their own result
        if self.fiber == fiber {
            self.push(result);
        }
        Ok(())
    }

    fn invoke(&mut self, name: ObjRef, argc: usize) -> FoxResult<()> {
        let Value::Object(r) = self.peek(argc) else {
            return Err(FoxError::type_error("Only instances && module have methods."));
        };

        match self.heap.get(r) {
            Object::Instance(instance) => {
                let class = instance.class;
                // A field holding a function shadows the method
                if let Some(field) = instance.fields.get(name) {
                    self.set_peek(argc, field);
                    return self.call_value(field, argc);
                }
                self.invoke_from_class(class, name, argc)
            }
            Object::Lib(lib) => match lib.methods.get(name) {
                Some(method) => self.call_value(method, argc),
                None => Err(self.undefined_property(name)),
            },
            Object::Array(_) => self.invoke_builtin(MethodTable::Array, name, argc),
            Object::String(_) => self.invoke_builtin(MethodTable::String, name, argc),
            Object::Map(_) => self.invoke_builtin(MethodTable::Map, name, argc),
            Object::Fiber(_) => self.invoke_builtin(MethodTable::Fiber, name, argc),
            _ => Err(FoxError::type_error("Only instances && module have methods.")),
        }
    }

    fn invoke_builtin(&mut self, table: MethodTable, name: ObjRef, argc: usize) -> FoxResult<()> {
        match self.method_table(table).get(name) {
            Some(method) => self.call_value(method, argc),
            None => Err(FoxError::name_error(format!(
                "Undefined methods '{}'.",
                self.heap.str(name)
            ))),
        }
    }

    fn invoke_from_class(&mut self, class: ObjRef, name: ObjRef, argc: usize) -> FoxResult<()> {
        match self.heap.class(class).methods.get(name) {
            Some(method) => self.call_value(method, argc),
            None => Err(self.undefined_property(name)),
        }
    }

    pub(crate) fn method_table(&self, table: MethodTable) -> &Table {
        match table {
            MethodTable::Array => &self.array_methods,
            MethodTable::String => &self.string_methods,
            MethodTable::Map => &self.map_methods,
            MethodTable::Fiber => &self.fiber_methods,
        }
    }

    pub(crate) fn method_table_mut(&mut self, table: MethodTable) -> &mut Table {
        match table {
            MethodTable::Array => &mut self.array_methods,
            MethodTable::String => &mut self.string_methods,
            MethodTable::Map => &mut self.map_methods,
            MethodTable::Fiber => &mut self.fiber_methods,
        }
    }

    fn return_from_frame(&mut self) {
        let result = self.pop();
        let base = self.frame().base;
        self.close_upvalues(base);

        let fiber = self.heap.fiber_mut(self.fiber);
        fiber.frames.pop();

        if fiber.frames.is_empty() {
            if let Some(caller) = fiber.caller.take() {
                fiber.state = FiberState::Done;
                fiber.stack.clear();
                self.fiber = caller;
                self.push(result);
                return;
            }
        }

        fiber.stack.truncate(base);
        fiber.stack.push(result);
    }

    // ==================== Closures ====================

    fn make_closure(&mut self) -> FoxResult<()> {
        let Value::Object(function) = self.read_constant() else {
            return Err(FoxError::runtime_error("Expected a function constant."));
        };
        let captures = self.heap.function(function).upvalues.clone();

        // Pushed first so the upvalues allocated below cannot collect it
        let closure = self.alloc(Object::Closure(ObjClosure {
            function,
            upvalues: Vec::with_capacity(captures.len()),
        }));
        self.push(Value::Object(closure));

        let (base, enclosing) = {
            let frame = self.frame();
            (frame.base, frame.closure)
        };
        for capture in captures {
            let upvalue = if capture.is_local {
                self.capture_upvalue(base + capture.index as usize)
            } else {
                self.heap.closure(enclosing).upvalues[capture.index as usize]
            };
            self.heap.closure_mut(closure).upvalues.push(upvalue);
        }
        Ok(())
    }

    fn open_slot(&self, upvalue: ObjRef) -> usize {
        match self.heap.upvalue(upvalue).state {
            UpvalueState::Open { slot, .. } => slot,
            UpvalueState::Closed(_) => usize::MAX,
        }
    }

    /// Reuse the open upvalue for `slot`, or insert a new one keeping slot order
    fn capture_upvalue(&mut self, slot: usize) -> ObjRef {
        let mut insert_at = 0;
        for (i, &upvalue) in self.current().open_upvalues.iter().enumerate().rev() {
            let open = self.open_slot(upvalue);
            if open == slot {
                return upvalue;
            }
            if open < slot {
                insert_at = i + 1;
                break;
            }
        }

        let fiber = self.fiber;
        let upvalue = self.alloc(Object::Upvalue(ObjUpvalue {
            state: UpvalueState::Open { fiber, slot },
        }));
        self.current_mut().open_upvalues.insert(insert_at, upvalue);
        upvalue
    }

    /// Close every open upvalue at or above stack slot `last`
    fn close_upvalues(&mut self, last: usize) {
        self.close_fiber_upvalues(self.fiber, last);
    }

    /// Close `fiber`'s open upvalues at or above `last`
    fn close_fiber_upvalues(&mut self, fiber: ObjRef, last: usize) {
        while let Some(&upvalue) = self.heap.fiber(fiber).open_upvalues.last() {
            let slot = self.open_slot(upvalue);
            if slot < last {
                break;
            }
            let value = self.heap.fiber(fiber).stack.get(slot).copied().unwrap_or_default();
            self.heap.upvalue_mut(upvalue).state = UpvalueState::Closed(value);
            self.heap.fiber_mut(fiber).open_upvalues.pop();
        }
    }

    fn upvalue_get(&self, upvalue: ObjRef) -> Value {
        match self.heap.upvalue(upvalue).state {
            UpvalueState::Open { fiber, slot } => self.heap.fiber(fiber).stack[slot],
            UpvalueState::Closed(value) => value,
        }
    }

    fn upvalue_set(&mut self, upvalue: ObjRef, value: Value) {
        match self.heap.upvalue(upvalue).state {
            UpvalueState::Open { fiber, slot } => self.heap.fiber_mut(fiber).stack[slot] = value,
            UpvalueState::Closed(_) => {
                self.heap.upvalue_mut(upvalue).state = UpvalueState::Closed(value);
            }
        }
    }

    // ==================== Classes and properties ====================

    fn expect_class(&self, value: Value) -> FoxResult<ObjRef> {
        match value {
            Value::Object(r) if matches!(self.heap.get(r), Object::Class(_)) => Ok(r),
            _ => Err(FoxError::type_error("Superclass must be a class.")),
        }
    }

    fn inherit(&mut self) -> FoxResult<()> {
        let superclass = self.expect_class(self.peek(1))?;
        let Value::Object(subclass) = self.peek(0) else {
            return Err(FoxError::type_error("Superclass must be a class."));
        };

        let parent = self.heap.class(superclass);
        let (methods, operators, getters, setters) = (
            parent.methods.clone(),
            parent.operators.clone(),
            parent.getters.clone(),
            parent.setters.clone(),
        );
        let derived_count = parent.derived_count + 1;

        let child = self.heap.class_mut(subclass);
        child.methods.add_all(&methods);
        child.operators.add_all(&operators);
        child.getters.add_all(&getters);
        child.setters.add_all(&setters);
        child.superclass = Some(superclass);
        child.derived_count = derived_count;

        self.pop();
        Ok(())
    }

    /// Bind the closure on top of the stack into the class below it
    fn define_member(&mut self, name: ObjRef, operator: bool) -> FoxResult<()> {
        let method = self.peek(0);
        let Value::Object(class) = self.peek(1) else {
            return Err(FoxError::runtime_error("Methods can only be bound to classes."));
        };
        let class = self.heap.class_mut(class);
        if operator {
            class.operators.set(name, method);
        } else {
            class.methods.set(name, method);
        }
        self.pop();
        Ok(())
    }

    fn get_property(&mut self, name: ObjRef) -> FoxResult<()> {
        let Value::Object(r) = self.peek(0) else {
            return Err(FoxError::type_error("Only instances have properties."));
        };

        match self.heap.get(r) {
            Object::Instance(instance) => {
                let class = instance.class;
                if instance.is_user_type() {
                    if let Some(getter) = self.heap.class(class).getters.get(name) {
                        return self.call_value(getter, 0);
                    }
                }
                if let Some(value) = instance.fields.get(name) {
                    self.pop();
                    self.push(value);
                    return Ok(());
                }
                self.bind_method(class, name)
            }
            Object::Lib(lib) => match lib.methods.get(name) {
                Some(native) => {
                    self.pop();
                    self.push(native);
                    Ok(())
                }
                None => Err(self.undefined_property(name)),
            },
            _ => Err(FoxError::type_error("Only instances have properties.")),
        }
    }

    fn set_property(&mut self, name: ObjRef) -> FoxResult<()> {
        let target = self.peek(1);
        let instance = match target {
            Value::Object(r) => match self.heap.get(r) {
                Object::Instance(instance) => instance,
                _ => return Err(FoxError::type_error("Only instances have fields.")),
            },
            _ => return Err(FoxError::type_error("Only instances have fields.")),
        };

        if instance.is_user_type() {
            if let Some(setter) = self.heap.class(instance.class).setters.get(name) {
                return self.call_value(setter, 1);
            }
        }

        let value = self.peek(0);
        if let Value::Object(r) = target {
            self.heap.instance_mut(r).fields.set(name, value);
        }
        self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }

    /// Replace the receiver on top of the stack with `class.name` bound to it
    fn bind_method(&mut self, class: ObjRef, name: ObjRef) -> FoxResult<()> {
        let Some(method) = self.heap.class(class).methods.get(name) else {
            return Err(self.undefined_property(name));
        };
        let receiver = self.peek(0);
        let bound = self.alloc(Object::BoundMethod(ObjBoundMethod { receiver, method }));
        self.pop();
        self.push(Value::Object(bound));
        Ok(())
    }

    fn is_instance_of(&mut self) -> FoxResult<()> {
        let class = match self.peek(0) {
            Value::Object(r) if matches!(self.heap.get(r), Object::Class(_)) => r,
            _ => return Err(FoxError::type_error("Expected class type.")),
        };
        let instance_class = match self.peek(1) {
            Value::Object(r) => match self.heap.get(r) {
                Object::Instance(instance) => instance.class,
                _ => return Err(FoxError::type_error("Expected an instance before the keyword 'is'.")),
            },
            _ => return Err(FoxError::type_error("Expected an instance before the keyword 'is'.")),
        };

        // Names are interned, so equal names share a handle
        let same = self.heap.class(instance_class).name == self.heap.class(class).name;
        self.pop();
        self.pop();
        self.push(Value::Bool(same));
        Ok(())
    }

    // ==================== Operators ====================

    /// Overload of `OPERATOR_SYMBOLS[index]` when the left operand is an instance
    fn operator_method(&self, index: usize) -> Option<Value> {
        let Value::Object(r) = self.peek(1) else {
            return None;
        };
        match self.heap.get(r) {
            Object::Instance(instance) => self
                .heap
                .class(instance.class)
                .operators
                .get(self.operator_names[index]),
            _ => None,
        }
    }

    fn add(&mut self) -> FoxResult<()> {
        if let Some(method) = self.operator_method(OP_ADD) {
            return self.call_value(method, 1);
        }

        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(a + b));
            }
            (a, b) => {
                let joined = match (self.heap.as_str(a), self.heap.as_str(b)) {
                    (Some(left), Some(right)) => {
                        let mut joined = String::with_capacity(left.len() + right.len());
                        joined.push_str(left);
                        joined.push_str(right);
                        joined
                    }
                    _ => {
                        return Err(FoxError::type_error(
                            "Operands must be two numbers or two strings.",
                        ))
                    }
                };
                // Operands stay on the stack until the result exists
                let result = self.intern_owned(joined);
                self.pop();
                self.pop();
                self.push(Value::Object(result));
            }
        }
        Ok(())
    }

    fn arithmetic(&mut self, operator: usize, op: fn(f64, f64) -> f64) -> FoxResult<()> {
        if let Some(method) = self.operator_method(operator) {
            return self.call_value(method, 1);
        }
        self.number_op(op)
    }

    fn number_op(&mut self, op: fn(f64, f64) -> f64) -> FoxResult<()> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Number(op(a, b)));
                Ok(())
            }
            _ => Err(FoxError::type_error("Operands must be numbers.")),
        }
    }

    fn compare(&mut self, op: fn(f64, f64) -> bool) -> FoxResult<()> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.pop();
                self.pop();
                self.push(Value::Bool(op(a, b)));
                Ok(())
            }
            _ => Err(FoxError::type_error("Operands must be numbers.")),
        }
    }

    // ==================== Collections ====================

    fn add_list(&mut self, count: usize) {
        let len = self.stack_len();
        let values = self.current().stack[len - count..].to_vec();
        if let Value::Object(array) = self.peek(count) {
            self.heap.array_mut(array).extend(values);
        }
        self.current_mut().stack.truncate(len - count);
    }

    fn add_map(&mut self, count: usize) {
        let len = self.stack_len();
        let pairs = self.current().stack[len - count * 2..].to_vec();
        if let Value::Object(map) = self.peek(count * 2) {
            let map = self.heap.map_mut(map);
            for pair in pairs.chunks_exact(2) {
                map.insert(pair[0], pair[1]);
            }
        }
        self.current_mut().stack.truncate(len - count * 2);
    }

    fn subscript(&mut self) -> FoxResult<()> {
        let index = self.peek(0);
        let Value::Object(target) = self.peek(1) else {
            return Err(FoxError::type_error("Can only subscript on arrays, strings or maps."));
        };

        let result = match self.heap.get(target) {
            Object::Array(values) => {
                let Value::Number(n) = index else {
                    return Err(FoxError::type_error("Array index must be a number."));
                };
                match resolve_index(n, values.len()) {
                    Some(i) => values[i],
                    None => return Err(FoxError::index_error("Array index out of bounds.")),
                }
            }
            Object::String(s) => {
                let Value::Number(n) = index else {
                    return Err(FoxError::type_error("String index must be a number."));
                };
                let count = s.chars.chars().count();
                let Some(c) = resolve_index(n, count).and_then(|i| s.chars.chars().nth(i)) else {
                    return Err(FoxError::index_error("String index out of bounds."));
                };
                let r = self.intern_owned(c.to_string());
                Value::Object(r)
            }
            Object::Map(map) => map.get(index).unwrap_or(Value::Nil),
            _ => {
                return Err(FoxError::type_error(
                    "Can only subscript on arrays, strings or maps.",
                ))
            }
        };

        self.pop();
        self.pop();
        self.push(result);
        Ok(())
    }

    fn subscript_assign(&mut self) -> FoxResult<()> {
        let value = self.peek(0);
        let index = self.peek(1);
        let Value::Object(target) = self.peek(2) else {
            return Err(FoxError::type_error("Can only subscript on arrays, strings or maps."));
        };

        match self.heap.get_mut(target) {
            Object::Array(values) => {
                let Value::Number(n) = index else {
                    return Err(FoxError::type_error("Array index must be a number."));
                };
                match resolve_index(n, values.len()) {
                    Some(i) => values[i] = value,
                    None => return Err(FoxError::index_error("Array index out of bounds.")),
                }
            }
            Object::Map(map) => {
                map.insert(index, value);
            }
            // Interned strings are shared, so editing one in place would edit them all
            Object::String(_) => return Err(FoxError::type_error("Strings are immutable.")),
            _ => {
                return Err(FoxError::type_error(
                    "Can only subscript on arrays, strings or maps.",
                ))
            }
        }

        self.pop();
        self.pop();
        self.pop();
        self.push(value);
        Ok(())
    }

    fn slice(&mut self) -> FoxResult<()> {
        let (end, start) = (self.peek(0), self.peek(1));
        let Value::Object(target) = self.peek(2) else {
            return Err(FoxError::type_error("Can only slice on arrays and strings."));
        };

        let bound = |value: Value| -> FoxResult<Option<f64>> {
            match value {
                Value::Nil => Ok(None),
                Value::Number(n) => Ok(Some(n)),
                _ => Err(FoxError::type_error("Slice index must be a number.")),
            }
        };
        let (start, end) = (bound(start)?, bound(end)?);
        let range = |len: usize| -> (usize, usize) {
            let start = start.map_or(0, |n| n.max(0.0) as usize).min(len);
            let end = end.map_or(len, |n| n.max(0.0) as usize).min(len);
            (start, end.max(start))
        };

        let result = match self.heap.get(target) {
            Object::Array(values) => {
                let (start, end) = range(values.len());
                let sliced = values[start..end].to_vec();
                self.new_array(sliced)
            }
            Object::String(s) => {
                let (start, end) = range(s.chars.chars().count());
                let sliced: String = s.chars.chars().skip(start).take(end - start).collect();
                Value::Object(self.intern_owned(sliced))
            }
            _ => return Err(FoxError::type_error("Can only slice on arrays and strings.")),
        };

        self.pop();
        self.pop();
        self.pop();
        self.push(result);
        Ok(())
    }

    // ==================== Printing ====================

    fn print(&mut self, argc: usize) -> FoxResult<()> {
        let text = match argc {
            0 => String::new(),
            1 => self.stringify(self.peek(0))?,
            _ => self.format_print(argc)?,
        };

        writeln!(self.out, "{}", text).map_err(|e| FoxError::runtime_error(format!("Could not write output: {}.", e)))?;

        let len = self.stack_len();
        self.current_mut().stack.truncate(len - argc);
        Ok(())
    }

    /// `print "a % b %", x, y`: each `%` takes the next argument, `%%` is a literal
    fn format_print(&mut self, argc: usize) -> FoxResult<String> {
        let len = self.stack_len();
        let args = self.current().stack[len - argc..].to_vec();
        let format = match self.heap.as_str(args[0]) {
            Some(format) => format.to_string(),
            None => return Err(FoxError::type_error("Expected a format string in print call.")),
        };

        let mut placeholders = 0;
        let mut chars = format.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '%' {
                if chars.peek() == Some(&'%') {
                    chars.next();
                } else {
                    placeholders += 1;
                }
            }
        }
        if placeholders != argc - 1 {
            return Err(FoxError::argument_error(format!(
                "Expected {} arguments but got {} in print call.",
                placeholders,
                argc - 1
            )));
        }

        let mut output = String::with_capacity(format.len());
        let mut next_arg = args[1..].iter();
        let mut chars = format.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                output.push(c);
            } else if chars.peek() == Some(&'%') {
                chars.next();
                output.push('%');
            } else if let Some(arg) = next_arg.next() {
                output.push_str(&self.stringify(*arg)?);
            }
        }
        Ok(output)
    }

    /// Text `print` shows for a value, calling `string()` on instances that define it
    pub fn stringify(&mut self, value: Value) -> FoxResult<String> {
        let mut seen = Vec::new();
        self.stringify_inner(value, &mut seen)
    }

    fn stringify_inner(&mut self, value: Value, seen: &mut Vec<ObjRef>) -> FoxResult<String> {
        let r = match value {
            Value::Object(r) => r,
            other => return Ok(self.describe(other)),
        };

        let text = match self.heap.get(r) {
            Object::Instance(instance) => {
                let class = instance.class;
                return self.stringify_instance(r, class);
            }
            Object::BoundMethod(bound) => {
                let method = bound.method;
                return self.stringify_inner(method, seen);
            }
            Object::Array(values) => {
                if seen.contains(&r) {
                    return Ok("[...]".to_string());
                }
                let values = values.clone();
                seen.push(r);
                let mut parts = Vec::with_capacity(values.len());
                for value in values {
                    parts.push(self.stringify_inner(value, seen)?);
                }
                seen.pop();
                format!("[{}]", parts.join(", "))
            }
            Object::Map(map) => {
                if seen.contains(&r) {
                    return Ok("{...}".to_string());
                }
                let entries: Vec<(Value, Value)> = map.iter().collect();
                seen.push(r);
                let mut parts = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = self.stringify_inner(key, seen)?;
                    let value = self.stringify_inner(value, seen)?;
                    parts.push(format!("{}: {}", key, value));
                }
                seen.pop();
                format!("{{{}}}", parts.join(", "))
            }
            _ => self.describe(value),
        };
        Ok(text)
    }

    fn stringify_instance(&mut self, instance: ObjRef, class: ObjRef) -> FoxResult<String> {
        let Some(method) = self.heap.class(class).methods.get(self.string_string) else {
            return Ok(format!("{} instance", self.heap.str(self.heap.class(class).name)));
        };

        let result = self.call_sync(Value::Object(instance), method, &[])?;
        if let Some(text) = self.heap.as_str(result) {
            return Ok(text.to_string());
        }
        self.push_root(result);
        let text = self.stringify(result);
        self.pop_root();
        text
    }

    /// Short description of a value that never runs code
    pub fn describe(&self, value: Value) -> String {
        let r = match value {
            Value::Nil => return "nil".to_string(),
            Value::Bool(b) => return b.to_string(),
            Value::Number(n) => return format_number(n),
            Value::Object(r) => r,
        };

        match self.heap.get(r) {
            Object::String(s) => s.chars.clone(),
            Object::Function(function) => self.function_label(function.name),
            Object::Closure(closure) => self.function_label(self.heap.function(closure.function).name),
            Object::BoundMethod(bound) => self.describe(bound.method),
            Object::Native(native) => format!("<native fn {}>", native.name),
            Object::Upvalue(_) => "upvalue".to_string(),
            Object::Class(class) => self.heap.str(class.name).to_string(),
            Object::Instance(instance) => {
                format!("{} instance", self.heap.str(self.heap.class(instance.class).name))
            }
            Object::Array(values) => format!("<array {}>", values.len()),
            Object::Map(map) => format!("<map {}>", map.len()),
            Object::Module(module) => format!("<module {}>", self.heap.str(module.name)),
            Object::Fiber(_) => "<fiber>".to_string(),
            Object::Lib(lib) => format!("<lib {}>", self.heap.str(lib.name)),
            Object::Handle(value) => self.describe(*value),
        }
    }

    fn function_label(&self, name: Option<ObjRef>) -> String {
        match name {
            Some(name) => format!("<fn {}>", self.heap.str(name)),
            None => "<script>".to_string(),
        }
    }

    // ==================== Modules ====================

    pub fn get_module(&self, name: &str) -> Option<ObjRef> {
        let key = self.heap.find_string(name, hash_string(name))?;
        self.modules.get(key)?.as_object()
    }

    /// Create a module seeded with every binding `core` has right now.
    /// A module that already exists is returned as is, with a warning.
    pub fn define_module(&mut self, name: &str) -> ObjRef {
        if let Some(existing) = self.get_module(name) {
            let _ = writeln!(self.err, "'{}': This module already exist !!", name);
            return existing;
        }

        let key = self.intern(name);
        let variables = self.heap.module(self.core_module).variables.clone();
        let module = self.alloc(Object::Module(ObjModule { name: key, variables }));
        self.modules.set(key, Value::Object(module));
        module
    }

    fn import(&mut self, name: ObjRef) -> FoxResult<()> {
        if let Some(Value::Object(module)) = self.modules.get(name) {
            let current = self.current_module();
            if current != module {
                let variables = self.heap.module(module).variables.clone();
                self.heap.module_mut(current).variables.add_all(&variables);
            }
            self.push(Value::Nil);
            return Ok(());
        }

        let module_name = self.heap.str(name).to_string();
        let source = self
            .read_module_source(&module_name)
            .ok_or_else(|| FoxError::import_error(format!("Could not load module '{}'.", module_name)))?;

        let function = match compile_source(&source, &module_name) {
            Ok(function) => function,
            Err(error) => {
                let _ = write!(self.err, "{}", error.format());
                return Err(FoxError::import_error(format!(
                    "Could not compile module '{}'.",
                    module_name
                )));
            }
        };

        let module = self.define_module(&module_name);
        let closure = self.push_script(&function, module);
        self.call_closure(closure, 0)
    }

    fn read_module_source(&self, name: &str) -> Option<String> {
        let file = format!("{}.fox", name);
        self.config
            .module_paths
            .iter()
            .find_map(|root| std::fs::read_to_string(root.join(&file)).ok())
    }

    /// Leaving an imported module's body: hand its globals to the importer
    fn end_module(&mut self) {
        let frames = &self.current().frames;
        if frames.len() < 2 {
            return;
        }
        let imported = self.heap.function(frames[frames.len() - 1].function).module;
        let importer = self.heap.function(frames[frames.len() - 2].function).module;
        if imported == importer {
            return;
        }
        let variables = self.heap.module(imported).variables.clone();
        self.heap.module_mut(importer).variables.add_all(&variables);
    }

    // ==================== Errors ====================

    fn undefined_variable(&self, name: ObjRef) -> FoxError {
        FoxError::name_error(format!("Undefined variable '{}'.", self.heap.str(name)))
    }

    fn undefined_property(&self, name: ObjRef) -> FoxError {
        FoxError::name_error(format!("Undefined property '{}'.", self.heap.str(name)))
    }

    fn backtrace(&self) -> Vec<StackFrame> {
        self.current()
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let function = self.heap.function(frame.function);
                let name = function.name.map(|n| self.heap.str(n).to_string());
                StackFrame::new(name, function.line_at(frame.ip.saturating_sub(1)))
            })
            .collect()
    }

    /// Span and module name of the instruction that failed
    fn error_location(&self) -> (Span, String) {
        match self.current().frames.last() {
            Some(frame) => {
                let function = self.heap.function(frame.function);
                let span = function.spans.get(frame.ip.saturating_sub(1)).copied().unwrap_or_default();
                let module = self.heap.str(self.heap.module(function.module).name).to_string();
                (span, module)
            }
            None => (Span::default(), String::new()),
        }
    }

    /// Report `error` with a backtrace and unwind the whole fiber chain.
    /// Only the first error of a run is reported.
    fn runtime_error(&mut self, error: FoxError) {
        if self.state != RunState::Running {
            return;
        }

        let (span, file) = self.error_location();
        let mut error = error.with_backtrace(self.backtrace()).with_span(span);
        error.file = file;
        let _ = self.err.write_all(error.runtime_report().as_bytes());

        // Every fiber waiting on this one dies with the same error
        let message = Value::Object(self.intern(&error.message));
        let mut next = Some(self.fiber);
        while let Some(r) = next {
            self.close_fiber_upvalues(r, 0);
            let fiber = self.heap.fiber_mut(r);
            fiber.error = message;
            fiber.state = FiberState::Done;
            next = fiber.caller.take();
        }

        self.state = RunState::RuntimeError;
        self.last_error = Some(error);
    }

    /// Stop execution with `Abort`, recording `message` as the fiber's error
    pub(crate) fn abort(&mut self, message: &str) {
        if self.state != RunState::Running {
            return;
        }

        let backtrace = self.backtrace();
        let mut report = format!("[ABORT] {}\n", message);
        for frame in &backtrace {
            report.push_str(&format!("{}\n", frame));
        }
        let _ = self.err.write_all(report.as_bytes());

        let error = Value::Object(self.intern(message));
        self.current_mut().error = error;
        self.state = RunState::Abort;
        self.last_error = Some(FoxError::runtime_error(message).with_backtrace(backtrace));
    }

    // ==================== Fibers ====================

    pub(crate) fn new_fiber(&mut self, closure: ObjRef) -> ObjRef {
        self.alloc(Object::Fiber(ObjFiber::new(Some(closure))))
    }

    /// Switch to `target`, making the running fiber its caller. The value the
    /// fiber eventually yields or returns lands on the caller's stack.
    pub(crate) fn resume_fiber(&mut self, target: ObjRef, arg: Option<Value>) -> Result<Value, String> {
        let fiber = self.heap.fiber(target);
        match fiber.state {
            FiberState::Done => return Err("Cannot call a finished fiber.".to_string()),
            FiberState::Running => return Err("Fiber has already been called.".to_string()),
            FiberState::Fresh | FiberState::Suspended => {}
        }
        if fiber.caller.is_some() {
            return Err("Fiber has already been called.".to_string());
        }
        let fresh = fiber.state == FiberState::Fresh;

        let caller = self.fiber;
        let fiber = self.heap.fiber_mut(target);
        fiber.caller = Some(caller);
        fiber.state = FiberState::Running;
        self.fiber = target;

        if !fresh {
            // Becomes the result of the `yield` that suspended it
            self.push(arg.unwrap_or_default());
            return Ok(Value::Nil);
        }

        let Value::Object(closure) = self.current().stack[0] else {
            return Err("Fiber has no function to run.".to_string());
        };
        let function = self.heap.function(self.heap.closure(closure).function);
        let takes_argument = function.max_arity > 0 || function.is_variadic;
        let argc = match arg {
            Some(value) if takes_argument => {
                self.push(value);
                1
            }
            _ => 0,
        };
        self.call_closure(closure, argc).map_err(|e| e.message)?;
        Ok(Value::Nil)
    }

    /// Suspend the running fiber and hand `value` to its caller
    pub(crate) fn yield_fiber(&mut self, value: Value) -> Result<Value, String> {
        let current = self.fiber;
        let Some(caller) = self.heap.fiber(current).caller else {
            return Err("Cannot yield from the root fiber.".to_string());
        };
        if self.run_entries.last() == Some(&current) {
            return Err("Cannot yield across a native call.".to_string());
        }

        let fiber = self.heap.fiber_mut(current);
        fiber.caller = None;
        fiber.state = FiberState::Suspended;
        self.fiber = caller;
        self.push(value);
        Ok(Value::Nil)
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

/// Index into a sequence of `len`, counting negative indices from the end
fn resolve_index(index: f64, len: usize) -> Option<usize> {
    if !index.is_finite() {
        return None;
    }
    let mut i = index as i64;
    if i < 0 {
        i += len as i64;
    }
    (0..len as i64).contains(&i).then_some(i as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.borrow()).into_owned()
        }
    }

    fn vm_with(config: VmConfig) -> (VM, Capture, Capture) {
        let mut vm = VM::new(config);
        let (out, err) = (Capture::default(), Capture::default());
        vm.set_output(Box::new(out.clone()));
        vm.set_error_output(Box::new(err.clone()));
        (vm, out, err)
    }

    fn run(source: &str) -> (InterpretResult, String, String) {
        let (mut vm, out, err) = vm_with(VmConfig::default());
        let result = vm.interpret("main", source);
        (result, out.text(), err.text())
    }

    #[test]
    fn test_resolve_index() {
        assert_eq!(resolve_index(0.0, 3), Some(0));
        assert_eq!(resolve_index(-1.0, 3), Some(2));
        assert_eq!(resolve_index(3.0, 3), None);
        assert_eq!(resolve_index(-4.0, 3), None);
        assert_eq!(resolve_index(f64::NAN, 3), None);
        assert_eq!(resolve_index(f64::INFINITY, 3), None);
        assert_eq!(resolve_index(f64::NEG_INFINITY, 3), None);
    }

    #[test]
    fn test_upvalue_sees_enclosing_scope() {
        let (result, out, _) = run("var x = 1; { var y = 2; fun f() { return x + y; } print f(); }");
        assert_eq!(result, InterpretResult::Ok);
        assert_eq!(out, "3\n");
    }

    #[test]
    fn test_closed_upvalue_outlives_frame() {
        let source = "
            fun counter() { var n = 0; fun inc() { n = n + 1; return n; } return inc; }
            var a = counter(); var b = counter();
            a(); a();
            print a(); print b();
        ";
        let (_, out, _) = run(source);
        assert_eq!(out, "3\n1\n");
    }

    #[test]
    fn test_arity_error_leaves_stack_alone() {
        let (mut vm, _, _) = vm_with(VmConfig::default());
        assert_eq!(vm.interpret("main", "fun f(a, b = 2) {}"), InterpretResult::Ok);
        let Some(Value::Object(f)) = vm.get_variable("main", "f") else {
            panic!("f is not defined");
        };

        // Caller data below the callee window must come through untouched
        vm.push(Value::Number(99.0));
        vm.push(Value::Object(f));
        let frames = vm.current().frames.len();

        for argc in [0, 3] {
            for _ in 0..argc {
                vm.push(Value::Bool(true));
            }
            let before = vm.stack_len();
            let error = vm.call_closure(f, argc).unwrap_err();
            assert!(error.message.starts_with("Expected"), "{}", error.message);
            assert_eq!(vm.stack_len(), before);
            assert_eq!(vm.current().frames.len(), frames);
            for _ in 0..argc {
                vm.pop();
            }
        }

        assert_eq!(vm.peek(0), Value::Object(f));
        assert_eq!(vm.peek(1), Value::Number(99.0));
    }

    #[test]
    fn test_set_global_requires_declaration() {
        let (result, _, err) = run("undeclared = 1;");
        assert_eq!(result, InterpretResult::RuntimeError);
        assert!(err.starts_with("Undefined variable 'undeclared'."));
    }

    #[test]
    fn test_error_backtrace_names_functions() {
        let (_, _, err) = run("fun inner() { return 1 + nil; }\nfun outer() { inner(); }\nouter();");
        assert_eq!(
            err,
            "Operands must be two numbers or two strings.\n[line 1] in inner()\n[line 2] in outer()\n[line 3] in script\n"
        );
    }

    #[test]
    fn test_stress_gc_keeps_reachable_objects() {
        let config = VmConfig {
            gc_stress: true,
            ..VmConfig::default()
        };
        let (mut vm, out, _) = vm_with(config);
        let source = "
            class Node { init(v) { this.v = v; this.next = nil; } }
            var head = nil;
            for (var i = 0; i < 20; i = i + 1) { var n = Node(i); n.next = head; head = n; }
            var sum = 0;
            while (head != nil) { sum = sum + head.v; head = head.next; }
            print sum;
            print \"a\" + \"b\" + str(1);
        ";
        assert_eq!(vm.interpret("main", source), InterpretResult::Ok);
        assert_eq!(out.text(), "190\nab1\n");
        assert!(vm.gc_stats().collections > 0);
    }

    #[test]
    fn test_collect_frees_unreachable() {
        let (mut vm, _, _) = vm_with(VmConfig::default());
        vm.interpret("main", "var keep = [1, 2]; { var drop = [3, 4]; }");
        vm.collect_garbage();
        let before = vm.gc_stats();
        vm.collect_garbage();
        let after = vm.gc_stats();
        // A second collection has nothing left to free
        assert_eq!(before.live, after.live);

        let module = vm.get_module("main").unwrap();
        let key = vm.heap.find_string("keep", hash_string("keep")).unwrap();
        let keep = vm.heap.module(module).variables.get(key).unwrap();
        assert_eq!(vm.describe(keep), "<array 2>");
    }
}
