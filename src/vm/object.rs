// Foxely Heap Objects
// Every object variant the collector owns, and how each one is traced

use std::any::Any;
use std::fmt;
use std::rc::Rc;

use super::fiber::ObjFiber;
use super::gc::Marker;
use super::map::ValueMap;
use super::table::Table;
use super::value::{ObjRef, Value};
use super::VM;
use crate::compiler::UpvalueInfo;
use crate::error::Span;

/// Host function. Receives the callee slot (the receiver for methods) and
/// the arguments above it; returns the call's single result.
pub type NativeFn = fn(&mut VM, Value, &[Value]) -> Result<Value, String>;

#[derive(Debug)]
pub struct ObjString {
    pub chars: String,
    pub hash: u32,
}

/// FNV-1a, 32 bit
pub fn hash_string(s: &str) -> u32 {
    let mut hash: u32 = 2_166_136_261;
    for byte in s.bytes() {
        hash ^= byte as u32;
        hash = hash.wrapping_mul(16_777_619);
    }
    hash
}

impl ObjString {
    pub fn new(chars: impl Into<String>) -> Self {
        let chars = chars.into();
        let hash = hash_string(&chars);
        Self { chars, hash }
    }
}

#[derive(Debug)]
pub struct ObjFunction {
    /// `None` for top-level script code
    pub name: Option<ObjRef>,
    pub min_arity: usize,
    pub max_arity: usize,
    pub is_variadic: bool,
    pub upvalues: Vec<UpvalueInfo>,
    /// Shared with every frame running this function
    pub code: Rc<[u8]>,
    pub spans: Vec<Span>,
    pub constants: Vec<Value>,
    /// Module whose globals this function reads and writes
    pub module: ObjRef,
}

impl ObjFunction {
    pub fn line_at(&self, offset: usize) -> usize {
        self.spans.get(offset).copied().unwrap_or_default().start.line
    }
}

#[derive(Debug)]
pub struct ObjClosure {
    pub function: ObjRef,
    pub upvalues: Vec<ObjRef>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UpvalueState {
    /// Still lives in `fiber`'s stack at `slot`
    Open { fiber: ObjRef, slot: usize },
    Closed(Value),
}

#[derive(Debug)]
pub struct ObjUpvalue {
    pub state: UpvalueState,
}

#[derive(Debug)]
pub struct ObjClass {
    pub name: ObjRef,
    pub methods: Table,
    pub operators: Table,
    pub getters: Table,
    pub setters: Table,
    pub superclass: Option<ObjRef>,
    /// Depth in the inheritance chain, 0 for a root class
    pub derived_count: u32,
}

impl ObjClass {
    pub fn new(name: ObjRef) -> Self {
        Self {
            name,
            methods: Table::new(),
            operators: Table::new(),
            getters: Table::new(),
            setters: Table::new(),
            superclass: None,
            derived_count: 0,
        }
    }
}

pub struct ObjInstance {
    pub class: ObjRef,
    pub fields: Table,
    /// Host data for instances created through the embedding API
    pub foreign: Option<Box<dyn Any>>,
}

impl ObjInstance {
    pub fn new(class: ObjRef) -> Self {
        Self {
            class,
            fields: Table::new(),
            foreign: None,
        }
    }

    /// User types route property access through their class's getters and setters
    pub fn is_user_type(&self) -> bool {
        self.foreign.is_some()
    }
}

impl fmt::Debug for ObjInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjInstance")
            .field("class", &self.class)
            .field("fields", &self.fields.len())
            .field("user_type", &self.is_user_type())
            .finish()
    }
}

#[derive(Debug)]
pub struct ObjBoundMethod {
    pub receiver: Value,
    pub method: Value,
}

pub struct ObjNative {
    pub name: String,
    pub function: NativeFn,
}

impl fmt::Debug for ObjNative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native {}>", self.name)
    }
}

#[derive(Debug)]
pub struct ObjModule {
    pub name: ObjRef,
    pub variables: Table,
}

/// A named table of natives, e.g. the `Fiber` library
#[derive(Debug)]
pub struct ObjLib {
    pub name: ObjRef,
    pub methods: Table,
}

#[derive(Debug)]
pub enum Object {
    String(ObjString),
    Function(ObjFunction),
    Closure(ObjClosure),
    Upvalue(ObjUpvalue),
    Class(ObjClass),
    Instance(ObjInstance),
    BoundMethod(ObjBoundMethod),
    Native(ObjNative),
    Array(Vec<Value>),
    Map(ValueMap),
    Module(ObjModule),
    Fiber(ObjFiber),
    Lib(ObjLib),
    /// Value pinned by host code
    Handle(Value),
}

impl Object {
    pub fn type_name(&self) -> &'static str {
        match self {
            Object::String(_) => "string",
            Object::Function(_) | Object::Closure(_) | Object::BoundMethod(_) | Object::Native(_) => "function",
            Object::Upvalue(_) => "upvalue",
            Object::Class(_) => "class",
            Object::Instance(_) => "instance",
            Object::Array(_) => "array",
            Object::Map(_) => "map",
            Object::Module(_) => "module",
            Object::Fiber(_) => "fiber",
            Object::Lib(_) => "lib",
            Object::Handle(_) => "handle",
        }
    }

    /// Mark every object this one references directly
    pub fn trace(&self, marker: &mut Marker<'_>) {
        match self {
            Object::String(_) | Object::Native(_) => {}
            Object::Function(function) => {
                if let Some(name) = function.name {
                    marker.mark_object(name);
                }
                marker.mark_object(function.module);
                for constant in &function.constants {
                    marker.mark_value(*constant);
                }
            }
            Object::Closure(closure) => {
                marker.mark_object(closure.function);
                for upvalue in &closure.upvalues {
                    marker.mark_object(*upvalue);
                }
            }
            Object::Upvalue(upvalue) => match upvalue.state {
                // The fiber owns the slot, so it has to outlive the upvalue
                UpvalueState::Open { fiber, .. } => marker.mark_object(fiber),
                UpvalueState::Closed(value) => marker.mark_value(value),
            },
            Object::Class(class) => {
                marker.mark_object(class.name);
                marker.mark_table(&class.methods);
                marker.mark_table(&class.operators);
                marker.mark_table(&class.getters);
                marker.mark_table(&class.setters);
                if let Some(superclass) = class.superclass {
                    marker.mark_object(superclass);
                }
            }
            Object::Instance(instance) => {
                marker.mark_object(instance.class);
                marker.mark_table(&instance.fields);
            }
            Object::BoundMethod(bound) => {
                marker.mark_value(bound.receiver);
                marker.mark_value(bound.method);
            }
            Object::Array(values) => {
                for value in values {
                    marker.mark_value(*value);
                }
            }
            Object::Map(map) => {
                for (key, value) in map.iter() {
                    marker.mark_value(key);
                    marker.mark_value(value);
                }
            }
            Object::Module(module) => {
                marker.mark_object(module.name);
                marker.mark_table(&module.variables);
            }
            Object::Fiber(fiber) => fiber.trace(marker),
            Object::Lib(lib) => {
                marker.mark_object(lib.name);
                marker.mark_table(&lib.methods);
            }
            Object::Handle(value) => marker.mark_value(*value),
        }
    }
}
