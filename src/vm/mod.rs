// Foxely Virtual Machine Module

pub mod api;
pub mod fiber;
pub mod gc;
pub mod map;
pub mod object;
pub mod table;
pub mod value;
#[allow(clippy::module_inception)]
pub mod vm;

pub use api::{CallHandle, Callable, Handle};
pub use fiber::{CallFrame, FiberState, ObjFiber, FRAMES_MAX, STACK_MAX};
pub use gc::{GcStats, Heap};
pub use map::ValueMap;
pub use object::{hash_string, NativeFn, Object};
pub use table::Table;
pub use value::{format_number, ObjRef, Value};
pub use vm::{InterpretResult, MethodTable, CORE_MODULE, VM};
