// Foxely Fibers
// Per-coroutine value stack and call-frame stack

use std::rc::Rc;

use super::gc::Marker;
use super::value::{ObjRef, Value};

pub const FRAMES_MAX: usize = 64;
pub const STACK_MAX: usize = FRAMES_MAX * 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FiberState {
    /// Created but never called
    Fresh,
    /// Yielded, waiting for the next `call`
    Suspended,
    /// Executing, or waiting on a fiber it called
    Running,
    Done,
}

/// One active function invocation
#[derive(Debug, Clone)]
pub struct CallFrame {
    pub closure: ObjRef,
    pub function: ObjRef,
    pub code: Rc<[u8]>,
    pub ip: usize,
    /// Stack index of slot 0: the callee, or the receiver for methods
    pub base: usize,
}

impl CallFrame {
    pub fn new(closure: ObjRef, function: ObjRef, code: Rc<[u8]>, base: usize) -> Self {
        Self {
            closure,
            function,
            code,
            ip: 0,
            base,
        }
    }
}

#[derive(Debug)]
pub struct ObjFiber {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    /// Open upvalues into this stack, ordered by slot, highest last
    pub open_upvalues: Vec<ObjRef>,
    /// Fiber to resume when this one yields or returns
    pub caller: Option<ObjRef>,
    /// Error message once the fiber aborted, nil otherwise
    pub error: Value,
    pub state: FiberState,
}

impl ObjFiber {
    /// A fiber whose first call will invoke `closure`
    pub fn new(closure: Option<ObjRef>) -> Self {
        let mut stack = Vec::with_capacity(256);
        if let Some(closure) = closure {
            stack.push(Value::Object(closure));
        }
        Self {
            stack,
            frames: Vec::with_capacity(FRAMES_MAX),
            open_upvalues: Vec::new(),
            caller: None,
            error: Value::Nil,
            state: FiberState::Fresh,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == FiberState::Done
    }

    /// Drop all execution state, keeping the allocation
    pub fn reset(&mut self) {
        self.stack.clear();
        self.frames.clear();
        self.open_upvalues.clear();
        self.caller = None;
        self.error = Value::Nil;
        self.state = FiberState::Fresh;
    }

    pub fn trace(&self, marker: &mut Marker<'_>) {
        for value in &self.stack {
            marker.mark_value(*value);
        }
        for frame in &self.frames {
            marker.mark_object(frame.closure);
            marker.mark_object(frame.function);
        }
        for upvalue in &self.open_upvalues {
            marker.mark_object(*upvalue);
        }
        if let Some(caller) = self.caller {
            marker.mark_object(caller);
        }
        marker.mark_value(self.error);
    }
}
