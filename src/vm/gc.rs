// Foxely Garbage Collector
// Arena heap with tri-color mark and sweep
//
// Objects live in slots addressed by `ObjRef` and never move. A collection
// marks everything reachable from the VM's roots (gray objects are queued
// on a worklist and blackened by tracing their children), prunes dead
// strings from the intern table, then frees every unmarked slot for reuse.

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::fiber::ObjFiber;
use super::map::ValueMap;
use super::object::*;
use super::table::Table;
use super::value::{ObjRef, Value};
use crate::config::VmConfig;

/// GC statistics for monitoring
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct GcStats {
    /// Number of collections run
    pub collections: usize,
    /// Objects reclaimed over the heap's lifetime
    pub freed: usize,
    /// Objects alive right now
    pub live: usize,
    /// Live count that triggers the next collection
    pub next_gc: usize,
}

/// Marking state borrowed out of the heap while objects are traced
pub struct Marker<'a> {
    marks: &'a mut [bool],
    gray: &'a mut Vec<ObjRef>,
}

impl Marker<'_> {
    /// Idempotent: already-marked objects are not queued again
    pub fn mark_object(&mut self, r: ObjRef) {
        let mark = &mut self.marks[r.index()];
        if !*mark {
            *mark = true;
            self.gray.push(r);
        }
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Object(r) = value {
            self.mark_object(r);
        }
    }

    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key);
            self.mark_value(value);
        }
    }
}

pub struct Heap {
    slots: Vec<Option<Object>>,
    marks: Vec<bool>,
    free: Vec<u32>,
    gray: Vec<ObjRef>,
    /// Intern table: string hash to every string with that hash
    strings: FxHashMap<u32, SmallVec<[ObjRef; 1]>>,
    live: usize,
    next_gc: usize,
    initial_threshold: usize,
    grow_factor: f64,
    stress: bool,
    stats: GcStats,
}

macro_rules! accessors {
    ($($get:ident, $get_mut:ident => $variant:ident($ty:ty);)*) => {
        $(
            pub fn $get(&self, r: ObjRef) -> &$ty {
                match self.get(r) {
                    Object::$variant(inner) => inner,
                    other => panic!("expected {}, found {}", stringify!($variant), other.type_name()),
                }
            }

            pub fn $get_mut(&mut self, r: ObjRef) -> &mut $ty {
                match self.get_mut(r) {
                    Object::$variant(inner) => inner,
                    other => panic!("expected {}, found {}", stringify!($variant), other.type_name()),
                }
            }
        )*
    };
}

impl Heap {
    pub fn new(config: &VmConfig) -> Self {
        let initial_threshold = config.gc_initial_threshold.max(1);
        Self {
            slots: Vec::new(),
            marks: Vec::new(),
            free: Vec::new(),
            gray: Vec::new(),
            strings: FxHashMap::default(),
            live: 0,
            next_gc: initial_threshold,
            initial_threshold,
            grow_factor: config.gc_grow_factor.max(1.0),
            stress: config.gc_stress,
            stats: GcStats {
                next_gc: initial_threshold,
                ..GcStats::default()
            },
        }
    }

    pub fn should_collect(&self) -> bool {
        self.stress || self.live >= self.next_gc
    }

    pub fn live(&self) -> usize {
        self.live
    }

    pub fn stats(&self) -> GcStats {
        GcStats {
            live: self.live,
            ..self.stats
        }
    }

    /// Place an object in a free slot. Strings join the intern table.
    /// Collection is the caller's decision, see `VM::alloc`.
    pub fn insert(&mut self, object: Object) -> ObjRef {
        let hash = match &object {
            Object::String(s) => Some(s.hash),
            _ => None,
        };

        let r = match self.free.pop() {
            Some(index) => {
                self.slots[index as usize] = Some(object);
                ObjRef::new(index as usize)
            }
            None => {
                self.slots.push(Some(object));
                self.marks.push(false);
                ObjRef::new(self.slots.len() - 1)
            }
        };
        self.live += 1;

        if let Some(hash) = hash {
            self.strings.entry(hash).or_default().push(r);
        }
        r
    }

    pub fn contains(&self, r: ObjRef) -> bool {
        matches!(self.slots.get(r.index()), Some(Some(_)))
    }

    pub fn get(&self, r: ObjRef) -> &Object {
        self.slots[r.index()].as_ref().expect("object was freed")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Object {
        self.slots[r.index()].as_mut().expect("object was freed")
    }

    accessors! {
        string, string_mut => String(ObjString);
        function, function_mut => Function(ObjFunction);
        closure, closure_mut => Closure(ObjClosure);
        upvalue, upvalue_mut => Upvalue(ObjUpvalue);
        class, class_mut => Class(ObjClass);
        instance, instance_mut => Instance(ObjInstance);
        array, array_mut => Array(Vec<Value>);
        map, map_mut => Map(ValueMap);
        module, module_mut => Module(ObjModule);
        fiber, fiber_mut => Fiber(ObjFiber);
        lib, lib_mut => Lib(ObjLib);
    }

    /// Contents of a string object
    pub fn str(&self, r: ObjRef) -> &str {
        &self.string(r).chars
    }

    /// The string behind `value`, if it is one
    pub fn as_str(&self, value: Value) -> Option<&str> {
        match value {
            Value::Object(r) => match self.get(r) {
                Object::String(s) => Some(&s.chars),
                _ => None,
            },
            _ => None,
        }
    }

    /// Interned string with these contents, if one exists
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<ObjRef> {
        self.strings
            .get(&hash)?
            .iter()
            .copied()
            .find(|r| self.str(*r) == chars)
    }

    // ==================== Collection ====================

    pub fn marker(&mut self) -> Marker<'_> {
        Marker {
            marks: &mut self.marks[..],
            gray: &mut self.gray,
        }
    }

    pub fn is_marked(&self, r: ObjRef) -> bool {
        self.marks[r.index()]
    }

    /// Blacken gray objects until the worklist is empty
    pub fn trace_references(&mut self) {
        let Heap {
            slots, marks, gray, ..
        } = self;
        while let Some(r) = gray.pop() {
            if let Some(object) = &slots[r.index()] {
                object.trace(&mut Marker {
                    marks: &mut marks[..],
                    gray: &mut *gray,
                });
            }
        }
    }

    /// Drop unmarked strings from the intern table
    fn remove_white(&mut self) {
        let marks = &self.marks;
        self.strings.retain(|_, bucket| {
            bucket.retain(|r| marks[r.index()]);
            !bucket.is_empty()
        });
    }

    /// Free every unmarked object and clear marks. Returns the number freed.
    pub fn sweep(&mut self) -> usize {
        self.remove_white();

        let mut freed = 0;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                continue;
            }
            if self.marks[index] {
                self.marks[index] = false;
            } else {
                *slot = None;
                self.free.push(index as u32);
                freed += 1;
            }
        }

        self.live -= freed;
        self.stats.collections += 1;
        self.stats.freed += freed;

        let grown = (self.live as f64 * self.grow_factor) as usize;
        self.next_gc = grown.max(self.initial_threshold);
        self.stats.next_gc = self.next_gc;
        freed
    }
}
