// Foxely Map storage
// Insertion-ordered associative container keyed by any Value

use std::hash::BuildHasherDefault;

use indexmap::map::Entry;
use indexmap::IndexMap;
use rustc_hash::FxHasher;

use super::value::{ObjRef, Value};

/// Hashable projection of a `Value`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ValueKey {
    Nil,
    Bool(bool),
    Number(u64),
    Object(ObjRef),
}

impl From<Value> for ValueKey {
    fn from(value: Value) -> Self {
        match value {
            Value::Nil => ValueKey::Nil,
            Value::Bool(b) => ValueKey::Bool(b),
            // -0.0 and 0.0 are the same key
            Value::Number(n) if n == 0.0 => ValueKey::Number(0),
            Value::Number(n) => ValueKey::Number(n.to_bits()),
            Value::Object(r) => ValueKey::Object(r),
        }
    }
}

type FxIndexMap<K, V> = IndexMap<K, V, BuildHasherDefault<FxHasher>>;

/// Keys compare like `Value` identity: strings are interned, so two equal
/// strings are the same key, while other objects match only themselves.
#[derive(Debug, Clone, Default)]
pub struct ValueMap {
    entries: FxIndexMap<ValueKey, (Value, Value)>,
}

impl ValueMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: Value) -> Option<Value> {
        self.entries.get(&ValueKey::from(key)).map(|(_, v)| *v)
    }

    pub fn contains(&self, key: Value) -> bool {
        self.entries.contains_key(&ValueKey::from(key))
    }

    /// Insert or overwrite in place. Returns true for a new key.
    pub fn insert(&mut self, key: Value, value: Value) -> bool {
        match self.entries.entry(ValueKey::from(key)) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().1 = value;
                false
            }
            Entry::Vacant(entry) => {
                entry.insert((key, value));
                true
            }
        }
    }

    /// Remove a key, keeping the order of the remaining entries
    pub fn remove(&mut self, key: Value) -> Option<Value> {
        self.entries.shift_remove(&ValueKey::from(key)).map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries.values().copied()
    }

    pub fn keys(&self) -> impl Iterator<Item = Value> + '_ {
        self.entries.values().map(|(k, _)| *k)
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.entries.values().map(|(_, v)| *v)
    }
}
