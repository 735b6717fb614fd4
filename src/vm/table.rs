// Foxely Table
// Open-addressed hash table keyed by interned strings

use super::value::{ObjRef, Value};

const MAX_LOAD: f64 = 0.75;
const MIN_CAPACITY: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Entry {
    Empty,
    Tombstone,
    Occupied(ObjRef, Value),
}

/// String-keyed table used for globals, fields and method tables.
///
/// Keys are interned string handles, so identity is equality and the
/// handle itself is hashed. Linear probing with tombstones; the capacity
/// doubles once occupied slots plus tombstones pass 75%.
#[derive(Debug, Clone, Default)]
pub struct Table {
    entries: Vec<Entry>,
    /// Live entries plus tombstones
    used: usize,
    len: usize,
}

fn hash_key(key: ObjRef) -> usize {
    let mut x = key.index() as u32;
    x ^= x >> 16;
    x = x.wrapping_mul(0x7feb_352d);
    x ^= x >> 15;
    x = x.wrapping_mul(0x846c_a68b);
    x ^= x >> 16;
    x as usize
}

impl Table {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Slot holding `key`, or the slot an insert of `key` should use
    fn find_slot(entries: &[Entry], key: ObjRef) -> usize {
        let mask = entries.len() - 1;
        let mut index = hash_key(key) & mask;
        let mut tombstone = None;

        loop {
            match entries[index] {
                Entry::Empty => return tombstone.unwrap_or(index),
                Entry::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                Entry::Occupied(k, _) if k == key => return index,
                Entry::Occupied(..) => {}
            }
            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, key: ObjRef) -> Option<Value> {
        if self.len == 0 {
            return None;
        }
        match self.entries[Self::find_slot(&self.entries, key)] {
            Entry::Occupied(_, value) => Some(value),
            _ => None,
        }
    }

    pub fn contains(&self, key: ObjRef) -> bool {
        self.get(key).is_some()
    }

    /// Insert or overwrite. Returns true when the key was not present.
    pub fn set(&mut self, key: ObjRef, value: Value) -> bool {
        if (self.used + 1) as f64 > self.entries.len() as f64 * MAX_LOAD {
            let capacity = (self.entries.len() * 2).max(MIN_CAPACITY);
            self.grow(capacity);
        }

        let index = Self::find_slot(&self.entries, key);
        let is_new = match self.entries[index] {
            Entry::Empty => {
                self.used += 1;
                true
            }
            Entry::Tombstone => true,
            Entry::Occupied(..) => false,
        };
        if is_new {
            self.len += 1;
        }
        self.entries[index] = Entry::Occupied(key, value);
        is_new
    }

    /// Remove `key`, leaving a tombstone so probe chains stay intact
    pub fn delete(&mut self, key: ObjRef) -> bool {
        if self.len == 0 {
            return false;
        }
        let index = Self::find_slot(&self.entries, key);
        match self.entries[index] {
            Entry::Occupied(..) => {
                self.entries[index] = Entry::Tombstone;
                self.len -= 1;
                true
            }
            _ => false,
        }
    }

    /// Copy every entry of `other` into this table
    pub fn add_all(&mut self, other: &Table) {
        for (key, value) in other.iter() {
            self.set(key, value);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (ObjRef, Value)> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            Entry::Occupied(key, value) => Some((*key, *value)),
            _ => None,
        })
    }

    fn grow(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![Entry::Empty; capacity]);
        self.used = 0;
        self.len = 0;
        for entry in old {
            if let Entry::Occupied(key, value) = entry {
                let index = Self::find_slot(&self.entries, key);
                self.entries[index] = Entry::Occupied(key, value);
                self.used += 1;
                self.len += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(i: usize) -> ObjRef {
        ObjRef::new(i)
    }

    #[test]
    fn test_set_get_overwrite() {
        let mut table = Table::new();
        assert!(table.set(key(1), Value::Number(1.0)));
        assert!(!table.set(key(1), Value::Number(2.0)));
        assert_eq!(table.get(key(1)), Some(Value::Number(2.0)));
        assert_eq!(table.get(key(2)), None);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_growth_preserves_entries() {
        let mut table = Table::new();
        for i in 0..6 {
            table.set(key(i), Value::Number(i as f64));
        }
        assert_eq!(table.capacity(), 8);

        // The seventh key crosses 0.75 * 8
        table.set(key(6), Value::Number(6.0));
        assert_eq!(table.capacity(), 16);

        for i in 0..100 {
            table.set(key(i), Value::Number(i as f64));
        }
        for i in 0..100 {
            assert_eq!(table.get(key(i)), Some(Value::Number(i as f64)));
        }
        assert_eq!(table.len(), 100);
    }

    #[test]
    fn test_delete_reuses_slot() {
        let mut table = Table::new();
        table.set(key(1), Value::Bool(true));
        table.set(key(2), Value::Bool(true));
        assert!(table.delete(key(1)));
        assert!(!table.delete(key(1)));
        assert_eq!(table.get(key(1)), None);
        assert_eq!(table.get(key(2)), Some(Value::Bool(true)));

        let used = table.used;
        assert!(table.set(key(1), Value::Nil));
        assert_eq!(table.used, used);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_add_all() {
        let mut a = Table::new();
        let mut b = Table::new();
        a.set(key(1), Value::Number(1.0));
        b.set(key(1), Value::Number(9.0));
        b.set(key(2), Value::Number(2.0));
        a.add_all(&b);
        assert_eq!(a.get(key(1)), Some(Value::Number(9.0)));
        assert_eq!(a.iter().count(), 2);
    }
}
