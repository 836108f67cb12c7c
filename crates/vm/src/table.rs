//! Open-addressed hash table keyed by interned strings.
//!
//! One table type backs globals, instance fields, class methods, and the
//! string-intern set. Linear probing with tombstone deletion; capacity is
//! always a power of two and grows at 3/4 load. Because keys are interned,
//! equality during probing is plain index identity.
//!
//! Mutating entry points take the key's cached hash as an argument, so a
//! caller holding a mutable borrow of a heap object never needs a second
//! heap borrow to insert.

use crate::gc::{GcPtr, Heap};
use crate::value::{StrObj, Value};

#[derive(Clone, Copy)]
struct Entry {
    key: Option<GcPtr<StrObj>>,
    hash: u32,
    value: Value,
}

impl Entry {
    const EMPTY: Entry = Entry {
        key: None,
        hash: 0,
        value: Value::Null,
    };

    // A tombstone is a keyless entry with a non-null value, left behind by
    // deletion so probe sequences stay unbroken.
    fn is_tombstone(&self) -> bool {
        self.key.is_none() && !matches!(self.value, Value::Null)
    }
}

#[derive(Clone)]
pub struct Table {
    // Live entries plus tombstones.
    count: usize,
    entries: Vec<Entry>,
}

impl Table {
    pub fn new() -> Table {
        Table {
            count: 0,
            entries: Vec::new(),
        }
    }

    /// Number of live key/value pairs.
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.key.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Approximate backing-store size, for the collector's byte
    /// accounting.
    pub fn byte_size(&self) -> usize {
        self.entries.capacity() * std::mem::size_of::<Entry>()
    }

    /// The slot `key` lives in, or the slot it would be inserted into: the
    /// first tombstone on the probe sequence if one was passed, otherwise
    /// the terminating empty slot.
    fn find_slot(entries: &[Entry], key: GcPtr<StrObj>, hash: u32) -> usize {
        let mask = entries.len() - 1;
        let mut index = hash as usize & mask;
        let mut tombstone = None;
        loop {
            let entry = &entries[index];
            match entry.key {
                Some(k) if k == key => return index,
                Some(_) => {}
                None => {
                    if entry.is_tombstone() {
                        if tombstone.is_none() {
                            tombstone = Some(index);
                        }
                    } else {
                        return tombstone.unwrap_or(index);
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, key: GcPtr<StrObj>, hash: u32) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let entry = &self.entries[Self::find_slot(&self.entries, key, hash)];
        entry.key.map(|_| entry.value)
    }

    /// Insert or overwrite. Returns true when the key was not present.
    pub fn set(&mut self, key: GcPtr<StrObj>, hash: u32, value: Value) -> bool {
        if (self.count + 1) * 4 > self.entries.len() * 3 {
            self.grow();
        }
        let index = Self::find_slot(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();
        // A fresh slot raises the load; reusing a tombstone does not.
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }
        *entry = Entry {
            key: Some(key),
            hash,
            value,
        };
        is_new
    }

    /// Remove a key, leaving a tombstone. Returns true when the key was
    /// present.
    pub fn delete(&mut self, key: GcPtr<StrObj>, hash: u32) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let index = Self::find_slot(&self.entries, key, hash);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }
        *entry = Entry {
            key: None,
            hash: 0,
            value: Value::Bool(true),
        };
        true
    }

    fn grow(&mut self) {
        let capacity = std::cmp::max(8, self.entries.len() * 2);
        let old = std::mem::replace(&mut self.entries, vec![Entry::EMPTY; capacity]);
        // Tombstones are dropped by the rebuild, so recount.
        self.count = 0;
        for entry in old {
            if let Some(key) = entry.key {
                let index = Self::find_slot(&self.entries, key, entry.hash);
                self.entries[index] = entry;
                self.count += 1;
            }
        }
    }

    /// Copy every entry of `other` into `self`. Used for method
    /// inheritance.
    pub fn add_all(&mut self, other: &Table) {
        for (key, hash, value) in other.iter() {
            self.set(key, hash, value);
        }
    }

    /// By-bytes lookup used by string interning: find an existing key with
    /// the same contents as `needle`.
    pub fn find_string(&self, heap: &Heap, needle: &str, hash: u32) -> Option<GcPtr<StrObj>> {
        if self.entries.is_empty() {
            return None;
        }
        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;
        loop {
            let entry = &self.entries[index];
            match entry.key {
                Some(key) => {
                    if entry.hash == hash && heap.get_string(key).chars == needle {
                        return Some(key);
                    }
                }
                None => {
                    if !entry.is_tombstone() {
                        return None;
                    }
                }
            }
            index = (index + 1) & mask;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (GcPtr<StrObj>, u32, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|entry| entry.key.map(|key| (key, entry.hash, entry.value)))
    }

    /// Drop every entry whose key did not survive marking. Run on the
    /// intern set between the mark and sweep phases, so the table never
    /// holds a freed string.
    pub fn remove_unmarked(&mut self, heap: &Heap) {
        for entry in &mut self.entries {
            if let Some(key) = entry.key {
                if !heap.is_marked(key.as_raw()) {
                    *entry = Entry {
                        key: None,
                        hash: 0,
                        value: Value::Bool(true),
                    };
                }
            }
        }
    }
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::hash_str;

    fn key(heap: &mut Heap, chars: &str) -> (GcPtr<StrObj>, u32) {
        let hash = hash_str(chars);
        let ptr = heap.alloc_string(StrObj {
            chars: chars.to_string(),
            hash,
        });
        (ptr, hash)
    }

    #[test]
    fn set_get_roundtrip() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let (k, h) = key(&mut heap, "answer");

        assert!(table.set(k, h, Value::Number(42.0)));
        assert_eq!(table.get(k, h), Some(Value::Number(42.0)));

        // Overwriting reports not-new.
        assert!(!table.set(k, h, Value::Number(43.0)));
        assert_eq!(table.get(k, h), Some(Value::Number(43.0)));
    }

    #[test]
    fn lookup_is_identity_not_bytes() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let (k1, h) = key(&mut heap, "twin");
        let (k2, _) = key(&mut heap, "twin");

        table.set(k1, h, Value::Bool(true));
        // Same bytes, different identity: a miss. Interning is what makes
        // this situation impossible in the VM proper.
        assert_eq!(table.get(k2, h), None);
    }

    #[test]
    fn survives_growth() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let names: Vec<String> = (0..100).map(|i| format!("key{i}")).collect();
        let mut keys = Vec::new();
        for (i, name) in names.iter().enumerate() {
            let (k, h) = key(&mut heap, name);
            table.set(k, h, Value::Number(i as f64));
            keys.push((k, h));
        }
        for (i, (k, h)) in keys.iter().enumerate() {
            assert_eq!(table.get(*k, *h), Some(Value::Number(i as f64)));
        }
        assert_eq!(table.len(), 100);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut heap = Heap::new();
        let mut forward = Table::new();
        let mut backward = Table::new();
        let keys: Vec<(GcPtr<StrObj>, u32)> =
            (0..32).map(|i| key(&mut heap, &format!("k{i}"))).collect();

        for (i, (k, h)) in keys.iter().enumerate() {
            forward.set(*k, *h, Value::Number(i as f64));
        }
        for (i, (k, h)) in keys.iter().enumerate().rev() {
            backward.set(*k, *h, Value::Number(i as f64));
        }
        for (i, (k, h)) in keys.iter().enumerate() {
            assert_eq!(forward.get(*k, *h), Some(Value::Number(i as f64)));
            assert_eq!(backward.get(*k, *h), Some(Value::Number(i as f64)));
        }
    }

    #[test]
    fn delete_leaves_probe_sequences_intact() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let keys: Vec<(GcPtr<StrObj>, u32)> =
            (0..16).map(|i| key(&mut heap, &format!("k{i}"))).collect();
        for (i, (k, h)) in keys.iter().enumerate() {
            table.set(*k, *h, Value::Number(i as f64));
        }

        // Delete half; the rest must stay reachable even where probe
        // chains ran through the deleted slots.
        for (k, h) in keys.iter().step_by(2) {
            assert!(table.delete(*k, *h));
        }
        for (i, (k, h)) in keys.iter().enumerate() {
            let expected = if i % 2 == 0 {
                None
            } else {
                Some(Value::Number(i as f64))
            };
            assert_eq!(table.get(*k, *h), expected);
        }
    }

    #[test]
    fn delete_then_reinsert_matches_straight_insert() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let (k, h) = key(&mut heap, "phoenix");

        table.set(k, h, Value::Number(1.0));
        assert!(table.delete(k, h));
        assert_eq!(table.get(k, h), None);
        assert!(table.set(k, h, Value::Number(2.0)));
        assert_eq!(table.get(k, h), Some(Value::Number(2.0)));
    }

    #[test]
    fn delete_missing_is_false() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let (k, h) = key(&mut heap, "ghost");
        assert!(!table.delete(k, h));
        table.set(k, h, Value::Null);
        let (other, oh) = key(&mut heap, "other");
        assert!(!table.delete(other, oh));
    }

    #[test]
    fn find_string_compares_bytes() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let (k, h) = key(&mut heap, "interned");
        table.set(k, h, Value::Null);

        assert_eq!(table.find_string(&heap, "interned", h), Some(k));
        assert_eq!(
            table.find_string(&heap, "missing", hash_str("missing")),
            None
        );
    }

    #[test]
    fn add_all_copies_entries() {
        let mut heap = Heap::new();
        let mut base = Table::new();
        let mut derived = Table::new();
        let (k1, h1) = key(&mut heap, "greet");
        let (k2, h2) = key(&mut heap, "leave");
        base.set(k1, h1, Value::Number(1.0));
        base.set(k2, h2, Value::Number(2.0));

        derived.add_all(&base);
        assert_eq!(derived.get(k1, h1), Some(Value::Number(1.0)));
        assert_eq!(derived.get(k2, h2), Some(Value::Number(2.0)));
    }

    #[test]
    fn remove_unmarked_drops_dead_keys() {
        let mut heap = Heap::new();
        let mut table = Table::new();
        let (keep, kh) = key(&mut heap, "keep");
        let (lose, lh) = key(&mut heap, "lose");
        table.set(keep, kh, Value::Null);
        table.set(lose, lh, Value::Null);

        heap.mark_raw(keep.as_raw());
        table.remove_unmarked(&heap);

        assert_eq!(table.get(keep, kh), Some(Value::Null));
        assert_eq!(table.get(lose, lh), None);
    }
}
