//! Open-addressed hash map keyed by hashable values.
//!
//! Linear probing with tombstones. Lookups need the heap to hash and compare
//! string keys, so every operation takes it explicitly.

use crate::gc::Heap;

use super::Var;

/// Smallest non-zero table size.
pub const MIN_CAPACITY: usize = 8;

/// Grow once the table would pass this fill percentage.
pub const MAP_LOAD_PERCENT: usize = 75;

pub const GROW_FACTOR: usize = 2;

#[derive(Debug, Clone, Copy, Default)]
pub enum MapEntry {
    #[default]
    Empty,
    Tombstone,
    Full {
        key: Var,
        value: Var,
        hash: u32,
    },
}

#[derive(Debug, Clone, Default)]
pub struct VarMap {
    entries: Vec<MapEntry>,
    count: usize,
}

impl VarMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn get(&self, heap: &Heap, key: Var) -> Option<Var> {
        let hash = heap.hash_of(key)?;
        match self.find(heap, key, hash) {
            Ok(index) => match self.entries[index] {
                MapEntry::Full { value, .. } => Some(value),
                _ => None,
            },
            Err(_) => None,
        }
    }

    pub fn contains_key(&self, heap: &Heap, key: Var) -> bool {
        self.get(heap, key).is_some()
    }

    /// Insert or overwrite. Returns false (and stores nothing) for an
    /// unhashable key.
    pub fn set(&mut self, heap: &Heap, key: Var, value: Var) -> bool {
        let Some(hash) = heap.hash_of(key) else {
            return false;
        };

        if self.count + 1 > self.capacity() * MAP_LOAD_PERCENT / 100 {
            let capacity = (self.capacity() * GROW_FACTOR).max(MIN_CAPACITY);
            self.resize(capacity);
        }

        match self.find(heap, key, hash) {
            Ok(index) => {
                if let MapEntry::Full { value: slot, .. } = &mut self.entries[index] {
                    *slot = value;
                }
            }
            Err(index) => {
                self.entries[index] = MapEntry::Full { key, value, hash };
                self.count += 1;
            }
        }
        true
    }

    pub fn remove(&mut self, heap: &Heap, key: Var) -> Option<Var> {
        let hash = heap.hash_of(key)?;
        let index = self.find(heap, key, hash).ok()?;
        let MapEntry::Full { value, .. } = self.entries[index] else {
            return None;
        };
        self.entries[index] = MapEntry::Tombstone;
        self.count -= 1;

        if self.count == 0 {
            self.clear();
        } else {
            let shrunk = self.capacity() / (GROW_FACTOR * GROW_FACTOR);
            if self.capacity() > MIN_CAPACITY && shrunk > self.count * 100 / MAP_LOAD_PERCENT {
                self.resize(shrunk.max(MIN_CAPACITY));
            }
        }
        Some(value)
    }

    /// Drop every entry and release the table.
    pub fn clear(&mut self) {
        self.entries = Vec::new();
        self.count = 0;
    }

    /// Live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (Var, Var)> + '_ {
        self.entries.iter().filter_map(|entry| match entry {
            MapEntry::Full { key, value, .. } => Some((*key, *value)),
            _ => None,
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = Var> + '_ {
        self.iter().map(|(key, _)| key)
    }

    /// The first occupied slot at or after `slot`, with its index.
    pub fn next_occupied(&self, slot: usize) -> Option<(usize, Var, Var)> {
        self.entries
            .iter()
            .enumerate()
            .skip(slot)
            .find_map(|(index, entry)| match entry {
                MapEntry::Full { key, value, .. } => Some((index, *key, *value)),
                _ => None,
            })
    }

    /// Locate `key`: `Ok(index)` of its entry, or `Err(index)` of the slot
    /// an insertion should use (the first tombstone seen, else the empty
    /// slot that ended the probe).
    fn find(&self, heap: &Heap, key: Var, hash: u32) -> Result<usize, usize> {
        let capacity = self.capacity();
        if capacity == 0 {
            return Err(0);
        }

        let start = hash as usize % capacity;
        let mut index = start;
        let mut tombstone = None;
        loop {
            match &self.entries[index] {
                MapEntry::Empty => return Err(tombstone.unwrap_or(index)),
                MapEntry::Tombstone => {
                    if tombstone.is_none() {
                        tombstone = Some(index);
                    }
                }
                MapEntry::Full {
                    key: existing,
                    hash: existing_hash,
                    ..
                } => {
                    if *existing_hash == hash && heap.equals(*existing, key) {
                        return Ok(index);
                    }
                }
            }
            index = (index + 1) % capacity;
            if index == start {
                return Err(tombstone.unwrap_or(index));
            }
        }
    }

    fn resize(&mut self, capacity: usize) {
        let old = std::mem::replace(&mut self.entries, vec![MapEntry::Empty; capacity]);
        for entry in old {
            if let MapEntry::Full { hash, .. } = entry {
                let mut index = hash as usize % capacity;
                while !matches!(self.entries[index], MapEntry::Empty) {
                    index = (index + 1) % capacity;
                }
                self.entries[index] = entry;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn heap() -> Heap {
        Heap::new(1 << 20, 1 << 20, 75)
    }

    #[test]
    fn test_set_get_overwrite() {
        let heap = heap();
        let mut map = VarMap::new();
        assert!(map.set(&heap, Var::Number(1.0), Var::Bool(true)));
        assert!(map.set(&heap, Var::Number(1.0), Var::Bool(false)));
        assert_eq!(map.len(), 1);
        assert_eq!(map.get(&heap, Var::Number(1.0)), Some(Var::Bool(false)));
        assert_eq!(map.get(&heap, Var::Number(2.0)), None);
    }

    #[test]
    fn test_grows_past_load_factor() {
        let heap = heap();
        let mut map = VarMap::new();
        for i in 0..6 {
            map.set(&heap, Var::Number(i as f64), Var::Null);
        }
        assert_eq!(map.capacity(), MIN_CAPACITY);
        map.set(&heap, Var::Number(6.0), Var::Null);
        assert_eq!(map.capacity(), MIN_CAPACITY * GROW_FACTOR);
        assert_eq!(map.len(), 7);
    }

    #[test]
    fn test_shrinks_after_removals_and_clears_when_empty() {
        let heap = heap();
        let mut map = VarMap::new();
        for i in 0..40 {
            map.set(&heap, Var::Number(i as f64), Var::Number(i as f64));
        }
        let full = map.capacity();
        for i in 0..38 {
            assert_eq!(
                map.remove(&heap, Var::Number(i as f64)),
                Some(Var::Number(i as f64))
            );
        }
        assert!(map.capacity() < full);
        assert_eq!(map.get(&heap, Var::Number(39.0)), Some(Var::Number(39.0)));

        map.remove(&heap, Var::Number(38.0));
        map.remove(&heap, Var::Number(39.0));
        assert!(map.is_empty());
        assert_eq!(map.capacity(), 0);
    }

    #[test]
    fn test_probe_skips_tombstones() {
        let heap = heap();
        let mut map = VarMap::new();
        for i in 0..5 {
            map.set(&heap, Var::Number(i as f64), Var::Null);
        }
        map.remove(&heap, Var::Number(2.0));
        for i in [0, 1, 3, 4] {
            assert!(map.contains_key(&heap, Var::Number(i as f64)));
        }
        assert_eq!(map.keys().count(), 4);
    }
}
