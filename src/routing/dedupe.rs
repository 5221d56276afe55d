//! Bounded memory of what a peer has already seen.

use std::collections::VecDeque;
use std::hash::Hash;

use hashbrown::HashMap;

/// Map forgetting its oldest key once `capacity` keys are held.
#[derive(Debug, Clone)]
pub struct BoundedMap<K, V> {
    capacity: usize,
    order: VecDeque<K>,
    entries: HashMap<K, V>,
}

impl<K: Hash + Eq + Clone, V> BoundedMap<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            entries: HashMap::new(),
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.entries.get(key)
    }

    /// Value for `key`, inserting `default()` first if the key is new.
    pub fn entry_or_insert_with(&mut self, key: K, default: impl FnOnce() -> V) -> &mut V {
        if !self.entries.contains_key(&key) {
            self.evict();
            self.order.push_back(key.clone());
        }
        self.entries.entry(key).or_insert_with(default)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn evict(&mut self) {
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
    }
}

/// Set forgetting its oldest member once `capacity` members are held.
#[derive(Debug, Clone)]
pub struct BoundedSet<T> {
    inner: BoundedMap<T, ()>,
}

impl<T: Hash + Eq + Clone> BoundedSet<T> {
    pub fn new(capacity: usize) -> Self {
        Self { inner: BoundedMap::new(capacity) }
    }

    /// Returns `true` if the value was not already present.
    pub fn insert(&mut self, value: T) -> bool {
        if self.contains(&value) {
            return false;
        }
        self.inner.entry_or_insert_with(value, || ());
        true
    }

    pub fn contains(&self, value: &T) -> bool {
        self.inner.get(value).is_some()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reports_duplicates() {
        let mut seen = BoundedSet::new(8);
        assert!(seen.insert(1));
        assert!(!seen.insert(1));
        assert!(seen.insert(2));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_oldest_is_evicted_first() {
        let mut seen = BoundedSet::new(2);
        seen.insert("a");
        seen.insert("b");
        seen.insert("c");
        assert!(!seen.contains(&"a"));
        assert!(seen.contains(&"b") && seen.contains(&"c"));
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_map_entry_keeps_value() {
        let mut masks: BoundedMap<u32, u32> = BoundedMap::new(4);
        *masks.entry_or_insert_with(7, || 0) |= 0b01;
        *masks.entry_or_insert_with(7, || 0) |= 0b10;
        assert_eq!(masks.get(&7), Some(&0b11));
    }
}
