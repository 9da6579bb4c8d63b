use std::collections::{BTreeMap, VecDeque};

/// Bounded, duplicate-free ring of candidate values.
///
/// Adding a value that is already present moves it to the most recent slot;
/// adding to a full ring evicts the oldest value.
#[derive(Debug, Clone)]
pub struct CircularSet<V> {
    values: VecDeque<V>,
    capacity: usize,
}

impl<V: PartialEq + Clone> CircularSet<V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            values: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn with_values<I: IntoIterator<Item = V>>(capacity: usize, values: I) -> Self {
        let mut set = Self::new(capacity);
        for value in values {
            set.add(value);
        }
        set
    }

    pub fn add(&mut self, value: V) {
        self.discard(&value);
        if self.values.len() == self.capacity {
            self.values.pop_front();
        }
        self.values.push_back(value);
    }

    /// Most recent value; the ring then rotates so repeated calls cycle
    /// through every entry.
    pub fn head_and_rotate(&mut self) -> Option<V> {
        let value = self.values.back()?.clone();
        self.values.rotate_right(1);
        Some(value)
    }

    pub fn discard(&mut self, value: &V) {
        if let Some(pos) = self.values.iter().position(|v| v == value) {
            self.values.remove(pos);
        }
    }

    pub fn contains(&self, value: &V) -> bool {
        self.values.contains(value)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &V> {
        self.values.iter()
    }
}

/// Keyed family of rings. A key whose ring runs empty is dropped, so
/// `contains_key` means "has at least one candidate".
#[derive(Debug, Clone)]
pub struct PoolMap<K, V> {
    pools: BTreeMap<K, CircularSet<V>>,
    capacity: usize,
}

impl<K: Ord + Clone, V: PartialEq + Clone> PoolMap<K, V> {
    pub fn new(capacity: usize) -> Self {
        Self {
            pools: BTreeMap::new(),
            capacity,
        }
    }

    pub fn add(&mut self, key: K, value: V) {
        let capacity = self.capacity;
        self.pools
            .entry(key)
            .or_insert_with(|| CircularSet::new(capacity))
            .add(value);
    }

    pub fn remove(&mut self, key: &K, value: &V) {
        if let Some(pool) = self.pools.get_mut(key) {
            pool.discard(value);
            if pool.is_empty() {
                self.pools.remove(key);
            }
        }
    }

    pub fn get_random(&mut self, key: &K) -> Option<V> {
        self.pools.get_mut(key)?.head_and_rotate()
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.pools.contains_key(key)
    }

    pub fn get(&self, key: &K) -> Option<&CircularSet<V>> {
        self.pools.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.pools.keys()
    }
}
