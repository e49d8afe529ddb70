use crate::util::lock;
use anyhow::{ensure, Result};
use bevy::{
    log::error,
    utils::{default, HashMap},
};
use std::{
    collections::BTreeMap,
    hash::Hash,
    sync::{Arc, Mutex, RwLock},
};

struct CacheEntry<V> {
    value: V,
    size: usize,
    last_used: u64,
}

/// A bounded least-recently-used cache, where each entry declares its own size.
///
/// When an insertion would exceed the capacity, the least recently used entries are evicted
/// until the used capacity falls to the low water mark and the new entry fits.
/// Evicting down to the low water mark amortizes the eviction cost over many insertions.
pub struct LruCache<K, V> {
    entries: HashMap<K, CacheEntry<V>>,
    usage: BTreeMap<u64, K>,
    clock: u64,
    capacity: usize,
    low_water: usize,
    used_capacity: usize,
}

impl<K: Clone + Eq + Hash, V> LruCache<K, V> {
    /// # Panics
    /// Panics if the capacity is zero or the low water mark exceeds the capacity.
    pub fn new(capacity: usize, low_water: usize) -> Self {
        assert!(capacity > 0, "Cache capacity must be positive.");
        assert!(
            low_water <= capacity,
            "Low water mark {low_water} exceeds the capacity {capacity}."
        );

        Self {
            entries: default(),
            usage: default(),
            clock: 0,
            capacity,
            low_water,
            used_capacity: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn low_water(&self) -> usize {
        self.low_water
    }

    pub fn used_capacity(&self) -> usize {
        self.used_capacity
    }

    pub fn free_capacity(&self) -> usize {
        self.capacity - self.used_capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts the entry and returns every entry that left the cache because of it.
    ///
    /// This includes a replaced entry with the same key and all evicted entries.
    /// An entry larger than the whole capacity is not inserted and returned as well.
    pub fn put(&mut self, key: K, value: V, size: usize) -> Vec<(K, V)> {
        let mut removed = Vec::new();

        if let Some(previous) = self.remove(&key) {
            removed.push((key.clone(), previous));
        }

        if size > self.capacity {
            removed.push((key, value));
            return removed;
        }

        if self.used_capacity + size > self.capacity {
            self.make_space(size, &mut removed);
        }

        let last_used = self.tick();
        self.usage.insert(last_used, key.clone());
        self.entries.insert(
            key,
            CacheEntry {
                value,
                size,
                last_used,
            },
        );
        self.used_capacity += size;

        removed
    }

    /// Returns the value and marks it as most recently used.
    pub fn get(&mut self, key: &K) -> Option<&V> {
        self.touch(key);
        self.entries.get(key).map(|entry| &entry.value)
    }

    /// Returns the value and marks it as most recently used.
    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        self.touch(key);
        self.entries.get_mut(key).map(|entry| &mut entry.value)
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;

        self.usage.remove(&entry.last_used);
        self.used_capacity -= entry.size;

        Some(entry.value)
    }

    pub fn clear(&mut self) -> Vec<(K, V)> {
        self.usage.clear();
        self.used_capacity = 0;
        self.entries
            .drain()
            .map(|(key, entry)| (key, entry.value))
            .collect()
    }

    /// Changes the capacity and low water mark.
    /// If the cache is now over capacity, entries are evicted down to the new low water mark.
    ///
    /// # Panics
    /// Panics if the capacity is zero or the low water mark exceeds the capacity.
    pub fn set_capacity(&mut self, capacity: usize, low_water: usize) -> Vec<(K, V)> {
        assert!(capacity > 0, "Cache capacity must be positive.");
        assert!(
            low_water <= capacity,
            "Low water mark {low_water} exceeds the capacity {capacity}."
        );

        self.capacity = capacity;
        self.low_water = low_water;

        let mut removed = Vec::new();

        if self.used_capacity > self.capacity {
            self.make_space(0, &mut removed);
        }

        removed
    }

    fn make_space(&mut self, size: usize, removed: &mut Vec<(K, V)>) {
        while self.used_capacity > self.low_water || self.capacity - self.used_capacity < size {
            let Some((_, key)) = self.usage.pop_first() else {
                break;
            };

            if let Some(entry) = self.entries.remove(&key) {
                self.used_capacity -= entry.size;
                removed.push((key, entry.value));
            }
        }
    }

    fn touch(&mut self, key: &K) {
        let clock = self.clock + 1;

        if let Some(entry) = self.entries.get_mut(key) {
            self.clock = clock;
            if let Some(key) = self.usage.remove(&entry.last_used) {
                self.usage.insert(clock, key);
            }
            entry.last_used = clock;
        }
    }

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// Notified about every entry leaving a [`MemoryCache`], so that owners can release resources.
pub trait CacheListener<K, V>: Send + Sync {
    fn entry_removed(&self, key: &K, value: &V) -> Result<()>;
}

impl<K, V, F> CacheListener<K, V> for F
where
    F: Fn(&K, &V) -> Result<()> + Send + Sync,
{
    fn entry_removed(&self, key: &K, value: &V) -> Result<()> {
        self(key, value)
    }
}

/// Identifies a listener registered with a [`MemoryCache`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A thread safe [`LruCache`] with removal listeners.
///
/// The cache is shared between the render thread and worker tasks and serializes all access internally.
/// Listeners run after the internal lock is released. A failing listener is logged
/// and neither stops the remaining listeners nor the eviction.
pub struct MemoryCache<K, V> {
    entries: Mutex<LruCache<K, V>>,
    listeners: RwLock<Vec<(ListenerId, Arc<dyn CacheListener<K, V>>)>>,
    next_listener: Mutex<u64>,
}

impl<K: Clone + Eq + Hash, V: Clone> MemoryCache<K, V> {
    /// # Panics
    /// Panics if the capacity is zero or the low water mark exceeds the capacity.
    pub fn new(capacity: usize, low_water: usize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity, low_water)),
            listeners: default(),
            next_listener: Mutex::new(0),
        }
    }

    /// Inserts the entry, listeners learn about every entry it replaced or evicted.
    ///
    /// # Errors
    /// Fails if the entry is larger than the capacity of the cache. The entry is not inserted then
    /// and handed to the listeners like an evicted one.
    pub fn put(&self, key: K, value: V, size: usize) -> Result<()> {
        let (removed, capacity) = {
            let mut entries = lock(&self.entries);
            let capacity = entries.capacity();
            (entries.put(key, value, size), capacity)
        };

        self.notify(removed);

        ensure!(
            size <= capacity,
            "An entry of {size} bytes exceeds the cache capacity of {capacity} bytes."
        );

        Ok(())
    }

    /// Returns a clone of the value and marks it as most recently used.
    pub fn get(&self, key: &K) -> Option<V> {
        lock(&self.entries).get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        lock(&self.entries).contains(key)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let value = lock(&self.entries).remove(key)?;
        self.notify(vec![(key.clone(), value.clone())]);
        Some(value)
    }

    pub fn clear(&self) {
        let removed = lock(&self.entries).clear();
        self.notify(removed);
    }

    pub fn set_capacity(&self, capacity: usize, low_water: usize) {
        let removed = lock(&self.entries).set_capacity(capacity, low_water);
        self.notify(removed);
    }

    pub fn capacity(&self) -> usize {
        lock(&self.entries).capacity()
    }

    pub fn low_water(&self) -> usize {
        lock(&self.entries).low_water()
    }

    pub fn used_capacity(&self) -> usize {
        lock(&self.entries).used_capacity()
    }

    pub fn free_capacity(&self) -> usize {
        lock(&self.entries).free_capacity()
    }

    pub fn len(&self) -> usize {
        lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.entries).is_empty()
    }

    pub fn add_listener(&self, listener: Arc<dyn CacheListener<K, V>>) -> ListenerId {
        let id = {
            let mut next_listener = lock(&self.next_listener);
            *next_listener += 1;
            ListenerId(*next_listener)
        };

        self.listeners
            .write()
            .unwrap_or_else(|error| error.into_inner())
            .push((id, listener));

        id
    }

    pub fn remove_listener(&self, id: ListenerId) {
        self.listeners
            .write()
            .unwrap_or_else(|error| error.into_inner())
            .retain(|(listener_id, _)| *listener_id != id);
    }

    fn notify(&self, removed: Vec<(K, V)>) {
        if removed.is_empty() {
            return;
        }

        let listeners = self
            .listeners
            .read()
            .unwrap_or_else(|error| error.into_inner())
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect::<Vec<_>>();

        for (key, value) in &removed {
            for listener in &listeners {
                if let Err(error) = listener.entry_removed(key, value) {
                    error!("Cache listener failed to release a removed entry: {error:#}");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::anyhow;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn assert_consistent<K: Clone + Eq + Hash, V>(cache: &LruCache<K, V>) {
        let sum = cache.entries.values().map(|entry| entry.size).sum::<usize>();

        assert_eq!(cache.used_capacity(), sum);
        assert!(cache.used_capacity() <= cache.capacity());
        assert_eq!(cache.usage.len(), cache.entries.len());
    }

    #[test]
    fn eviction_down_to_low_water() {
        let mut cache = LruCache::new(100, 50);

        assert!(cache.put("a", 1, 80).is_empty());
        let removed = cache.put("b", 2, 40);

        assert_eq!(removed, vec![("a", 1)]);
        assert_eq!(cache.used_capacity(), 40);
        assert!(cache.contains(&"b"));
        assert_consistent(&cache);
    }

    #[test]
    fn least_recently_used_goes_first() {
        let mut cache = LruCache::new(100, 60);

        cache.put("a", 1, 30);
        cache.put("b", 2, 30);
        cache.put("c", 3, 30);
        assert_eq!(cache.get(&"a"), Some(&1));

        let removed = cache.put("d", 4, 30);

        assert_eq!(removed, vec![("b", 2)]);
        assert!(cache.contains(&"a") && cache.contains(&"c") && cache.contains(&"d"));
        assert_consistent(&cache);
    }

    #[test]
    fn oversized_and_replaced_entries() {
        let mut cache = LruCache::new(100, 50);

        assert_eq!(cache.put("huge", 1, 101), vec![("huge", 1)]);
        assert!(cache.is_empty());

        cache.put("a", 1, 10);
        assert_eq!(cache.put("a", 2, 20), vec![("a", 1)]);
        assert_eq!(cache.used_capacity(), 20);
        assert_eq!(cache.len(), 1);
        assert_consistent(&cache);
    }

    #[test]
    fn shrinking_evicts_immediately() {
        let mut cache = LruCache::new(100, 80);

        for (key, value) in ["a", "b", "c", "d"].into_iter().zip(0..) {
            cache.put(key, value, 20);
        }

        let removed = cache.set_capacity(50, 30);

        assert_eq!(removed, vec![("a", 0), ("b", 1), ("c", 2)]);
        assert_eq!(cache.used_capacity(), 20);
        assert_consistent(&cache);
    }

    #[test]
    fn random_operations_keep_accounting() {
        let mut rng = rand::rng();
        let mut cache = LruCache::new(1000, 600);

        for _ in 0..10_000 {
            let key = rng.random_range(0..64u32);

            match rng.random_range(0..10) {
                0..=5 => {
                    cache.put(key, key, rng.random_range(1..300));
                }
                6 | 7 => {
                    cache.get(&key);
                }
                8 => {
                    cache.remove(&key);
                }
                _ => {
                    let capacity = rng.random_range(200..2000);
                    cache.set_capacity(capacity, capacity / 2);
                }
            }

            assert_consistent(&cache);
        }
    }

    #[test]
    fn listeners_see_every_removal() {
        let cache = MemoryCache::new(100, 50);
        let removed = Arc::new(AtomicUsize::new(0));

        let counter = removed.clone();
        cache.add_listener(Arc::new(move |_: &&str, _: &u32| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        cache.put("a", 1, 60).unwrap();
        cache.put("b", 2, 60).unwrap();
        assert_eq!(removed.load(Ordering::SeqCst), 1);

        cache.put("b", 3, 10).unwrap();
        assert_eq!(removed.load(Ordering::SeqCst), 2);
        assert_eq!(cache.get(&"b"), Some(3));

        cache.clear();
        assert_eq!(removed.load(Ordering::SeqCst), 3);
        assert_eq!(cache.used_capacity(), 0);
    }

    #[test]
    fn failing_listener_does_not_stop_eviction() {
        let cache = MemoryCache::new(100, 0);
        let removed = Arc::new(AtomicUsize::new(0));

        cache.add_listener(Arc::new(|_: &u32, _: &u32| -> Result<()> {
            Err(anyhow!("native resource already gone"))
        }));

        let counter = removed.clone();
        let id = cache.add_listener(Arc::new(move |_: &u32, _: &u32| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        for key in 0..3 {
            cache.put(key, key, 40).unwrap();
        }

        assert_eq!(removed.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_capacity(), 40);

        cache.remove_listener(id);
        cache.clear();
        assert_eq!(removed.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn oversized_entries_are_reported() {
        let cache = MemoryCache::new(100, 50);
        let removed = Arc::new(AtomicUsize::new(0));

        let counter = removed.clone();
        cache.add_listener(Arc::new(move |_: &&str, _: &u32| -> Result<()> {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }));

        cache.put("a", 1, 30).unwrap();
        assert!(cache.put("huge", 2, 101).is_err());

        assert!(!cache.contains(&"huge"));
        assert!(cache.contains(&"a"));
        assert_eq!(cache.used_capacity(), 30);
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }
}
