use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use lru::LruCache;

const NUM_SHARD_BITS: u32 = 4;
const NUM_SHARDS: u64 = 1 << NUM_SHARD_BITS;
// Below this many entries per shard the cache runs as a single shard, keeping one global LRU order.
const MIN_SHARD_CAPACITY: u64 = 8;

/// Called once per entry, after it has left the cache and the last handle to it is gone.
pub type Deleter<K, V> = Box<dyn FnOnce(&K, &V) + Send + Sync>;

pub trait Cache<K, V> {
    /// Inserts a mapping from `key` to `value`, replacing any existing entry for `key`,
    /// and returns a handle to the new entry.
    fn insert(&self, key: K, value: V, charge: u64, deleter: Option<Deleter<K, V>>)
        -> CacheHandle<K, V>;

    fn lookup(&self, key: &K) -> Option<CacheHandle<K, V>>;

    /// Gives back a handle returned by `insert` or `lookup`.
    fn release(&self, handle: CacheHandle<K, V>);

    /// Removes `key` from lookup. The entry itself lives on until all its handles are released.
    fn erase(&self, key: &K);

    /// Removes every entry that no handle refers to.
    fn prune(&self);

    fn total_charge(&self) -> u64;
}

struct LruEntry<K, V> {
    key: K,
    value: V,
    charge: u64,
    deleter: Option<Deleter<K, V>>,
}

impl<K, V> Drop for LruEntry<K, V> {
    fn drop(&mut self) {
        if let Some(deleter) = self.deleter.take() {
            deleter(&self.key, &self.value);
        }
    }
}

/// A lease on a cache entry. The entry stays alive as long as any handle to it does.
pub struct CacheHandle<K, V> {
    entry: Arc<LruEntry<K, V>>,
}

impl<K, V> CacheHandle<K, V> {
    pub fn key(&self) -> &K {
        &self.entry.key
    }

    pub fn value(&self) -> &V {
        &self.entry.value
    }

    pub fn charge(&self) -> u64 {
        self.entry.charge
    }
}

impl<K, V> Clone for CacheHandle<K, V> {
    fn clone(&self) -> Self {
        CacheHandle {
            entry: self.entry.clone(),
        }
    }
}

pub struct ShardLruCache<K, V>
where
    K: Eq + Hash,
{
    shards: Box<[Mutex<LruCacheInner<K, V>>]>,
}

impl<K, V> ShardLruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new(capacity: u64) -> Self {
        let num_shards = if capacity >= NUM_SHARDS * MIN_SHARD_CAPACITY {
            NUM_SHARDS
        } else {
            1
        };
        let mut shards = Vec::with_capacity(num_shards as usize);
        for i in 0..num_shards {
            // spread the remainder so per-shard capacities add up to `capacity`
            let per_shard = capacity / num_shards + u64::from(i < capacity % num_shards);
            shards.push(Mutex::new(LruCacheInner::new(per_shard)));
        }
        ShardLruCache {
            shards: shards.into_boxed_slice(),
        }
    }

    /// Number of entries currently eligible for lookup.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| lock(s).lru.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_shard(&self, key: &K) -> MutexGuard<'_, LruCacheInner<K, V>> {
        if self.shards.len() == 1 {
            return lock(&self.shards[0]);
        }
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let shard = hasher.finish() >> (64 - NUM_SHARD_BITS);
        lock(&self.shards[shard as usize])
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    // Shard state is consistent between calls; a panic elsewhere does not invalidate it.
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K, V> Cache<K, V> for ShardLruCache<K, V>
where
    K: Eq + Hash + Clone,
{
    fn insert(
        &self,
        key: K,
        value: V,
        charge: u64,
        deleter: Option<Deleter<K, V>>,
    ) -> CacheHandle<K, V> {
        let entry = Arc::new(LruEntry {
            key: key.clone(),
            value,
            charge,
            deleter,
        });
        let evicted = self.get_shard(&key).insert(key, entry.clone());
        // Entries nobody holds are finalized here, outside the shard lock.
        drop(evicted);
        CacheHandle { entry }
    }

    fn lookup(&self, key: &K) -> Option<CacheHandle<K, V>> {
        self.get_shard(key).lookup(key)
    }

    fn release(&self, handle: CacheHandle<K, V>) {
        drop(handle);
    }

    fn erase(&self, key: &K) {
        let erased = self.get_shard(key).erase(key);
        drop(erased);
    }

    fn prune(&self) {
        for shard in self.shards.iter() {
            let pruned = lock(shard).prune();
            drop(pruned);
        }
    }

    fn total_charge(&self) -> u64 {
        self.shards.iter().map(|s| lock(s).usage).sum()
    }
}

struct LruCacheInner<K: Eq + Hash, V> {
    lru: LruCache<K, Arc<LruEntry<K, V>>>,
    usage: u64,
    capacity: u64,
}

impl<K: Eq + Hash, V> LruCacheInner<K, V> {
    fn new(capacity: u64) -> Self {
        LruCacheInner {
            lru: LruCache::unbounded(),
            usage: 0,
            capacity,
        }
    }

    /// Returns the entries that left the shard, so the caller can drop them unlocked.
    fn insert(&mut self, key: K, entry: Arc<LruEntry<K, V>>) -> Vec<Arc<LruEntry<K, V>>> {
        let mut evicted = Vec::new();
        if self.capacity == 0 {
            // caching disabled, the caller's handle is the only reference
            return evicted;
        }

        self.usage += entry.charge;
        if let Some(old) = self.lru.put(key, entry) {
            self.usage -= old.charge;
            evicted.push(old);
        }
        while self.usage > self.capacity {
            match self.lru.pop_lru() {
                Some((_, old)) => {
                    self.usage -= old.charge;
                    evicted.push(old);
                }
                None => break,
            }
        }
        evicted
    }

    fn lookup(&mut self, key: &K) -> Option<CacheHandle<K, V>> {
        self.lru.get(key).map(|entry| CacheHandle {
            entry: entry.clone(),
        })
    }

    fn erase(&mut self, key: &K) -> Option<Arc<LruEntry<K, V>>> {
        let entry = self.lru.pop(key)?;
        self.usage -= entry.charge;
        Some(entry)
    }

    fn prune(&mut self) -> Vec<Arc<LruEntry<K, V>>>
    where
        K: Clone,
    {
        let idle: Vec<K> = self
            .lru
            .iter()
            .filter(|(_, entry)| Arc::strong_count(entry) == 1)
            .map(|(key, _)| key.clone())
            .collect();
        let mut pruned = Vec::with_capacity(idle.len());
        for key in idle {
            if let Some(entry) = self.erase(&key) {
                pruned.push(entry);
            }
        }
        pruned
    }
}
