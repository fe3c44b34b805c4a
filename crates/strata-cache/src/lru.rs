use crate::arena::{Arena, Node};
use crate::traits::{CachePolicy, CacheStats, Expiring};
use std::collections::HashMap;
use std::sync::Arc;

/// Least-recently-used eviction.
///
/// Every hit moves the node to the head; victims come off the tail.
///
/// Unlike SIEVE, reads reorder the list and therefore need exclusive access
/// to the shard. Under a skewed read load that write lock is where the two
/// policies part ways.
pub struct LruCache<V> {
    arena: Arena<V>,
    map: HashMap<String, u32>,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> LruCache<V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be > 0");
        Self {
            arena: Arena::new(capacity),
            map: HashMap::with_capacity(capacity),
            capacity,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    fn drop_index(&mut self, index: u32) -> bool {
        match self.arena.remove(index) {
            Some(node) => {
                self.map.remove(&node.key);
                true
            }
            None => false,
        }
    }
}

impl<V: Send + Sync> CachePolicy<V> for LruCache<V> {
    fn get(&mut self, key: &str) -> Option<Arc<Expiring<V>>> {
        let Some(&index) = self.map.get(key) else {
            self.misses += 1;
            return None;
        };

        let expired = self.arena.get(index)?.value.is_expired();
        if expired {
            self.misses += 1;
            self.drop_index(index);
            return None;
        }

        // Promotion on every hit.
        self.hits += 1;
        self.arena.move_to_head(index);
        self.arena.get(index).map(|node| Arc::clone(&node.value))
    }

    fn insert(&mut self, key: String, value: Expiring<V>) {
        if let Some(&old) = self.map.get(&key) {
            self.drop_index(old);
        }

        // Least recently used entries sit at the tail.
        while self.arena.len() >= self.capacity {
            match self.arena.pop_tail() {
                Some((_, evicted)) => {
                    self.map.remove(&evicted.key);
                    self.evictions += 1;
                }
                None => break,
            }
        }

        if let Some(index) = self.arena.push_head(Node::new(key.clone(), value)) {
            self.map.insert(key, index);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.map.get(key) {
            Some(&index) => self.drop_index(index),
            None => false,
        }
    }

    fn clear(&mut self) {
        self.arena.clear();
        self.map.clear();
    }

    fn len(&self) -> usize {
        self.arena.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn name(&self) -> &'static str {
        "LRU"
    }

    fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
            current_size: self.arena.len(),
            capacity: self.capacity,
        }
    }
}
