use crate::arena::{Arena, Node, NIL};
use crate::traits::{CachePolicy, CacheStats, Expiring};
use std::collections::HashMap;
use std::sync::Arc;

/// SIEVE eviction (NSDI '24).
///
/// New entries enter at the head. A hand walks from the tail toward the head
/// looking for a victim: visited entries have their bit cleared and stay where
/// they are, the first unvisited (or expired) entry is evicted.
///
/// Unlike CLOCK, a retained entry is not moved back to the head. Entries that
/// earned their place keep their position while new arrivals queue up in
/// front of them, so one-hit entries reach the hand quickly and leave.
///
/// A hit only sets the visited bit (an `AtomicBool` on the node). The list is
/// never reordered on reads, which keeps the lookup path short inside a shard.
pub struct SieveCache<V> {
    arena: Arena<V>,
    map: HashMap<String, u32>,
    /// Next eviction candidate. `NIL` means start again from the tail.
    hand: u32,
    capacity: usize,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<V> SieveCache<V> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "cache capacity must be > 0");
        Self {
            arena: Arena::new(capacity),
            map: HashMap::with_capacity(capacity),
            hand: NIL,
            capacity,
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Drop the node at `index`, stepping the hand off it first.
    fn unlink_entry(&mut self, index: u32) -> Option<Node<V>> {
        if self.hand == index {
            self.hand = self.arena.get(index).map_or(NIL, |n| n.prev);
        }
        let node = self.arena.remove(index)?;
        self.map.remove(&node.key);
        Some(node)
    }

    /// Advance the hand until one entry is evicted.
    ///
    /// At each step:
    /// - expired: evicted regardless of its visited bit
    /// - visited: bit cleared, entry kept in place, hand moves to `prev`
    /// - unvisited: evicted, hand already points at its `prev`
    ///
    /// When the hand runs off the head it wraps around to the tail.
    fn evict_one(&mut self) {
        // Each visited node is cleared at most once per pass, so two passes
        // always find a victim.
        let mut budget = self.arena.len() * 2 + 1;

        while budget > 0 {
            budget -= 1;

            if self.hand == NIL {
                self.hand = self.arena.tail;
            }
            let index = self.hand;
            let Some(node) = self.arena.get(index) else {
                return;
            };

            if node.value.is_expired() || !node.clear_visited() {
                self.unlink_entry(index);
                self.evictions += 1;
                return;
            }
            self.hand = node.prev;
        }
    }
}

impl<V: Send + Sync> CachePolicy<V> for SieveCache<V> {
    fn get(&mut self, key: &str) -> Option<Arc<Expiring<V>>> {
        let Some(&index) = self.map.get(key) else {
            self.misses += 1;
            return None;
        };
        let node = self.arena.get(index)?;

        if node.value.is_expired() {
            self.misses += 1;
            self.unlink_entry(index);
            return None;
        }

        // No list mutation on a hit.
        self.hits += 1;
        node.mark_visited();
        Some(Arc::clone(&node.value))
    }

    fn insert(&mut self, key: String, value: Expiring<V>) {
        // Replacing a key frees its slot, so it never costs an eviction.
        if let Some(&old) = self.map.get(&key) {
            self.unlink_entry(old);
        }

        while self.arena.len() >= self.capacity {
            let before = self.arena.len();
            self.evict_one();
            if self.arena.len() == before {
                break;
            }
        }

        // New entries start unvisited at the head.
        if let Some(index) = self.arena.push_head(Node::new(key.clone(), value)) {
            self.map.insert(key, index);
        }
    }

    fn remove(&mut self, key: &str) -> bool {
        match self.map.get(key) {
            Some(&index) => self.unlink_entry(index).is_some(),
            None => false,
        }
    }

    fn clear(&mut self) {
        self.arena.clear();
        self.map.clear();
        self.hand = NIL;
    }

    fn len(&self) -> usize {
        self.arena.len()
    }

    fn capacity(&self) -> usize {
        self.capacity
    }

    fn name(&self) -> &'static str {
        "SIEVE"
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
