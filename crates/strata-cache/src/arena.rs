use crate::traits::Expiring;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Index used as the null link.
pub const NIL: u32 = u32::MAX;

/// A slot in the arena list. Links are slot indices, not pointers.
pub struct Node<V> {
    pub key: String,
    pub value: Arc<Expiring<V>>,
    /// SIEVE's visited bit. Atomic so a hit can set it through `&self`.
    pub visited: AtomicBool,
    pub prev: u32,
    pub next: u32,
}

impl<V> Node<V> {
    pub fn new(key: String, value: Expiring<V>) -> Self {
        Self {
            key,
            value: Arc::new(value),
            visited: AtomicBool::new(false),
            prev: NIL,
            next: NIL,
        }
    }

    /// Record a hit. Takes `&self`: the list itself is left alone.
    #[inline]
    pub fn mark_visited(&self) {
        self.visited.store(true, Ordering::Relaxed);
    }

    /// Clear the visited bit, returning its previous value.
    #[inline]
    pub fn clear_visited(&self) -> bool {
        self.visited.swap(false, Ordering::Relaxed)
    }

    /// Read the visited bit without clearing it.
    #[inline]
    pub fn is_visited(&self) -> bool {
        self.visited.load(Ordering::Relaxed)
    }
}

/// Fixed-capacity doubly-linked list stored in a `Vec`.
///
/// Slots live in a `Vec<Option<Node>>` and `u32` indices stand in for
/// pointers, so the whole list is one allocation with no `unsafe`. Free slots
/// are kept on a stack so allocation and release are O(1). The list never
/// grows past the capacity it was created with.
pub struct Arena<V> {
    slots: Vec<Option<Node<V>>>,
    free: Vec<u32>,
    pub head: u32,
    pub tail: u32,
    len: usize,
}

impl<V> Arena<V> {
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| None).collect();
        // Reversed so the lowest index is handed out first.
        let free = (0..capacity as u32).rev().collect();

        Self {
            slots,
            free,
            head: NIL,
            tail: NIL,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn get(&self, index: u32) -> Option<&Node<V>> {
        self.slots.get(index as usize).and_then(Option::as_ref)
    }

    #[inline]
    fn node_mut(&mut self, index: u32) -> Option<&mut Node<V>> {
        self.slots.get_mut(index as usize).and_then(Option::as_mut)
    }

    fn set_prev(&mut self, index: u32, prev: u32) {
        if let Some(node) = self.node_mut(index) {
            node.prev = prev;
        }
    }

    fn set_next(&mut self, index: u32, next: u32) {
        if let Some(node) = self.node_mut(index) {
            node.next = next;
        }
    }

    /// Link `index` in front of the current head.
    fn link_head(&mut self, index: u32) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(index) {
            node.prev = NIL;
            node.next = old_head;
        }
        if old_head != NIL {
            self.set_prev(old_head, index);
        }
        self.head = index;
        if self.tail == NIL {
            self.tail = index;
        }
    }

    /// Detach `index` from its neighbours without freeing the slot.
    fn unlink(&mut self, index: u32) {
        let (prev, next) = match self.get(index) {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        if prev != NIL {
            self.set_next(prev, next);
        } else {
            self.head = next;
        }

        if next != NIL {
            self.set_prev(next, prev);
        } else {
            self.tail = prev;
        }
    }

    /// Store `node` in a free slot at the head. `None` when the arena is full.
    pub fn push_head(&mut self, node: Node<V>) -> Option<u32> {
        let index = self.free.pop()?;
        self.slots[index as usize] = Some(node);
        self.link_head(index);
        self.len += 1;
        Some(index)
    }

    /// Unlink and return the node at `index`, releasing its slot.
    pub fn remove(&mut self, index: u32) -> Option<Node<V>> {
        self.get(index)?;
        self.unlink(index);
        let node = self.slots[index as usize].take()?;
        self.free.push(index);
        self.len -= 1;
        Some(node)
    }

    /// Move an existing node to the head (LRU promotion).
    pub fn move_to_head(&mut self, index: u32) {
        if self.head == index || self.get(index).is_none() {
            return;
        }
        self.unlink(index);
        self.link_head(index);
    }

    /// Remove the tail node, returning its former index with it.
    pub fn pop_tail(&mut self) -> Option<(u32, Node<V>)> {
        if self.tail == NIL {
            return None;
        }
        let index = self.tail;
        self.remove(index).map(|node| (index, node))
    }

    /// Release every slot.
    pub fn clear(&mut self) {
        let capacity = self.slots.len();
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.free = (0..capacity as u32).rev().collect();
        self.head = NIL;
        self.tail = NIL;
        self.len = 0;
    }
}
