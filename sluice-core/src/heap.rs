use crate::{error::InvariantViolation, vtime::VirtualTime};

/// Key type usable in the scheduler heaps.
///
/// Both tick counters and virtual time are monotonic but allowed to wrap, so
/// the order is wrapping: `a.leq(b)` holds when `b` is at most half the key
/// space ahead of `a`.
pub trait HeapKey: Copy {
    /// Wrapping `self <= other`.
    fn leq(&self, other: &Self) -> bool;
}

impl HeapKey for u64 {
    fn leq(&self, other: &Self) -> bool {
        other.wrapping_sub(*self) as i64 >= 0
    }
}

impl HeapKey for VirtualTime {
    fn leq(&self, other: &Self) -> bool {
        VirtualTime::leq(*self, *other)
    }
}

/// Opaque handle to a live heap entry, returned by [`Heap::insert`].
///
/// The handle stays valid until the entry is popped or removed; a generation
/// counter detects reuse, so a stale handle is reported as an
/// [`InvariantViolation`] instead of silently removing the wrong entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapHandle {
    slot: u32,
    gen: u32,
}

const FREE: u32 = u32::MAX;

#[derive(Debug)]
struct Slot {
    /// Current position of the entry in the array, or `FREE`.
    pos: u32,
    gen: u32,
}

#[derive(Debug)]
struct Entry<K, T> {
    key: K,
    slot: u32,
    item: T,
}

/// Growable indexed binary min-heap.
///
/// O(log n) insert and extract-min, plus O(log n) removal of an arbitrary
/// live entry through the handle its insertion returned. Storage only ever
/// grows; the slot table is recycled through a free list.
#[derive(Debug)]
pub struct Heap<K, T> {
    entries: Vec<Entry<K, T>>,
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl<K: HeapKey, T> Default for Heap<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: HeapKey, T> Heap<K, T> {
    pub fn new() -> Self {
        Self { entries: Vec::new(), slots: Vec::new(), free: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Insert an entry and return a handle for later removal.
    pub fn insert(&mut self, key: K, item: T) -> HeapHandle {
        let slot = match self.free.pop() {
            Some(slot) => slot,
            None => {
                self.slots.push(Slot { pos: FREE, gen: 0 });
                (self.slots.len() - 1) as u32
            }
        };
        let pos = self.entries.len();
        self.entries.push(Entry { key, slot, item });
        self.slots[slot as usize].pos = pos as u32;
        let gen = self.slots[slot as usize].gen;
        self.sift_up(pos);
        HeapHandle { slot, gen }
    }

    /// The minimum entry, if any.
    pub fn peek(&self) -> Option<(&K, &T)> {
        self.entries.first().map(|e| (&e.key, &e.item))
    }

    /// Extract the minimum entry.
    pub fn pop(&mut self) -> Option<(K, T)> {
        if self.entries.is_empty() {
            None
        } else {
            Some(self.remove_at(0))
        }
    }

    /// Remove the entry behind `handle`.
    ///
    /// A handle that does not match a live entry means the heap and its
    /// owner disagree about scheduler state; that is corruption, and the
    /// caller is expected to abort via [`InvariantViolation::abort`].
    pub fn remove(&mut self, handle: HeapHandle) -> Result<(K, T), InvariantViolation> {
        let Some(slot) = self.slots.get(handle.slot as usize) else {
            return Err(InvariantViolation("heap handle points outside the slot table"));
        };
        if slot.gen != handle.gen || slot.pos == FREE {
            return Err(InvariantViolation("stale heap handle"));
        }
        let pos = slot.pos as usize;
        match self.entries.get(pos) {
            Some(entry) if entry.slot == handle.slot => Ok(self.remove_at(pos)),
            _ => Err(InvariantViolation("heap slot table and entry array disagree")),
        }
    }

    /// Keep only the entries `keep` approves of, then rebuild in bulk.
    ///
    /// Cheaper than handle-by-handle removal when purging everything that
    /// belongs to a deleted pipe or flowset.
    pub fn retain(&mut self, mut keep: impl FnMut(&K, &T) -> bool) {
        let mut i = 0;
        while i < self.entries.len() {
            if keep(&self.entries[i].key, &self.entries[i].item) {
                i += 1;
                continue;
            }
            let entry = self.entries.swap_remove(i);
            self.retire(entry.slot);
        }
        self.heapify();
    }

    fn retire(&mut self, slot: u32) {
        let s = &mut self.slots[slot as usize];
        s.pos = FREE;
        s.gen = s.gen.wrapping_add(1);
        self.free.push(slot);
    }

    fn remove_at(&mut self, pos: usize) -> (K, T) {
        let entry = self.entries.swap_remove(pos);
        self.retire(entry.slot);
        if pos < self.entries.len() {
            self.slots[self.entries[pos].slot as usize].pos = pos as u32;
            let pos = self.sift_down(pos);
            self.sift_up(pos);
        }
        (entry.key, entry.item)
    }

    /// Bulk rebuild after mass removal.
    fn heapify(&mut self) {
        for pos in 0..self.entries.len() {
            let slot = self.entries[pos].slot;
            self.slots[slot as usize].pos = pos as u32;
        }
        for pos in (0..self.entries.len() / 2).rev() {
            self.sift_down(pos);
        }
    }

    fn sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if self.entries[parent].key.leq(&self.entries[pos].key) {
                break;
            }
            self.swap(parent, pos);
            pos = parent;
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize) -> usize {
        loop {
            let mut min = pos;
            let left = 2 * pos + 1;
            let right = left + 1;
            if left < self.entries.len() && !self.entries[min].key.leq(&self.entries[left].key) {
                min = left;
            }
            if right < self.entries.len() && !self.entries[min].key.leq(&self.entries[right].key) {
                min = right;
            }
            if min == pos {
                break;
            }
            self.swap(pos, min);
            pos = min;
        }
        pos
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.entries.swap(a, b);
        self.slots[self.entries[a].slot as usize].pos = a as u32;
        self.slots[self.entries[b].slot as usize].pos = b as u32;
    }
}
