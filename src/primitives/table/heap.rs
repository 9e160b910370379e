//! Slab storage for hash-table entries.
//!
//! An [`EntryHeap`] hands out stable [`EntryIdx`] slots. A table either owns
//! its heap ([`OwnedHeap`]) or shares one with other tables ([`SharedHeap`]);
//! the choice is a type parameter, so teardown is fixed at construction.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::options::TableOptions;
use crate::profile::{record, ProfileCounter};

/// Stable index of an entry slot inside an [`EntryHeap`].
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryIdx(u32);

impl EntryIdx {
    fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for EntryIdx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntryIdx({})", self.0)
    }
}

pub(crate) struct Entry<K, V> {
    pub(crate) key: K,
    pub(crate) value: V,
    pub(crate) hash: u64,
    pub(crate) next: Option<EntryIdx>,
}

enum Slot<K, V> {
    Live(Entry<K, V>),
    /// Retired into a table's free list.
    Spare { next: Option<EntryIdx> },
    /// Handed back to the heap.
    Free,
}

/// Slab of hash-table entries.
pub struct EntryHeap<K, V> {
    slots: Vec<Slot<K, V>>,
    released: Vec<EntryIdx>,
    increment: usize,
    max_entries: Option<usize>,
}

impl<K, V> EntryHeap<K, V> {
    /// Creates an empty heap sized by `options`.
    pub fn new(options: &TableOptions) -> Self {
        Self {
            slots: Vec::new(),
            released: Vec::new(),
            increment: options.heap_increment,
            max_entries: options.max_entries,
        }
    }

    /// Number of slots ever handed out.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots handed back and awaiting reuse.
    pub fn released_count(&self) -> usize {
        self.released.len()
    }

    /// Places `entry` in a released slot, or in a fresh one.
    ///
    /// Exhausting the heap is fatal.
    pub(crate) fn alloc(&mut self, entry: Entry<K, V>) -> EntryIdx {
        if let Some(idx) = self.released.pop() {
            self.slots[idx.index()] = Slot::Live(entry);
            return idx;
        }
        let len = self.slots.len();
        let full = self.max_entries.is_some_and(|max| len >= max);
        if full || len >= u32::MAX as usize {
            crate::precondition_failure!("table entry heap exhausted at {} entries", len);
        }
        if len == self.slots.capacity() {
            self.slots.reserve_exact(self.increment);
            trace!(slots = len, reserved = self.increment, "table.heap.reserve");
        }
        self.slots.push(Slot::Live(entry));
        record(ProfileCounter::TableFreshAlloc, 1);
        EntryIdx(len as u32)
    }

    pub(crate) fn entry(&self, idx: EntryIdx) -> &Entry<K, V> {
        match self.slots.get(idx.index()) {
            Some(Slot::Live(entry)) => entry,
            _ => crate::precondition_failure!("dangling table entry {:?}", idx),
        }
    }

    pub(crate) fn entry_mut(&mut self, idx: EntryIdx) -> &mut Entry<K, V> {
        match self.slots.get_mut(idx.index()) {
            Some(Slot::Live(entry)) => entry,
            _ => crate::precondition_failure!("dangling table entry {:?}", idx),
        }
    }

    /// Moves a live entry onto a free list headed by `next`, returning its contents.
    pub(crate) fn retire(&mut self, idx: EntryIdx, next: Option<EntryIdx>) -> Entry<K, V> {
        match std::mem::replace(&mut self.slots[idx.index()], Slot::Spare { next }) {
            Slot::Live(entry) => entry,
            _ => crate::precondition_failure!("retiring non-live table entry {:?}", idx),
        }
    }

    /// Revives a spare slot with `entry`, returning the next spare in its list.
    pub(crate) fn reuse(&mut self, idx: EntryIdx, entry: Entry<K, V>) -> Option<EntryIdx> {
        match std::mem::replace(&mut self.slots[idx.index()], Slot::Live(entry)) {
            Slot::Spare { next } => next,
            _ => crate::precondition_failure!("reusing non-spare table entry {:?}", idx),
        }
    }

    pub(crate) fn spare_next(&self, idx: EntryIdx) -> Option<EntryIdx> {
        match self.slots.get(idx.index()) {
            Some(Slot::Spare { next }) => *next,
            _ => crate::precondition_failure!("free list reaches non-spare entry {:?}", idx),
        }
    }

    /// Hands a spare slot back to the heap for any table to reuse.
    pub(crate) fn release(&mut self, idx: EntryIdx) {
        match self.slots.get_mut(idx.index()) {
            Some(slot) if matches!(slot, Slot::Spare { .. }) => *slot = Slot::Free,
            _ => crate::precondition_failure!("releasing non-spare table entry {:?}", idx),
        }
        self.released.push(idx);
    }
}

/// Access to the entry heap backing a table.
pub trait HeapHandle<K, V> {
    /// Runs `f` against the heap, or returns `None` if no heap exists yet.
    fn with_heap<R>(&self, f: impl FnOnce(&EntryHeap<K, V>) -> R) -> Option<R>;

    /// Runs `f` against the heap, creating it from `options` first if needed.
    fn with_heap_mut<R>(
        &mut self,
        options: &TableOptions,
        f: impl FnOnce(&mut EntryHeap<K, V>) -> R,
    ) -> R;

    /// Disposes of the table's storage. `slots` are every slot the table
    /// still holds, all already retired.
    fn teardown(&mut self, slots: Vec<EntryIdx>);
}

/// Heap created lazily by its table and torn down with it.
pub struct OwnedHeap<K, V> {
    heap: Option<EntryHeap<K, V>>,
}

impl<K, V> Default for OwnedHeap<K, V> {
    fn default() -> Self {
        Self { heap: None }
    }
}

impl<K, V> HeapHandle<K, V> for OwnedHeap<K, V> {
    fn with_heap<R>(&self, f: impl FnOnce(&EntryHeap<K, V>) -> R) -> Option<R> {
        self.heap.as_ref().map(f)
    }

    fn with_heap_mut<R>(
        &mut self,
        options: &TableOptions,
        f: impl FnOnce(&mut EntryHeap<K, V>) -> R,
    ) -> R {
        f(self.heap.get_or_insert_with(|| EntryHeap::new(options)))
    }

    fn teardown(&mut self, slots: Vec<EntryIdx>) {
        if let Some(heap) = self.heap.take() {
            debug!(slots = heap.slot_count(), retired = slots.len(), "table.heap.teardown");
        }
    }
}

/// Heap shared between several tables.
///
/// A table never tears a shared heap down; its slots are handed back for
/// the other holders to reuse. Table callbacks never run under the heap lock.
pub struct SharedHeap<K, V>(Arc<Mutex<EntryHeap<K, V>>>);

impl<K, V> SharedHeap<K, V> {
    /// Creates a heap sized by `options`.
    pub fn new(options: &TableOptions) -> Self {
        Self(Arc::new(Mutex::new(EntryHeap::new(options))))
    }

    /// Number of slots ever handed out.
    pub fn slot_count(&self) -> usize {
        self.0.lock().slot_count()
    }

    /// Number of slots awaiting reuse.
    pub fn released_count(&self) -> usize {
        self.0.lock().released_count()
    }
}

impl<K, V> Clone for SharedHeap<K, V> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<K, V> HeapHandle<K, V> for SharedHeap<K, V> {
    fn with_heap<R>(&self, f: impl FnOnce(&EntryHeap<K, V>) -> R) -> Option<R> {
        Some(f(&*self.0.lock()))
    }

    fn with_heap_mut<R>(
        &mut self,
        _options: &TableOptions,
        f: impl FnOnce(&mut EntryHeap<K, V>) -> R,
    ) -> R {
        f(&mut *self.0.lock())
    }

    fn teardown(&mut self, slots: Vec<EntryIdx>) {
        let mut heap = self.0.lock();
        let released = slots.len();
        for idx in slots {
            heap.release(idx);
        }
        debug!(released, "table.heap.release");
    }
}
