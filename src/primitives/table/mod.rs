//! Open-chaining hash table with pluggable hashing and removal callbacks.
//!
//! Entries live in an [`EntryHeap`] slab and are chained per bucket through
//! stable [`EntryIdx`] links. Removed entries go onto a per-table free list
//! and are reused before the heap is asked for a fresh slot. Buckets are
//! created on the first insert and double whenever the projected count
//! exceeds `load_factor` entries per bucket, up to [`MAX_BUCKET_WIDTH`].

#![forbid(unsafe_code)]

mod heap;
mod keys;
mod options;


use std::fmt;

use tracing::{debug, trace, warn};

use crate::profile::{record, ProfileCounter};
use crate::types::Result;

pub use heap::{EntryHeap, EntryIdx, HeapHandle, OwnedHeap, SharedHeap};
pub use keys::{pointer_hash, string_hash, KeyEq, KeyHash, PointerEq, PointerHash, TableKey};
pub use options::{TableOptions, MAX_BUCKET_WIDTH};

use heap::Entry;

type KeyCallback<K> = Box<dyn FnMut(K)>;
type ValueCallback<V> = Box<dyn FnMut(V)>;

/// Hash table keyed by small identity-comparable handles.
///
/// `H` and `E` pick the hash and equality strategies. When `E` reports
/// itself as plain identity, lookups and removals compare keys directly
/// without consulting stored hashes. `A` decides whether the entry heap is
/// owned by the table or shared with others.
pub struct HashTable<K, V, H = PointerHash, E = PointerEq, A = OwnedHeap<K, V>>
where
    A: HeapHandle<K, V>,
{
    hash: H,
    eq: E,
    compare_by_pointer: bool,
    did_remove_key: Option<KeyCallback<K>>,
    did_remove_value: Option<ValueCallback<V>>,
    heap: A,
    buckets: Vec<Option<EntryIdx>>,
    spare: Option<EntryIdx>,
    spare_count: usize,
    count: usize,
    width: u32,
    options: TableOptions,
    growth_refused: bool,
}

impl<K: TableKey, V> HashTable<K, V> {
    /// Creates an empty table with pointer hashing, identity equality and an owned heap.
    pub fn new() -> Self {
        Self::builder().assemble(TableOptions::default())
    }

    /// Creates an empty default-strategy table after validating `options`.
    pub fn with_options(options: TableOptions) -> Result<Self> {
        Self::builder().options(options).build()
    }

    /// Starts configuring a table.
    pub fn builder() -> TableBuilder<K, V> {
        TableBuilder {
            hash: PointerHash,
            eq: PointerEq,
            did_remove_key: None,
            did_remove_value: None,
            heap: OwnedHeap::default(),
            options: TableOptions::default(),
        }
    }
}

impl<K: TableKey, V> Default for HashTable<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for a [`HashTable`] with custom strategies, callbacks or heap.
pub struct TableBuilder<K, V, H = PointerHash, E = PointerEq, A = OwnedHeap<K, V>> {
    hash: H,
    eq: E,
    did_remove_key: Option<KeyCallback<K>>,
    did_remove_value: Option<ValueCallback<V>>,
    heap: A,
    options: TableOptions,
}

impl<K, V, H, E, A> TableBuilder<K, V, H, E, A>
where
    K: TableKey,
    H: KeyHash<K>,
    E: KeyEq<K>,
    A: HeapHandle<K, V>,
{
    /// Replaces the hash strategy.
    pub fn hasher<H2: KeyHash<K>>(self, hash: H2) -> TableBuilder<K, V, H2, E, A> {
        TableBuilder {
            hash,
            eq: self.eq,
            did_remove_key: self.did_remove_key,
            did_remove_value: self.did_remove_value,
            heap: self.heap,
            options: self.options,
        }
    }

    /// Replaces the equality strategy.
    pub fn equality<E2: KeyEq<K>>(self, eq: E2) -> TableBuilder<K, V, H, E2, A> {
        TableBuilder {
            hash: self.hash,
            eq,
            did_remove_key: self.did_remove_key,
            did_remove_value: self.did_remove_value,
            heap: self.heap,
            options: self.options,
        }
    }

    /// Backs the table with `heap` instead of a heap of its own.
    pub fn shared_heap(self, heap: SharedHeap<K, V>) -> TableBuilder<K, V, H, E, SharedHeap<K, V>> {
        TableBuilder {
            hash: self.hash,
            eq: self.eq,
            did_remove_key: self.did_remove_key,
            did_remove_value: self.did_remove_value,
            heap,
            options: self.options,
        }
    }

    /// Called with every key leaving the table: removed, replaced, cleared or dropped.
    pub fn on_remove_key(mut self, callback: impl FnMut(K) + 'static) -> Self {
        self.did_remove_key = Some(Box::new(callback));
        self
    }

    /// Called with every value leaving the table.
    pub fn on_remove_value(mut self, callback: impl FnMut(V) + 'static) -> Self {
        self.did_remove_value = Some(Box::new(callback));
        self
    }

    /// Sets the sizing policy.
    pub fn options(mut self, options: TableOptions) -> Self {
        self.options = options;
        self
    }

    /// Validates the options and builds the table.
    pub fn build(self) -> Result<HashTable<K, V, H, E, A>> {
        let options = self.options.clone();
        options.validate()?;
        Ok(self.assemble(options))
    }

    fn assemble(self, options: TableOptions) -> HashTable<K, V, H, E, A> {
        HashTable {
            compare_by_pointer: self.eq.is_identity(),
            hash: self.hash,
            eq: self.eq,
            did_remove_key: self.did_remove_key,
            did_remove_value: self.did_remove_value,
            heap: self.heap,
            buckets: Vec::new(),
            spare: None,
            spare_count: 0,
            count: 0,
            width: 0,
            options,
            growth_refused: false,
        }
    }
}

impl<K, V, H, E, A> HashTable<K, V, H, E, A>
where
    A: HeapHandle<K, V>,
{
    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.count
    }

    /// Returns `true` when the table holds no entries.
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of buckets; zero until the first insert.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Bucket-count exponent; zero until the first insert.
    pub fn bucket_width(&self) -> u32 {
        self.width
    }

    /// Number of retired entries waiting on the free list.
    pub fn spare_count(&self) -> usize {
        self.spare_count
    }

    /// Returns `true` when lookups take the identity fast path.
    pub fn compares_by_pointer(&self) -> bool {
        self.compare_by_pointer
    }

    /// Removes every entry, running the removal callbacks. Buckets are kept.
    pub fn clear(&mut self) {
        let drained = self.retire_all();
        debug!(drained = drained.len(), "table.clear");
        for (key, value) in drained {
            self.did_remove(key, value);
        }
    }

    /// Moves every live entry onto the free list and returns the contents.
    fn retire_all(&mut self) -> Vec<(K, V)> {
        if self.count == 0 {
            return Vec::new();
        }
        let mut drained = Vec::with_capacity(self.count);
        let buckets = &mut self.buckets;
        let spare = &mut self.spare;
        self.heap.with_heap_mut(&self.options, |heap| {
            for head in buckets.iter_mut() {
                let mut cursor = head.take();
                while let Some(idx) = cursor {
                    let entry = heap.retire(idx, *spare);
                    *spare = Some(idx);
                    cursor = entry.next;
                    drained.push((entry.key, entry.value));
                }
            }
        });
        self.spare_count += drained.len();
        self.count = 0;
        drained
    }

    fn did_remove(&mut self, key: K, value: V) {
        if let Some(callback) = self.did_remove_key.as_mut() {
            callback(key);
        }
        if let Some(callback) = self.did_remove_value.as_mut() {
            callback(value);
        }
    }

    fn spare_slots(&self) -> Vec<EntryIdx> {
        let mut slots = Vec::with_capacity(self.spare_count);
        let mut cursor = self.spare;
        self.heap.with_heap(|heap| {
            while let Some(idx) = cursor {
                slots.push(idx);
                cursor = heap.spare_next(idx);
            }
        });
        slots
    }
}

impl<K, V, H, E, A> HashTable<K, V, H, E, A>
where
    K: TableKey,
    H: KeyHash<K>,
    E: KeyEq<K>,
    A: HeapHandle<K, V>,
{
    fn bucket_of(&self, hash: u64) -> usize {
        bucket_index(hash, self.width)
    }

    /// Lends the stored key and value matching `key` to `f`.
    ///
    /// With a shared heap `f` runs under the heap lock and must not touch
    /// tables sharing it.
    pub fn lookup_with<R>(&self, key: &K, f: impl FnOnce(&K, &V) -> R) -> Option<R> {
        if self.count == 0 {
            return None;
        }
        let hash = self.hash.hash_key(key);
        let mut cursor = self.buckets[self.bucket_of(hash)];
        self.heap
            .with_heap(|heap| {
                while let Some(idx) = cursor {
                    let entry = heap.entry(idx);
                    let found = if self.compare_by_pointer {
                        entry.key == *key
                    } else {
                        entry.hash == hash && self.eq.key_eq(&entry.key, key)
                    };
                    if found {
                        return Some(f(&entry.key, &entry.value));
                    }
                    cursor = entry.next;
                }
                None
            })
            .flatten()
    }

    /// Returns a copy of the value stored under `key`.
    pub fn lookup(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        self.lookup_with(key, |_, value| value.clone())
    }

    /// Returns the canonical stored key together with its value.
    pub fn lookup_key(&self, key: &K) -> Option<(K, V)>
    where
        V: Clone,
    {
        self.lookup_with(key, |stored, value| (*stored, value.clone()))
    }

    /// Returns `true` when an entry matches `key`.
    pub fn contains_key(&self, key: &K) -> bool {
        self.lookup_with(key, |_, _| ()).is_some()
    }

    /// Mutates the value stored under `key` in place. Returns `false` if absent.
    pub fn update(&mut self, key: &K, f: impl FnOnce(&mut V)) -> bool {
        if self.count == 0 {
            return false;
        }
        let hash = self.hash.hash_key(key);
        let mut cursor = self.buckets[self.bucket_of(hash)];
        let (eq, by_pointer) = (&self.eq, self.compare_by_pointer);
        self.heap.with_heap_mut(&self.options, |heap| {
            while let Some(idx) = cursor {
                let entry = heap.entry_mut(idx);
                let found = if by_pointer {
                    entry.key == *key
                } else {
                    entry.hash == hash && eq.key_eq(&entry.key, key)
                };
                if found {
                    f(&mut entry.value);
                    return true;
                }
                cursor = entry.next;
            }
            false
        })
    }

    /// Inserts `key -> value`.
    ///
    /// Returns `true` when a new entry was added. When an equal key is
    /// already present its key and value are replaced, the previous pair is
    /// passed to the removal callbacks, and `false` is returned.
    pub fn insert(&mut self, key: K, value: V) -> bool {
        if self.buckets.is_empty() {
            self.create_buckets();
        }
        let hash = self.hash.hash_key(&key);
        let head = self.buckets[self.bucket_of(hash)];
        let eq = &self.eq;
        let mut incoming = Some((key, value));
        let replaced = self.heap.with_heap_mut(&self.options, |heap| {
            let mut cursor = head;
            while let Some(idx) = cursor {
                let entry = heap.entry_mut(idx);
                if entry.hash == hash && eq.key_eq(&entry.key, &key) {
                    let (key, value) = incoming.take()?;
                    let old_key = std::mem::replace(&mut entry.key, key);
                    let old_value = std::mem::replace(&mut entry.value, value);
                    return Some((old_key, old_value));
                }
                cursor = entry.next;
            }
            None
        });
        if let Some((old_key, old_value)) = replaced {
            trace!(hash, "table.replace");
            self.did_remove(old_key, old_value);
            return false;
        }
        let Some((key, value)) = incoming else {
            return false;
        };

        if self.count as u64 + 1 > self.options.growth_threshold(self.width) {
            self.grow();
        }
        let bucket = self.bucket_of(hash);
        let entry = Entry {
            key,
            value,
            hash,
            next: self.buckets[bucket],
        };
        let spare = self.spare;
        let (idx, next_spare) = self.heap.with_heap_mut(&self.options, |heap| match spare {
            Some(idx) => (idx, heap.reuse(idx, entry)),
            None => (heap.alloc(entry), None),
        });
        if spare.is_some() {
            self.spare = next_spare;
            self.spare_count -= 1;
            record(ProfileCounter::TableSpareReuse, 1);
        }
        self.buckets[bucket] = Some(idx);
        self.count += 1;
        true
    }

    /// Removes the entry matching `key`, passing it to the removal callbacks.
    ///
    /// The entry's slot is kept on the free list for the next insert.
    pub fn remove(&mut self, key: &K) -> bool {
        if self.count == 0 {
            return false;
        }
        let hash = self.hash.hash_key(key);
        let bucket = self.bucket_of(hash);
        let head = self.buckets[bucket];
        let spare = self.spare;
        let (eq, by_pointer) = (&self.eq, self.compare_by_pointer);
        let removed = self.heap.with_heap_mut(&self.options, |heap| {
            let mut prev: Option<EntryIdx> = None;
            let mut cursor = head;
            while let Some(idx) = cursor {
                let entry = heap.entry(idx);
                let found = if by_pointer {
                    entry.key == *key
                } else {
                    entry.hash == hash && eq.key_eq(&entry.key, key)
                };
                if found {
                    let next = entry.next;
                    if let Some(prev) = prev {
                        heap.entry_mut(prev).next = next;
                    }
                    return Some((idx, prev.is_none(), heap.retire(idx, spare)));
                }
                prev = cursor;
                cursor = entry.next;
            }
            None
        });
        let Some((idx, was_head, entry)) = removed else {
            return false;
        };
        if was_head {
            self.buckets[bucket] = entry.next;
        }
        self.spare = Some(idx);
        self.spare_count += 1;
        self.count -= 1;
        self.did_remove(entry.key, entry.value);
        true
    }

    /// Visits every live entry once, in bucket order.
    ///
    /// With a shared heap `visit` runs under the heap lock and must not
    /// touch tables sharing it.
    pub fn for_each(&self, mut visit: impl FnMut(&K, &V)) {
        if self.count == 0 {
            return;
        }
        self.heap.with_heap(|heap| {
            for head in &self.buckets {
                let mut cursor = *head;
                while let Some(idx) = cursor {
                    let entry = heap.entry(idx);
                    visit(&entry.key, &entry.value);
                    cursor = entry.next;
                }
            }
        });
    }

    /// Copies out every live entry.
    pub fn entries(&self) -> Vec<(K, V)>
    where
        V: Clone,
    {
        let mut out = Vec::with_capacity(self.count);
        self.for_each(|key, value| out.push((*key, value.clone())));
        out
    }

    fn create_buckets(&mut self) {
        self.width = self.options.initial_width;
        self.buckets = vec![None; 1usize << self.width];
        debug!(width = self.width, "table.buckets.create");
    }

    /// Doubles the bucket array and redistributes entries by their stored hash.
    fn grow(&mut self) {
        if self.width >= self.options.max_width {
            record(ProfileCounter::TableGrowRefused, 1);
            if !self.growth_refused {
                self.growth_refused = true;
                warn!(width = self.width, count = self.count, "table.grow.refused");
            }
            return;
        }
        let old = std::mem::take(&mut self.buckets);
        let width = self.width + 1;
        let mut buckets = vec![None; 1usize << width];
        self.heap.with_heap_mut(&self.options, |heap| {
            for head in old {
                let mut cursor = head;
                while let Some(idx) = cursor {
                    let entry = heap.entry_mut(idx);
                    cursor = entry.next;
                    let bucket = bucket_index(entry.hash, width);
                    entry.next = buckets[bucket];
                    buckets[bucket] = Some(idx);
                }
            }
        });
        self.buckets = buckets;
        self.width = width;
        record(ProfileCounter::TableGrow, 1);
        debug!(width, count = self.count, "table.grow");
    }
}

fn bucket_index(hash: u64, width: u32) -> usize {
    (hash & ((1u64 << width) - 1)) as usize
}

impl<K, V, H, E, A> Drop for HashTable<K, V, H, E, A>
where
    A: HeapHandle<K, V>,
{
    fn drop(&mut self) {
        let drained = self.retire_all();
        for (key, value) in drained {
            self.did_remove(key, value);
        }
        let slots = self.spare_slots();
        self.heap.teardown(slots);
    }
}

impl<K, V, H, E, A> fmt::Debug for HashTable<K, V, H, E, A>
where
    A: HeapHandle<K, V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HashTable")
            .field("len", &self.count)
            .field("width", &self.width)
            .field("spare", &self.spare_count)
            .field("compare_by_pointer", &self.compare_by_pointer)
            .finish()
    }
}
