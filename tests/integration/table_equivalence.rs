#![allow(clippy::all)]

use std::collections::HashMap;

use attrgraph::primitives::table::{pointer_hash, HashTable, SharedHeap, TableOptions};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Operation {
    Insert { key: u64, value: u32 },
    Remove { key: u64 },
    Lookup { key: u64 },
}

fn arb_key() -> impl Strategy<Value = u64> {
    // Narrow key space so removals and replacements hit existing entries.
    prop_oneof![(0u64..96).prop_map(|k| k * 4), any::<u64>()]
}

fn arb_operation() -> impl Strategy<Value = Operation> {
    prop_oneof![
        4 => (arb_key(), any::<u32>()).prop_map(|(key, value)| Operation::Insert { key, value }),
        2 => arb_key().prop_map(|key| Operation::Remove { key }),
        2 => arb_key().prop_map(|key| Operation::Lookup { key }),
    ]
}

proptest! {
    #[test]
    fn prop_identity_fast_path_matches_explicit_equality(
        ops in prop::collection::vec(arb_operation(), 1..400)
    ) {
        let mut fast: HashTable<u64, u32> = HashTable::new();
        let mut explicit = HashTable::<u64, u32>::builder()
            .hasher(|key: &u64| pointer_hash(*key))
            .equality(|a: &u64, b: &u64| a == b)
            .build()
            .unwrap();
        prop_assert!(fast.compares_by_pointer());
        prop_assert!(!explicit.compares_by_pointer());

        let mut model: HashMap<u64, u32> = HashMap::new();
        for op in ops {
            match op {
                Operation::Insert { key, value } => {
                    let inserted = fast.insert(key, value);
                    prop_assert_eq!(inserted, explicit.insert(key, value));
                    prop_assert_eq!(inserted, model.insert(key, value).is_none());
                }
                Operation::Remove { key } => {
                    let removed = fast.remove(&key);
                    prop_assert_eq!(removed, explicit.remove(&key));
                    prop_assert_eq!(removed, model.remove(&key).is_some());
                }
                Operation::Lookup { key } => {
                    let found = fast.lookup(&key);
                    prop_assert_eq!(found, explicit.lookup(&key));
                    prop_assert_eq!(found, model.get(&key).copied());
                }
            }
            prop_assert_eq!(fast.len(), explicit.len());
        }

        let mut fast_entries = fast.entries();
        let mut explicit_entries = explicit.entries();
        fast_entries.sort_unstable();
        explicit_entries.sort_unstable();
        prop_assert_eq!(&fast_entries, &explicit_entries);
        let mut expected: Vec<(u64, u32)> = model.into_iter().collect();
        expected.sort_unstable();
        prop_assert_eq!(fast_entries, expected);
    }

    #[test]
    fn prop_absent_strategies_fall_back_to_identity(
        keys in prop::collection::vec(any::<u64>(), 1..200)
    ) {
        let mut defaulted = HashTable::<u64, usize>::builder()
            .hasher(None::<fn(&u64) -> u64>)
            .equality(None::<fn(&u64, &u64) -> bool>)
            .build()
            .unwrap();
        prop_assert!(defaulted.compares_by_pointer());
        let mut plain: HashTable<u64, usize> = HashTable::new();
        for (index, key) in keys.iter().enumerate() {
            prop_assert_eq!(defaulted.insert(*key, index), plain.insert(*key, index));
        }
        for key in &keys {
            prop_assert_eq!(defaulted.lookup(key), plain.lookup(key));
        }
        prop_assert_eq!(defaulted.bucket_count(), plain.bucket_count());
    }

    #[test]
    fn prop_shared_heap_matches_owned_heap(
        ops in prop::collection::vec(arb_operation(), 1..300)
    ) {
        let heap = SharedHeap::new(&TableOptions::default().heap_increment(8));
        let mut shared = HashTable::<u64, u32>::builder()
            .shared_heap(heap.clone())
            .build()
            .unwrap();
        let mut owned: HashTable<u64, u32> = HashTable::new();
        for op in ops {
            match op {
                Operation::Insert { key, value } => {
                    prop_assert_eq!(shared.insert(key, value), owned.insert(key, value));
                }
                Operation::Remove { key } => {
                    prop_assert_eq!(shared.remove(&key), owned.remove(&key));
                }
                Operation::Lookup { key } => {
                    prop_assert_eq!(shared.lookup(&key), owned.lookup(&key));
                }
            }
        }
        prop_assert_eq!(shared.spare_count(), owned.spare_count());
        let live = shared.len();
        drop(shared);
        prop_assert_eq!(heap.released_count(), heap.slot_count());
        prop_assert!(heap.slot_count() >= live);
    }
}
