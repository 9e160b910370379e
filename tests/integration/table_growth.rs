#![allow(clippy::all)]

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;
use std::sync::Once;

use attrgraph::{
    primitives::table::{HashTable, SharedHeap, TableOptions},
    types::Result,
};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("attrgraph=warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

type Log = Rc<RefCell<Vec<(u64, u64)>>>;

/// Table whose removal callbacks append to a shared log of `(key, value)` pairs.
fn logged_table() -> Result<(HashTable<u64, u64>, Log, Log)> {
    let keys: Log = Rc::default();
    let values: Log = Rc::default();
    let (key_sink, value_sink) = (Rc::clone(&keys), Rc::clone(&values));
    let table = HashTable::<u64, u64>::builder()
        .on_remove_key(move |key| key_sink.borrow_mut().push((key, 0)))
        .on_remove_value(move |value| value_sink.borrow_mut().push((0, value)))
        .build()?;
    Ok((table, keys, values))
}

#[test]
fn two_hundred_keys_survive_growth() -> Result<()> {
    init_tracing();
    let mut table = HashTable::<u64, u64>::with_options(TableOptions::default())?;
    let mut widths = BTreeSet::new();
    for key in 0..200u64 {
        assert!(table.insert(key * 8, key));
        widths.insert(table.bucket_count());
    }
    assert_eq!(widths.into_iter().collect::<Vec<_>>(), vec![16, 32, 64]);
    for key in 0..200u64 {
        assert_eq!(table.lookup(&(key * 8)), Some(key), "key {key}");
    }
    assert_eq!(table.lookup(&4), None);

    let mut seen = Vec::new();
    table.for_each(|key, value| {
        assert_eq!(*key, value * 8);
        seen.push(*key);
    });
    seen.sort_unstable();
    assert_eq!(seen, (0..200u64).map(|k| k * 8).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn for_each_skips_removed_keys() -> Result<()> {
    init_tracing();
    let mut rng = ChaCha8Rng::seed_from_u64(0x5eed);
    let mut keys: Vec<u64> = (1..=300).collect();
    keys.shuffle(&mut rng);

    let mut table = HashTable::<u64, u64>::new();
    for &key in &keys {
        table.insert(key, key ^ 0xff);
    }
    let (gone, kept) = keys.split_at(120);
    for key in gone {
        assert!(table.remove(key));
        assert!(!table.remove(key));
    }
    assert_eq!(table.len(), kept.len());
    assert_eq!(table.spare_count(), gone.len());

    let mut visited = Vec::new();
    table.for_each(|key, value| {
        assert_eq!(*value, key ^ 0xff);
        visited.push(*key);
    });
    visited.sort_unstable();
    let mut expected = kept.to_vec();
    expected.sort_unstable();
    assert_eq!(visited, expected);
    Ok(())
}

#[test]
fn replacing_reports_false_and_notifies_once() -> Result<()> {
    init_tracing();
    let (mut table, keys, values) = logged_table()?;
    assert!(table.insert(42, 1));
    assert!(!table.insert(42, 2));
    assert_eq!(table.lookup(&42), Some(2));
    assert_eq!(table.lookup_key(&42), Some((42, 2)));
    assert_eq!(table.len(), 1);
    assert_eq!(*keys.borrow(), vec![(42, 0)]);
    assert_eq!(*values.borrow(), vec![(0, 1)]);
    Ok(())
}

#[test]
fn removal_feeds_the_free_list() -> Result<()> {
    init_tracing();
    let (mut table, keys, values) = logged_table()?;
    for key in 0..70u64 {
        table.insert(key, key + 1000);
    }
    assert!(table.remove(&17));
    assert_eq!(table.lookup(&17), None);
    assert_eq!(*keys.borrow(), vec![(17, 0)]);
    assert_eq!(*values.borrow(), vec![(0, 1017)]);
    assert_eq!(table.spare_count(), 1);

    assert!(table.insert(9000, 9));
    assert_eq!(table.spare_count(), 0);
    assert!(table.insert(17, 17));
    for key in (0..70u64).filter(|k| *k != 17) {
        assert_eq!(table.lookup(&key), Some(key + 1000));
    }
    assert_eq!(table.lookup(&9000), Some(9));
    assert_eq!(table.lookup(&17), Some(17));
    Ok(())
}

#[test]
fn dropping_a_table_notifies_every_entry() -> Result<()> {
    init_tracing();
    let (mut table, keys, values) = logged_table()?;
    for key in 0..25u64 {
        table.insert(key, key);
    }
    table.remove(&3);
    drop(table);
    assert_eq!(keys.borrow().len(), 25);
    let mut dropped: Vec<u64> = values.borrow().iter().map(|(_, v)| *v).collect();
    dropped.sort_unstable();
    assert_eq!(dropped, (0..25u64).collect::<Vec<_>>());
    Ok(())
}

#[test]
fn tables_sharing_a_heap_recycle_each_others_slots() -> Result<()> {
    init_tracing();
    let heap = SharedHeap::new(&TableOptions::default());
    let mut long_lived = HashTable::<u64, String>::builder()
        .shared_heap(heap.clone())
        .build()?;
    for round in 0..3u64 {
        long_lived.insert(round, format!("kept-{round}"));
    }
    for round in 0..3u64 {
        let mut scratch = HashTable::<u64, String>::builder()
            .shared_heap(heap.clone())
            .build()?;
        for key in 0..40u64 {
            scratch.insert(key, format!("scratch-{round}-{key}"));
        }
        assert_eq!(scratch.lookup(&7).as_deref(), Some(&*format!("scratch-{round}-7")));
        assert_eq!(heap.slot_count(), 43);
    }
    // Each scratch table handed its 40 slots back for the next one.
    assert_eq!(heap.released_count(), 40);
    for round in 0..3u64 {
        assert_eq!(long_lived.lookup(&round), Some(format!("kept-{round}")));
    }
    Ok(())
}
