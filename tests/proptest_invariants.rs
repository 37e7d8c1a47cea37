//! Property-based coverage for `NibbleBasedMap` (spec.md §8, invariants 3
//! and 7). Grounded in the wider pack's Merkle/page-store crates
//! (`other_examples/.../aptos-labs-aptos-core`,
//! `other_examples/.../kanari-network-kanari-L2`), both of which reach for
//! `proptest` to fuzz page/tree invariants rather than hand-writing a fixed
//! table of cases -- the same reasoning applies here, since the slot/heap
//! layout is exactly the kind of bit-packed state machine that benefits
//! from randomized operation sequences.

use proptest::prelude::*;

use nibble_store::key::Key;
use nibble_store::nibble_path::NibblePath;
use nibble_store::page::nibble_map::NibbleBasedMap;

const REGION_SIZE: usize = 1024;

#[derive(Clone, Debug)]
enum Op {
    Set { path: Vec<u8>, value_len: u8 },
    DeleteExisting { pick: u8 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (prop::collection::vec(any::<u8>(), 1..4), any::<u8>())
            .prop_map(|(path, value_len)| Op::Set { path, value_len }),
        any::<u8>().prop_map(|pick| Op::DeleteExisting { pick }),
    ]
}

fn key_for(path_bytes: &[u8]) -> Key {
    Key::account(NibblePath::from_bytes(path_bytes))
}

proptest! {
    /// spec.md §8 invariant 7 ("Tombstone freedom"): after any sequence of
    /// operations ending in a successful `Set`, the tail slot must be live.
    #[test]
    fn tail_slot_is_always_live_after_a_set(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut buf = vec![0u8; REGION_SIZE];
        NibbleBasedMap::init(&mut buf);
        let mut map = NibbleBasedMap::new(&mut buf);

        let mut live: Vec<Vec<u8>> = Vec::new();
        let mut last_was_set = false;

        for op in &ops {
            match op {
                Op::Set { path, value_len } => {
                    let key = key_for(path);
                    let value = vec![0xAB; 1 + (*value_len as usize % 16)];
                    if map.try_set(&key, &value) {
                        if !live.iter().any(|p| p == path) {
                            live.push(path.clone());
                        }
                        last_was_set = true;
                    }
                }
                Op::DeleteExisting { pick } => {
                    if !live.is_empty() {
                        let idx = (*pick as usize) % live.len();
                        let path = live.remove(idx);
                        map.delete(&key_for(&path));
                        last_was_set = false;
                    }
                }
            }
        }

        if last_was_set && map.slot_count() > 0 {
            let entries = map.enumerate_nibble(None);
            // The very last slot index must belong to a live entry: collect
            // the set of indices `enumerate_nibble` reports as live and
            // check the tail index is among them.
            let tail_index = map.slot_count() - 1;
            prop_assert!(
                entries.iter().any(|e| e.index == tail_index),
                "tail slot {} is a tombstone after a Set",
                tail_index
            );
        }
    }

    /// spec.md §8 invariant 3 ("Defragment preserves contents"): the live
    /// multiset of `(path, data)` pairs is unchanged across a `Defragment`.
    #[test]
    fn defragment_preserves_the_live_multiset(ops in prop::collection::vec(op_strategy(), 1..60)) {
        let mut buf = vec![0u8; REGION_SIZE];
        NibbleBasedMap::init(&mut buf);
        let mut map = NibbleBasedMap::new(&mut buf);

        let mut live: Vec<Vec<u8>> = Vec::new();
        for op in &ops {
            match op {
                Op::Set { path, value_len } => {
                    let key = key_for(path);
                    let value = vec![0xCD; 1 + (*value_len as usize % 16)];
                    if map.try_set(&key, &value) && !live.iter().any(|p| p == path) {
                        live.push(path.clone());
                    }
                }
                Op::DeleteExisting { pick } => {
                    if !live.is_empty() {
                        let idx = (*pick as usize) % live.len();
                        let path = live.remove(idx);
                        map.delete(&key_for(&path));
                    }
                }
            }
        }

        let mut before: Vec<(Vec<u8>, Vec<u8>)> = map
            .enumerate_nibble(None)
            .into_iter()
            .map(|e| (e.key.path.packed_bytes().to_vec(), e.data))
            .collect();
        before.sort();

        map.defragment();
        prop_assert_eq!(map.deleted_count(), 0);

        let mut after: Vec<(Vec<u8>, Vec<u8>)> = map
            .enumerate_nibble(None)
            .into_iter()
            .map(|e| (e.key.path.packed_bytes().to_vec(), e.data))
            .collect();
        after.sort();

        prop_assert_eq!(before, after);
    }
}
