//! `NibbleBasedMap` (spec.md §4.B): an append-only slot directory growing
//! from the low end of a byte region, and a heap of variable-length items
//! growing from the high end. No direct teacher analogue -- the teacher's
//! `BTreeLeafPage`/`BTreeInternalPage` track a bitmap of *fixed-width*
//! tuple slots (see `btree/page/leaf_page.rs::is_slot_used`/
//! `insert_tuple`) -- but the "one page, one in-place directory, overflow
//! triggers a structural change" idiom is the same; this type generalizes
//! it to a variable-length heap per spec.md.

use itertools::Itertools;

use crate::consts::MIN_DATA_REGION_SIZE;
use crate::key::{DataType, Key};
use crate::nibble_path::{Nibble, NibblePath};

use super::slot::{Slot, SLOT_SIZE};

const HEADER_SIZE: usize = 8;

/// A view over a page's data region, interpreted as a `NibbleBasedMap`.
/// Borrows the backing bytes mutably for the duration of any mutating
/// call; read-only calls only need `&[u8]` but we keep one representation
/// for simplicity, matching how the teacher's page types hold their whole
/// byte buffer behind a single struct.
pub struct NibbleBasedMap<'a> {
    data: &'a mut [u8],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Header {
    low: u16,
    high: u16,
    deleted: u16,
}

impl Header {
    fn read(data: &[u8]) -> Self {
        Header {
            low: u16::from_le_bytes([data[0], data[1]]),
            high: u16::from_le_bytes([data[2], data[3]]),
            deleted: u16::from_le_bytes([data[4], data[5]]),
        }
    }

    fn write(self, data: &mut [u8]) {
        data[0..2].copy_from_slice(&self.low.to_le_bytes());
        data[2..4].copy_from_slice(&self.high.to_le_bytes());
        data[4..6].copy_from_slice(&self.deleted.to_le_bytes());
        data[6] = 0;
        data[7] = 0;
    }
}

/// One live entry as yielded by `enumerate_nibble`.
pub struct EnumeratedEntry {
    pub index: usize,
    pub ty: DataType,
    pub key: Key,
    pub data: Vec<u8>,
}

/// Result of `biggest_nibble_stats`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BiggestNibbleStats {
    pub nibble: Nibble,
    pub storage_cell_ratio: f64,
}

impl<'a> NibbleBasedMap<'a> {
    /// Wraps `data` as a `NibbleBasedMap`. Does not assume the region has
    /// been initialized; call `init` on a freshly zeroed region first.
    pub fn new(data: &'a mut [u8]) -> Self {
        assert!(
            data.len() >= MIN_DATA_REGION_SIZE,
            "data region too small for a NibbleBasedMap: {} < {}",
            data.len(),
            MIN_DATA_REGION_SIZE
        );
        Self { data }
    }

    /// Resets the region to an empty map (zeroed header, no slots).
    pub fn init(data: &mut [u8]) {
        Header {
            low: 0,
            high: 0,
            deleted: 0,
        }
        .write(data);
    }

    fn capacity(&self) -> usize {
        self.data.len() - HEADER_SIZE
    }

    fn header(&self) -> Header {
        Header::read(self.data)
    }

    fn set_header(&mut self, header: Header) {
        header.write(self.data);
    }

    pub fn slot_count(&self) -> usize {
        self.header().low as usize / SLOT_SIZE
    }

    pub fn deleted_count(&self) -> usize {
        self.header().deleted as usize
    }

    /// Number of live (non-deleted) slots.
    pub fn count(&self) -> usize {
        self.slot_count() - self.deleted_count()
    }

    fn slot_at(&self, index: usize) -> Slot {
        let offset = HEADER_SIZE + index * SLOT_SIZE;
        let mut bytes = [0u8; SLOT_SIZE];
        bytes.copy_from_slice(&self.data[offset..offset + SLOT_SIZE]);
        Slot::from_bytes(bytes)
    }

    fn set_slot_at(&mut self, index: usize, slot: Slot) {
        let offset = HEADER_SIZE + index * SLOT_SIZE;
        self.data[offset..offset + SLOT_SIZE].copy_from_slice(&slot.to_bytes());
    }

    /// Upper bound (exclusive), in the capacity-relative coordinate space,
    /// of the item belonging to slot `index`. Items are appended to the
    /// heap in insertion order from the high end down, so an earlier slot
    /// always has a strictly larger `item_address` than every slot
    /// inserted after it; the boundary of slot `index`'s item is therefore
    /// the previous slot's `item_address` (spec.md §3: "the next lower
    /// slot's ItemAddress gives the upper bound"), or the full capacity
    /// for the very first slot.
    fn item_upper_bound(&self, index: usize) -> usize {
        if index == 0 {
            self.capacity()
        } else {
            self.slot_at(index - 1).item_address() as usize
        }
    }

    fn item_bytes(&self, index: usize) -> &[u8] {
        let slot = self.slot_at(index);
        let start = HEADER_SIZE + slot.item_address() as usize;
        let end = HEADER_SIZE + self.item_upper_bound(index);
        &self.data[start..end]
    }

    fn item_bytes_mut(&mut self, index: usize) -> &mut [u8] {
        let slot = self.slot_at(index);
        let start = HEADER_SIZE + slot.item_address() as usize;
        let end = HEADER_SIZE + self.item_upper_bound(index);
        &mut self.data[start..end]
    }

    /// Encodes `[nibble_count: u8][residual packed bytes][additional_key?]`
    /// -- the fixed-shape prefix every heap item starts with, ahead of the
    /// caller's opaque `data` payload.
    fn encode_item_key_header(residual: &NibblePath, additional_key: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + residual.packed_bytes().len() + additional_key.len());
        out.push(residual.len() as u8);
        out.extend_from_slice(residual.packed_bytes());
        out.extend_from_slice(additional_key);
        out
    }

    fn item_key_header_len(residual: &NibblePath, ty: DataType) -> usize {
        1 + residual.packed_bytes().len()
            + if ty.has_additional_key() { 32 } else { 0 }
    }

    /// Looks up `key`, returning its stored payload if present.
    ///
    /// This is the safe equivalent of the source's vectorized `u16`-stream
    /// scan (spec.md §4.B): instead of reinterpreting the slot array as a
    /// raw `u16` buffer and filtering matches that land on the odd
    /// (`Prefix`) half-word via pointer arithmetic, we walk slots directly
    /// and compare `Prefix`/`Type` -- same observable behavior, no unsafe
    /// aliasing (spec.md §9 Design Notes takes the same approach for
    /// enumeration).
    pub fn try_get(&self, key: &Key) -> Option<&[u8]> {
        let (target_prefix, residual) = Slot::extract_prefix(&key.path);
        for index in 0..self.slot_count() {
            let slot = self.slot_at(index);
            if slot.ty() == DataType::Deleted || slot.prefix != target_prefix {
                continue;
            }
            if slot.ty() != key.ty {
                continue;
            }
            let header_len = Self::item_key_header_len(&residual, key.ty);
            let item = self.item_bytes(index);
            if item.len() < header_len {
                continue;
            }
            let stored_count = item[0] as usize;
            if stored_count != residual.len() {
                continue;
            }
            let residual_packed = residual.packed_bytes();
            if &item[1..1 + residual_packed.len()] != residual_packed {
                continue;
            }
            if key.ty.has_additional_key() {
                let ak_start = 1 + residual_packed.len();
                if &item[ak_start..ak_start + 32] != key.additional_key.as_slice() {
                    continue;
                }
            }
            return Some(&item[header_len..]);
        }
        None
    }

    fn find_slot_index(&self, key: &Key) -> Option<usize> {
        // reuse try_get's matching logic without borrowing the payload
        let (target_prefix, residual) = Slot::extract_prefix(&key.path);
        for index in 0..self.slot_count() {
            let slot = self.slot_at(index);
            if slot.ty() == DataType::Deleted || slot.prefix != target_prefix {
                continue;
            }
            if slot.ty() != key.ty {
                continue;
            }
            let header_len = Self::item_key_header_len(&residual, key.ty);
            let item = self.item_bytes(index);
            if item.len() < header_len {
                continue;
            }
            let stored_count = item[0] as usize;
            if stored_count != residual.len() {
                continue;
            }
            let residual_packed = residual.packed_bytes();
            if &item[1..1 + residual_packed.len()] != residual_packed {
                continue;
            }
            if key.ty.has_additional_key() {
                let ak_start = 1 + residual_packed.len();
                if &item[ak_start..ak_start + 32] != key.additional_key.as_slice() {
                    continue;
                }
            }
            return Some(index);
        }
        None
    }

    /// Attempts to insert or overwrite `key -> data`. Returns `false` when
    /// the map is full (post-defragment) and the item genuinely does not
    /// fit (spec.md §4.B `TrySet`).
    pub fn try_set(&mut self, key: &Key, data: &[u8]) -> bool {
        if let Some(index) = self.find_slot_index(key) {
            let existing_header_len = {
                let (_, residual) = Slot::extract_prefix(&key.path);
                Self::item_key_header_len(&residual, key.ty)
            };
            let existing_len = self.item_bytes(index).len() - existing_header_len;
            if existing_len == data.len() {
                let value_slice = &mut self.item_bytes_mut(index)[existing_header_len..];
                value_slice.copy_from_slice(data);
                return true;
            }
            let mut slot = self.slot_at(index);
            slot = slot.with_type(DataType::Deleted);
            self.set_slot_at(index, slot);
            let mut header = self.header();
            header.deleted += 1;
            self.set_header(header);
        }

        self.append_new_slot(key, data)
    }

    fn append_new_slot(&mut self, key: &Key, data: &[u8]) -> bool {
        let (prefix, residual) = Slot::extract_prefix(&key.path);
        let key_header = Self::encode_item_key_header(&residual, &key.additional_key);
        let total = key_header.len() + data.len();

        if self.taken() + total + SLOT_SIZE > self.capacity() {
            if self.header().deleted == 0 {
                return false;
            }
            self.defragment();
            if self.taken() + total + SLOT_SIZE > self.capacity() {
                return false;
            }
        }

        let mut header = self.header();
        let item_address = self.capacity() - header.high as usize - total;
        let slot_index = header.low as usize / SLOT_SIZE;

        let slot = Slot::new(item_address as u16, key.ty, prefix);
        self.set_slot_at(slot_index, slot);

        let start = HEADER_SIZE + item_address;
        self.data[start..start + key_header.len()].copy_from_slice(&key_header);
        self.data[start + key_header.len()..start + total].copy_from_slice(data);

        header.low += SLOT_SIZE as u16;
        header.high += total as u16;
        self.set_header(header);
        true
    }

    fn taken(&self) -> usize {
        let header = self.header();
        header.low as usize + header.high as usize
    }

    /// Marks `key`'s slot deleted (if present) and immediately collects
    /// tail tombstones (spec.md §4.B `Delete`). Returns whether the key
    /// was found.
    pub fn delete(&mut self, key: &Key) -> bool {
        let found = if let Some(index) = self.find_slot_index(key) {
            let slot = self.slot_at(index).with_type(DataType::Deleted);
            self.set_slot_at(index, slot);
            let mut header = self.header();
            header.deleted += 1;
            self.set_header(header);
            true
        } else {
            false
        };
        self.collect_tombstones();
        found
    }

    fn delete_by_index(&mut self, index: usize) {
        let slot = self.slot_at(index).with_type(DataType::Deleted);
        self.set_slot_at(index, slot);
        let mut header = self.header();
        header.deleted += 1;
        self.set_header(header);
        self.collect_tombstones();
    }

    /// Walks slots from the tail backward while they're tombstoned,
    /// reclaiming their slot and heap space (spec.md §4.B
    /// `CollectTombstones`). Keeps the hot tail compact without paying for
    /// mid-array deletes.
    pub fn collect_tombstones(&mut self) {
        loop {
            let slot_count = self.slot_count();
            if slot_count == 0 {
                break;
            }
            let last = slot_count - 1;
            let slot = self.slot_at(last);
            if slot.ty() != DataType::Deleted {
                break;
            }
            let item_len = self.item_bytes(last).len();
            let mut header = self.header();
            header.low -= SLOT_SIZE as u16;
            header.high -= item_len as u16;
            header.deleted -= 1;
            self.set_header(header);
            let offset = HEADER_SIZE + last * SLOT_SIZE;
            self.data[offset..offset + SLOT_SIZE].fill(0);
        }
    }

    /// Rebuilds the map in a scratch buffer to evict mid-array tombstones,
    /// preserving the relative order of live entries (spec.md §4.B
    /// `Defragment`).
    pub fn defragment(&mut self) {
        let mut scratch = vec![0u8; self.data.len()];
        Self::init(&mut scratch);
        {
            let mut fresh = NibbleBasedMap::new(&mut scratch);
            for index in 0..self.slot_count() {
                let slot = self.slot_at(index);
                if slot.ty() == DataType::Deleted {
                    continue;
                }
                let item = self.item_bytes(index);
                let (key, data) = self.reconstruct_entry(slot, item);
                let inserted = fresh.append_new_slot(&key, &data);
                assert!(inserted, "defragment: rebuilt map unexpectedly overflowed");
            }
        }
        self.data.copy_from_slice(&scratch);
        debug_assert_eq!(self.header().deleted, 0);
    }

    /// Reconstructs `(Key, value-bytes)` for a live slot, re-prepending
    /// the prefix nibbles to the residual path stored in the heap.
    fn reconstruct_entry(&self, slot: Slot, item: &[u8]) -> (Key, Vec<u8>) {
        let ty = slot.ty();
        let stored_count = item[0] as usize;
        let packed_len = (stored_count + 1) / 2;
        let residual_bytes = &item[1..1 + packed_len];
        let residual = NibblePath::from_packed(stored_count, residual_bytes.to_vec());

        let mut path = NibblePath::decode_nibbles_from_prefix(slot.prefix);
        for n in residual.iter() {
            path.push(n);
        }

        let mut cursor = 1 + packed_len;
        let additional_key = if ty.has_additional_key() {
            let ak = item[cursor..cursor + 32].to_vec();
            cursor += 32;
            ak
        } else {
            Vec::new()
        };
        let data = item[cursor..].to_vec();

        (Key::new(path, ty, additional_key), data)
    }

    /// Iterates live slots whose first prefix nibble is `nibble` (or every
    /// live slot when `nibble` is `None`, matching `AllNibbles` in spec.md
    /// §4.B). Returns owned entries -- the source's scratch-reuse caveat
    /// ("callers must copy before advancing") is moot in a safe
    /// implementation that never aliases caller memory.
    pub fn enumerate_nibble(&self, nibble: Option<Nibble>) -> Vec<EnumeratedEntry> {
        (0..self.slot_count())
            .filter_map(|index| {
                let slot = self.slot_at(index);
                if slot.ty() == DataType::Deleted {
                    return None;
                }
                if let Some(n) = nibble {
                    if slot.nibble_count() == 0 || slot.first_nibble_of_prefix() != n {
                        return None;
                    }
                }
                let item = self.item_bytes(index);
                let (key, data) = self.reconstruct_entry(slot, item);
                Some(EnumeratedEntry {
                    index,
                    ty: slot.ty(),
                    key,
                    data,
                })
            })
            .collect_vec()
    }

    /// Deletes the slot backing `entry` (as produced by `enumerate_nibble`).
    pub fn delete_entry(&mut self, entry: &EnumeratedEntry) {
        self.delete_by_index(entry.index);
    }

    /// Live-slot and `StorageCell`-slot counts per first-prefix-nibble,
    /// returning the nibble with the most live entries (ties broken by the
    /// smallest nibble) and that nibble's `StorageCell` share (spec.md
    /// §4.B `GetBiggestNibbleStats`).
    pub fn biggest_nibble_stats(&self) -> BiggestNibbleStats {
        let mut live_counts = [0usize; 16];
        let mut storage_cell_counts = [0usize; 16];
        let mut total_live = 0usize;

        for index in 0..self.slot_count() {
            let slot = self.slot_at(index);
            if slot.ty() == DataType::Deleted {
                continue;
            }
            total_live += 1;
            if slot.nibble_count() == 0 {
                continue;
            }
            let n = slot.first_nibble_of_prefix().value() as usize;
            live_counts[n] += 1;
            if slot.ty() == DataType::StorageCell {
                storage_cell_counts[n] += 1;
            }
        }

        let (best_nibble, best_count) = live_counts
            .iter()
            .enumerate()
            .max_by_key(|&(n, &count)| (count, std::cmp::Reverse(n)))
            .map(|(n, &count)| (n, count))
            .unwrap_or((0, 0));

        let _ = total_live;
        let ratio = if best_count == 0 {
            0.0
        } else {
            storage_cell_counts[best_nibble] as f64 / best_count as f64
        };

        BiggestNibbleStats {
            nibble: Nibble::new(best_nibble as u8),
            storage_cell_ratio: ratio,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;

    fn key_with_first_nibble(n: u8, tail: u8) -> Key {
        Key::account(NibblePath::from_bytes(&[(n << 4) | tail]))
    }

    #[test]
    fn insert_and_read_back() {
        let mut buf = vec![0u8; 256];
        NibbleBasedMap::init(&mut buf);
        let mut map = NibbleBasedMap::new(&mut buf);

        let key = key_with_first_nibble(0x5, 0xB);
        assert!(map.try_set(&key, &[0x01, 0x02]));
        assert_eq!(map.try_get(&key), Some(&[0x01, 0x02][..]));
        assert_eq!(map.count(), 1);
    }

    #[test]
    fn overwrite_same_length_leaves_header_unchanged() {
        let mut buf = vec![0u8; 256];
        NibbleBasedMap::init(&mut buf);
        let mut map = NibbleBasedMap::new(&mut buf);
        let key = key_with_first_nibble(0x5, 0xB);
        assert!(map.try_set(&key, &[1, 2, 3]));
        let header_before = map.header();
        assert!(map.try_set(&key, &[9, 9, 9]));
        assert_eq!(map.header(), header_before);
        assert_eq!(map.try_get(&key), Some(&[9, 9, 9][..]));
    }

    #[test]
    fn overwrite_different_length_tombstones_old_slot() {
        let mut buf = vec![0u8; 256];
        NibbleBasedMap::init(&mut buf);
        let mut map = NibbleBasedMap::new(&mut buf);
        let key = key_with_first_nibble(0x5, 0xB);
        assert!(map.try_set(&key, &[1, 2, 3]));
        assert!(map.try_set(&key, &[9, 9]));
        assert_eq!(map.try_get(&key), Some(&[9, 9][..]));
        assert_eq!(map.count(), 1);
        assert_eq!(map.slot_count(), 2);
    }

    #[test]
    fn tombstone_collapse_scenario_s6() {
        let mut buf = vec![0u8; 512];
        NibbleBasedMap::init(&mut buf);
        let mut map = NibbleBasedMap::new(&mut buf);

        let k1 = key_with_first_nibble(0x1, 0x1);
        let k2 = key_with_first_nibble(0x2, 0x2);
        let k3 = key_with_first_nibble(0x3, 0x3);
        assert!(map.try_set(&k1, b"a"));
        assert!(map.try_set(&k2, b"b"));
        assert!(map.try_set(&k3, b"c"));

        assert!(map.delete(&k3));
        assert_eq!(map.count(), 2);
        assert_eq!(map.slot_count(), 2); // tail tombstone reclaimed

        assert!(map.delete(&k1));
        assert_eq!(map.count(), 1);
        assert_eq!(map.slot_count(), 2); // mid-array tombstone retained

        map.defragment();
        assert_eq!(map.deleted_count(), 0);
        assert_eq!(map.count(), 1);
        assert_eq!(map.try_get(&k2), Some(&b"b"[..]));
    }

    #[test]
    fn defragment_preserves_contents() {
        let mut buf = vec![0u8; 512];
        NibbleBasedMap::init(&mut buf);
        let mut map = NibbleBasedMap::new(&mut buf);
        let keys: Vec<Key> = (0..10).map(|i| key_with_first_nibble((i % 16) as u8, i as u8)).collect();
        for (i, k) in keys.iter().enumerate() {
            assert!(map.try_set(k, &[i as u8]));
        }
        assert!(map.delete(&keys[3]));
        assert!(map.delete(&keys[5]));

        let mut before: Vec<(Vec<u8>, Vec<u8>)> = map
            .enumerate_nibble(None)
            .into_iter()
            .map(|e| (e.key.path.packed_bytes().to_vec(), e.data))
            .collect();
        before.sort();

        map.defragment();

        let mut after: Vec<(Vec<u8>, Vec<u8>)> = map
            .enumerate_nibble(None)
            .into_iter()
            .map(|e| (e.key.path.packed_bytes().to_vec(), e.data))
            .collect();
        after.sort();

        assert_eq!(before, after);
        assert_eq!(map.deleted_count(), 0);
    }

    #[test]
    fn enumerate_nibble_filters_by_first_nibble() {
        let mut buf = vec![0u8; 512];
        NibbleBasedMap::init(&mut buf);
        let mut map = NibbleBasedMap::new(&mut buf);
        for i in 0..5u8 {
            assert!(map.try_set(&key_with_first_nibble(0x7, i), &[i]));
        }
        for i in 0..3u8 {
            assert!(map.try_set(&key_with_first_nibble(0x2, i), &[i]));
        }
        let sevens = map.enumerate_nibble(Some(Nibble::new(0x7)));
        assert_eq!(sevens.len(), 5);
        let twos = map.enumerate_nibble(Some(Nibble::new(0x2)));
        assert_eq!(twos.len(), 3);
    }

    #[test]
    fn biggest_nibble_stats_picks_majority_and_ratio() {
        let mut buf = vec![0u8; 1024];
        NibbleBasedMap::init(&mut buf);
        let mut map = NibbleBasedMap::new(&mut buf);
        for i in 0..6u8 {
            let key = Key::storage_cell(
                NibblePath::from_bytes(&[(0x5 << 4) | i]),
                vec![0u8; 32],
            );
            assert!(map.try_set(&key, &[i]));
        }
        for i in 0..2u8 {
            assert!(map.try_set(&key_with_first_nibble(0x5, 0x8 + i), &[i]));
        }
        let stats = map.biggest_nibble_stats();
        assert_eq!(stats.nibble.value(), 0x5);
        assert!((stats.storage_cell_ratio - 0.75).abs() < 1e-9);
    }

    #[test]
    fn try_set_returns_false_when_full_and_no_tombstones() {
        let mut buf = vec![0u8; 32];
        NibbleBasedMap::init(&mut buf);
        let mut map = NibbleBasedMap::new(&mut buf);
        let mut inserted = 0;
        for i in 0..20u8 {
            if map.try_set(&key_with_first_nibble(0x5, i), &[i; 4]) {
                inserted += 1;
            } else {
                break;
            }
        }
        assert!(inserted > 0);
        assert!(!map.try_set(&key_with_first_nibble(0x9, 0xFF), &[0u8; 4]));
    }
}
