//! `HashingMap` (spec.md §4.C): an open-addressed probing cache overlaid
//! on a DataPage's data region once every bucket-table entry is populated
//! and the incoming key is cache-eligible (`key::can_be_cached`). No
//! teacher analogue -- `small-db`'s B-tree has no secondary in-page index
//! concept -- built from spec.md's description plus the linear-probing
//! resolution recorded in DESIGN.md's Open Questions; `bit-vec` tracks
//! occupancy the way the teacher's `btree/page/leaf_page.rs` tracks slot
//! occupancy with a header bitmap, generalized from one bit per fixed
//! tuple slot to one bit per hash bucket.
//!
//! Each occupied bucket holds a full `(hash, key, value)` triple, encoded
//! into a fixed-size heap slot dedicated to that bucket index (spec.md
//! §4.C: "Stores (hash32, key-payload, value) triples"). Unlike
//! `NibbleBasedMap`, entries here are never referenced by index from
//! elsewhere: spec.md Invariant 3 clears the slot map the moment the cache
//! activates, so a cached entry must be fully self-describing.

use crate::hash::get_hash;
use crate::key::{DataType, Key};
use crate::nibble_path::NibblePath;

use bit_vec::BitVec;

const DESCRIPTOR_SIZE: usize = 8; // hash: u32 (4) + len: u16 (2) + pad: u16 (2)

fn bitmap_bytes(capacity: usize) -> usize {
    (capacity + 7) / 8
}

fn descriptors_offset(capacity: usize) -> usize {
    bitmap_bytes(capacity)
}

fn heap_offset(capacity: usize) -> usize {
    descriptors_offset(capacity) + capacity * DESCRIPTOR_SIZE
}

/// Total bytes a `HashingMap` of `capacity` entries, each at most
/// `max_item_size` encoded bytes, occupies.
pub fn region_size(capacity: usize, max_item_size: usize) -> usize {
    heap_offset(capacity) + capacity * max_item_size
}

/// A view over a byte region holding an open-addressed hash table: one
/// fixed-size heap slot per descriptor index (no bump allocation needed,
/// since capacity and per-item budget are both fixed at construction).
pub struct HashingMap<'a> {
    data: &'a mut [u8],
    capacity: usize,
    max_item_size: usize,
    occupied: BitVec,
}

/// One live entry as yielded by `enumerate` (used by `DataPage`'s cache
/// spill, spec.md §4.D "Cache spill").
pub struct HashingEntry {
    pub hash: u32,
    pub key: Key,
    pub data: Vec<u8>,
}

impl<'a> HashingMap<'a> {
    pub fn new(data: &'a mut [u8], capacity: usize, max_item_size: usize) -> Self {
        assert!(
            data.len() >= region_size(capacity, max_item_size),
            "hashing map region too small for capacity {capacity}"
        );
        let occupied = BitVec::from_bytes(&data[0..bitmap_bytes(capacity)]);
        Self {
            data,
            capacity,
            max_item_size,
            occupied,
        }
    }

    /// Zeroes `data` into an empty table of `capacity` entries.
    pub fn init(data: &mut [u8], capacity: usize, max_item_size: usize) {
        for b in &mut data[0..region_size(capacity, max_item_size)] {
            *b = 0;
        }
    }

    fn flush_bitmap(&mut self) {
        let bytes = self.occupied.to_bytes();
        self.data[0..bytes.len()].copy_from_slice(&bytes);
    }

    fn read_descriptor(&self, index: usize) -> (u32, usize) {
        let offset = descriptors_offset(self.capacity) + index * DESCRIPTOR_SIZE;
        let hash = u32::from_le_bytes([
            self.data[offset],
            self.data[offset + 1],
            self.data[offset + 2],
            self.data[offset + 3],
        ]);
        let len = u16::from_le_bytes([self.data[offset + 4], self.data[offset + 5]]) as usize;
        (hash, len)
    }

    fn write_descriptor(&mut self, index: usize, hash: u32, len: usize) {
        let offset = descriptors_offset(self.capacity) + index * DESCRIPTOR_SIZE;
        self.data[offset..offset + 4].copy_from_slice(&hash.to_le_bytes());
        self.data[offset + 4..offset + 6].copy_from_slice(&(len as u16).to_le_bytes());
    }

    fn heap_slot_mut(&mut self, index: usize) -> &mut [u8] {
        let offset = heap_offset(self.capacity) + index * self.max_item_size;
        &mut self.data[offset..offset + self.max_item_size]
    }

    fn heap_slot(&self, index: usize, len: usize) -> &[u8] {
        let offset = heap_offset(self.capacity) + index * self.max_item_size;
        &self.data[offset..offset + len]
    }

    fn encode(key: &Key, data: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + key.path.packed_bytes().len() + key.additional_key.len() + data.len());
        out.push(key.ty as u8);
        out.push(key.path.len() as u8);
        out.extend_from_slice(key.path.packed_bytes());
        out.extend_from_slice(&key.additional_key);
        out.extend_from_slice(data);
        out
    }

    fn decode(bytes: &[u8]) -> (Key, Vec<u8>) {
        let ty = DataType::from_u8(bytes[0]);
        let nibble_count = bytes[1] as usize;
        let packed_len = (nibble_count + 1) / 2;
        let mut cursor = 2usize;
        let path = NibblePath::from_packed(nibble_count, bytes[cursor..cursor + packed_len].to_vec());
        cursor += packed_len;
        let additional_key = if ty.has_additional_key() {
            let ak = bytes[cursor..cursor + 32].to_vec();
            cursor += 32;
            ak
        } else {
            Vec::new()
        };
        let data = bytes[cursor..].to_vec();
        (Key::new(path, ty, additional_key), data)
    }

    fn probe_sequence(&self, hash: u32) -> impl Iterator<Item = usize> {
        let capacity = self.capacity;
        let start = (hash as usize) % capacity;
        (0..capacity).map(move |i| (start + i) % capacity)
    }

    /// Looks up `key`'s cached value, linearly probing from the home
    /// bucket until an empty slot is found or a stored entry's full key
    /// matches (not just its hash, so a collision between two different
    /// keys degrades to a continued probe rather than a false hit).
    pub fn try_get(&self, key: &Key) -> Option<Vec<u8>> {
        let hash = get_hash(key);
        for index in self.probe_sequence(hash) {
            if !self.occupied[index] {
                return None;
            }
            let (stored_hash, len) = self.read_descriptor(index);
            if stored_hash == hash {
                let (stored_key, value) = Self::decode(self.heap_slot(index, len));
                if &stored_key == key {
                    return Some(value);
                }
            }
        }
        None
    }

    /// Inserts or updates the cached value for `key`. Returns `false` if
    /// the table is full and `key` is not already present, or if the
    /// encoded entry would not fit in one heap slot (spec.md §4.C:
    /// callers fall back to forwarding the write normally on either).
    pub fn try_set(&mut self, key: &Key, data: &[u8]) -> bool {
        let encoded = Self::encode(key, data);
        if encoded.len() > self.max_item_size {
            return false;
        }
        let hash = get_hash(key);
        for index in self.probe_sequence(hash) {
            if !self.occupied[index] {
                self.occupied.set(index, true);
                self.write_descriptor(index, hash, encoded.len());
                self.heap_slot_mut(index)[0..encoded.len()].copy_from_slice(&encoded);
                self.flush_bitmap();
                return true;
            }
            let (stored_hash, len) = self.read_descriptor(index);
            if stored_hash == hash {
                let (stored_key, _) = Self::decode(self.heap_slot(index, len));
                if &stored_key == key {
                    self.write_descriptor(index, hash, encoded.len());
                    self.heap_slot_mut(index)[0..encoded.len()].copy_from_slice(&encoded);
                    return true;
                }
            }
        }
        false
    }

    /// Whether every bucket is occupied (spec.md §4.C: a full cache is
    /// still consulted for reads but never accepts new keys).
    pub fn is_full(&self) -> bool {
        (0..self.capacity).all(|index| self.occupied[index])
    }

    /// Every currently-stored entry, for cache spill (spec.md §4.D).
    pub fn enumerate(&self) -> Vec<HashingEntry> {
        (0..self.capacity)
            .filter(|&index| self.occupied[index])
            .map(|index| {
                let (hash, len) = self.read_descriptor(index);
                let (key, data) = Self::decode(self.heap_slot(index, len));
                HashingEntry { hash, key, data }
            })
            .collect()
    }

    /// Discards every cached entry (spec.md §4.C `Clear`). `TryGet` never
    /// returns stale data after this: clearing the occupancy bitmap alone
    /// is sufficient, since every lookup stops at the first unoccupied
    /// bucket in its probe sequence.
    pub fn clear(&mut self) {
        for index in 0..self.capacity {
            self.occupied.set(index, false);
        }
        self.flush_bitmap();
    }
}
