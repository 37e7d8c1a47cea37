//! `DataPage` (spec.md §4.D): one node of the nibble-addressed radix tree.
//! Combines a bucket table (one child `DbAddress` per nibble), the inline
//! `NibbleBasedMap`, and an optional `HashingMap` cache, and implements
//! copy-on-write, overflow splits, storage-tree extraction, and cache
//! absorb/spill.
//!
//! Grounded on the teacher's `btree/page/internal_page.rs`/`leaf_page.rs`
//! for the "children indexed by key prefix, overflow triggers a split,
//! split picks a victim and flushes it into a new child page" shape; the
//! radix nibble-indexing, COW-by-batch-id, storage-tree redirect, and
//! hashing-cache absorb/spill are spec-only (no teacher analogue).

use log::{debug, trace};

use crate::batch::Batch;
use crate::consts::{
    BUCKET_COUNT, BUCKET_TABLE_SIZE, HASHING_MAP_CAPACITY, HASHING_MAP_MAX_ITEM_SIZE,
    MASSIVE_STORAGE_TREE_RATIO, PAGE_SIZE,
};
use crate::error::DbError;
use crate::key::{can_be_cached, DataType, Key};
use crate::nibble_path::{Nibble, NibblePath};
use crate::report::Reporter;

use super::address::DbAddress;
use super::hashing_map::{self, HashingMap};
use super::header::{PageHeader, PageType, PAGE_HEADER_SIZE};
use super::nibble_map::NibbleBasedMap;

const BUCKETS_OFFSET: usize = PAGE_HEADER_SIZE;
const HASHING_OFFSET: usize = BUCKETS_OFFSET + BUCKET_TABLE_SIZE;
const HASHING_REGION_SIZE: usize = {
    // `hashing_map::region_size` isn't `const fn`-friendly across editions;
    // inlined here so the page layout stays a compile-time constant.
    let capacity = HASHING_MAP_CAPACITY;
    let bitmap_bytes = (capacity + 7) / 8;
    bitmap_bytes + capacity * 8 + capacity * HASHING_MAP_MAX_ITEM_SIZE
};
const NIBBLE_MAP_OFFSET: usize = HASHING_OFFSET + HASHING_REGION_SIZE;
const NIBBLE_MAP_SIZE: usize = PAGE_SIZE - NIBBLE_MAP_OFFSET;

/// Reads/writes the 16-entry child-page table occupying the front of a
/// `DataPage`'s payload (spec.md §3: "16 consecutive 32-bit page
/// addresses, one per nibble value").
struct BucketTable<'a> {
    data: &'a mut [u8],
}

impl<'a> BucketTable<'a> {
    fn get(&self, nibble: Nibble) -> DbAddress {
        let offset = nibble.value() as usize * 4;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[offset..offset + 4]);
        DbAddress::from_le_bytes(bytes)
    }

    fn set(&mut self, nibble: Nibble, addr: DbAddress) {
        let offset = nibble.value() as usize * 4;
        self.data[offset..offset + 4].copy_from_slice(&addr.to_le_bytes());
    }

    fn populated_count(&self) -> usize {
        (0..BUCKET_COUNT as u8)
            .filter(|&n| !self.get(Nibble::new(n)).is_null())
            .count()
    }

    fn all_populated(&self) -> bool {
        self.populated_count() == BUCKET_COUNT
    }
}

struct ReadBucketTable<'a> {
    data: &'a [u8],
}

impl<'a> ReadBucketTable<'a> {
    fn get(&self, nibble: Nibble) -> DbAddress {
        let offset = nibble.value() as usize * 4;
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[offset..offset + 4]);
        DbAddress::from_le_bytes(bytes)
    }

    fn populated_count(&self) -> usize {
        (0..BUCKET_COUNT as u8)
            .filter(|&n| !self.get(Nibble::new(n)).is_null())
            .count()
    }

    fn all_populated(&self) -> bool {
        self.populated_count() == BUCKET_COUNT
    }
}

fn split_page(page: &mut [u8; PAGE_SIZE]) -> (&mut [u8], BucketTable<'_>, &mut [u8], &mut [u8]) {
    let (header, rest) = page.split_at_mut(PAGE_HEADER_SIZE);
    let (buckets, rest) = rest.split_at_mut(BUCKET_TABLE_SIZE);
    let (hashing, nibble_data) = rest.split_at_mut(HASHING_REGION_SIZE);
    (header, BucketTable { data: buckets }, hashing, nibble_data)
}

/// Split out as a free function (rather than a `BucketTable`-returning
/// method) because `split_page` needs `&mut`, and reads only ever need
/// shared access to the three regions.
fn split_page_ref(page: &[u8; PAGE_SIZE]) -> (&[u8], ReadBucketTable<'_>, &[u8], &[u8]) {
    let (header, rest) = page.split_at(PAGE_HEADER_SIZE);
    let (buckets, rest) = rest.split_at(BUCKET_TABLE_SIZE);
    let (hashing, nibble_data) = rest.split_at(HASHING_REGION_SIZE);
    (header, ReadBucketTable { data: buckets }, hashing, nibble_data)
}

fn open_cache(hashing: &mut [u8]) -> HashingMap<'_> {
    HashingMap::new(hashing, HASHING_MAP_CAPACITY, HASHING_MAP_MAX_ITEM_SIZE)
}

/// Initializes a freshly allocated page as an empty `DataPage`.
pub fn init(page: &mut [u8; PAGE_SIZE], batch_id: u64, tree_level: u8) {
    PageHeader::new(batch_id, PageType::DataPage, tree_level).write_to(&mut page[0..PAGE_HEADER_SIZE]);
    let (_, mut buckets, hashing, nibble_data) = split_page(page);
    for n in 0..BUCKET_COUNT as u8 {
        buckets.set(Nibble::new(n), DbAddress::NULL);
    }
    HashingMap::init(hashing, HASHING_MAP_CAPACITY, HASHING_MAP_MAX_ITEM_SIZE);
    NibbleBasedMap::init(nibble_data);
}

/// Reads `key` starting from the page at `addr`, descending into child
/// pages (or the in-page hashing cache, or a dedicated storage subtree)
/// as the bucket table and slot map direct (spec.md §4.D `TryGet`).
pub fn get<B: Batch>(batch: &B, addr: DbAddress, key: &Key) -> Option<Vec<u8>> {
    let page = batch.pages().get_at(addr);
    let (_, buckets, hashing, nibble_data) = split_page_ref(page);

    if !key.path.is_empty() {
        if buckets.all_populated() && can_be_cached(key) {
            let cache = open_cache(&mut hashing.to_vec());
            if let Some(value) = cache.try_get(key) {
                return Some(value);
            }
        }
        let child = buckets.get(key.path.first_nibble());
        if !child.is_null() {
            return get(batch, child, &key.slice_from(1));
        }
    }

    let map = NibbleBasedMap::new(&mut nibble_data.to_vec());
    if key.ty == DataType::StorageCell {
        let root_key = Key::storage_tree_root_page_address(key.path.clone());
        if let Some(root_bytes) = map.try_get(&root_key) {
            let root_addr = decode_db_address(root_bytes);
            let inner_key = Key::storage_tree_storage_cell(key);
            return get(batch, root_addr, &inner_key);
        }
    }
    map.try_get(key).map(|v| v.to_vec())
}

fn decode_db_address(bytes: &[u8]) -> DbAddress {
    DbAddress::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Writes `key -> data` starting from the page at `addr`, copy-on-write
/// cloning every page touched along the way. Returns the (possibly new)
/// address the caller should store in its own bucket table / root
/// pointer in place of `addr` (spec.md §4.D `Set`).
pub fn set<B: Batch>(
    batch: &mut B,
    addr: DbAddress,
    key: &Key,
    data: &[u8],
) -> Result<DbAddress, DbError> {
    // Step 1: COW guard. `get_writable_copy` is idempotent within a batch
    // (spec.md Invariant 2), so it's safe to call on every descent.
    let addr = batch.pages_mut().get_writable_copy(addr)?;

    // Step 2: descent.
    if !key.path.is_empty() {
        let nibble = key.path.first_nibble();
        let child = {
            let page = batch.pages_mut().get_mut(addr);
            let (_, buckets, _, _) = split_page(page);
            buckets.get(nibble)
        };

        if !child.is_null() {
            let all_full = {
                let page = batch.pages_mut().get_mut(addr);
                let (_, buckets, _, _) = split_page(page);
                buckets.all_populated()
            };

            if all_full && can_be_cached(key) {
                let (cached, cache_full) = {
                    let page = batch.pages_mut().get_mut(addr);
                    let (_, _, hashing, _) = split_page(page);
                    let mut cache = open_cache(hashing);
                    let cached = cache.try_set(key, data);
                    (cached, cache.is_full())
                };
                if cached {
                    return Ok(addr);
                }
                if cache_full {
                    spill_cache(batch, addr)?;
                }
            }

            // `spill_cache` may have just COWed and relocated `buckets[nibble]`
            // (it forwards each cached entry's `Set` into that child, which
            // rewrites the bucket); re-read the address rather than forward
            // into the now-stale `child` captured above.
            let child = {
                let page = batch.pages_mut().get_mut(addr);
                let (_, buckets, _, _) = split_page(page);
                buckets.get(nibble)
            };

            let child_new = set(batch, child, &key.slice_from(1), data)?;
            let page = batch.pages_mut().get_mut(addr);
            let (_, mut buckets, _, _) = split_page(page);
            buckets.set(nibble, child_new);
            return Ok(addr);
        }
    }

    // Step 3: local write, with the storage-tree redirect checked first.
    if key.ty == DataType::StorageCell {
        let existing_root = {
            let page = batch.pages_mut().get_mut(addr);
            let (_, _, _, nibble_data) = split_page(page);
            let map = NibbleBasedMap::new(nibble_data);
            let root_key = Key::storage_tree_root_page_address(key.path.clone());
            map.try_get(&root_key).map(decode_db_address)
        };
        if let Some(root_addr) = existing_root {
            let inner_key = Key::storage_tree_storage_cell(key);
            let new_root = set(batch, root_addr, &inner_key, data)?;
            if new_root != root_addr {
                let page = batch.pages_mut().get_mut(addr);
                let (_, _, _, nibble_data) = split_page(page);
                let mut map = NibbleBasedMap::new(nibble_data);
                let root_key = Key::storage_tree_root_page_address(key.path.clone());
                let ok = map.try_set(&root_key, &new_root.to_le_bytes());
                if !ok {
                    return Err(DbError::StorageTreeRootReinsertFailed { addr });
                }
            }
            return Ok(addr);
        }
    }

    let inserted = {
        let page = batch.pages_mut().get_mut(addr);
        let (_, _, _, nibble_data) = split_page(page);
        let mut map = NibbleBasedMap::new(nibble_data);
        map.try_set(key, data)
    };
    if inserted {
        return Ok(addr);
    }

    // Step 4: the map is full; split and retry the whole write.
    split_and_retry(batch, addr, key, data)
}

/// Flushes every entry currently held in the page's hashing cache into
/// its owning child page, then clears the cache (spec.md §4.D "Cache
/// spill"). Each flushed entry is re-keyed with one fewer leading nibble,
/// exactly as if it were being forwarded for the first time, and its
/// child's hash is recomputed for the shorter key.
fn spill_cache<B: Batch>(batch: &mut B, addr: DbAddress) -> Result<(), DbError> {
    let entries = {
        let page = batch.pages_mut().get_mut(addr);
        let (_, _, hashing, _) = split_page(page);
        open_cache(hashing).enumerate()
    };

    for entry in &entries {
        let nibble = entry.key.path.first_nibble();
        let child = {
            let page = batch.pages_mut().get_mut(addr);
            let (_, buckets, _, _) = split_page(page);
            buckets.get(nibble)
        };
        debug_assert!(
            !child.is_null(),
            "a cached entry's bucket must already be populated: it was only ever \
             cached because TryGetHashingInPageMap found all buckets full"
        );
        let shorter_key = entry.key.slice_from(1);
        let child_new = set(batch, child, &shorter_key, &entry.data)?;
        let page = batch.pages_mut().get_mut(addr);
        let (_, mut buckets, _, _) = split_page(page);
        buckets.set(nibble, child_new);
    }

    let page = batch.pages_mut().get_mut(addr);
    let (_, _, hashing, _) = split_page(page);
    open_cache(hashing).clear();
    Ok(())
}

/// `map` is full. Picks the nibble with the most live entries, flushes
/// every entry under it into a child page (or, when that nibble is
/// dominated by one account's storage cells, into a dedicated
/// massive-storage-tree page), clears the hashing cache if this split
/// just completed the bucket table, and retries the original write from
/// the top (spec.md §4.D `Split`).
fn split_and_retry<B: Batch>(
    batch: &mut B,
    addr: DbAddress,
    key: &Key,
    data: &[u8],
) -> Result<DbAddress, DbError> {
    let (victim_nibble, use_massive_storage_tree) = {
        let page = batch.pages_mut().get_mut(addr);
        let (_, _, _, nibble_data) = split_page(page);
        let map = NibbleBasedMap::new(nibble_data);
        let stats = map.biggest_nibble_stats();
        let eligible = stats.storage_cell_ratio > MASSIVE_STORAGE_TREE_RATIO
            && storage_cells_under_nibble_share_one_path(&map, stats.nibble);
        (stats.nibble, eligible)
    };

    debug!(
        "data_page split: page={:?} victim_nibble={:?} massive_storage_tree={}",
        addr, victim_nibble, use_massive_storage_tree
    );

    let moved = if use_massive_storage_tree {
        extract_massive_storage_tree(batch, addr, victim_nibble)?
    } else {
        flush_nibble_to_child(batch, addr, victim_nibble)?
    };

    if !moved {
        // Nothing could be evicted -- the map overflowed with nothing left
        // to split out, which spec.md §7 treats as a broken invariant
        // rather than input to retry against (it would otherwise recurse
        // through `set` forever).
        return Err(DbError::MapOverflowAfterDefragment { addr });
    }

    let all_full = {
        let page = batch.pages_mut().get_mut(addr);
        let (_, buckets, _, _) = split_page(page);
        buckets.all_populated()
    };
    if all_full && can_be_cached(key) {
        let page = batch.pages_mut().get_mut(addr);
        let (_, _, hashing, _) = split_page(page);
        open_cache(hashing).clear();
    }

    set(batch, addr, key, data)
}

/// Whether every live `StorageCell` slot whose first prefix nibble is
/// `nibble` shares the same account `Path` (spec.md §4.D massive-storage-
/// tree gate: "all `StorageCell` entries for that nibble share the same
/// account `Path`"). Vacuously true if there are none, but callers only
/// consult this once `biggest_nibble_stats` has already reported a
/// storage-cell-dominated nibble.
fn storage_cells_under_nibble_share_one_path(map: &NibbleBasedMap, nibble: Nibble) -> bool {
    let mut shared: Option<NibblePath> = None;
    for entry in map.enumerate_nibble(Some(nibble)) {
        if entry.ty != DataType::StorageCell {
            continue;
        }
        match &shared {
            None => shared = Some(entry.key.path),
            Some(path) if *path == entry.key.path => {}
            Some(_) => return false,
        }
    }
    true
}

/// Moves every live entry whose first prefix nibble is `nibble` out of
/// `addr`'s local map and into a child page, creating that child if the
/// bucket doesn't exist yet. Returns whether anything was moved.
fn flush_nibble_to_child<B: Batch>(
    batch: &mut B,
    addr: DbAddress,
    nibble: Nibble,
) -> Result<bool, DbError> {
    let entries = {
        let page = batch.pages_mut().get_mut(addr);
        let (_, _, _, nibble_data) = split_page(page);
        let map = NibbleBasedMap::new(nibble_data);
        map.enumerate_nibble(Some(nibble))
    };

    if entries.is_empty() {
        return Ok(false);
    }

    let existing_child = {
        let page = batch.pages_mut().get_mut(addr);
        let (_, buckets, _, _) = split_page(page);
        buckets.get(nibble)
    };

    let child_addr = if existing_child.is_null() {
        let fresh = batch.pages_mut().get_new_page()?;
        let tree_level = PageHeader::read_from(&batch.pages().get_at(addr)[0..PAGE_HEADER_SIZE]).tree_level;
        init(batch.pages_mut().get_mut(fresh), batch.batch_id(), tree_level + 1);
        fresh
    } else {
        batch.pages_mut().get_writable_copy(existing_child)?
    };

    for entry in &entries {
        let child_key = entry.key.slice_from(1);
        let page = batch.pages_mut().get_mut(child_addr);
        let (_, _, _, nibble_data) = split_page(page);
        let mut child_map = NibbleBasedMap::new(nibble_data);
        let ok = child_map.try_set(&child_key, &entry.data);
        assert!(ok, "freshly split child overflowed on its first insert");
    }

    {
        let page = batch.pages_mut().get_mut(addr);
        let (_, mut buckets, _, nibble_data) = split_page(page);
        buckets.set(nibble, child_addr);
        let mut map = NibbleBasedMap::new(nibble_data);
        for entry in &entries {
            map.delete_entry(entry);
        }
    }

    Ok(true)
}

/// spec.md §4.D: when one nibble's entries are almost entirely
/// `StorageCell`s belonging to a single account, extract them into a
/// dedicated `MassiveStorageTree` page addressed by a single
/// `StorageTreeRootPageAddress` key left behind in the parent -- cheaper
/// than letting an ordinary child page fill up with nothing but one
/// account's storage. Returns whether anything was moved.
fn extract_massive_storage_tree<B: Batch>(
    batch: &mut B,
    addr: DbAddress,
    nibble: Nibble,
) -> Result<bool, DbError> {
    let entries: Vec<_> = {
        let page = batch.pages_mut().get_mut(addr);
        let (_, _, _, nibble_data) = split_page(page);
        let map = NibbleBasedMap::new(nibble_data);
        map.enumerate_nibble(Some(nibble))
            .into_iter()
            .filter(|e| e.ty == DataType::StorageCell)
            .collect()
    };

    if entries.is_empty() {
        return Ok(false);
    }

    let account_path = entries[0].key.path.clone();

    let tree_root = batch.pages_mut().get_new_page()?;
    let tree_level = PageHeader::read_from(&batch.pages().get_at(addr)[0..PAGE_HEADER_SIZE]).tree_level;
    {
        let page = batch.pages_mut().get_mut(tree_root);
        PageHeader::new(batch.batch_id(), PageType::MassiveStorageTree, tree_level + 1)
            .write_to(&mut page[0..PAGE_HEADER_SIZE]);
        let (_, mut buckets, hashing, nibble_data) = split_page(page);
        for n in 0..BUCKET_COUNT as u8 {
            buckets.set(Nibble::new(n), DbAddress::NULL);
        }
        HashingMap::init(hashing, HASHING_MAP_CAPACITY, HASHING_MAP_MAX_ITEM_SIZE);
        NibbleBasedMap::init(nibble_data);
    }

    for entry in &entries {
        let inner_key = Key::storage_tree_storage_cell(&entry.key);
        let page = batch.pages_mut().get_mut(tree_root);
        let (_, _, _, nibble_data) = split_page(page);
        let mut tree_map = NibbleBasedMap::new(nibble_data);
        let ok = tree_map.try_set(&inner_key, &entry.data);
        assert!(ok, "fresh massive storage tree root overflowed on first insert");
    }

    {
        let page = batch.pages_mut().get_mut(addr);
        let (_, _, _, nibble_data) = split_page(page);
        let mut map = NibbleBasedMap::new(nibble_data);
        for entry in &entries {
            map.delete_entry(entry);
        }
        let root_key = Key::storage_tree_root_page_address(account_path);
        let ok = map.try_set(&root_key, &tree_root.to_le_bytes());
        assert!(
            ok,
            "room just freed by evicting {} entries must fit one root pointer",
            entries.len()
        );
    }

    Ok(true)
}

/// Recursively reports page/bucket occupancy for diagnostics (spec.md
/// §4.F). Never mutates a page.
pub fn report<B: Batch, R: Reporter>(batch: &B, addr: DbAddress, level: u8, reporter: &mut R) {
    let page = batch.pages().get_at(addr);
    let (_, buckets, hashing, nibble_data) = split_page_ref(page);

    let entries_in_map = if buckets.all_populated() {
        open_cache(&mut hashing.to_vec()).enumerate().len()
    } else {
        NibbleBasedMap::new(&mut nibble_data.to_vec()).count()
    };

    trace!("report: page={:?} level={}", addr, level);
    let buckets_used = buckets.populated_count();

    for n in 0..BUCKET_COUNT as u8 {
        let child = buckets.get(Nibble::new(n));
        if !child.is_null() {
            report(batch, child, level + 1, reporter);
        }
    }

    // Bottom-up: report this page only after every child has been reported
    // (spec.md §4.D; `Reporter::report_data_usage`'s own contract).
    reporter.report_data_usage(level, buckets_used, entries_in_map);
}

#[cfg(test)]
fn _assert_layout_matches_hashing_map_module() {
    debug_assert_eq!(
        HASHING_REGION_SIZE,
        hashing_map::region_size(HASHING_MAP_CAPACITY, HASHING_MAP_MAX_ITEM_SIZE)
    );
}
