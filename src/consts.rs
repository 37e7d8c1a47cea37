//! Compile-time tunables. The core has no file-based configuration: the
//! only knobs are page geometry, mirroring how the teacher keeps `PAGE_SIZE`
//! as a plain const rather than a config file (see `btree/page_cache.rs` in
//! the original).

/// Fixed page size, in bytes. Conventionally 4096 per spec.md §3.
pub const PAGE_SIZE: usize = 4096;

/// One bucket per nibble value.
pub const BUCKET_COUNT: usize = 16;

/// Size in bytes of a single bucket-table entry (a `DbAddress`).
pub const BUCKET_ENTRY_SIZE: usize = 4;

/// Size in bytes of the bucket table occupying the front of a DataPage's
/// payload (spec.md §3: "16 consecutive 32-bit page addresses").
pub const BUCKET_TABLE_SIZE: usize = BUCKET_COUNT * BUCKET_ENTRY_SIZE;

/// Minimum usable size of the data region backing a `NibbleBasedMap`
/// (spec.md §4.B: "3 x 8 = 24 bytes").
pub const MIN_DATA_REGION_SIZE: usize = 24;

/// Above this fraction of `StorageCell` entries sharing one account path,
/// a split prefers massive-storage-tree extraction over a plain child flush
/// (spec.md §4.D).
pub const MASSIVE_STORAGE_TREE_RATIO: f64 = 0.9;

/// Number of entries in each page's `HashingMap` cache region. Chosen
/// small relative to `PAGE_SIZE` -- the cache exists to absorb a burst of
/// hot writes to an already-fully-split page, not to replace the slot map
/// as primary storage.
pub const HASHING_MAP_CAPACITY: usize = 8;

/// Largest encoded `(type, path, additional_key, value)` a single
/// `HashingMap` entry may occupy. An entry that doesn't fit is never a
/// hard error (spec.md §4.C): `HashingMap::try_set` just returns `false`
/// and the caller falls back to forwarding the write to the child page
/// normally.
pub const HASHING_MAP_MAX_ITEM_SIZE: usize = 64;
