//! `PageManager`/`Batch` collaborator contracts (spec.md §1: named
//! out-of-scope but required to exercise `DataPage`). Grounded on the
//! teacher's `bufferpool.rs::BufferPool` for the shape of "hand out
//! pinned/writable page views, track an epoch, allocate fresh pages" --
//! generalized from `small-db`'s fixed-size `Tuple` pages to raw
//! `PAGE_SIZE`-byte buffers addressed by `DbAddress`.

use std::collections::HashMap;

use crate::consts::PAGE_SIZE;
use crate::error::DbError;
use crate::page::address::DbAddress;
use crate::page::header::PageHeader;

/// A page store: allocates, reads and copy-on-write-clones fixed-size
/// pages. Implementations back this with whatever persistence the
/// embedder wants (mmap, file, in-memory); the core only needs the
/// contract below.
pub trait PageManager {
    /// Returns the page at `addr` as it stood at the start of the current
    /// batch. Never mutated in place.
    fn get_at(&self, addr: DbAddress) -> &[u8; PAGE_SIZE];

    /// Returns a writable copy of the page at `addr`, stamped with the
    /// current batch's id, allocating a fresh backing page the first time
    /// a given batch touches `addr` (copy-on-write). Subsequent calls
    /// within the same batch return the same backing page.
    fn get_writable_copy(&mut self, addr: DbAddress) -> Result<DbAddress, DbError>;

    /// Allocates a brand-new zeroed page, returning its address. Never
    /// returns `DbAddress::NULL` -- a real allocator failure is a fatal
    /// `DbError::AllocatorExhausted` (spec.md §7).
    fn get_new_page(&mut self) -> Result<DbAddress, DbError>;

    /// Mutable access to an already-writable page (one this batch itself
    /// allocated via `get_writable_copy`/`get_new_page`).
    fn get_mut(&mut self, addr: DbAddress) -> &mut [u8; PAGE_SIZE];
}

/// The current write batch: an epoch (`BatchId`) plus access to the page
/// manager backing it (spec.md §5 "Invariant 2: ... each page carries the
/// `BatchId` of the batch that last wrote it").
pub trait Batch {
    type Manager: PageManager;

    fn batch_id(&self) -> u64;
    fn pages(&self) -> &Self::Manager;
    fn pages_mut(&mut self) -> &mut Self::Manager;
}

/// A reference `PageManager` backed by a plain `HashMap`, sufficient for
/// tests and for embedders who don't need real persistence. Every address
/// that has been copy-on-write-cloned under the current batch is tracked
/// in `writable_this_batch` so repeat writes within one batch don't pay
/// for a second clone.
pub struct InMemoryPageStore {
    pages: HashMap<u32, [u8; PAGE_SIZE]>,
    next_address: u32,
    current_batch_id: u64,
    writable_this_batch: HashMap<u32, ()>,
}

impl InMemoryPageStore {
    pub fn new() -> Self {
        Self {
            pages: HashMap::new(),
            next_address: 1, // 0 is DbAddress::NULL
            current_batch_id: 1,
            writable_this_batch: HashMap::new(),
        }
    }

    /// Ends the current batch and begins the next, clearing the
    /// per-batch copy-on-write bookkeeping.
    pub fn begin_next_batch(&mut self) {
        self.current_batch_id += 1;
        self.writable_this_batch.clear();
    }

    pub fn current_batch_id(&self) -> u64 {
        self.current_batch_id
    }
}

impl Default for InMemoryPageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PageManager for InMemoryPageStore {
    fn get_at(&self, addr: DbAddress) -> &[u8; PAGE_SIZE] {
        self.pages
            .get(&addr.raw())
            .unwrap_or_else(|| panic!("get_at: no page at {addr:?}"))
    }

    fn get_writable_copy(&mut self, addr: DbAddress) -> Result<DbAddress, DbError> {
        if self.writable_this_batch.contains_key(&addr.raw()) {
            return Ok(addr);
        }
        let existing = *self
            .pages
            .get(&addr.raw())
            .unwrap_or_else(|| panic!("get_writable_copy: no page at {addr:?}"));
        let new_addr = self.allocate(existing)?;
        self.writable_this_batch.insert(new_addr.raw(), ());

        // spec.md Invariant 2: a page mutated in batch B must carry
        // Header.BatchId == B from the moment it's cloned, not just once
        // something gets written into it.
        let batch_id = self.current_batch_id;
        let page = self.pages.get_mut(&new_addr.raw()).expect("just inserted");
        let mut header = PageHeader::read_from(&page[0..crate::page::header::PAGE_HEADER_SIZE]);
        header.batch_id = batch_id;
        header.write_to(&mut page[0..crate::page::header::PAGE_HEADER_SIZE]);

        Ok(new_addr)
    }

    fn get_new_page(&mut self) -> Result<DbAddress, DbError> {
        let addr = self.allocate([0u8; PAGE_SIZE])?;
        self.writable_this_batch.insert(addr.raw(), ());
        Ok(addr)
    }

    fn get_mut(&mut self, addr: DbAddress) -> &mut [u8; PAGE_SIZE] {
        self.pages
            .get_mut(&addr.raw())
            .unwrap_or_else(|| panic!("get_mut: no page at {addr:?}"))
    }
}

impl InMemoryPageStore {
    fn allocate(&mut self, contents: [u8; PAGE_SIZE]) -> Result<DbAddress, DbError> {
        let raw = self.next_address;
        self.next_address = self
            .next_address
            .checked_add(1)
            .ok_or(DbError::AllocatorExhausted)?;
        self.pages.insert(raw, contents);
        Ok(DbAddress::new(raw))
    }
}

/// A reference `Batch` pairing an `InMemoryPageStore` with its current
/// epoch.
pub struct InMemoryBatch<'a> {
    store: &'a mut InMemoryPageStore,
}

impl<'a> InMemoryBatch<'a> {
    pub fn new(store: &'a mut InMemoryPageStore) -> Self {
        Self { store }
    }
}

impl<'a> Batch for InMemoryBatch<'a> {
    type Manager = InMemoryPageStore;

    fn batch_id(&self) -> u64 {
        self.store.current_batch_id()
    }

    fn pages(&self) -> &Self::Manager {
        self.store
    }

    fn pages_mut(&mut self) -> &mut Self::Manager {
        self.store
    }
}
