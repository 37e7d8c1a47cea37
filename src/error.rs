use thiserror::Error;

use crate::page::address::DbAddress;

/// Fatal errors: every one of these signals a broken invariant, never a
/// normal miss/overflow (those are reported through the `Try*` boolean
/// contracts instead, per spec.md's error handling design).
#[derive(Debug, Error)]
pub enum DbError {
    #[error("page at {addr:?} still overflows after defragmentation")]
    MapOverflowAfterDefragment { addr: DbAddress },

    #[error("storage-tree root for {addr:?} could not be re-inserted after COW")]
    StorageTreeRootReinsertFailed { addr: DbAddress },

    #[error("attempted to mutate page at {addr:?} stamped with batch {page_batch}, current batch is {current_batch}")]
    StalePageMutation {
        addr: DbAddress,
        page_batch: u64,
        current_batch: u64,
    },

    #[error("allocator returned a null address for a requested fresh page")]
    AllocatorExhausted,
}
