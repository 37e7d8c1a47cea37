//! Tagged key model (spec.md §3, §4.E). Grounded on `larry0x-tree`'s
//! `types/node_key.rs` for the general shape of "a key is a path plus a
//! type tag"; the `DataType` table itself has no teacher analogue and is
//! taken directly from spec.md §3.

use crate::nibble_path::NibblePath;

/// Tag values from spec.md §3. Numeric values are load-bearing: they are
/// exactly the 4-bit `Type` field packed into a `Slot.Raw` (page/slot.rs).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DataType {
    Account = 0,
    CodeHash = 1,
    StorageRootHash = 2,
    StorageCell = 3,
    StorageTreeRootPageAddress = 4,
    StorageTreeStorageCell = 5,
    Merkle = 6,
    Deleted = 7,
}

impl DataType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => DataType::Account,
            1 => DataType::CodeHash,
            2 => DataType::StorageRootHash,
            3 => DataType::StorageCell,
            4 => DataType::StorageTreeRootPageAddress,
            5 => DataType::StorageTreeStorageCell,
            6 => DataType::Merkle,
            7 => DataType::Deleted,
            other => panic!("invalid DataType tag: {other}"),
        }
    }

    /// Whether this key type carries a 32-byte `AdditionalKey` (spec.md §3
    /// table: `StorageCell` and `StorageTreeStorageCell`).
    pub fn has_additional_key(self) -> bool {
        matches!(self, DataType::StorageCell | DataType::StorageTreeStorageCell)
    }
}

/// A tagged key: `{ Path, Type, AdditionalKey }` (spec.md §3).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Key {
    pub path: NibblePath,
    pub ty: DataType,
    pub additional_key: Vec<u8>,
}

/// Storage cells carry a 32-byte index as their `AdditionalKey`.
pub const ADDITIONAL_KEY_LEN: usize = 32;

impl Key {
    pub fn new(path: NibblePath, ty: DataType, additional_key: Vec<u8>) -> Self {
        if ty.has_additional_key() {
            debug_assert_eq!(additional_key.len(), ADDITIONAL_KEY_LEN);
        } else {
            debug_assert!(additional_key.is_empty());
        }
        Self {
            path,
            ty,
            additional_key,
        }
    }

    pub fn account(path: NibblePath) -> Self {
        Self::new(path, DataType::Account, Vec::new())
    }

    pub fn code_hash(path: NibblePath) -> Self {
        Self::new(path, DataType::CodeHash, Vec::new())
    }

    pub fn storage_root_hash(path: NibblePath) -> Self {
        Self::new(path, DataType::StorageRootHash, Vec::new())
    }

    pub fn storage_cell(path: NibblePath, additional_key: Vec<u8>) -> Self {
        Self::new(path, DataType::StorageCell, additional_key)
    }

    pub fn merkle(path: NibblePath) -> Self {
        Self::new(path, DataType::Merkle, Vec::new())
    }

    /// A synthetic key pointing at the root page of a dedicated storage
    /// subtree rooted at `path` (spec.md §4.E).
    pub fn storage_tree_root_page_address(path: NibblePath) -> Self {
        Self::new(path, DataType::StorageTreeRootPageAddress, Vec::new())
    }

    /// The key this storage cell is stored under *inside* its dedicated
    /// storage subtree: the account path becomes implicit in the subtree's
    /// root, so `Path` is emptied (spec.md §4.E).
    pub fn storage_tree_storage_cell(original: &Key) -> Self {
        debug_assert_eq!(original.ty, DataType::StorageCell);
        Self::new(
            NibblePath::empty(),
            DataType::StorageTreeStorageCell,
            original.additional_key.clone(),
        )
    }

    /// Returns a new key with `k` leading nibbles of `path` removed,
    /// keeping type and additional key unchanged -- used when forwarding a
    /// write/read into a child bucket or flushed child page.
    pub fn slice_from(&self, k: usize) -> Key {
        Key::new(self.path.slice_from(k), self.ty, self.additional_key.clone())
    }
}

/// Keys whose descent benefits most from the in-page hashing cache
/// (spec.md §4.C, §9 Open Question: "at minimum Account and StorageCell").
pub fn can_be_cached(key: &Key) -> bool {
    matches!(key.ty, DataType::Account | DataType::StorageCell)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_tree_round_trip_types() {
        let account_path = NibblePath::from_bytes(&[0xCA, 0xFE]);
        let cell = Key::storage_cell(account_path.clone(), vec![7u8; 32]);
        let root_key = Key::storage_tree_root_page_address(account_path.clone());
        assert_eq!(root_key.ty, DataType::StorageTreeRootPageAddress);
        assert_eq!(root_key.path, account_path);

        let inner = Key::storage_tree_storage_cell(&cell);
        assert_eq!(inner.ty, DataType::StorageTreeStorageCell);
        assert!(inner.path.is_empty());
        assert_eq!(inner.additional_key, cell.additional_key);
    }

    #[test]
    fn can_be_cached_matches_minimum_set() {
        let path = NibblePath::from_bytes(&[0x01]);
        assert!(can_be_cached(&Key::account(path.clone())));
        assert!(can_be_cached(&Key::storage_cell(path.clone(), vec![0u8; 32])));
        assert!(!can_be_cached(&Key::code_hash(path)));
    }
}
