//! A stable, non-cryptographic hash over `(Path, Type, AdditionalKey)`,
//! used only to key the in-page `HashingMap` (spec.md §4.C: "the same key
//! must hash identically in every batch"). No crate in the teacher's or the
//! wider pack's dependency stack is a better fit than hand-rolling this --
//! it's the same class of internal-only hash every page-cache/B-tree engine
//! in the corpus writes itself.

use crate::key::Key;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

fn fnv1a(bytes: &[u8], mut hash: u32) -> u32 {
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// `GetHash(key) -> u32` from spec.md §4.C.
pub fn get_hash(key: &Key) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    hash = fnv1a(key.path.packed_bytes(), hash);
    hash = fnv1a(&[key.path.len() as u8], hash);
    hash = fnv1a(&[key.ty as u8], hash);
    hash = fnv1a(&key.additional_key, hash);
    hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nibble_path::NibblePath;

    #[test]
    fn same_key_hashes_identically() {
        let k1 = Key::account(NibblePath::from_bytes(&[0xAB, 0xCD]));
        let k2 = Key::account(NibblePath::from_bytes(&[0xAB, 0xCD]));
        assert_eq!(get_hash(&k1), get_hash(&k2));
    }

    #[test]
    fn different_type_changes_hash() {
        let path = NibblePath::from_bytes(&[0xAB, 0xCD]);
        let account = Key::account(path.clone());
        let code_hash = Key::code_hash(path);
        assert_ne!(get_hash(&account), get_hash(&code_hash));
    }

    #[test]
    fn different_additional_key_changes_hash() {
        let path = NibblePath::from_bytes(&[0x01]);
        let a = Key::storage_cell(path.clone(), vec![1u8; 32]);
        let b = Key::storage_cell(path, vec![2u8; 32]);
        assert_ne!(get_hash(&a), get_hash(&b));
    }
}
