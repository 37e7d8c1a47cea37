//! `PageHeader` (spec.md §3, §6): batch epoch, tree level, page type,
//! preceding the payload. Grounded on the teacher's
//! `btree/page/page_category.rs::PageCategory` for the explicit
//! `to_bytes`/`from_bytes` serialization style; the batch-epoch stamp
//! itself (Invariant 2) has no teacher analogue -- the teacher has no
//! copy-on-write concept -- and is built directly from spec.md.

/// Size in bytes of the serialized header: `BatchId: u64` (8) + `PageType:
/// u8` (1) + `TreeLevel: u8` (1) + 6 bytes of padding to keep the payload
/// 8-byte aligned.
pub const PAGE_HEADER_SIZE: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum PageType {
    /// An ordinary DataPage participating in the main account/storage
    /// radix tree.
    DataPage = 0,
    /// A dedicated storage subtree extracted for one dominant account
    /// (spec.md §4.D, "massive-storage-tree extraction").
    MassiveStorageTree = 1,
}

impl PageType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => PageType::DataPage,
            1 => PageType::MassiveStorageTree,
            other => panic!("invalid PageType tag: {other}"),
        }
    }
}

/// Fixed page header preceding every DataPage's payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageHeader {
    pub batch_id: u64,
    pub page_type: PageType,
    pub tree_level: u8,
}

impl PageHeader {
    pub fn new(batch_id: u64, page_type: PageType, tree_level: u8) -> Self {
        Self {
            batch_id,
            page_type,
            tree_level,
        }
    }

    pub fn write_to(&self, out: &mut [u8]) {
        debug_assert!(out.len() >= PAGE_HEADER_SIZE);
        out[0..8].copy_from_slice(&self.batch_id.to_le_bytes());
        out[8] = self.page_type as u8;
        out[9] = self.tree_level;
        for b in &mut out[10..PAGE_HEADER_SIZE] {
            *b = 0;
        }
    }

    pub fn read_from(bytes: &[u8]) -> Self {
        debug_assert!(bytes.len() >= PAGE_HEADER_SIZE);
        let mut batch_id_bytes = [0u8; 8];
        batch_id_bytes.copy_from_slice(&bytes[0..8]);
        Self {
            batch_id: u64::from_le_bytes(batch_id_bytes),
            page_type: PageType::from_u8(bytes[8]),
            tree_level: bytes[9],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trips_through_bytes() {
        let header = PageHeader::new(42, PageType::MassiveStorageTree, 3);
        let mut buf = [0xFFu8; PAGE_HEADER_SIZE];
        header.write_to(&mut buf);
        let decoded = PageHeader::read_from(&buf);
        assert_eq!(decoded, header);
    }
}
