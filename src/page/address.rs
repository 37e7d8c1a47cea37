//! `DbAddress` (spec.md §6: "4-byte little-endian unsigned page index.
//! Value 0 is the null sentinel."). Grounded on the teacher's
//! `btree/page/page_id.rs::EMPTY_PAGE_ID`/`BTreePageID` (small `u32`
//! newtype with a reserved sentinel value).

use std::fmt;

/// A page index. `DbAddress::NULL` (value 0) means "no page" and must
/// never be handed out as a real page by the allocator (spec.md §9).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DbAddress(u32);

impl DbAddress {
    pub const NULL: DbAddress = DbAddress(0);

    pub fn new(index: u32) -> Self {
        DbAddress(index)
    }

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn raw(self) -> u32 {
        self.0
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub fn from_le_bytes(bytes: [u8; 4]) -> Self {
        DbAddress(u32::from_le_bytes(bytes))
    }
}

impl fmt::Debug for DbAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "DbAddress(null)")
        } else {
            write!(f, "DbAddress({})", self.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_round_trips() {
        assert!(DbAddress::NULL.is_null());
        assert_eq!(DbAddress::NULL.to_le_bytes(), [0, 0, 0, 0]);
    }

    #[test]
    fn le_byte_round_trip() {
        let addr = DbAddress::new(0x0102_0304);
        let bytes = addr.to_le_bytes();
        assert_eq!(bytes, [0x04, 0x03, 0x02, 0x01]);
        assert_eq!(DbAddress::from_le_bytes(bytes), addr);
    }
}
