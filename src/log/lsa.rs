//! Log sequence addresses
//!
//! An [`Lsa`] is the total order over the log stream: a page id plus a byte
//! offset within that page's data area. Every record is assigned exactly
//! one LSA, the assignment is final, and for any stream the sequence of
//! assigned LSAs is monotonically non-decreasing.

use std::fmt;

use serde::{Deserialize, Serialize};

/// All log content is 8-byte aligned for cross-platform portability.
pub const LOG_ALIGNMENT: i32 = 8;

/// Round `n` up to the next multiple of [`LOG_ALIGNMENT`].
pub const fn align8(n: i32) -> i32 {
    (n + LOG_ALIGNMENT - 1) & !(LOG_ALIGNMENT - 1)
}

/// A log sequence address: `(page_id, offset)`, totally ordered.
///
/// The derived ordering is lexicographic over `(page_id, offset)`, which is
/// exactly the log order. [`Lsa::NULL`] sorts below every real address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsa {
    pub page_id: i64,
    pub offset: i32,
}

impl Default for Lsa {
    fn default() -> Self {
        Lsa::NULL
    }
}

impl Lsa {
    /// Distinguished "no address" value.
    pub const NULL: Lsa = Lsa {
        page_id: -1,
        offset: -1,
    };

    /// Serialized size: page_id (8) + offset (4) + pad (4).
    pub const SERIALIZED_SIZE: usize = 16;

    pub const fn new(page_id: i64, offset: i32) -> Self {
        Self { page_id, offset }
    }

    pub fn is_null(&self) -> bool {
        self.page_id == Self::NULL.page_id
    }

    /// Write the 16-byte on-disk form (LE, padded to alignment).
    pub fn write_to(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.page_id.to_le_bytes());
        buf.extend_from_slice(&self.offset.to_le_bytes());
        buf.extend_from_slice(&[0u8; 4]);
    }

    /// Read the 16-byte on-disk form. Caller guarantees `data.len() >= 16`.
    pub fn read_from(data: &[u8]) -> Self {
        let page_id = i64::from_le_bytes(data[0..8].try_into().unwrap());
        let offset = i32::from_le_bytes(data[8..12].try_into().unwrap());
        Self { page_id, offset }
    }

    /// Advance this address by `len` bytes within pages of `area_size`
    /// usable bytes, crossing page boundaries and re-applying alignment.
    pub fn advance(&self, len: i32, area_size: usize) -> Lsa {
        let area = area_size as i32;
        let mut page_id = self.page_id;
        let mut offset = align8(self.offset) + len;
        while offset >= area {
            page_id += 1;
            offset -= area;
        }
        Lsa {
            page_id,
            offset: align8(offset),
        }
    }
}

impl fmt::Display for Lsa {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_null() {
            write!(f, "(null|null)")
        } else {
            write!(f, "({}|{})", self.page_id, self.offset)
        }
    }
}
