//! Fixed-size log pages
//!
//! A page is a header (`page_id`, checksum, flags) plus a data area.
//! Records are addressed by byte offset into the data area and may span
//! page boundaries; the reader reassembles them. The checksum is stamped
//! over the header (checksum field zeroed) plus the area just before a
//! page is written, and validated on every fetch from storage.

use super::checksum::compute_checksum;
use super::errors::{LogError, LogResult};

/// On-disk page header size: page_id (8) + checksum (4) + flags (4).
pub const PAGE_HEADER_SIZE: usize = 16;

/// One log page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPage {
    pub page_id: i64,
    pub flags: u32,
    area: Vec<u8>,
}

impl LogPage {
    /// A fresh zeroed page with `area_size` usable bytes.
    pub fn new(page_id: i64, area_size: usize) -> Self {
        Self {
            page_id,
            flags: 0,
            area: vec![0u8; area_size],
        }
    }

    pub fn area(&self) -> &[u8] {
        &self.area
    }

    pub fn area_size(&self) -> usize {
        self.area.len()
    }

    /// Copy `data` into the area at `offset`. Caller guarantees fit.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) {
        self.area[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Read `len` bytes from the area at `offset`. Caller guarantees fit.
    pub fn read_at(&self, offset: usize, len: usize) -> &[u8] {
        &self.area[offset..offset + len]
    }

    /// Serialize with a freshly stamped checksum.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(PAGE_HEADER_SIZE + self.area.len());
        buf.extend_from_slice(&self.page_id.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes()); // checksum slot, stamped below
        buf.extend_from_slice(&self.flags.to_le_bytes());
        buf.extend_from_slice(&self.area);
        let checksum = compute_checksum(&buf);
        buf[8..12].copy_from_slice(&checksum.to_le_bytes());
        buf
    }

    /// Deserialize and validate the checksum. A mismatch is fatal: the
    /// stable storage under the log can no longer be trusted.
    pub fn from_bytes(data: &[u8]) -> LogResult<Self> {
        if data.len() <= PAGE_HEADER_SIZE {
            return Err(LogError::fatal(
                "page decode",
                LogError::page_fetch_failed(-1, "short page read"),
            ));
        }
        let page_id = i64::from_le_bytes(data[0..8].try_into().unwrap());
        let stored = u32::from_le_bytes(data[8..12].try_into().unwrap());
        let flags = u32::from_le_bytes(data[12..16].try_into().unwrap());

        let mut check_buf = data.to_vec();
        check_buf[8..12].copy_from_slice(&0u32.to_le_bytes());
        let computed = compute_checksum(&check_buf);
        if computed != stored {
            return Err(LogError::fatal(
                "page decode",
                LogError::checksum_mismatch(page_id, computed, stored),
            ));
        }

        Ok(Self {
            page_id,
            flags,
            area: data[PAGE_HEADER_SIZE..].to_vec(),
        })
    }
}
