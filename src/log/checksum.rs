//! Page checksums
//!
//! Every log page is stamped with a CRC32 before it is written and the
//! checksum is validated on every fetch. A mismatch means the stable
//! storage under the log can no longer be trusted and is fatal.

/// Compute the CRC32 checksum of the given data.
pub fn compute_checksum(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}
