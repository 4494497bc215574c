//! Reading records back out of the log
//!
//! Readers resolve pages through the pool first, then stable storage,
//! then the archives. Records span page boundaries, so reads reassemble
//! bytes across consecutive data areas. Two access patterns matter:
//! forward scans (recovery analysis and redo) and per-transaction
//! back-chain walks (undo, postpone).

use std::sync::Arc;

use super::archive::ArchiveManager;
use super::errors::LogResult;
use super::lsa::Lsa;
use super::page::LogPage;
use super::page_buffer::{LogStorage, PageBuffer};
use super::record::{LogRecord, LENGTH_PROLOGUE_SIZE, RECORD_HEADER_SIZE};

/// Reads records at arbitrary addresses.
pub struct LogReader<'a> {
    pool: &'a PageBuffer,
    archive: Option<&'a ArchiveManager>,
    area_size: usize,
}

impl<'a> LogReader<'a> {
    pub fn new(pool: &'a PageBuffer, area_size: usize) -> Self {
        Self {
            pool,
            archive: None,
            area_size,
        }
    }

    /// A reader that falls back to the archives for pages no longer in
    /// the active log.
    pub fn with_archive(
        pool: &'a PageBuffer,
        archive: &'a ArchiveManager,
        area_size: usize,
    ) -> Self {
        Self {
            pool,
            archive: Some(archive),
            area_size,
        }
    }

    fn fetch(&self, storage: &dyn LogStorage, page_id: i64) -> LogResult<Arc<LogPage>> {
        if let Some(page) = self.pool.get_cached(page_id) {
            return Ok(page);
        }
        match storage.read_page(page_id) {
            Ok(page) => {
                let page = Arc::new(page);
                self.pool.insert(page_id, Arc::clone(&page));
                Ok(page)
            }
            Err(storage_err) => {
                if let Some(archive) = self.archive {
                    if let Some(page) = archive.fetch_page(page_id)? {
                        let page = Arc::new(page);
                        self.pool.insert(page_id, Arc::clone(&page));
                        return Ok(page);
                    }
                }
                Err(storage_err)
            }
        }
    }

    /// Copy `len` contiguous log bytes starting at `start`, crossing page
    /// boundaries as needed.
    pub fn copy_from_log(
        &self,
        storage: &dyn LogStorage,
        start: Lsa,
        len: usize,
    ) -> LogResult<Vec<u8>> {
        let mut out = Vec::with_capacity(len);
        let mut page_id = start.page_id;
        let mut offset = start.offset as usize;
        while out.len() < len {
            let page = self.fetch(storage, page_id)?;
            let chunk = (self.area_size - offset).min(len - out.len());
            out.extend_from_slice(page.read_at(offset, chunk));
            page_id += 1;
            offset = 0;
        }
        Ok(out)
    }

    /// Read and decode the record at `lsa`.
    pub fn read_record_at(&self, storage: &dyn LogStorage, lsa: Lsa) -> LogResult<LogRecord> {
        // Header plus length prologue first, then the exact remainder.
        let prologue_len = RECORD_HEADER_SIZE + LENGTH_PROLOGUE_SIZE;
        let prologue = self.copy_from_log(storage, lsa, prologue_len)?;
        let probe = LogRecord::probe_len(&prologue)?;
        let bytes = self.copy_from_log(storage, lsa, probe as usize)?;
        LogRecord::deserialize(&bytes)
    }

    /// Address of the record following `record` at `lsa`.
    pub fn next_lsa(&self, lsa: Lsa, record: &LogRecord) -> Lsa {
        lsa.advance(record.serialized_len(), self.area_size)
    }

    /// Scan forward from `start` until `end` (exclusive), yielding every
    /// record with its address, in log order.
    pub fn scan_forward(
        &self,
        storage: &dyn LogStorage,
        start: Lsa,
        end: Lsa,
    ) -> LogResult<Vec<(Lsa, LogRecord)>> {
        let mut out = Vec::new();
        let mut lsa = start;
        while lsa < end {
            let record = self.read_record_at(storage, lsa)?;
            let next = self.next_lsa(lsa, &record);
            out.push((lsa, record));
            lsa = next;
        }
        Ok(out)
    }

    /// Walk one transaction's records backwards from `tail`, newest
    /// first, following the per-transaction back-links.
    pub fn transaction_chain(
        &self,
        storage: &dyn LogStorage,
        tail: Lsa,
    ) -> LogResult<Vec<(Lsa, LogRecord)>> {
        let mut out = Vec::new();
        let mut lsa = tail;
        while !lsa.is_null() {
            let record = self.read_record_at(storage, lsa)?;
            let prev = record.header.prev_tran_lsa;
            out.push((lsa, record));
            lsa = prev;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::append::LogAppender;
    use crate::log::page::PAGE_HEADER_SIZE;
    use crate::log::page_buffer::FileStorage;
    use crate::log::prior::PriorQueue;
    use crate::log::record::{DataHeader, RecordType};
    use crate::txn::TransactionDescriptor;
    use tempfile::TempDir;

    const PAGE_SIZE: usize = 256;
    const AREA: usize = PAGE_SIZE - PAGE_HEADER_SIZE;

    struct Fixture {
        prior: PriorQueue,
        appender: LogAppender,
        storage: FileStorage,
        pool: PageBuffer,
    }

    fn fixture(dir: &TempDir) -> Fixture {
        Fixture {
            prior: PriorQueue::new(Lsa::new(0, 0), AREA),
            appender: LogAppender::new(Lsa::new(0, 0), AREA),
            storage: FileStorage::open(dir.path().join("active.log"), PAGE_SIZE).unwrap(),
            pool: PageBuffer::new(16),
        }
    }

    #[test]
    fn test_scan_forward_returns_log_order() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);
        let mut t1 = TransactionDescriptor::new(1);
        let mut t2 = TransactionDescriptor::new(2);

        let start = f.prior.append_lsa();
        f.prior.push(
            LogRecord::new(RecordType::SysopStart, 1, DataHeader::None),
            &mut t1,
        );
        f.prior.push(
            LogRecord::new(RecordType::Commit, 2, DataHeader::None),
            &mut t2,
        );
        f.prior.push(
            LogRecord::new(RecordType::Commit, 1, DataHeader::None),
            &mut t1,
        );
        let end = f.prior.append_lsa();
        f.appender.flush(&f.prior, &f.storage, &f.pool).unwrap();

        let reader = LogReader::new(&f.pool, AREA);
        let records = reader.scan_forward(&f.storage, start, end).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].1.header.trid, 1);
        assert_eq!(records[1].1.header.trid, 2);
        assert_eq!(records[2].1.header.rec_type, RecordType::Commit);
        for window in records.windows(2) {
            assert!(window[0].0 < window[1].0);
        }
    }

    #[test]
    fn test_transaction_chain_ignores_interleaved_records() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);
        let mut t1 = TransactionDescriptor::new(1);
        let mut t2 = TransactionDescriptor::new(2);

        f.prior.push(
            LogRecord::new(RecordType::SysopStart, 1, DataHeader::None),
            &mut t1,
        );
        f.prior.push(
            LogRecord::new(RecordType::Commit, 2, DataHeader::None),
            &mut t2,
        );
        f.prior.push(
            LogRecord::new(RecordType::Commit, 1, DataHeader::None),
            &mut t1,
        );
        f.appender.flush(&f.prior, &f.storage, &f.pool).unwrap();

        let reader = LogReader::new(&f.pool, AREA);
        let chain = reader.transaction_chain(&f.storage, t1.tail_lsa).unwrap();
        assert_eq!(chain.len(), 2);
        assert!(chain.iter().all(|(_, r)| r.header.trid == 1));
        assert_eq!(chain[0].1.header.rec_type, RecordType::Commit);
        assert_eq!(chain[1].1.header.rec_type, RecordType::SysopStart);
    }

    #[test]
    fn test_reader_falls_back_to_archive() {
        let dir = TempDir::new().unwrap();
        let f = fixture(&dir);
        let mut t1 = TransactionDescriptor::new(1);
        let payload = vec![7u8; AREA * 2];
        let lsa = f.prior.push(
            LogRecord::new(RecordType::DataRedo, 1, DataHeader::None).with_rdata(&[&payload]),
            &mut t1,
        );
        f.appender.flush(&f.prior, &f.storage, &f.pool).unwrap();

        // Move the written pages into an archive and a fresh empty
        // active file, simulating rotation.
        let archive = ArchiveManager::open(dir.path().join("archives"), PAGE_SIZE).unwrap();
        let page_count = f.storage.page_count().unwrap();
        let pages: Vec<LogPage> = (0..page_count)
            .map(|id| f.storage.read_page(id).unwrap())
            .collect();
        archive.archive(&pages).unwrap();
        let empty = FileStorage::open(dir.path().join("rotated.log"), PAGE_SIZE).unwrap();
        let empty_pool = PageBuffer::new(16);

        let reader = LogReader::with_archive(&empty_pool, &archive, AREA);
        let record = reader.read_record_at(&empty, lsa).unwrap();
        assert_eq!(record.rdata, payload);
    }
}
