//! Append pipeline: staged records to durable pages
//!
//! The appender drains the prior queue, lays the serialized records into
//! fixed-size pages (records span page boundaries freely), writes the
//! dirty pages to stable storage in ascending order and syncs. Only then
//! does the durability boundary `nxio_lsa` advance, so the boundary never
//! runs ahead of what is actually on disk.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Condvar, Mutex};

use super::errors::{LogError, LogResult};
use super::lsa::Lsa;
use super::page::LogPage;
use super::page_buffer::{LogStorage, PageBuffer};
use super::prior::PriorQueue;

struct AppendInner {
    /// Pages under construction, keyed by page id. Completed pages are
    /// dropped after they reach stable storage; the partial tail page
    /// stays for the next flush.
    pages: BTreeMap<i64, LogPage>,
    flush_count: u64,
}

/// Writes staged records to stable storage and tracks durability.
pub struct LogAppender {
    inner: Mutex<AppendInner>,
    /// First address not yet known durable.
    nxio_lsa: Mutex<Lsa>,
    durable: Condvar,
    area_size: usize,
}

impl LogAppender {
    /// An appender whose durability boundary starts at `start`.
    pub fn new(start: Lsa, area_size: usize) -> Self {
        Self {
            inner: Mutex::new(AppendInner {
                pages: BTreeMap::new(),
                flush_count: 0,
            }),
            nxio_lsa: Mutex::new(start),
            durable: Condvar::new(),
            area_size,
        }
    }

    /// Drain the prior queue and make everything staged so far durable.
    /// Returns the new durability boundary.
    pub fn flush(
        &self,
        prior: &PriorQueue,
        storage: &dyn LogStorage,
        pool: &PageBuffer,
    ) -> LogResult<Lsa> {
        let nodes = prior.pop_flush_prefix();
        if nodes.is_empty() {
            return Ok(self.durability_boundary());
        }

        let last = &nodes[nodes.len() - 1];
        let end = last.lsa.advance(last.bytes.len() as i32, self.area_size);

        let mut inner = self.inner.lock().unwrap();
        let mut touched = BTreeSet::new();
        for node in &nodes {
            self.lay_out(&mut inner.pages, &mut touched, node.lsa, &node.bytes);
        }

        for page_id in &touched {
            let page = inner
                .pages
                .get(page_id)
                .ok_or_else(|| LogError::append_failed("dirty page missing from append set"))?;
            storage.write_page(page)?;
            pool.insert(*page_id, Arc::new(page.clone()));
        }
        storage.sync()?;

        // Everything before the tail page is final.
        inner.pages.retain(|&id, _| id >= end.page_id);
        inner.flush_count += 1;
        drop(inner);

        let mut nxio = self.nxio_lsa.lock().unwrap();
        if end > *nxio {
            *nxio = end;
        }
        self.durable.notify_all();
        Ok(*nxio)
    }

    fn lay_out(
        &self,
        pages: &mut BTreeMap<i64, LogPage>,
        touched: &mut BTreeSet<i64>,
        start: Lsa,
        bytes: &[u8],
    ) {
        let mut page_id = start.page_id;
        let mut offset = start.offset as usize;
        let mut remaining = bytes;
        while !remaining.is_empty() {
            let page = pages
                .entry(page_id)
                .or_insert_with(|| LogPage::new(page_id, self.area_size));
            let room = self.area_size - offset;
            let chunk = room.min(remaining.len());
            page.write_at(offset, &remaining[..chunk]);
            touched.insert(page_id);
            remaining = &remaining[chunk..];
            page_id += 1;
            offset = 0;
        }
    }

    /// Block until the record at `lsa` is durable.
    pub fn wait_durable(&self, lsa: Lsa) {
        let mut nxio = self.nxio_lsa.lock().unwrap();
        while *nxio <= lsa {
            nxio = self.durable.wait(nxio).unwrap();
        }
    }

    /// First address not yet known durable. Everything strictly below it
    /// is on stable storage.
    pub fn durability_boundary(&self) -> Lsa {
        *self.nxio_lsa.lock().unwrap()
    }

    /// True when the record at `lsa` is already durable.
    pub fn is_durable(&self, lsa: Lsa) -> bool {
        *self.nxio_lsa.lock().unwrap() > lsa
    }

    /// Number of completed flush cycles.
    pub fn flush_count(&self) -> u64 {
        self.inner.lock().unwrap().flush_count
    }
}
