//! Remote log-writer registry
//!
//! Log shipping daemons (replication, remote archiving) each hold a
//! cursor into the stream: the last page they have consumed. The
//! registry tracks those cursors so page recycling never outruns the
//! slowest consumer, and synchronizes writer wake-ups with the flusher.
//!
//! One mutex guards the table; three condvars carry the handshake:
//! `flush_start` wakes parked writers when new pages hit disk,
//! `flush_wait` lets the flusher wait for fetching writers to finish,
//! and `flush_end` releases anyone waiting for the cycle to complete.

use std::collections::HashMap;
use std::sync::{Condvar, Mutex};

/// What a remote writer is doing right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteWriterStatus {
    /// Parked, waiting for new pages.
    Wait,
    /// Actively copying pages out.
    Fetch,
    /// Finished the current batch.
    Done,
    /// Intentionally lagging (delayed replica).
    Delay,
    /// Broken connection; cursor no longer constrains recycling.
    Error,
}

#[derive(Debug, Clone)]
struct WriterEntry {
    status: RemoteWriterStatus,
    /// Last page id this writer has durably consumed, -1 for none.
    last_sent_page_id: i64,
}

struct RegistryInner {
    writers: HashMap<u64, WriterEntry>,
    next_id: u64,
    flush_in_progress: bool,
}

/// Registry of remote log-writer cursors.
pub struct RemoteWriterRegistry {
    inner: Mutex<RegistryInner>,
    flush_start: Condvar,
    flush_wait: Condvar,
    flush_end: Condvar,
}

impl Default for RemoteWriterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RemoteWriterRegistry {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                writers: HashMap::new(),
                next_id: 1,
                flush_in_progress: false,
            }),
            flush_start: Condvar::new(),
            flush_wait: Condvar::new(),
            flush_end: Condvar::new(),
        }
    }

    /// Register a new writer. It starts parked with no pages consumed.
    pub fn register(&self) -> u64 {
        let mut inner = self.inner.lock().unwrap();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.writers.insert(
            id,
            WriterEntry {
                status: RemoteWriterStatus::Wait,
                last_sent_page_id: -1,
            },
        );
        id
    }

    pub fn deregister(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.writers.remove(&id);
        // A departing writer may be the one the flusher is waiting on.
        self.flush_wait.notify_all();
    }

    /// Update a writer's cursor and status. `Done` wakes the flusher.
    pub fn update_cursor(&self, id: u64, last_sent_page_id: i64, status: RemoteWriterStatus) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(entry) = inner.writers.get_mut(&id) {
            entry.last_sent_page_id = last_sent_page_id;
            entry.status = status;
        }
        if status == RemoteWriterStatus::Done || status == RemoteWriterStatus::Error {
            self.flush_wait.notify_all();
        }
    }

    pub fn status(&self, id: u64) -> Option<RemoteWriterStatus> {
        let inner = self.inner.lock().unwrap();
        inner.writers.get(&id).map(|e| e.status)
    }

    /// First page id that must still be retained for the slowest healthy
    /// writer, `None` when no writer constrains recycling.
    pub fn min_required_page(&self) -> Option<i64> {
        let inner = self.inner.lock().unwrap();
        inner
            .writers
            .values()
            .filter(|e| e.status != RemoteWriterStatus::Error)
            .map(|e| e.last_sent_page_id + 1)
            .min()
    }

    /// Park until the flusher announces new pages, then mark this writer
    /// as fetching.
    pub fn wait_for_pages(&self, id: u64) {
        let mut inner = self.inner.lock().unwrap();
        while !inner.flush_in_progress {
            inner = self.flush_start.wait(inner).unwrap();
        }
        if let Some(entry) = inner.writers.get_mut(&id) {
            entry.status = RemoteWriterStatus::Fetch;
        }
    }

    /// Flusher side: announce that a flush made new pages visible.
    pub fn begin_flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.flush_in_progress = true;
        self.flush_start.notify_all();
    }

    /// Flusher side: wait for every fetching writer to report done, then
    /// close the cycle.
    pub fn end_flush(&self) {
        let mut inner = self.inner.lock().unwrap();
        while inner
            .writers
            .values()
            .any(|e| e.status == RemoteWriterStatus::Fetch)
        {
            inner = self.flush_wait.wait(inner).unwrap();
        }
        inner.flush_in_progress = false;
        self.flush_end.notify_all();
    }

    /// Wait until no flush cycle is in progress.
    pub fn wait_flush_end(&self) {
        let mut inner = self.inner.lock().unwrap();
        while inner.flush_in_progress {
            inner = self.flush_end.wait(inner).unwrap();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_register_and_deregister() {
        let registry = RemoteWriterRegistry::new();
        let id = registry.register();
        assert_eq!(registry.status(id), Some(RemoteWriterStatus::Wait));
        registry.deregister(id);
        assert_eq!(registry.status(id), None);
    }

    #[test]
    fn test_min_required_page_tracks_slowest_writer() {
        let registry = RemoteWriterRegistry::new();
        assert_eq!(registry.min_required_page(), None);

        let a = registry.register();
        let b = registry.register();
        registry.update_cursor(a, 10, RemoteWriterStatus::Done);
        registry.update_cursor(b, 4, RemoteWriterStatus::Done);
        assert_eq!(registry.min_required_page(), Some(5));
    }

    #[test]
    fn test_errored_writer_releases_its_pages() {
        let registry = RemoteWriterRegistry::new();
        let a = registry.register();
        let b = registry.register();
        registry.update_cursor(a, 10, RemoteWriterStatus::Done);
        registry.update_cursor(b, 2, RemoteWriterStatus::Error);
        assert_eq!(registry.min_required_page(), Some(11));
    }

    #[test]
    fn test_fresh_writer_pins_everything() {
        let registry = RemoteWriterRegistry::new();
        registry.register();
        assert_eq!(registry.min_required_page(), Some(0));
    }

    #[test]
    fn test_flush_handshake() {
        let registry = Arc::new(RemoteWriterRegistry::new());
        let id = registry.register();

        let writer = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                registry.wait_for_pages(id);
                registry.update_cursor(id, 0, RemoteWriterStatus::Done);
            })
        };

        registry.begin_flush();
        registry.end_flush();
        writer.join().unwrap();
        assert_eq!(registry.status(id), Some(RemoteWriterStatus::Done));
        registry.wait_flush_end();
    }
}
