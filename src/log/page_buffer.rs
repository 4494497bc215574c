//! Log page storage and the read pool
//!
//! [`LogStorage`] is the seam between the engine and stable storage; the
//! file-backed implementation keeps the active log as a flat file of
//! fixed-size pages. [`PageBuffer`] is a bounded read cache in front of
//! it. Frames are handed out as `Arc<LogPage>`, so a frame stays pinned
//! for exactly as long as a reader holds the handle; eviction only drops
//! the pool's own reference.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::errors::{LogError, LogResult};
use super::page::{LogPage, PAGE_HEADER_SIZE};

/// Stable storage for log pages.
pub trait LogStorage: Send + Sync {
    /// Read the page at `page_id`, validating its checksum.
    fn read_page(&self, page_id: i64) -> LogResult<LogPage>;

    /// Write one page at its slot. Not durable until [`LogStorage::sync`].
    fn write_page(&self, page: &LogPage) -> LogResult<()>;

    /// Force all prior writes to stable storage.
    fn sync(&self) -> LogResult<()>;
}

/// Active log file: page `n` lives at byte offset `n * page_size`.
pub struct FileStorage {
    path: PathBuf,
    file: Mutex<File>,
    page_size: usize,
}

impl FileStorage {
    pub fn open(path: impl AsRef<Path>, page_size: usize) -> LogResult<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)
            .map_err(|e| {
                LogError::fatal(
                    "open active log",
                    LogError::flush_failed(format!("open {}", path.display()), e),
                )
            })?;
        Ok(Self {
            path,
            file: Mutex::new(file),
            page_size,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of complete pages currently on disk.
    pub fn page_count(&self) -> LogResult<i64> {
        let file = self.file.lock().unwrap();
        let len = file
            .metadata()
            .map_err(|e| LogError::fatal("stat active log", LogError::flush_failed("stat active log", e)))?
            .len();
        Ok(len as i64 / self.page_size as i64)
    }
}

impl LogStorage for FileStorage {
    fn read_page(&self, page_id: i64) -> LogResult<LogPage> {
        let mut buf = vec![0u8; self.page_size];
        {
            let mut file = self.file.lock().unwrap();
            file.seek(SeekFrom::Start(page_id as u64 * self.page_size as u64))
                .map_err(|e| {
                    LogError::fatal(
                        "active log read",
                        LogError::page_fetch_failed(page_id, format!("seek failed: {}", e)),
                    )
                })?;
            file.read_exact(&mut buf).map_err(|e| {
                LogError::fatal(
                    "active log read",
                    LogError::page_fetch_failed(page_id, format!("read failed: {}", e)),
                )
            })?;
        }
        let page = LogPage::from_bytes(&buf)?;
        if page.page_id != page_id {
            return Err(LogError::fatal(
                "active log read",
                LogError::page_fetch_failed(page_id, format!("slot holds page {}", page.page_id)),
            ));
        }
        Ok(page)
    }

    fn write_page(&self, page: &LogPage) -> LogResult<()> {
        let bytes = page.to_bytes();
        debug_assert_eq!(bytes.len(), self.page_size);
        debug_assert_eq!(page.area_size(), self.page_size - PAGE_HEADER_SIZE);
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(page.page_id as u64 * self.page_size as u64))
            .map_err(|e| {
                LogError::fatal(
                    "active log write",
                    LogError::flush_failed(format!("seek page {}", page.page_id), e),
                )
            })?;
        file.write_all(&bytes).map_err(|e| {
            LogError::fatal(
                "active log write",
                LogError::flush_failed(format!("write page {}", page.page_id), e),
            )
        })?;
        Ok(())
    }

    fn sync(&self) -> LogResult<()> {
        let file = self.file.lock().unwrap();
        file.sync_data().map_err(|e| {
            LogError::fatal(
                "active log sync",
                LogError::flush_failed("sync active log", e),
            )
        })
    }
}

struct PoolInner {
    frames: HashMap<i64, Arc<LogPage>>,
    // FIFO eviction order; good enough for mostly-sequential log reads.
    order: VecDeque<i64>,
}

/// Bounded pool of log pages for readers.
pub struct PageBuffer {
    inner: Mutex<PoolInner>,
    capacity: usize,
}

impl PageBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(PoolInner {
                frames: HashMap::with_capacity(capacity),
                order: VecDeque::with_capacity(capacity),
            }),
            capacity,
        }
    }

    /// Fetch a page, consulting the pool before stable storage. Pages that
    /// exist nowhere are a fatal condition: a reader asked for part of the
    /// log that the engine believes it wrote.
    pub fn fetch(&self, storage: &dyn LogStorage, page_id: i64) -> LogResult<Arc<LogPage>> {
        if let Some(page) = self.get_cached(page_id) {
            return Ok(page);
        }
        let page = Arc::new(storage.read_page(page_id)?);
        self.insert(page_id, Arc::clone(&page));
        Ok(page)
    }

    pub fn get_cached(&self, page_id: i64) -> Option<Arc<LogPage>> {
        let inner = self.inner.lock().unwrap();
        inner.frames.get(&page_id).cloned()
    }

    /// Install a freshly written page, replacing any stale cached copy.
    pub fn insert(&self, page_id: i64, page: Arc<LogPage>) {
        let mut inner = self.inner.lock().unwrap();
        if inner.frames.insert(page_id, page).is_none() {
            inner.order.push_back(page_id);
        }
        while inner.frames.len() > self.capacity {
            if let Some(victim) = inner.order.pop_front() {
                inner.frames.remove(&victim);
            } else {
                break;
            }
        }
    }

    /// Drop any cached copy of `page_id`.
    pub fn invalidate(&self, page_id: i64) {
        let mut inner = self.inner.lock().unwrap();
        if inner.frames.remove(&page_id).is_some() {
            inner.order.retain(|&id| id != page_id);
        }
    }
}
