//! Log archives
//!
//! Pages leaving the active log are rotated into numbered archive files
//! so old records stay readable for undo walks, recovery and remote
//! writers. Each archive carries a small header (first page id, page
//! count) followed by raw pages. An `log_info.json` sidecar indexes the
//! archives; it is rewritten atomically on every change.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::errors::{LogError, LogResult};
use super::page::LogPage;

const INFO_FILE_NAME: &str = "log_info.json";
const ARCHIVE_HEADER_SIZE: u64 = 16;

/// One archive file's entry in the info file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveEntry {
    pub number: u64,
    pub first_page_id: i64,
    pub page_count: u32,
    pub created_at: DateTime<Utc>,
}

impl ArchiveEntry {
    fn contains(&self, page_id: i64) -> bool {
        page_id >= self.first_page_id && page_id < self.first_page_id + self.page_count as i64
    }
}

/// Persistent index of all archives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogInfoFile {
    pub archives: Vec<ArchiveEntry>,
    pub next_archive_number: u64,
}

/// Creates, indexes and serves archive files under one directory.
pub struct ArchiveManager {
    dir: PathBuf,
    page_size: usize,
    info: Mutex<LogInfoFile>,
}

impl ArchiveManager {
    /// Open the archive set under `dir`, loading the info file if present.
    pub fn open(dir: impl Into<PathBuf>, page_size: usize) -> LogResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .map_err(|e| LogError::archive_failed("create archive dir", e))?;
        let info_path = dir.join(INFO_FILE_NAME);
        let info = if info_path.exists() {
            let data = fs::read(&info_path)
                .map_err(|e| LogError::archive_failed("read info file", e))?;
            serde_json::from_slice(&data)
                .map_err(|e| LogError::archive_failed("parse info file", e.into()))?
        } else {
            LogInfoFile::default()
        };
        Ok(Self {
            dir,
            page_size,
            info: Mutex::new(info),
        })
    }

    fn archive_path(&self, number: u64) -> PathBuf {
        self.dir.join(format!("archive_{:05}.log", number))
    }

    fn save_info(&self, info: &LogInfoFile) -> LogResult<()> {
        let data = serde_json::to_vec_pretty(info)
            .map_err(|e| LogError::archive_failed("encode info file", e.into()))?;
        let tmp = self.dir.join(format!("{}.tmp", INFO_FILE_NAME));
        fs::write(&tmp, data).map_err(|e| LogError::archive_failed("write info file", e))?;
        fs::rename(&tmp, self.dir.join(INFO_FILE_NAME))
            .map_err(|e| LogError::archive_failed("install info file", e))
    }

    /// Rotate a run of consecutive pages into a new archive. Pages must be
    /// contiguous starting at `pages[0].page_id`.
    pub fn archive(&self, pages: &[LogPage]) -> LogResult<u64> {
        if pages.is_empty() {
            return Err(LogError::archive_failed(
                "empty archive rotation",
                io::Error::new(io::ErrorKind::InvalidInput, "no pages"),
            ));
        }
        let first = pages[0].page_id;
        let mut info = self.info.lock().unwrap();
        let number = info.next_archive_number;

        let path = self.archive_path(number);
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| LogError::archive_failed(format!("create {}", path.display()), e))?;
        file.write_all(&first.to_le_bytes())
            .and_then(|_| file.write_all(&(pages.len() as u32).to_le_bytes()))
            .and_then(|_| file.write_all(&[0u8; 4]))
            .map_err(|e| LogError::archive_failed("write archive header", e))?;
        for page in pages {
            file.write_all(&page.to_bytes())
                .map_err(|e| LogError::archive_failed("write archive page", e))?;
        }
        file.sync_data()
            .map_err(|e| LogError::archive_failed("sync archive", e))?;

        info.archives.push(ArchiveEntry {
            number,
            first_page_id: first,
            page_count: pages.len() as u32,
            created_at: Utc::now(),
        });
        info.next_archive_number += 1;
        self.save_info(&info)?;
        Ok(number)
    }

    /// Fetch `page_id` from whichever archive holds it, `None` when no
    /// archive does.
    pub fn fetch_page(&self, page_id: i64) -> LogResult<Option<LogPage>> {
        let entry = {
            let info = self.info.lock().unwrap();
            match info.archives.iter().find(|e| e.contains(page_id)) {
                Some(entry) => entry.clone(),
                None => return Ok(None),
            }
        };
        let path = self.archive_path(entry.number);
        let mut file = File::open(&path)
            .map_err(|e| LogError::archive_failed(format!("open {}", path.display()), e))?;
        let slot = (page_id - entry.first_page_id) as u64;
        file.seek(SeekFrom::Start(
            ARCHIVE_HEADER_SIZE + slot * self.page_size as u64,
        ))
        .map_err(|e| LogError::archive_failed("seek archive page", e))?;
        let mut buf = vec![0u8; self.page_size];
        file.read_exact(&mut buf)
            .map_err(|e| LogError::archive_failed("read archive page", e))?;
        let page = LogPage::from_bytes(&buf)?;
        Ok(Some(page))
    }

    /// Delete archives wholly below `min_required_page`. Remote writer
    /// cursors feed this bound, so no consumer loses pages it still needs.
    pub fn trim_below(&self, min_required_page: i64) -> LogResult<usize> {
        let mut info = self.info.lock().unwrap();
        let mut removed = 0;
        let mut kept = Vec::with_capacity(info.archives.len());
        for entry in info.archives.drain(..) {
            let last = entry.first_page_id + entry.page_count as i64 - 1;
            if last < min_required_page {
                fs::remove_file(self.archive_path(entry.number))
                    .map_err(|e| LogError::archive_failed("remove archive", e))?;
                removed += 1;
            } else {
                kept.push(entry);
            }
        }
        info.archives = kept;
        self.save_info(&info)?;
        Ok(removed)
    }

    pub fn entries(&self) -> Vec<ArchiveEntry> {
        self.info.lock().unwrap().archives.clone()
    }

    pub fn info_path(&self) -> PathBuf {
        self.dir.join(INFO_FILE_NAME)
    }
}
