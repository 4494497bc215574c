//! Concurrency primitives for the log core
//!
//! Two abstractions the rest of the crate builds on:
//!
//! - [`SectionLock`]: an upgradeable read-write lock with explicit
//!   promote/demote, used for the log, transaction-table and archive
//!   critical sections. Background scans hold the read side; any mutation
//!   requires the write side (no writer-work-under-shared-hold relaxation).
//! - [`CancelToken`]: cooperative cancellation, polled only at defined
//!   suspension points (page fetch, flush wait). Never preemptive.
//!
//! A single-threaded configuration simply never contends on any of these.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

/// Upgradeable read-write critical section.
///
/// Readers coexist with readers; a writer excludes everyone. `promote`
/// turns a read guard into a write guard (releasing and re-acquiring, so
/// the caller must revalidate what it read); `demote` turns a write guard
/// into a read guard without a window where a writer can slip in.
#[derive(Debug, Default)]
pub struct SectionLock {
    state: Mutex<SectionState>,
    cond: Condvar,
}

#[derive(Debug, Default)]
struct SectionState {
    readers: usize,
    writer: bool,
}

/// Shared hold on a [`SectionLock`]. Released on drop.
#[derive(Debug)]
pub struct ReadGuard<'a> {
    lock: &'a SectionLock,
}

/// Exclusive hold on a [`SectionLock`]. Released on drop.
#[derive(Debug)]
pub struct WriteGuard<'a> {
    lock: &'a SectionLock,
}

impl SectionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the section as a reader.
    pub fn read(&self) -> ReadGuard<'_> {
        let mut state = self.state.lock().unwrap();
        while state.writer {
            state = self.cond.wait(state).unwrap();
        }
        state.readers += 1;
        ReadGuard { lock: self }
    }

    /// Acquire the section exclusively.
    pub fn write(&self) -> WriteGuard<'_> {
        let mut state = self.state.lock().unwrap();
        while state.writer || state.readers > 0 {
            state = self.cond.wait(state).unwrap();
        }
        state.writer = true;
        WriteGuard { lock: self }
    }

    /// Promote a read hold to a write hold.
    ///
    /// The read hold is released first, so state observed under it must be
    /// revalidated after promotion.
    pub fn promote<'a>(&'a self, guard: ReadGuard<'a>) -> WriteGuard<'a> {
        drop(guard);
        self.write()
    }

    /// Demote a write hold to a read hold. No writer can enter in between.
    pub fn demote<'a>(&'a self, guard: WriteGuard<'a>) -> ReadGuard<'a> {
        {
            let mut state = self.lock_state();
            state.writer = false;
            state.readers += 1;
        }
        std::mem::forget(guard);
        self.cond.notify_all();
        ReadGuard { lock: self }
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, SectionState> {
        self.state.lock().unwrap()
    }
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.lock_state();
        state.readers -= 1;
        if state.readers == 0 {
            self.lock.cond.notify_all();
        }
    }
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.lock.lock_state();
        state.writer = false;
        drop(state);
        self.lock.cond.notify_all();
    }
}

/// Cooperative interrupt flag shared between a transaction's owner and the
/// threads allowed to signal it (kill/interrupt commands).
///
/// Checked only at defined suspension points. Setting it never stops a
/// computation mid-flight.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// True once cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear the flag (on transaction completion the slot is reused).
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
