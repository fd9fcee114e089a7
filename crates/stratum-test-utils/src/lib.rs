//! Test utilities and mock backends for Stratum development.
//!
//! Provides a counting [`VirtualMemory`] ([`CountingMemory`]), a recording
//! [`MemoryObserver`] ([`RecordingObserver`]), and arena fixtures wired to
//! them (see [`fixtures`]).

#![deny(unsafe_code)]
#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod fixtures;

use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use stratum_arena::{ArenaError, MemoryObserver, Region, SystemMemory, VirtualMemory};

pub use fixtures::{counted_arena, init_test_tracing, observed_arena};

/// [`SystemMemory`] wrapper that counts every call and can be told to fail.
#[derive(Default)]
pub struct CountingMemory {
    reserves: AtomicUsize,
    commits: AtomicUsize,
    decommits: AtomicUsize,
    releases: AtomicUsize,
    committed_bytes: AtomicUsize,
    fail_reserve: AtomicBool,
    fail_commit: AtomicBool,
}

impl CountingMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reserves(&self) -> usize {
        self.reserves.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn decommits(&self) -> usize {
        self.decommits.load(Ordering::SeqCst)
    }

    pub fn releases(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }

    /// Total bytes passed to successful `commit` calls.
    pub fn committed_bytes(&self) -> usize {
        self.committed_bytes.load(Ordering::SeqCst)
    }

    /// Reservations not yet released.
    pub fn live_reservations(&self) -> usize {
        self.reserves() - self.releases()
    }

    /// Make subsequent `reserve` calls fail.
    pub fn fail_reserves(&self, fail: bool) {
        self.fail_reserve.store(fail, Ordering::SeqCst);
    }

    /// Make subsequent `commit` calls fail.
    pub fn fail_commits(&self, fail: bool) {
        self.fail_commit.store(fail, Ordering::SeqCst);
    }
}

#[allow(unsafe_code)]
impl VirtualMemory for CountingMemory {
    fn page_size(&self) -> usize {
        SystemMemory.page_size()
    }

    fn reserve(&self, size: usize) -> Result<NonNull<u8>, ArenaError> {
        if self.fail_reserve.load(Ordering::SeqCst) {
            return Err(ArenaError::ReserveFailed { size });
        }
        let ptr = SystemMemory.reserve(size)?;
        self.reserves.fetch_add(1, Ordering::SeqCst);
        Ok(ptr)
    }

    unsafe fn commit(&self, ptr: NonNull<u8>, size: usize) -> Result<(), ArenaError> {
        if self.fail_commit.load(Ordering::SeqCst) {
            return Err(ArenaError::CommitFailed { size });
        }
        // SAFETY: forwarded caller contract.
        unsafe { SystemMemory.commit(ptr, size)? };
        self.commits.fetch_add(1, Ordering::SeqCst);
        self.committed_bytes.fetch_add(size, Ordering::SeqCst);
        Ok(())
    }

    unsafe fn decommit(&self, ptr: NonNull<u8>, size: usize) {
        self.decommits.fetch_add(1, Ordering::SeqCst);
        // SAFETY: forwarded caller contract.
        unsafe { SystemMemory.decommit(ptr, size) }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        // SAFETY: forwarded caller contract.
        unsafe { SystemMemory.release(ptr, size) }
    }
}

/// One observer callback, with the region flattened to plain numbers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObserverEvent {
    Poison { addr: usize, len: usize },
    Unpoison { addr: usize, len: usize },
    Allocated { addr: usize, len: usize },
    Freed { addr: usize, len: usize },
}

impl ObserverEvent {
    pub fn len(&self) -> usize {
        match *self {
            Self::Poison { len, .. }
            | Self::Unpoison { len, .. }
            | Self::Allocated { len, .. }
            | Self::Freed { len, .. } => len,
        }
    }

    pub fn addr(&self) -> usize {
        match *self {
            Self::Poison { addr, .. }
            | Self::Unpoison { addr, .. }
            | Self::Allocated { addr, .. }
            | Self::Freed { addr, .. } => addr,
        }
    }
}

/// Observer that records every callback in order.
#[derive(Default)]
pub struct RecordingObserver {
    events: Mutex<Vec<ObserverEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the events so far.
    pub fn events(&self) -> Vec<ObserverEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Drain the recorded events.
    pub fn take(&self) -> Vec<ObserverEvent> {
        std::mem::take(&mut *self.events.lock().unwrap_or_else(PoisonError::into_inner))
    }

    fn push(&self, event: ObserverEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}

impl MemoryObserver for RecordingObserver {
    fn poison(&self, region: Region) {
        self.push(ObserverEvent::Poison {
            addr: region.addr(),
            len: region.len(),
        });
    }

    fn unpoison(&self, region: Region) {
        self.push(ObserverEvent::Unpoison {
            addr: region.addr(),
            len: region.len(),
        });
    }

    fn mark_allocated(&self, region: Region) {
        self.push(ObserverEvent::Allocated {
            addr: region.addr(),
            len: region.len(),
        });
    }

    fn mark_freed(&self, region: Region) {
        self.push(ObserverEvent::Freed {
            addr: region.addr(),
            len: region.len(),
        });
    }
}
