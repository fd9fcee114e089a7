//! Memory-debugging hooks.
//!
//! The arena reports every transition of its memory to a [`MemoryObserver`]:
//! bytes becoming usable (`unpoison`), bytes being given back (`poison`), and
//! whole blocks entering or leaving the arena (`mark_allocated` /
//! `mark_freed`). Hooks are invoked unconditionally; [`NoopObserver`] makes
//! them free.
//!
//! `poison` and `unpoison` always receive committed, writable memory owned
//! by the arena. `mark_allocated` and `mark_freed` receive whole OS
//! reservations, which may be partly uncommitted and must not be
//! dereferenced.

#![allow(unsafe_code)]

use std::ptr::NonNull;

use crate::raw;

/// A contiguous byte range reported to an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Region {
    ptr: NonNull<u8>,
    len: usize,
}

impl Region {
    /// Describe `len` bytes starting at `ptr`.
    pub fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    /// First byte of the region.
    pub fn ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    /// Address of the first byte.
    pub fn addr(&self) -> usize {
        raw::addr(self.ptr)
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the region covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Receives notifications about arena memory state changes.
pub trait MemoryObserver: Send + Sync {
    /// Bytes are no longer allocated and must not be accessed.
    fn poison(&self, region: Region) {
        let _ = region;
    }

    /// Bytes are about to be handed out to the caller.
    fn unpoison(&self, region: Region) {
        let _ = region;
    }

    /// An OS reservation now belongs to the arena.
    fn mark_allocated(&self, region: Region) {
        let _ = region;
    }

    /// An OS reservation is about to be released.
    fn mark_freed(&self, region: Region) {
        let _ = region;
    }
}

/// Observer that ignores every event.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopObserver;

impl MemoryObserver for NoopObserver {}

/// Observer that scribbles recognisable byte patterns over memory.
///
/// Poisoned bytes are filled with [`FillObserver::POISON`], freshly handed
/// out bytes with [`FillObserver::FRESH`]. Reads of stale or uninitialised
/// arena memory then show up as obvious garbage in a debugger.
#[derive(Clone, Copy, Debug, Default)]
pub struct FillObserver;

impl FillObserver {
    /// Pattern written over memory that was popped or cleared.
    pub const POISON: u8 = 0xDD;

    /// Pattern written over memory before it is returned by an allocation.
    pub const FRESH: u8 = 0xCD;
}

impl MemoryObserver for FillObserver {
    fn poison(&self, region: Region) {
        // SAFETY: poison regions are committed memory owned by the arena
        // with no outstanding references (module contract).
        unsafe { raw::fill(region.ptr, Self::POISON, region.len) }
    }

    fn unpoison(&self, region: Region) {
        // SAFETY: as for `poison`; the caller has not received the pointer yet.
        unsafe { raw::fill(region.ptr, Self::FRESH, region.len) }
    }
}

#[cfg(feature = "asan")]
mod asan {
    use std::ffi::c_void;

    extern "C" {
        pub(super) fn __asan_poison_memory_region(addr: *const c_void, size: usize);
        pub(super) fn __asan_unpoison_memory_region(addr: *const c_void, size: usize);
    }
}

/// Observer forwarding to AddressSanitizer's manual poisoning interface.
///
/// Requires the crate to be linked into a binary built with
/// `-Zsanitizer=address`.
#[cfg(feature = "asan")]
#[derive(Clone, Copy, Debug, Default)]
pub struct AsanObserver;

#[cfg(feature = "asan")]
impl MemoryObserver for AsanObserver {
    fn poison(&self, region: Region) {
        // SAFETY: ASan only updates shadow memory for the given range.
        unsafe { asan::__asan_poison_memory_region(region.ptr.as_ptr().cast(), region.len) }
    }

    fn unpoison(&self, region: Region) {
        // SAFETY: as above.
        unsafe { asan::__asan_unpoison_memory_region(region.ptr.as_ptr().cast(), region.len) }
    }

    fn mark_allocated(&self, region: Region) {
        self.poison(region);
    }

    fn mark_freed(&self, region: Region) {
        self.unpoison(region);
    }
}
