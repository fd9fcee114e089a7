//! Virtual-memory shim: reserve, commit, decommit and release.
//!
//! Blocks claim address space up front with [`VirtualMemory::reserve`] and
//! back it with physical pages incrementally with [`VirtualMemory::commit`].
//! [`SystemMemory`] maps these onto `mmap`/`mprotect`/`madvise`/`munmap` on
//! unix and `VirtualAlloc`/`VirtualFree` on windows.

#![allow(unsafe_code)]

#[cfg(windows)]
use std::ffi::c_void;
use std::ptr::NonNull;

use crate::error::ArenaError;

/// Page size assumed for rounding reservations and commits.
///
/// Backends reporting a larger page size override it through
/// [`VirtualMemory::page_size`].
pub const PAGE_SIZE: usize = 4096;

/// Page-granular virtual memory provider.
///
/// Implementations must be shareable across threads: one backend instance
/// may serve many arenas.
pub trait VirtualMemory: Send + Sync {
    /// Granularity for reservation and commit sizes. Must be a power of two.
    fn page_size(&self) -> usize {
        PAGE_SIZE
    }

    /// Reserve `size` bytes of address space with no access rights.
    ///
    /// `size` is a multiple of [`page_size`](Self::page_size). The returned
    /// pointer is page aligned.
    fn reserve(&self, size: usize) -> Result<NonNull<u8>, ArenaError>;

    /// Make `ptr..ptr + size` readable and writable.
    ///
    /// # Safety
    ///
    /// The range must lie inside a live reservation obtained from this
    /// backend, and `ptr` must be page aligned.
    unsafe fn commit(&self, ptr: NonNull<u8>, size: usize) -> Result<(), ArenaError>;

    /// Return the physical pages behind `ptr..ptr + size` while keeping the
    /// address range reserved.
    ///
    /// # Safety
    ///
    /// Same range requirements as [`commit`](Self::commit). No live
    /// reference may point into the range.
    unsafe fn decommit(&self, ptr: NonNull<u8>, size: usize);

    /// Release a whole reservation.
    ///
    /// # Safety
    ///
    /// `ptr` and `size` must be exactly a pair previously returned by and
    /// passed to [`reserve`](Self::reserve), and nothing may use the range
    /// afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>, size: usize);
}

/// The operating system's virtual memory.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemMemory;

#[cfg(unix)]
impl VirtualMemory for SystemMemory {
    fn page_size(&self) -> usize {
        // SAFETY: sysconf has no preconditions.
        let reported = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(reported)
            .ok()
            .filter(|size| size.is_power_of_two())
            .map_or(PAGE_SIZE, |size| size.max(PAGE_SIZE))
    }

    fn reserve(&self, size: usize) -> Result<NonNull<u8>, ArenaError> {
        // SAFETY: anonymous private mapping with no address hint.
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_NONE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(ArenaError::ReserveFailed { size });
        }
        NonNull::new(ptr.cast::<u8>()).ok_or(ArenaError::ReserveFailed { size })
    }

    unsafe fn commit(&self, ptr: NonNull<u8>, size: usize) -> Result<(), ArenaError> {
        // SAFETY: the range is inside one of our mappings per the caller contract.
        let rc = unsafe {
            libc::mprotect(
                ptr.as_ptr().cast(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
            )
        };
        if rc == 0 {
            Ok(())
        } else {
            Err(ArenaError::CommitFailed { size })
        }
    }

    unsafe fn decommit(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: the range is inside one of our mappings per the caller contract.
        unsafe {
            libc::madvise(ptr.as_ptr().cast(), size, libc::MADV_DONTNEED);
            libc::mprotect(ptr.as_ptr().cast(), size, libc::PROT_NONE);
        }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        // SAFETY: ptr/size describe a whole mapping per the caller contract.
        let rc = unsafe { libc::munmap(ptr.as_ptr().cast(), size) };
        debug_assert_eq!(rc, 0, "munmap failed");
    }
}

#[cfg(windows)]
impl VirtualMemory for SystemMemory {
    fn page_size(&self) -> usize {
        use windows_sys::Win32::System::SystemInformation::{GetSystemInfo, SYSTEM_INFO};

        // SAFETY: SYSTEM_INFO is plain data; GetSystemInfo fills it in.
        let info = unsafe {
            let mut info: SYSTEM_INFO = std::mem::zeroed();
            GetSystemInfo(&mut info);
            info
        };
        let reported = info.dwPageSize as usize;
        if reported.is_power_of_two() {
            reported.max(PAGE_SIZE)
        } else {
            PAGE_SIZE
        }
    }

    fn reserve(&self, size: usize) -> Result<NonNull<u8>, ArenaError> {
        use windows_sys::Win32::System::Memory::{VirtualAlloc, MEM_RESERVE, PAGE_READWRITE};

        // SAFETY: a null address lets the system choose the range.
        let ptr = unsafe { VirtualAlloc(std::ptr::null(), size, MEM_RESERVE, PAGE_READWRITE) };
        NonNull::new(ptr.cast::<u8>()).ok_or(ArenaError::ReserveFailed { size })
    }

    unsafe fn commit(&self, ptr: NonNull<u8>, size: usize) -> Result<(), ArenaError> {
        use windows_sys::Win32::System::Memory::{VirtualAlloc, MEM_COMMIT, PAGE_READWRITE};

        // SAFETY: the range is inside one of our reservations per the caller contract.
        let committed =
            unsafe { VirtualAlloc(ptr.as_ptr().cast::<c_void>(), size, MEM_COMMIT, PAGE_READWRITE) };
        if committed.is_null() {
            Err(ArenaError::CommitFailed { size })
        } else {
            Ok(())
        }
    }

    unsafe fn decommit(&self, ptr: NonNull<u8>, size: usize) {
        use windows_sys::Win32::System::Memory::{VirtualFree, MEM_DECOMMIT};

        // SAFETY: the range is inside one of our reservations per the caller contract.
        unsafe {
            VirtualFree(ptr.as_ptr().cast::<c_void>(), size, MEM_DECOMMIT);
        }
    }

    unsafe fn release(&self, ptr: NonNull<u8>, _size: usize) {
        use windows_sys::Win32::System::Memory::{VirtualFree, MEM_RELEASE};

        // SAFETY: ptr is the base of a reservation per the caller contract.
        let ok = unsafe { VirtualFree(ptr.as_ptr().cast::<c_void>(), 0, MEM_RELEASE) };
        debug_assert_ne!(ok, 0, "VirtualFree failed");
    }
}

#[cfg(not(any(unix, windows)))]
impl VirtualMemory for SystemMemory {
    fn reserve(&self, size: usize) -> Result<NonNull<u8>, ArenaError> {
        Err(ArenaError::ReserveFailed { size })
    }

    unsafe fn commit(&self, _ptr: NonNull<u8>, size: usize) -> Result<(), ArenaError> {
        Err(ArenaError::CommitFailed { size })
    }

    unsafe fn decommit(&self, _ptr: NonNull<u8>, _size: usize) {}

    unsafe fn release(&self, _ptr: NonNull<u8>, _size: usize) {}
}

#[cfg(all(test, any(unix, windows)))]
mod tests {
    use super::*;

    #[test]
    fn page_size_is_at_least_the_default() {
        let page = SystemMemory.page_size();
        assert!(page >= PAGE_SIZE);
        assert!(page.is_power_of_two());
    }

    #[test]
    fn reserve_commit_write_release() {
        let memory = SystemMemory;
        let page = memory.page_size();
        let size = page * 4;
        let base = memory.reserve(size).unwrap();
        assert_eq!(base.as_ptr() as usize % page, 0);
        unsafe {
            memory.commit(base, page).unwrap();
            base.as_ptr().write(0xAB);
            base.as_ptr().add(page - 1).write(0xCD);
            assert_eq!(base.as_ptr().read(), 0xAB);
            memory.decommit(base, page);
            memory.commit(base, page * 2).unwrap();
            base.as_ptr().add(page).write(1);
            memory.release(base, size);
        }
    }

    #[test]
    fn absurd_reservation_fails_cleanly() {
        let err = SystemMemory.reserve(usize::MAX - PAGE_SIZE + 1).unwrap_err();
        assert!(matches!(err, ArenaError::ReserveFailed { .. }));
    }
}
