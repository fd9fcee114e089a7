//! Low-level pointer primitives for arena memory operations.
//!
//! Block memory is handed around as `NonNull<u8>` plus byte offsets. The
//! handful of operations that actually touch that memory live here, each
//! with a `# Safety` contract, so the crate's `unsafe` surface stays small
//! and auditable.

#![allow(unsafe_code)]

use std::ptr::{self, NonNull};

/// Round `value` up to the next multiple of `align`.
///
/// `align` must be a power of two. Returns `None` on overflow.
pub(crate) fn align_up(value: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    let mask = align - 1;
    value.checked_add(mask).map(|v| v & !mask)
}

/// Round `value` up to the next multiple of `multiple` (any non-zero value).
///
/// Commit granularities are page multiples but not necessarily powers of
/// two, so this cannot use a mask. Returns `None` on overflow.
pub(crate) fn round_up(value: usize, multiple: usize) -> Option<usize> {
    debug_assert!(multiple > 0);
    value.div_ceil(multiple).checked_mul(multiple)
}

/// Numeric address of a pointer.
pub(crate) fn addr(ptr: NonNull<u8>) -> usize {
    ptr.addr().get()
}

/// Pointer `offset` bytes past `base`.
///
/// # Safety
///
/// `base + offset` must stay within (or one past the end of) the memory
/// range `base` was derived from.
pub(crate) unsafe fn offset(base: NonNull<u8>, offset: usize) -> NonNull<u8> {
    // SAFETY: in bounds of the same allocation per the caller contract.
    unsafe { base.add(offset) }
}

/// Zero `len` bytes starting at `dst`.
///
/// # Safety
///
/// `dst..dst + len` must be committed, writable memory not aliased by any
/// live reference.
pub(crate) unsafe fn zero(dst: NonNull<u8>, len: usize) {
    // SAFETY: forwarded caller contract.
    unsafe { ptr::write_bytes(dst.as_ptr(), 0, len) }
}

/// Fill `len` bytes starting at `dst` with `byte`.
///
/// # Safety
///
/// Same contract as [`zero`].
pub(crate) unsafe fn fill(dst: NonNull<u8>, byte: u8, len: usize) {
    // SAFETY: forwarded caller contract.
    unsafe { ptr::write_bytes(dst.as_ptr(), byte, len) }
}

/// Copy `len` bytes from `src` to `dst`.
///
/// # Safety
///
/// `src..src + len` must be readable, `dst..dst + len` writable, and the
/// two ranges must not overlap.
pub(crate) unsafe fn copy(src: NonNull<u8>, dst: NonNull<u8>, len: usize) {
    // SAFETY: forwarded caller contract.
    unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), len) }
}
