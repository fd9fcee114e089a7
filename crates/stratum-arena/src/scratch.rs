//! Per-thread scratch arenas.
//!
//! Every thread owns [`SCRATCH_POOL_LEN`] scratch arenas, created lazily on
//! first use. Each one starts life over a [`SCRATCH_BACKING_BYTES`] buffer
//! stored in thread-local memory, so short-lived scratch work never touches
//! the OS; heavier use spills into OS blocks that are kept for the life of
//! the thread.
//!
//! [`acquire_scratch`] lends one arena to a closure inside a temporary region,
//! skipping any arena the caller is already using (passed as `conflicts`)
//! and any arena lent to an enclosing call. This keeps a function from
//! handing its caller scratch memory that it is about to roll back.
//!
//! ```
//! use stratum_arena::acquire_scratch;
//!
//! let sum = acquire_scratch(&[], |scratch| {
//!     let values = scratch.alloc_slice_copy(&[1u32, 2, 3]).unwrap();
//!     values.iter().sum::<u32>()
//! })
//! .unwrap();
//! assert_eq!(sum, 6);
//! ```

#![allow(unsafe_code)]

use std::cell::{RefCell, UnsafeCell};
use std::fmt;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use crate::arena::{Arena, ArenaId};
use crate::checkpoint::TempArena;
use crate::config::ArenaBuilder;
use crate::error::ArenaError;

/// Number of scratch arenas per thread (and per [`ScratchPool`]).
pub const SCRATCH_POOL_LEN: usize = 2;

/// Size of the thread-local buffer seeding each scratch arena.
pub const SCRATCH_BACKING_BYTES: usize = 64 * 1024;

type Slot = RefCell<Option<Arena<'static>>>;

/// The calling thread's pool. Slots are declared first so their arenas drop
/// before the buffers they point into.
struct ThreadScratch {
    slots: [Slot; SCRATCH_POOL_LEN],
    buffers: [UnsafeCell<[MaybeUninit<u8>; SCRATCH_BACKING_BYTES]>; SCRATCH_POOL_LEN],
}

impl ThreadScratch {
    const fn new() -> Self {
        Self {
            slots: [const { RefCell::new(None) }; SCRATCH_POOL_LEN],
            buffers: [const { UnsafeCell::new([MaybeUninit::uninit(); SCRATCH_BACKING_BYTES]) };
                SCRATCH_POOL_LEN],
        }
    }

    fn acquire<R, F>(&self, conflicts: &[ArenaId], f: F) -> Result<R, ArenaError>
    where
        F: for<'s> FnOnce(&mut TempArena<'_, 's>) -> R,
    {
        let init = |index: usize| -> Result<Arena<'static>, ArenaError> {
            let base = NonNull::from(&self.buffers[index]).cast::<u8>();
            // SAFETY: the buffer lives in the same thread-local as its slot and
            // outlives the arena stored there. Only the arena in slot `index`
            // ever sees this pointer, and the buffer is never accessed
            // directly.
            unsafe { ArenaBuilder::new().build_raw(base, SCRATCH_BACKING_BYTES) }
        };
        acquire_from(&self.slots, conflicts, init, f)
    }
}

thread_local! {
    static THREAD_SCRATCH: ThreadScratch = const { ThreadScratch::new() };
}

/// Run `f` with a scratch arena from the calling thread's pool.
///
/// The arena is entered through a [`TempArena`], so everything `f`
/// allocates is rolled back when `f` returns or unwinds. Arenas whose id is
/// in `conflicts`, and arenas already lent to an enclosing call, are
/// skipped.
///
/// The arena's buffer lifetime is opaque to `f`, so the arena cannot be
/// moved out of its slot (for example with `mem::swap`) and outlive the
/// thread-local buffer behind it.
///
/// Fails with [`ArenaError::ScratchExhausted`] when no slot is usable, and
/// with [`ArenaError::ScratchUnavailable`] when called during thread
/// teardown.
pub fn acquire_scratch<R, F>(conflicts: &[ArenaId], f: F) -> Result<R, ArenaError>
where
    F: for<'s> FnOnce(&mut TempArena<'_, 's>) -> R,
{
    match THREAD_SCRATCH.try_with(|pool| pool.acquire(conflicts, f)) {
        Ok(result) => result,
        Err(_) => Err(ArenaError::ScratchUnavailable),
    }
}

/// An explicitly owned scratch pool.
///
/// Same acquisition policy as [`acquire_scratch`], but the arenas reserve
/// all their memory through the pool's [`ArenaBuilder`], which lets hosts
/// inject a memory backend or observer. The pool can be moved between
/// threads but not shared.
pub struct ScratchPool {
    slots: [Slot; SCRATCH_POOL_LEN],
    builder: ArenaBuilder,
}

impl ScratchPool {
    /// Pool whose arenas use the default config and system backend.
    pub fn new() -> Self {
        Self::with_builder(ArenaBuilder::new())
    }

    /// Pool whose arenas are built lazily from `builder`.
    pub fn with_builder(builder: ArenaBuilder) -> Self {
        Self {
            slots: [const { RefCell::new(None) }; SCRATCH_POOL_LEN],
            builder,
        }
    }

    /// Run `f` with one of the pool's arenas. See [`acquire_scratch`].
    pub fn acquire<R, F>(&self, conflicts: &[ArenaId], f: F) -> Result<R, ArenaError>
    where
        F: for<'s> FnOnce(&mut TempArena<'_, 's>) -> R,
    {
        acquire_from(&self.slots, conflicts, |_| self.builder.clone().build(), f)
    }

    /// Ids of the arenas created so far and not currently lent out.
    pub fn idle_ids(&self) -> Vec<ArenaId> {
        self.slots
            .iter()
            .filter_map(|slot| slot.try_borrow().ok()?.as_ref().map(Arena::id))
            .collect()
    }
}

impl Default for ScratchPool {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScratchPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScratchPool")
            .field("idle", &self.idle_ids())
            .finish_non_exhaustive()
    }
}

fn acquire_from<R, I, F>(
    slots: &[Slot],
    conflicts: &[ArenaId],
    mut init: I,
    f: F,
) -> Result<R, ArenaError>
where
    I: FnMut(usize) -> Result<Arena<'static>, ArenaError>,
    F: for<'s> FnOnce(&mut TempArena<'_, 's>) -> R,
{
    for (index, slot) in slots.iter().enumerate() {
        // Already borrowed: lent to an enclosing acquisition on this thread.
        let Ok(mut guard) = slot.try_borrow_mut() else {
            continue;
        };
        let arena = match &mut *guard {
            Some(arena) => arena,
            empty => {
                let arena = empty.insert(init(index)?);
                tracing::debug!(slot = index, arena = %arena.id(), "initialised scratch arena");
                arena
            }
        };
        if conflicts.contains(&arena.id()) {
            continue;
        }
        let mut temp = arena.temp();
        let result = f(&mut temp);
        drop(temp);
        return Ok(result);
    }
    Err(ArenaError::ScratchExhausted {
        pool_len: slots.len(),
    })
}
