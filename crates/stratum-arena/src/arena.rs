//! The region allocator.
//!
//! An [`Arena`] hands out memory by bumping a cursor through a chain of
//! blocks. When the newest block is full the arena first tries a retired
//! block from its free list and only then reserves a new one from its
//! [`VirtualMemory`](crate::os::VirtualMemory) backend. Memory is given back
//! in LIFO order by size ([`Arena::deallocate`]), all at once
//! ([`Arena::clear`]), or by restoring a [`Checkpoint`](crate::Checkpoint).
//!
//! The arena tracks a *logical position*: the total bytes handed out across
//! the chain, including alignment padding. Every operation keeps
//! `position == sum of chain cursors`.

#![allow(unsafe_code)]

use std::cmp::Ordering as CmpOrdering;
use std::fmt;
use std::marker::PhantomData;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::backend::Backend;
use crate::block::{Block, BlockInfo, BlockSlab};
use crate::config::{ArenaBuilder, ArenaConfig};
use crate::error::ArenaError;
use crate::observer::Region;
use crate::options::AllocOptions;
use crate::raw;

static NEXT_ARENA_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an arena.
///
/// Arenas are ordinary movable values, so their address says nothing about
/// identity. Scratch conflict lists and checkpoints use this id instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaId(u64);

impl ArenaId {
    pub(crate) fn next() -> Self {
        Self(NEXT_ARENA_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// The raw counter value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ArenaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Summary of an arena's memory usage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ArenaStats {
    /// Logical position: bytes handed out, including padding.
    pub position: usize,
    /// Blocks in the active chain.
    pub chain_blocks: usize,
    /// Retired blocks waiting on the free list.
    pub free_blocks: usize,
    /// Address space spanned by all blocks.
    pub reserved_bytes: usize,
    /// Physical memory committed across all blocks.
    pub committed_bytes: usize,
}

/// Bump-pointer region allocator.
///
/// `'buf` is the lifetime of a caller-supplied first block; arenas that
/// reserve all their memory from the OS are `Arena<'static>`.
///
/// ```
/// use stratum_arena::{AllocOptions, Arena};
///
/// let mut arena = Arena::new(64 * 1024, 4096).unwrap();
/// arena.allocate(4000, AllocOptions::aligned(8)).unwrap();
/// assert_eq!(arena.position(), 4000);
/// arena.deallocate(4000).unwrap();
/// assert_eq!(arena.position(), 0);
/// ```
pub struct Arena<'buf> {
    id: ArenaId,
    slab: BlockSlab,
    position: usize,
    pub(crate) checkpoint_depth: u32,
    config: ArenaConfig,
    backend: Backend,
    _buffer: PhantomData<&'buf mut [u8]>,
}

// SAFETY: an arena exclusively owns its OS blocks and exclusively borrows its
// caller buffer for 'buf; both backends are Send + Sync. Block pointers are
// only dereferenced through `&mut self`.
unsafe impl Send for Arena<'_> {}

impl Arena<'static> {
    /// Create a growable arena reserving blocks of at least `reserve_size`
    /// bytes and committing them `commit_size` bytes at a time.
    pub fn new(reserve_size: usize, commit_size: usize) -> Result<Self, ArenaError> {
        ArenaBuilder::new()
            .reserve_size(reserve_size)
            .commit_size(commit_size)
            .build()
    }

    /// Create an arena from a full config with the system backend.
    pub fn with_config(config: ArenaConfig) -> Result<Self, ArenaError> {
        ArenaBuilder::new().config(config).build()
    }

    /// Start building an arena.
    pub fn builder() -> ArenaBuilder {
        ArenaBuilder::new()
    }

    pub(crate) fn reserve_first(config: ArenaConfig, backend: Backend) -> Result<Self, ArenaError> {
        let id = ArenaId::next();
        let block = reserve_block(id, &config, &backend, 0, 1)?;
        Ok(Self::assemble(id, block, config, backend))
    }
}

impl<'buf> Arena<'buf> {
    /// Create a growable arena whose first block is `buffer`.
    ///
    /// The buffer is never passed to the OS shim and is not released when
    /// the arena is dropped.
    pub fn from_buffer(buffer: &'buf mut [u8]) -> Result<Self, ArenaError> {
        ArenaBuilder::new().build_in(buffer)
    }

    /// Create an arena over raw caller memory.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be writable, must outlive `'buf`, and must not
    /// be accessed other than through this arena while it is alive.
    pub unsafe fn from_raw_parts(
        base: NonNull<u8>,
        len: usize,
        config: ArenaConfig,
        backend: Backend,
    ) -> Result<Self, ArenaError> {
        // SAFETY: forwarded caller contract.
        unsafe { ArenaBuilder::new().config(config).backend(backend).build_raw(base, len) }
    }

    pub(crate) fn over_buffer(
        base: NonNull<u8>,
        len: usize,
        config: ArenaConfig,
        backend: Backend,
    ) -> Self {
        let block = Block::from_buffer(base, len);
        backend.observer.poison(block.region(0, len));
        Self::assemble(ArenaId::next(), block, config, backend)
    }

    fn assemble(id: ArenaId, first: Block, config: ArenaConfig, backend: Backend) -> Self {
        Self {
            id,
            slab: BlockSlab::new(first),
            position: 0,
            checkpoint_depth: 0,
            config,
            backend,
            _buffer: PhantomData,
        }
    }

    /// This arena's identity.
    pub fn id(&self) -> ArenaId {
        self.id
    }

    /// Bytes currently handed out, including alignment padding.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Growth parameters.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }

    /// Memory provider and observer.
    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Allocate `size` bytes.
    ///
    /// Stays in the current block when it has room, otherwise reuses the
    /// first free block that fits, otherwise reserves a new block. The
    /// returned memory is uninitialised unless `options.zero_fill` is set,
    /// and stays valid until it is popped, cleared, restored past, or the
    /// arena is dropped.
    pub fn allocate(
        &mut self,
        size: usize,
        options: AllocOptions,
    ) -> Result<NonNull<u8>, ArenaError> {
        options.validate()?;
        let align = options.alignment;
        let (start, end) = match self.slab.current().placement(size, align) {
            Some(span) => span,
            None => self.grow(size, align)?,
        };
        self.commit_and_bump(start, end, options)
    }

    /// Allocate from the current block only.
    ///
    /// Never takes a free-list block or reserves a new one. Returns `None`
    /// when the current block cannot satisfy the request.
    pub fn try_allocate(&mut self, size: usize, options: AllocOptions) -> Option<NonNull<u8>> {
        options.validate().ok()?;
        let (start, end) = self.slab.current().placement(size, options.alignment)?;
        self.commit_and_bump(start, end, options).ok()
    }

    /// Resize an allocation, in place when it is the most recent one.
    ///
    /// If `ptr..ptr + old_size` ends at the top of the current block, is
    /// aligned to `options.alignment` and `new_size` still fits the block,
    /// the cursor moves and `ptr` is returned. Otherwise a new region is
    /// allocated and the first `min(old_size, new_size)` bytes are copied.
    /// Bytes past `old_size` are zeroed when `options.zero_fill` is set.
    ///
    /// # Safety
    ///
    /// `ptr` must come from this arena for an allocation of `old_size` bytes
    /// that is still live (not popped, cleared or restored past). After a
    /// successful call only the returned pointer may be used.
    pub unsafe fn extend(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        options: AllocOptions,
    ) -> Result<NonNull<u8>, ArenaError> {
        options.validate()?;
        if raw::addr(ptr) % options.alignment == 0 {
            if let Some(resized) = self.resize_in_place(ptr, old_size, new_size, options)? {
                return Ok(resized);
            }
        }
        let fresh = self.allocate(new_size, options)?;
        // SAFETY: the caller guarantees `old_size` live bytes at `ptr`; `fresh`
        // was carved above the cursor, so the ranges are disjoint.
        unsafe { raw::copy(ptr, fresh, old_size.min(new_size)) };
        Ok(fresh)
    }

    /// Pop the last `size` bytes, walking back across blocks.
    ///
    /// Blocks emptied along the way move to the free list; the oldest block
    /// always stays. Fails without touching the arena when `size` exceeds
    /// the logical position.
    pub fn deallocate(&mut self, size: usize) -> Result<(), ArenaError> {
        if size > self.position {
            return Err(ArenaError::OverDeallocation {
                requested: size,
                position: self.position,
            });
        }
        let mut remaining = size;
        while remaining > 0 {
            let block = self.slab.current();
            let used = block.cursor();
            if remaining < used || block.previous.is_none() {
                debug_assert!(remaining <= used, "position out of sync with chain");
                let keep = used - remaining.min(used);
                self.backend.observer.poison(block.region(keep, used));
                self.slab.current_mut().set_cursor(keep);
                break;
            }
            self.backend.observer.poison(block.region(0, used));
            remaining -= used;
            self.slab.retire_current();
        }
        self.position -= size;
        Ok(())
    }

    /// Move the logical position to `position`.
    ///
    /// A lower target pops the difference; a higher one pads forward with a
    /// byte-aligned allocation.
    pub fn set_position(&mut self, position: usize) -> Result<(), ArenaError> {
        match position.cmp(&self.position) {
            CmpOrdering::Less => self.deallocate(self.position - position),
            CmpOrdering::Greater => self
                .allocate(position - self.position, AllocOptions::aligned(1))
                .map(|_| ()),
            CmpOrdering::Equal => Ok(()),
        }
    }

    /// Discard every allocation.
    ///
    /// All chain blocks but the oldest move to the free list; the result is
    /// the same as `deallocate(self.position())` in O(blocks). Outstanding
    /// checkpoints are forgotten: the checkpoint depth restarts at zero.
    pub fn clear(&mut self) {
        for block in self.slab.chain() {
            self.backend.observer.poison(block.region(0, block.cursor()));
        }
        self.slab.recycle_chain();
        self.position = 0;
        self.checkpoint_depth = 0;
    }

    /// Decommit the pages of OS-backed free-list blocks, keeping their
    /// address space reserved. Returns the bytes decommitted.
    pub fn trim(&mut self) -> usize {
        let mut bytes = 0;
        let mut next = self.slab.free_head();
        while let Some(id) = next {
            let block = self.slab.get_mut(id);
            next = block.previous;
            if block.owns_memory() {
                bytes += block.decommit(&*self.backend.memory);
            }
        }
        if bytes > 0 {
            tracing::debug!(arena = %self.id, bytes, "decommitted free blocks");
        }
        bytes
    }

    /// Release every OS-backed block. Equivalent to dropping the arena.
    pub fn destroy(self) {
        drop(self);
    }

    /// Current usage summary.
    pub fn stats(&self) -> ArenaStats {
        let (reserved_bytes, committed_bytes) = self
            .slab
            .iter()
            .fold((0, 0), |(r, c), b| (r + b.reserved(), c + b.committed()));
        ArenaStats {
            position: self.position,
            chain_blocks: self.slab.chain().count(),
            free_blocks: self.slab.free_list().count(),
            reserved_bytes,
            committed_bytes,
        }
    }

    /// Active chain, newest block first.
    pub fn chain(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.slab.chain().map(Block::info)
    }

    /// Free list, front first.
    pub fn free_blocks(&self) -> impl Iterator<Item = BlockInfo> + '_ {
        self.slab.free_list().map(Block::info)
    }

    /// Copy `items` into the arena.
    pub fn alloc_slice_copy<T: Copy>(&mut self, items: &[T]) -> Result<&mut [T], ArenaError> {
        let size = std::mem::size_of_val(items);
        let dst = self.allocate(size, AllocOptions::for_type::<T>())?.cast::<T>();
        // SAFETY: `dst` is a fresh allocation aligned for T and large enough
        // for `items.len()` values; nothing else refers to it and it cannot
        // overlap `items`, which is borrowed independently of `self`.
        unsafe {
            ptr::copy_nonoverlapping(items.as_ptr(), dst.as_ptr(), items.len());
            Ok(std::slice::from_raw_parts_mut(dst.as_ptr(), items.len()))
        }
    }

    /// Allocate `len` values, writing `f(index)` into each slot.
    pub fn alloc_slice_fill_with<T: Copy, F>(
        &mut self,
        len: usize,
        mut f: F,
    ) -> Result<&mut [T], ArenaError>
    where
        F: FnMut(usize) -> T,
    {
        let options = AllocOptions::for_type::<T>();
        let size = std::mem::size_of::<T>()
            .checked_mul(len)
            .ok_or(ArenaError::SizeOverflow {
                size: len,
                alignment: options.alignment,
            })?;
        let dst = self.allocate(size, options)?.cast::<T>();
        for index in 0..len {
            // SAFETY: `index < len` and `dst` holds `len` aligned slots of T.
            unsafe { dst.as_ptr().add(index).write(f(index)) };
        }
        // SAFETY: every slot was written above and nothing else refers to it.
        Ok(unsafe { std::slice::from_raw_parts_mut(dst.as_ptr(), len) })
    }

    /// Copy `s` into the arena.
    pub fn alloc_str(&mut self, s: &str) -> Result<&mut str, ArenaError> {
        let bytes = self.alloc_slice_copy(s.as_bytes())?;
        // SAFETY: the bytes were copied verbatim from a `str`.
        Ok(unsafe { std::str::from_utf8_unchecked_mut(bytes) })
    }

    fn grow(&mut self, size: usize, align: usize) -> Result<(usize, usize), ArenaError> {
        if self.config.fixed_size {
            let current = self.slab.current();
            return Err(ArenaError::CapacityExceeded {
                requested: size,
                available: current.reserved() - current.cursor(),
            });
        }
        if self.slab.reuse_free(size, align).is_some() {
            tracing::trace!(arena = %self.id, size, "reusing retired block");
        } else {
            let block = reserve_block(self.id, &self.config, &self.backend, size, align)?;
            self.slab.push_current(block);
        }
        self.slab
            .current()
            .placement(size, align)
            .ok_or(ArenaError::SizeOverflow {
                size,
                alignment: align,
            })
    }

    fn commit_and_bump(
        &mut self,
        start: usize,
        end: usize,
        options: AllocOptions,
    ) -> Result<NonNull<u8>, ArenaError> {
        let block = self.slab.current_mut();
        block.ensure_committed(end, &*self.backend.memory)?;
        let advance = end - block.cursor();
        block.set_cursor(end);
        let ptr = block.at(start);
        self.position += advance;
        self.backend.observer.unpoison(Region::new(ptr, end - start));
        if options.zero_fill {
            // SAFETY: start..end was just committed and is not yet visible to
            // the caller.
            unsafe { raw::zero(ptr, end - start) };
        }
        Ok(ptr)
    }

    fn resize_in_place(
        &mut self,
        ptr: NonNull<u8>,
        old_size: usize,
        new_size: usize,
        options: AllocOptions,
    ) -> Result<Option<NonNull<u8>>, ArenaError> {
        let block = self.slab.current_mut();
        let Some(start) = block.top_allocation(ptr, old_size) else {
            return Ok(None);
        };
        let Some(end) = start
            .checked_add(new_size)
            .filter(|&end| end <= block.reserved())
        else {
            return Ok(None);
        };
        let old_end = block.cursor();
        if end >= old_end {
            block.ensure_committed(end, &*self.backend.memory)?;
            block.set_cursor(end);
            let grown = block.region(old_end, end);
            self.position += end - old_end;
            self.backend.observer.unpoison(grown);
            if options.zero_fill {
                // SAFETY: the grown tail was just committed and lies past the
                // caller's old allocation.
                unsafe { raw::zero(grown.ptr(), grown.len()) };
            }
        } else {
            let shrunk = block.region(end, old_end);
            block.set_cursor(end);
            self.position -= old_end - end;
            self.backend.observer.poison(shrunk);
        }
        Ok(Some(ptr))
    }
}

/// Reserve a block big enough for `size` bytes at `align`.
fn reserve_block(
    id: ArenaId,
    config: &ArenaConfig,
    backend: &Backend,
    size: usize,
    align: usize,
) -> Result<Block, ArenaError> {
    let overflow = ArenaError::SizeOverflow {
        size,
        alignment: align,
    };
    let page = backend.page_size();
    // OS blocks start page aligned; larger alignments need slack.
    let slack = if align > page { align - 1 } else { 0 };
    let needed = size.checked_add(slack).ok_or_else(|| overflow.clone())?;
    let reserved = raw::round_up(needed.max(config.reserve_size), page).ok_or(overflow)?;
    let committed = raw::round_up(config.commit_size.max(1), page)
        .map_or(reserved, |commit| commit.min(reserved));
    let block = Block::reserve(&*backend.memory, reserved, committed, committed)?;
    backend.observer.mark_allocated(block.reservation());
    backend.observer.poison(block.region(0, committed));
    tracing::debug!(arena = %id, reserved, committed, "reserved arena block");
    Ok(block)
}

impl Drop for Arena<'_> {
    fn drop(&mut self) {
        let mut released = 0usize;
        for block in self.slab.drain() {
            if !block.owns_memory() {
                continue;
            }
            self.backend
                .observer
                .unpoison(block.region(0, block.committed()));
            self.backend.observer.mark_freed(block.reservation());
            block.release(&*self.backend.memory);
            released += 1;
        }
        if released > 0 {
            tracing::debug!(arena = %self.id, blocks = released, "released arena blocks");
        }
    }
}

impl fmt::Debug for Arena<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Arena")
            .field("id", &self.id)
            .field("position", &self.position)
            .field("chain_blocks", &self.slab.chain().count())
            .field("free_blocks", &self.slab.free_list().count())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::os::{SystemMemory, VirtualMemory};
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    const KIB: usize = 1024;

    #[derive(Default)]
    struct TrackingMemory {
        reserves: AtomicUsize,
        releases: AtomicUsize,
        decommits: AtomicUsize,
    }

    impl VirtualMemory for TrackingMemory {
        fn page_size(&self) -> usize {
            SystemMemory.page_size()
        }

        fn reserve(&self, size: usize) -> Result<NonNull<u8>, ArenaError> {
            self.reserves.fetch_add(1, Ordering::Relaxed);
            SystemMemory.reserve(size)
        }

        unsafe fn commit(&self, ptr: NonNull<u8>, size: usize) -> Result<(), ArenaError> {
            unsafe { SystemMemory.commit(ptr, size) }
        }

        unsafe fn decommit(&self, ptr: NonNull<u8>, size: usize) {
            self.decommits.fetch_add(1, Ordering::Relaxed);
            unsafe { SystemMemory.decommit(ptr, size) }
        }

        unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
            self.releases.fetch_add(1, Ordering::Relaxed);
            unsafe { SystemMemory.release(ptr, size) }
        }
    }

    fn tracked(reserve: usize, commit: usize) -> (Arena<'static>, Arc<TrackingMemory>) {
        let memory = Arc::new(TrackingMemory::default());
        let arena = Arena::builder()
            .reserve_size(reserve)
            .commit_size(commit)
            .memory(memory.clone())
            .build()
            .unwrap();
        (arena, memory)
    }

    fn write(ptr: NonNull<u8>, len: usize, byte: u8) {
        unsafe { ptr.as_ptr().write_bytes(byte, len) }
    }

    #[test]
    fn spill_into_second_block_and_pop_it_back() {
        let (mut arena, memory) = tracked(64 * KIB, 4 * KIB);
        arena.allocate(4000, AllocOptions::aligned(8)).unwrap();
        assert_eq!(arena.position(), 4000);

        let big = arena.allocate(65_000, AllocOptions::aligned(8)).unwrap();
        write(big, 65_000, 0xEE);
        assert_eq!(arena.position(), 69_000);
        assert_eq!(arena.stats().chain_blocks, 2);
        assert_eq!(memory.reserves.load(Ordering::Relaxed), 2);

        arena.deallocate(65_000).unwrap();
        assert_eq!(arena.position(), 4000);
        let stats = arena.stats();
        assert_eq!(stats.chain_blocks, 1);
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(arena.chain().next().unwrap().used, 4000);
    }

    #[test]
    fn allocations_respect_alignment() {
        let (mut arena, _) = tracked(64 * KIB, 4 * KIB);
        arena.allocate(3, AllocOptions::aligned(1)).unwrap();
        for align in [1, 2, 4, 8, 16, 64, 256, 4096] {
            let ptr = arena.allocate(5, AllocOptions::aligned(align)).unwrap();
            assert_eq!(ptr.as_ptr() as usize % align, 0, "align {align}");
        }
    }

    #[test]
    fn padding_counts_toward_position() {
        let (mut arena, _) = tracked(64 * KIB, 4 * KIB);
        arena.allocate(1, AllocOptions::aligned(1)).unwrap();
        arena.allocate(8, AllocOptions::aligned(8)).unwrap();
        assert_eq!(arena.position(), 16);
        arena.deallocate(16).unwrap();
        assert_eq!(arena.position(), 0);
    }

    #[test]
    fn commits_grow_with_the_cursor() {
        let (mut arena, _) = tracked(64 * KIB, 4 * KIB);
        let page = arena.backend().page_size();
        let before = arena.stats().committed_bytes;
        let ptr = arena.allocate(before + 1, AllocOptions::aligned(1)).unwrap();
        write(ptr, before + 1, 1);
        let after = arena.stats().committed_bytes;
        assert!(after > before);
        assert_eq!(after % page, 0);
        assert_eq!(arena.stats().chain_blocks, 1);
    }

    #[test]
    fn fixed_size_arena_reports_capacity() {
        let mut arena = Arena::builder()
            .reserve_size(64 * KIB)
            .commit_size(4 * KIB)
            .fixed_size(true)
            .build()
            .unwrap();
        let reserved = arena.chain().next().unwrap().reserved;
        arena.allocate(100, AllocOptions::aligned(1)).unwrap();
        let err = arena.allocate(reserved, AllocOptions::aligned(1)).unwrap_err();
        assert_eq!(
            err,
            ArenaError::CapacityExceeded {
                requested: reserved,
                available: reserved - 100,
            }
        );
        assert_eq!(arena.position(), 100);
    }

    #[test]
    fn over_deallocation_leaves_arena_untouched() {
        let (mut arena, _) = tracked(64 * KIB, 4 * KIB);
        arena.allocate(10, AllocOptions::aligned(1)).unwrap();
        let err = arena.deallocate(11).unwrap_err();
        assert_eq!(
            err,
            ArenaError::OverDeallocation {
                requested: 11,
                position: 10,
            }
        );
        assert_eq!(arena.position(), 10);
        arena.deallocate(0).unwrap();
        assert_eq!(arena.position(), 10);
    }

    #[test]
    fn bad_alignment_and_overflow_are_errors() {
        let (mut arena, _) = tracked(64 * KIB, 4 * KIB);
        assert_eq!(
            arena.allocate(8, AllocOptions::aligned(3)).unwrap_err(),
            ArenaError::InvalidAlignment { alignment: 3 }
        );
        assert!(matches!(
            arena.allocate(usize::MAX, AllocOptions::default()),
            Err(ArenaError::SizeOverflow { .. })
        ));
        assert_eq!(arena.position(), 0);
    }

    #[test]
    fn zero_fill_clears_reused_bytes() {
        let (mut arena, _) = tracked(64 * KIB, 4 * KIB);
        let ptr = arena.allocate(64, AllocOptions::default()).unwrap();
        write(ptr, 64, 0xFF);
        arena.deallocate(64).unwrap();
        let again = arena.allocate(64, AllocOptions::default().zeroed()).unwrap();
        assert_eq!(again, ptr);
        let bytes = unsafe { std::slice::from_raw_parts(again.as_ptr(), 64) };
        assert!(bytes.iter().all(|&b| b == 0));
    }

    #[test]
    fn try_allocate_never_grows() {
        let (mut arena, memory) = tracked(64 * KIB, 4 * KIB);
        let reserved = arena.chain().next().unwrap().reserved;
        assert!(arena.try_allocate(16, AllocOptions::default()).is_some());
        assert!(arena
            .try_allocate(reserved, AllocOptions::default())
            .is_none());
        assert!(arena.try_allocate(8, AllocOptions::aligned(5)).is_none());
        assert_eq!(memory.reserves.load(Ordering::Relaxed), 1);
        assert_eq!(arena.position(), 16);
    }

    #[test]
    fn try_allocate_ignores_fitting_free_blocks() {
        let (mut arena, memory) = tracked(16 * KIB, 4 * KIB);
        arena.allocate(12 * KIB, AllocOptions::default()).unwrap();
        arena.allocate(12 * KIB, AllocOptions::default()).unwrap();
        arena.clear();
        assert_eq!(arena.stats().free_blocks, 1);
        assert!(arena.free_blocks().next().unwrap().reserved >= 12 * KIB);

        arena.allocate(8 * KIB, AllocOptions::default()).unwrap();
        assert!(arena
            .try_allocate(12 * KIB, AllocOptions::default())
            .is_none());
        let stats = arena.stats();
        assert_eq!(stats.free_blocks, 1);
        assert_eq!(stats.chain_blocks, 1);
        assert_eq!(stats.position, 8 * KIB);
        assert_eq!(memory.reserves.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn slice_fill_with_writes_in_place() {
        let (mut arena, _) = tracked(64 * KIB, 4 * KIB);
        arena.allocate(3, AllocOptions::aligned(1)).unwrap();
        let squares = arena.alloc_slice_fill_with(5, |i| (i * i) as u64).unwrap();
        assert_eq!(squares, &[0, 1, 4, 9, 16]);
        assert_eq!(squares.as_ptr() as usize % std::mem::align_of::<u64>(), 0);
        assert!(matches!(
            arena.alloc_slice_fill_with(usize::MAX, |_| 0u64),
            Err(ArenaError::SizeOverflow { .. })
        ));
    }

    #[test]
    fn extend_top_allocation_in_place() {
        let (mut arena, _) = tracked(64 * KIB, 4 * KIB);
        let ptr = arena.allocate(16, AllocOptions::default()).unwrap();
        write(ptr, 16, 7);
        let grown =
            unsafe { arena.extend(ptr, 16, 9000, AllocOptions::default().zeroed()) }.unwrap();
        assert_eq!(grown, ptr);
        assert_eq!(arena.position(), 9000);
        let bytes = unsafe { std::slice::from_raw_parts(grown.as_ptr(), 9000) };
        assert!(bytes[..16].iter().all(|&b| b == 7));
        assert!(bytes[16..].iter().all(|&b| b == 0));

        let shrunk = unsafe { arena.extend(grown, 9000, 8, AllocOptions::default()) }.unwrap();
        assert_eq!(shrunk, ptr);
        assert_eq!(arena.position(), 8);
    }

    #[test]
    fn extend_buried_allocation_copies() {
        let (mut arena, _) = tracked(64 * KIB, 4 * KIB);
        let first = arena.allocate(8, AllocOptions::default()).unwrap();
        write(first, 8, 3);
        arena.allocate(8, AllocOptions::default()).unwrap();
        let moved = unsafe { arena.extend(first, 8, 32, AllocOptions::default()) }.unwrap();
        assert_ne!(moved, first);
        let bytes = unsafe { std::slice::from_raw_parts(moved.as_ptr(), 8) };
        assert_eq!(bytes, &[3; 8]);
        assert_eq!(arena.position(), 48);
    }

    #[test]
    fn extend_past_block_moves_to_new_block() {
        let (mut arena, _) = tracked(64 * KIB, 4 * KIB);
        let reserved = arena.chain().next().unwrap().reserved;
        let ptr = arena.allocate(16, AllocOptions::default()).unwrap();
        write(ptr, 16, 9);
        let moved =
            unsafe { arena.extend(ptr, 16, reserved + 1, AllocOptions::default()) }.unwrap();
        assert_ne!(moved, ptr);
        assert_eq!(arena.stats().chain_blocks, 2);
        let bytes = unsafe { std::slice::from_raw_parts(moved.as_ptr(), 16) };
        assert_eq!(bytes, &[9; 16]);
    }

    #[test]
    fn set_position_pops_and_pads() {
        let (mut arena, _) = tracked(64 * KIB, 4 * KIB);
        arena.allocate(100, AllocOptions::aligned(1)).unwrap();
        arena.set_position(40).unwrap();
        assert_eq!(arena.position(), 40);
        arena.set_position(41).unwrap();
        assert_eq!(arena.position(), 41);
        arena.set_position(41).unwrap();
        assert_eq!(arena.chain().next().unwrap().used, 41);
    }

    #[test]
    fn clear_keeps_oldest_block_and_reuses_the_rest() {
        let (mut arena, memory) = tracked(16 * KIB, 4 * KIB);
        for _ in 0..5 {
            arena.allocate(10 * KIB, AllocOptions::default()).unwrap();
        }
        let reserves = memory.reserves.load(Ordering::Relaxed);
        assert!(arena.stats().chain_blocks > 1);

        arena.clear();
        assert_eq!(arena.position(), 0);
        assert_eq!(arena.stats().chain_blocks, 1);
        assert_eq!(arena.chain().next().unwrap().used, 0);

        for _ in 0..5 {
            arena.allocate(10 * KIB, AllocOptions::default()).unwrap();
        }
        assert_eq!(memory.reserves.load(Ordering::Relaxed), reserves);
    }

    #[test]
    fn trim_decommits_free_blocks_and_reuse_recommits() {
        let (mut arena, memory) = tracked(16 * KIB, 4 * KIB);
        arena.allocate(12 * KIB, AllocOptions::default()).unwrap();
        let second = arena.allocate(12 * KIB, AllocOptions::default()).unwrap();
        write(second, 12 * KIB, 1);
        arena.clear();

        let trimmed = arena.trim();
        assert!(trimmed >= 12 * KIB);
        assert_eq!(memory.decommits.load(Ordering::Relaxed), 1);
        assert_eq!(arena.free_blocks().next().unwrap().committed, 0);
        assert_eq!(arena.trim(), 0);

        arena.allocate(12 * KIB, AllocOptions::default()).unwrap();
        let reused = arena.allocate(12 * KIB, AllocOptions::default()).unwrap();
        write(reused, 12 * KIB, 2);
        assert_eq!(memory.reserves.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn drop_releases_every_os_block() {
        let (mut arena, memory) = tracked(16 * KIB, 4 * KIB);
        for _ in 0..4 {
            arena.allocate(12 * KIB, AllocOptions::default()).unwrap();
        }
        arena.deallocate(12 * KIB).unwrap();
        let reserves = memory.reserves.load(Ordering::Relaxed);
        arena.destroy();
        assert_eq!(memory.releases.load(Ordering::Relaxed), reserves);
    }

    #[test]
    fn buffer_arena_allocates_inside_the_buffer_then_grows() {
        let mut buf = [0u8; 256];
        let range = buf.as_ptr_range();
        let (lo, hi) = (range.start as usize, range.end as usize);
        let mut arena = Arena::from_buffer(&mut buf).unwrap();
        let ptr = arena.allocate(100, AllocOptions::default()).unwrap();
        assert!((lo..hi).contains(&(ptr.as_ptr() as usize)));
        assert!(!arena.chain().next().unwrap().owns_memory);

        let spilled = arena.allocate(200, AllocOptions::default()).unwrap();
        assert!(!(lo..hi).contains(&(spilled.as_ptr() as usize)));
        assert!(arena.chain().next().unwrap().owns_memory);
    }

    #[test]
    fn slice_and_str_helpers_copy_in() {
        let (mut arena, _) = tracked(64 * KIB, 4 * KIB);
        let nums = arena.alloc_slice_copy(&[1u64, 2, 3]).unwrap();
        nums[1] = 20;
        assert_eq!(nums, &[1, 20, 3]);
        assert_eq!(nums.as_ptr() as usize % std::mem::align_of::<u64>(), 0);
        let s = arena.alloc_str("stratum").unwrap();
        s.make_ascii_uppercase();
        assert_eq!(s, "STRATUM");
    }

    #[test]
    fn arena_ids_are_unique() {
        let (a, _) = tracked(64 * KIB, 4 * KIB);
        let (b, _) = tracked(64 * KIB, 4 * KIB);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn arena_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<Arena<'static>>();
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn requests() -> impl Strategy<Value = Vec<(usize, u32)>> {
            prop::collection::vec((0usize..6000, 0u32..8), 1..40)
        }

        fn layout(arena: &Arena<'_>) -> (Vec<(usize, usize)>, Vec<(usize, usize)>) {
            (
                arena.chain().map(|b| (b.reserved, b.used)).collect(),
                arena.free_blocks().map(|b| (b.reserved, b.used)).collect(),
            )
        }

        fn fill(arena: &mut Arena<'_>, reqs: &[(usize, u32)]) {
            for &(size, shift) in reqs {
                arena.allocate(size, AllocOptions::aligned(1 << shift)).unwrap();
            }
        }

        proptest! {
            #[test]
            fn allocations_are_aligned_and_pop_back_to_zero(reqs in requests()) {
                let mut arena = Arena::new(16 * KIB, 4 * KIB).unwrap();
                for &(size, shift) in &reqs {
                    let align = 1usize << shift;
                    let before = arena.position();
                    let ptr = arena.allocate(size, AllocOptions::aligned(align)).unwrap();
                    prop_assert_eq!(ptr.as_ptr() as usize % align, 0);
                    prop_assert!(arena.position() >= before + size);
                }
                let used: usize = arena.chain().map(|b| b.used).sum();
                prop_assert_eq!(used, arena.position());
                arena.deallocate(arena.position()).unwrap();
                prop_assert_eq!(arena.position(), 0);
                prop_assert_eq!(arena.stats().chain_blocks, 1);
            }

            #[test]
            fn clear_matches_popping_everything(reqs in requests(), after in requests()) {
                let mut cleared = Arena::new(16 * KIB, 4 * KIB).unwrap();
                let mut popped = Arena::new(16 * KIB, 4 * KIB).unwrap();
                fill(&mut cleared, &reqs);
                fill(&mut popped, &reqs);

                cleared.clear();
                let position = popped.position();
                popped.deallocate(position).unwrap();
                prop_assert_eq!(cleared.position(), 0);
                prop_assert_eq!(layout(&cleared), layout(&popped));

                fill(&mut cleared, &after);
                fill(&mut popped, &after);
                prop_assert_eq!(cleared.position(), popped.position());
                prop_assert_eq!(layout(&cleared), layout(&popped));
            }

            #[test]
            fn partial_pops_track_position(reqs in requests(), cut in 0usize..100_000) {
                let mut arena = Arena::new(16 * KIB, 4 * KIB).unwrap();
                fill(&mut arena, &reqs);
                let cut = cut.min(arena.position());
                let target = arena.position() - cut;
                arena.deallocate(cut).unwrap();
                prop_assert_eq!(arena.position(), target);
                let used: usize = arena.chain().map(|b| b.used).sum();
                prop_assert_eq!(used, target);
            }
        }
    }
}
