//! Blocks and the slab that links them.
//!
//! A [`Block`] is one reserved span of address space with its own commit
//! watermark and bump cursor. Block descriptors live out of band in a
//! [`BlockSlab`] and refer to each other by [`BlockId`], so the chain of
//! active blocks (newest first) and the free list of retired blocks are both
//! singly linked lists threaded through `Block::previous`.

#![allow(unsafe_code)]

use std::ptr::NonNull;

use smallvec::SmallVec;

use crate::error::ArenaError;
use crate::observer::Region;
use crate::os::VirtualMemory;
use crate::raw;

/// Index of a block within its arena's slab.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct BlockId(u32);

impl BlockId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Snapshot of one block's bookkeeping.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BlockInfo {
    /// Bytes of address space the block spans.
    pub reserved: usize,
    /// Bytes currently backed by physical memory.
    pub committed: usize,
    /// Bytes handed out from the block, including alignment padding.
    pub used: usize,
    /// Whether the block was reserved from the OS (and is released on drop).
    pub owns_memory: bool,
}

/// One contiguous span with bump allocation.
///
/// Invariant: `cursor <= committed <= reserved`.
pub(crate) struct Block {
    base: NonNull<u8>,
    reserved: usize,
    committed: usize,
    cursor: usize,
    commit_granularity: usize,
    owns_memory: bool,
    pub(crate) previous: Option<BlockId>,
}

impl Block {
    /// Wrap caller-supplied memory. The whole buffer counts as committed.
    pub(crate) fn from_buffer(base: NonNull<u8>, len: usize) -> Self {
        Self {
            base,
            reserved: len,
            committed: len,
            cursor: 0,
            commit_granularity: len.max(1),
            owns_memory: false,
            previous: None,
        }
    }

    /// Reserve `reserve` bytes from `memory` and commit the first `commit`.
    ///
    /// Both sizes must be page multiples with `commit <= reserve`.
    pub(crate) fn reserve(
        memory: &dyn VirtualMemory,
        reserve: usize,
        commit: usize,
        commit_granularity: usize,
    ) -> Result<Self, ArenaError> {
        debug_assert!(commit <= reserve);
        let base = memory.reserve(reserve)?;
        if commit > 0 {
            // SAFETY: the first `commit` bytes lie inside the reservation above.
            if let Err(err) = unsafe { memory.commit(base, commit) } {
                // SAFETY: nothing else knows about this reservation yet.
                unsafe { memory.release(base, reserve) };
                return Err(err);
            }
        }
        Ok(Self {
            base,
            reserved: reserve,
            committed: commit,
            cursor: 0,
            commit_granularity,
            owns_memory: true,
            previous: None,
        })
    }

    pub(crate) fn reserved(&self) -> usize {
        self.reserved
    }

    pub(crate) fn committed(&self) -> usize {
        self.committed
    }

    pub(crate) fn cursor(&self) -> usize {
        self.cursor
    }

    pub(crate) fn owns_memory(&self) -> bool {
        self.owns_memory
    }

    pub(crate) fn info(&self) -> BlockInfo {
        BlockInfo {
            reserved: self.reserved,
            committed: self.committed,
            used: self.cursor,
            owns_memory: self.owns_memory,
        }
    }

    /// Aligned `(start, end)` offsets for `size` bytes placed at `cursor`,
    /// or `None` if they would run past the reservation.
    pub(crate) fn placement_at(
        &self,
        cursor: usize,
        size: usize,
        align: usize,
    ) -> Option<(usize, usize)> {
        // Align the absolute address so buffers with any base alignment work.
        let base = raw::addr(self.base);
        let start = raw::align_up(base.checked_add(cursor)?, align)? - base;
        let end = start.checked_add(size)?;
        (end <= self.reserved).then_some((start, end))
    }

    /// Placement at the current cursor.
    pub(crate) fn placement(&self, size: usize, align: usize) -> Option<(usize, usize)> {
        self.placement_at(self.cursor, size, align)
    }

    /// Offset at which an allocation of `size` bytes ending at the cursor
    /// starts, if `ptr` is exactly that allocation.
    pub(crate) fn top_allocation(&self, ptr: NonNull<u8>, size: usize) -> Option<usize> {
        let start = self.cursor.checked_sub(size)?;
        (raw::addr(ptr) == raw::addr(self.base).wrapping_add(start)).then_some(start)
    }

    /// Commit enough of the block that offsets below `end` are writable.
    pub(crate) fn ensure_committed(
        &mut self,
        end: usize,
        memory: &dyn VirtualMemory,
    ) -> Result<(), ArenaError> {
        if end <= self.committed {
            return Ok(());
        }
        debug_assert!(self.owns_memory, "caller buffers are fully committed");
        debug_assert!(end <= self.reserved);
        let target = raw::round_up(end, self.commit_granularity)
            .map_or(self.reserved, |rounded| rounded.min(self.reserved));
        let grow = target - self.committed;
        // SAFETY: `committed..target` lies inside this block's reservation and
        // `committed` is a page multiple for OS blocks.
        unsafe { memory.commit(self.at(self.committed), grow)? };
        self.committed = target;
        Ok(())
    }

    /// Move the cursor. `cursor` must not exceed the committed watermark.
    pub(crate) fn set_cursor(&mut self, cursor: usize) {
        debug_assert!(cursor <= self.committed);
        self.cursor = cursor;
    }

    /// Pointer to byte `offset` of the block.
    pub(crate) fn at(&self, offset: usize) -> NonNull<u8> {
        debug_assert!(offset <= self.reserved);
        // SAFETY: every offset handed in is derived from a placement or the
        // cursor, both bounded by `reserved`.
        unsafe { raw::offset(self.base, offset) }
    }

    /// Bytes `start..end` of the block as an observer region.
    pub(crate) fn region(&self, start: usize, end: usize) -> Region {
        Region::new(self.at(start), end - start)
    }

    /// The whole reservation.
    pub(crate) fn reservation(&self) -> Region {
        Region::new(self.base, self.reserved)
    }

    /// Decommit every committed page. Returns the bytes given back.
    pub(crate) fn decommit(&mut self, memory: &dyn VirtualMemory) -> usize {
        debug_assert!(self.owns_memory);
        debug_assert_eq!(self.cursor, 0);
        let bytes = self.committed;
        if bytes > 0 {
            // SAFETY: the committed prefix belongs to this block and the
            // cursor is zero, so nothing handed out points into it.
            unsafe { memory.decommit(self.base, bytes) };
            self.committed = 0;
        }
        bytes
    }

    /// Give the reservation back to `memory`.
    pub(crate) fn release(self, memory: &dyn VirtualMemory) {
        debug_assert!(self.owns_memory);
        // SAFETY: `base`/`reserved` are exactly what `reserve` returned and the
        // block is consumed, so nothing can reach the range afterwards.
        unsafe { memory.release(self.base, self.reserved) };
    }
}

/// Slab of block descriptors with the active chain and free list.
///
/// The chain is never empty: `current` always names a block.
pub(crate) struct BlockSlab {
    blocks: SmallVec<[Block; 4]>,
    current: BlockId,
    free_head: Option<BlockId>,
}

impl BlockSlab {
    pub(crate) fn new(first: Block) -> Self {
        let mut blocks = SmallVec::new();
        blocks.push(first);
        Self {
            blocks,
            current: BlockId(0),
            free_head: None,
        }
    }

    pub(crate) fn current(&self) -> &Block {
        &self.blocks[self.current.index()]
    }

    pub(crate) fn current_mut(&mut self) -> &mut Block {
        &mut self.blocks[self.current.index()]
    }

    /// Add a fresh block and make it the head of the chain.
    pub(crate) fn push_current(&mut self, mut block: Block) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        block.previous = Some(self.current);
        self.blocks.push(block);
        self.current = id;
        id
    }

    /// Unlink the first free block that can hold `size` bytes at `align`
    /// from an empty cursor and make it the head of the chain.
    pub(crate) fn reuse_free(&mut self, size: usize, align: usize) -> Option<BlockId> {
        let mut prior: Option<BlockId> = None;
        let mut next = self.free_head;
        while let Some(id) = next {
            let block = &self.blocks[id.index()];
            let after = block.previous;
            if block.placement_at(0, size, align).is_some() {
                match prior {
                    Some(p) => self.blocks[p.index()].previous = after,
                    None => self.free_head = after,
                }
                let block = &mut self.blocks[id.index()];
                block.cursor = 0;
                block.previous = Some(self.current);
                self.current = id;
                return Some(id);
            }
            prior = Some(id);
            next = after;
        }
        None
    }

    /// Move the head of the chain onto the free list.
    ///
    /// The oldest chain block is never retired; returns `false` if `current`
    /// has no predecessor.
    pub(crate) fn retire_current(&mut self) -> bool {
        let id = self.current;
        let block = &mut self.blocks[id.index()];
        let Some(previous) = block.previous else {
            return false;
        };
        block.cursor = 0;
        block.previous = self.free_head;
        self.free_head = Some(id);
        self.current = previous;
        true
    }

    /// Reset every chain block and splice the chain onto the front of the
    /// free list oldest first, keeping the oldest block as `current`.
    ///
    /// Leaves exactly the state that retiring blocks one by one would.
    pub(crate) fn recycle_chain(&mut self) {
        let mut link = self.free_head;
        let mut next = Some(self.current);
        while let Some(id) = next {
            let block = &mut self.blocks[id.index()];
            block.cursor = 0;
            match block.previous {
                Some(older) => {
                    block.previous = link;
                    link = Some(id);
                    next = Some(older);
                }
                None => {
                    self.current = id;
                    self.free_head = link;
                    next = None;
                }
            }
        }
    }

    /// Blocks of the active chain, newest first.
    pub(crate) fn chain(&self) -> Links<'_> {
        Links {
            slab: self,
            next: Some(self.current),
        }
    }

    /// Blocks on the free list, front first.
    pub(crate) fn free_list(&self) -> Links<'_> {
        Links {
            slab: self,
            next: self.free_head,
        }
    }

    pub(crate) fn free_head(&self) -> Option<BlockId> {
        self.free_head
    }

    pub(crate) fn get_mut(&mut self, id: BlockId) -> &mut Block {
        &mut self.blocks[id.index()]
    }

    /// Every block in the slab, linked or not.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Take every block out of the slab.
    pub(crate) fn drain(&mut self) -> smallvec::Drain<'_, [Block; 4]> {
        self.blocks.drain(..)
    }
}

/// Iterator following `previous` links through a [`BlockSlab`].
pub(crate) struct Links<'a> {
    slab: &'a BlockSlab,
    next: Option<BlockId>,
}

impl<'a> Iterator for Links<'a> {
    type Item = &'a Block;

    fn next(&mut self) -> Option<&'a Block> {
        let block = &self.slab.blocks[self.next?.index()];
        self.next = block.previous;
        Some(block)
    }
}
