//! Allocation workload profiles for benchmarking Stratum arenas.
//!
//! Profiles are plain op lists generated from a seed, so a benchmark run and
//! a test run see exactly the same sequence:
//!
//! - [`frame_profile`]: per-frame temporary scopes with small allocations.
//! - [`mixed_profile`]: random mix of sizes, alignments, nested scopes and
//!   occasional clears.
//! - [`replay`]: drive an [`Arena`] through a profile.

#![forbid(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use stratum_arena::{AllocOptions, Arena, ArenaError, Checkpoint};

/// One step of a workload.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    /// Allocate `size` bytes at `align`.
    Alloc {
        /// Bytes requested.
        size: usize,
        /// Requested alignment (power of two).
        align: usize,
    },
    /// Take a checkpoint.
    Enter,
    /// Restore the most recent checkpoint.
    Leave,
    /// Clear the whole arena, dropping all checkpoints.
    Clear,
}

const ALIGNS: [usize; 4] = [1, 8, 16, 64];

/// Maximum checkpoint nesting produced by [`mixed_profile`].
pub const MAX_DEPTH: usize = 8;

/// `frames` scopes of `allocs_per_frame` small allocations each.
pub fn frame_profile(seed: u64, frames: usize, allocs_per_frame: usize) -> Vec<Op> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut ops = Vec::with_capacity(frames * (allocs_per_frame + 2));
    for _ in 0..frames {
        ops.push(Op::Enter);
        for _ in 0..allocs_per_frame {
            ops.push(Op::Alloc {
                size: rng.random_range(8..=256),
                align: 8,
            });
        }
        ops.push(Op::Leave);
    }
    ops
}

/// `len` random ops: mostly allocations (one in five large), with nested
/// scopes up to [`MAX_DEPTH`] and rare clears.
pub fn mixed_profile(seed: u64, len: usize) -> Vec<Op> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut ops = Vec::with_capacity(len);
    let mut depth = 0usize;
    for _ in 0..len {
        let roll = rng.random_range(0..100u32);
        let op = match roll {
            0 => {
                depth = 0;
                Op::Clear
            }
            1..=10 if depth < MAX_DEPTH => {
                depth += 1;
                Op::Enter
            }
            11..=20 if depth > 0 => {
                depth -= 1;
                Op::Leave
            }
            _ => {
                let size = if rng.random_bool(0.2) {
                    rng.random_range(1024..=64 * 1024)
                } else {
                    rng.random_range(1..=256)
                };
                let align = ALIGNS[rng.random_range(0..ALIGNS.len())];
                Op::Alloc { size, align }
            }
        };
        ops.push(op);
    }
    ops
}

/// Run `ops` against `arena`. Returns the total bytes requested.
///
/// `Leave` without a matching `Enter` is ignored.
pub fn replay(arena: &mut Arena<'_>, ops: &[Op]) -> Result<usize, ArenaError> {
    let mut scopes: Vec<Checkpoint> = Vec::with_capacity(MAX_DEPTH);
    let mut requested = 0;
    for op in ops {
        match *op {
            Op::Alloc { size, align } => {
                arena.allocate(size, AllocOptions::aligned(align))?;
                requested += size;
            }
            Op::Enter => scopes.push(arena.checkpoint()),
            Op::Leave => {
                if let Some(checkpoint) = scopes.pop() {
                    arena.restore(checkpoint)?;
                }
            }
            Op::Clear => {
                scopes.clear();
                arena.clear();
            }
        }
    }
    Ok(requested)
}
