//! Stratum: region-based arena allocation with checkpoints and per-thread
//! scratch pools.
//!
//! This is the top-level facade crate that re-exports the public API of
//! `stratum-arena`. For most users, adding `stratum` as a single dependency
//! is sufficient.
//!
//! # Quick start
//!
//! ```rust
//! use stratum::prelude::*;
//!
//! // 64 KiB blocks, committed 4 KiB at a time.
//! let mut arena = Arena::new(64 * 1024, 4 * 1024).unwrap();
//! let name = arena.alloc_str("frame-0").unwrap();
//! assert_eq!(name, "frame-0");
//!
//! // Everything allocated after a checkpoint is popped by restoring it.
//! let mark = arena.checkpoint();
//! arena.allocate(10_000, AllocOptions::default().zeroed()).unwrap();
//! arena.restore(mark).unwrap();
//! assert_eq!(arena.position(), mark.position());
//!
//! // Scratch memory that must not alias `arena`.
//! let total = acquire_scratch(&[arena.id()], |scratch| {
//!     let squares = scratch.alloc_slice_copy(&[1u64, 4, 9, 16]).unwrap();
//!     squares.iter().sum::<u64>()
//! })
//! .unwrap();
//! assert_eq!(total, 30);
//! ```
//!
//! # Modules
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`arena`] | [`Arena`](arena::Arena), ids, statistics, block inspection |
//! | [`checkpoint`] | Checkpoints and scoped [`TempArena`](checkpoint::TempArena) |
//! | [`scratch`] | Thread-local scratch pool and owned [`ScratchPool`](scratch::ScratchPool) |
//! | [`config`] | [`ArenaConfig`](config::ArenaConfig) and [`ArenaBuilder`](config::ArenaBuilder) |
//! | [`options`] | Per-allocation alignment and zero-fill |
//! | [`backend`] | Memory and observer pair an arena reports to |
//! | [`os`] | Virtual memory reserve, commit, decommit and release |
//! | [`observer`] | Poison/unpoison hooks for memory checkers |
//! | [`error`] | [`ArenaError`](error::ArenaError) |

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![forbid(unsafe_code)]

/// Arenas, ids, and statistics.
pub use stratum_arena::arena;

/// Memory and observer pair used by an arena.
pub use stratum_arena::backend;

/// Checkpoints and scoped temporary arenas.
///
/// [`checkpoint::TempArena`] restores its checkpoint when dropped, including
/// during unwinding.
pub use stratum_arena::checkpoint;

/// Arena configuration and builder.
pub use stratum_arena::config;

/// Error type shared by all arena operations.
pub use stratum_arena::error;

/// Memory-checker hooks.
///
/// The `asan` feature adds an observer that reports to AddressSanitizer.
pub use stratum_arena::observer;

/// Allocation options.
pub use stratum_arena::options;

/// Virtual memory primitives.
pub use stratum_arena::os;

/// Per-thread scratch arenas.
pub use stratum_arena::scratch;

pub use stratum_arena::{
    acquire_scratch, AllocOptions, Arena, ArenaBuilder, ArenaConfig, ArenaError, ArenaId,
    ArenaStats, Checkpoint, ScratchPool, TempArena,
};

/// Common imports for typical Stratum usage.
///
/// ```rust
/// use stratum::prelude::*;
/// ```
///
/// Brings in the arena, its builder and options, checkpoints, the scratch
/// entry points and the error type.
pub mod prelude {
    pub use stratum_arena::{
        acquire_scratch, AllocOptions, Arena, ArenaBuilder, ArenaConfig, ArenaError, ArenaId,
        Checkpoint, ScratchPool, TempArena,
    };
}
