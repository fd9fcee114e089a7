//! Region-based memory allocation with a per-thread scratch pool.
//!
//! An [`Arena`] bump-allocates out of a chain of large virtual-memory
//! blocks: address space is reserved up front and committed in page
//! multiples as the cursor advances. Memory comes back in LIFO order: by
//! size ([`Arena::deallocate`]), all at once ([`Arena::clear`]), or by
//! restoring a [`Checkpoint`]. Emptied blocks go to a free list and are
//! reused before any new address space is requested.
//!
//! This crate contains the workspace's `unsafe` code, confined to `raw.rs`,
//! the OS shim, block memory access, and the thread-local scratch buffers.
//!
//! # Architecture
//!
//! ```text
//! Arena (id, logical position, config, backend)
//! ├── BlockSlab (SmallVec of block descriptors, linked by index)
//! │   ├── active chain: current → … → oldest
//! │   └── free list: retired blocks, first-fit reuse
//! ├── Backend
//! │   ├── VirtualMemory (reserve / commit / decommit / release)
//! │   └── MemoryObserver (poison / unpoison / mark_allocated / mark_freed)
//! └── Checkpoint / TempArena (saved position, scoped rollback)
//!
//! thread_local scratch pool
//! └── [Arena; SCRATCH_POOL_LEN], each seeded by a 64 KiB TLS buffer
//! ```

#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(unsafe_code)]

pub mod arena;
pub mod backend;
mod block;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod observer;
pub mod options;
pub mod os;
mod raw;
pub mod scratch;

// Public re-exports for the primary API surface.
#[cfg(feature = "asan")]
pub use observer::AsanObserver;
pub use arena::{Arena, ArenaId, ArenaStats};
pub use backend::Backend;
pub use block::BlockInfo;
pub use checkpoint::{Checkpoint, TempArena};
pub use config::{ArenaBuilder, ArenaConfig};
pub use error::ArenaError;
pub use observer::{FillObserver, MemoryObserver, NoopObserver, Region};
pub use options::AllocOptions;
pub use os::{SystemMemory, VirtualMemory, PAGE_SIZE};
pub use scratch::{acquire_scratch, ScratchPool, SCRATCH_BACKING_BYTES, SCRATCH_POOL_LEN};
