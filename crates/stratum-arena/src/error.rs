//! Arena-specific error types.

use std::error::Error;
use std::fmt;

use crate::arena::ArenaId;

/// Errors that can occur during arena operations.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ArenaError {
    /// The OS refused to reserve address space for a new block.
    ReserveFailed {
        /// Number of bytes requested.
        size: usize,
    },
    /// The OS refused to back reserved pages with memory.
    CommitFailed {
        /// Number of bytes requested.
        size: usize,
    },
    /// A fixed-size arena has no room left for the request.
    CapacityExceeded {
        /// Number of bytes requested.
        requested: usize,
        /// Bytes still available in the arena's only block.
        available: usize,
    },
    /// `deallocate` asked for more bytes than are currently allocated.
    OverDeallocation {
        /// Number of bytes the caller tried to pop.
        requested: usize,
        /// The arena's logical position at the time of the call.
        position: usize,
    },
    /// Alignment was zero or not a power of two.
    InvalidAlignment {
        /// The rejected alignment.
        alignment: usize,
    },
    /// Size plus alignment padding does not fit in `usize`.
    SizeOverflow {
        /// Number of bytes requested.
        size: usize,
        /// Requested alignment.
        alignment: usize,
    },
    /// Invalid configuration parameter.
    InvalidConfig {
        /// Description of what is wrong with the configuration.
        reason: String,
    },
    /// A checkpoint was restored on an arena that did not create it.
    ForeignCheckpoint {
        /// Arena that created the checkpoint.
        checkpoint_arena: ArenaId,
        /// Arena the restore was attempted on.
        arena: ArenaId,
    },
    /// Every scratch slot is either in use or listed as a conflict.
    ScratchExhausted {
        /// Number of slots in the pool.
        pool_len: usize,
    },
    /// The thread-local scratch pool has already been torn down.
    ScratchUnavailable,
}

impl fmt::Display for ArenaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ReserveFailed { size } => {
                write!(f, "failed to reserve {size} bytes of address space")
            }
            Self::CommitFailed { size } => write!(f, "failed to commit {size} bytes"),
            Self::CapacityExceeded {
                requested,
                available,
            } => {
                write!(
                    f,
                    "fixed-size arena exhausted: requested {requested} bytes, {available} bytes available"
                )
            }
            Self::OverDeallocation {
                requested,
                position,
            } => {
                write!(
                    f,
                    "cannot deallocate {requested} bytes: only {position} bytes are allocated"
                )
            }
            Self::InvalidAlignment { alignment } => {
                write!(f, "alignment {alignment} is not a power of two")
            }
            Self::SizeOverflow { size, alignment } => {
                write!(
                    f,
                    "allocation of {size} bytes with alignment {alignment} overflows usize"
                )
            }
            Self::InvalidConfig { reason } => write!(f, "invalid arena config: {reason}"),
            Self::ForeignCheckpoint {
                checkpoint_arena,
                arena,
            } => {
                write!(
                    f,
                    "checkpoint from arena {checkpoint_arena} restored on arena {arena}"
                )
            }
            Self::ScratchExhausted { pool_len } => {
                write!(f, "all {pool_len} scratch arenas are in use or conflicting")
            }
            Self::ScratchUnavailable => {
                write!(f, "thread-local scratch pool has been destroyed")
            }
        }
    }
}

impl Error for ArenaError {}
