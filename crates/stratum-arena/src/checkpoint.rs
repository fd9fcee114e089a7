//! Saved positions and scoped temporary regions.
//!
//! A [`Checkpoint`] records an arena's logical position; restoring it pops
//! (or pads) back to that position. [`TempArena`] wraps the pair in a guard
//! that restores on drop, so every exit path (normal return, `?`, panic)
//! gives the scoped memory back.
//!
//! ```
//! use stratum_arena::{AllocOptions, Arena};
//!
//! let mut arena = Arena::new(64 * 1024, 4096).unwrap();
//! arena.allocate(100, AllocOptions::default()).unwrap();
//! {
//!     let mut temp = arena.temp();
//!     temp.allocate(5000, AllocOptions::default()).unwrap();
//!     assert!(temp.position() > 5000);
//! }
//! assert_eq!(arena.position(), 100);
//! ```

use std::mem::ManuallyDrop;
use std::ops::{Deref, DerefMut};

use crate::arena::{Arena, ArenaId};
use crate::error::ArenaError;

/// A saved logical position of one arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    arena: ArenaId,
    position: usize,
    depth: u32,
}

impl Checkpoint {
    /// Arena the checkpoint was taken on.
    pub fn arena(&self) -> ArenaId {
        self.arena
    }

    /// Logical position at the time the checkpoint was taken.
    pub fn position(&self) -> usize {
        self.position
    }
}

impl<'buf> Arena<'buf> {
    /// Record the current position.
    pub fn checkpoint(&mut self) -> Checkpoint {
        let checkpoint = Checkpoint {
            arena: self.id(),
            position: self.position(),
            depth: self.checkpoint_depth,
        };
        self.checkpoint_depth = self.checkpoint_depth.saturating_add(1);
        checkpoint
    }

    /// Return to the position recorded by `checkpoint`.
    ///
    /// Checkpoints must be restored in LIFO order; restoring an outer one
    /// implicitly discards any taken after it. The same checkpoint may be
    /// restored repeatedly.
    pub fn restore(&mut self, checkpoint: Checkpoint) -> Result<(), ArenaError> {
        if checkpoint.arena != self.id() {
            return Err(ArenaError::ForeignCheckpoint {
                checkpoint_arena: checkpoint.arena,
                arena: self.id(),
            });
        }
        debug_assert!(
            checkpoint.depth <= self.checkpoint_depth,
            "checkpoint restored out of LIFO order"
        );
        self.checkpoint_depth = checkpoint.depth;
        self.set_position(checkpoint.position)
    }

    /// Open a temporary region that is rolled back when the guard drops.
    pub fn temp(&mut self) -> TempArena<'_, 'buf> {
        let checkpoint = self.checkpoint();
        TempArena {
            arena: self,
            checkpoint,
        }
    }
}

/// Scoped checkpoint guard.
///
/// Dereferences to the underlying [`Arena`]. Nested regions are opened with
/// [`Arena::temp`] on the guard itself, so the borrow checker forces them to
/// end first.
pub struct TempArena<'a, 'buf> {
    arena: &'a mut Arena<'buf>,
    checkpoint: Checkpoint,
}

impl TempArena<'_, '_> {
    /// The checkpoint this guard restores.
    pub fn saved(&self) -> Checkpoint {
        self.checkpoint
    }

    /// Restore now and report the outcome instead of logging it.
    pub fn end(self) -> Result<(), ArenaError> {
        let mut this = ManuallyDrop::new(self);
        let checkpoint = this.checkpoint;
        this.arena.restore(checkpoint)
    }
}

impl<'buf> Deref for TempArena<'_, 'buf> {
    type Target = Arena<'buf>;

    fn deref(&self) -> &Arena<'buf> {
        self.arena
    }
}

impl<'buf> DerefMut for TempArena<'_, 'buf> {
    fn deref_mut(&mut self) -> &mut Arena<'buf> {
        self.arena
    }
}

impl Drop for TempArena<'_, '_> {
    fn drop(&mut self) {
        if let Err(err) = self.arena.restore(self.checkpoint) {
            tracing::error!(
                arena = %self.arena.id(),
                position = self.checkpoint.position,
                error = %err,
                "failed to restore temporary arena"
            );
        }
    }
}
