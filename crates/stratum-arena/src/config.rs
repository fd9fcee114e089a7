//! Arena configuration parameters and the arena builder.

use std::ptr::NonNull;
use std::sync::Arc;

use crate::arena::Arena;
use crate::backend::Backend;
use crate::error::ArenaError;
use crate::observer::MemoryObserver;
use crate::os::VirtualMemory;

/// Growth parameters for an arena.
///
/// Both sizes are hints: they are rounded up to the backend's page size when
/// a block is reserved, and an oversized allocation always gets a block big
/// enough to hold it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ArenaConfig {
    /// Minimum address space reserved for each OS-backed block, in bytes.
    ///
    /// Default: 64 MiB.
    pub reserve_size: usize,

    /// Bytes committed when a block is reserved, and the increment used to
    /// commit more of it as the cursor advances.
    ///
    /// Default: 64 KiB. Must not exceed `reserve_size`.
    pub commit_size: usize,

    /// When set, the arena never grows past its first block: an allocation
    /// that does not fit fails with [`ArenaError::CapacityExceeded`] instead
    /// of reserving a new block.
    pub fixed_size: bool,
}

impl ArenaConfig {
    /// Default reservation per block: 64 MiB.
    pub const DEFAULT_RESERVE_SIZE: usize = 64 * 1024 * 1024;

    /// Default commit increment: 64 KiB.
    pub const DEFAULT_COMMIT_SIZE: usize = 64 * 1024;

    /// Create a growable config with the given reserve and commit hints.
    pub fn new(reserve_size: usize, commit_size: usize) -> Self {
        Self {
            reserve_size,
            commit_size,
            fixed_size: false,
        }
    }

    /// Check the parameters for consistency.
    pub fn validate(&self) -> Result<(), ArenaError> {
        if self.reserve_size == 0 {
            return Err(ArenaError::InvalidConfig {
                reason: "reserve_size must be non-zero".into(),
            });
        }
        if self.commit_size > self.reserve_size {
            return Err(ArenaError::InvalidConfig {
                reason: format!(
                    "commit_size ({}) exceeds reserve_size ({})",
                    self.commit_size, self.reserve_size
                ),
            });
        }
        Ok(())
    }
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RESERVE_SIZE, Self::DEFAULT_COMMIT_SIZE)
    }
}

/// Consuming builder for [`Arena`].
///
/// ```
/// use stratum_arena::{AllocOptions, Arena};
///
/// let mut arena = Arena::builder()
///     .reserve_size(1 << 20)
///     .commit_size(16 * 1024)
///     .build()
///     .unwrap();
/// let ptr = arena.allocate(64, AllocOptions::default()).unwrap();
/// assert_eq!(ptr.as_ptr() as usize % std::mem::align_of::<usize>(), 0);
/// ```
#[must_use]
#[derive(Clone, Debug, Default)]
pub struct ArenaBuilder {
    config: ArenaConfig,
    backend: Backend,
}

impl ArenaBuilder {
    /// Start from the default config and the system backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole config.
    pub fn config(mut self, config: ArenaConfig) -> Self {
        self.config = config;
        self
    }

    /// Set [`ArenaConfig::reserve_size`].
    pub fn reserve_size(mut self, bytes: usize) -> Self {
        self.config.reserve_size = bytes;
        self
    }

    /// Set [`ArenaConfig::commit_size`].
    pub fn commit_size(mut self, bytes: usize) -> Self {
        self.config.commit_size = bytes;
        self
    }

    /// Set [`ArenaConfig::fixed_size`].
    pub fn fixed_size(mut self, fixed: bool) -> Self {
        self.config.fixed_size = fixed;
        self
    }

    /// Use `memory` for reserving and committing blocks.
    pub fn memory(mut self, memory: Arc<dyn VirtualMemory>) -> Self {
        self.backend = self.backend.with_memory(memory);
        self
    }

    /// Notify `observer` of poison and allocation events.
    pub fn observer(mut self, observer: Arc<dyn MemoryObserver>) -> Self {
        self.backend = self.backend.with_observer(observer);
        self
    }

    /// Replace both backends at once.
    pub fn backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Build an arena whose first block is reserved from the backend.
    pub fn build(self) -> Result<Arena<'static>, ArenaError> {
        self.config.validate()?;
        Arena::reserve_first(self.config, self.backend)
    }

    /// Build an arena whose first block is `buffer`.
    ///
    /// The buffer is never handed to the OS shim. Growth blocks, if the
    /// config allows growth, still come from the backend.
    pub fn build_in<'buf>(self, buffer: &'buf mut [u8]) -> Result<Arena<'buf>, ArenaError> {
        self.config.validate()?;
        let len = buffer.len();
        let base = NonNull::from(buffer).cast::<u8>();
        Ok(Arena::over_buffer(base, len, self.config, self.backend))
    }

    /// Build an arena over caller-owned raw memory.
    ///
    /// # Safety
    ///
    /// `base..base + len` must be writable memory, valid and not accessed
    /// through any other path for as long as the returned arena (and any
    /// pointer it hands out) is in use.
    #[allow(unsafe_code)]
    pub unsafe fn build_raw<'buf>(
        self,
        base: NonNull<u8>,
        len: usize,
    ) -> Result<Arena<'buf>, ArenaError> {
        self.config.validate()?;
        Ok(Arena::over_buffer(base, len, self.config, self.backend))
    }
}
