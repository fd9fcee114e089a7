//! Per-allocation options.

use std::mem;

use crate::error::ArenaError;

/// Alignment and initialisation requested for one allocation.
///
/// ```
/// use stratum_arena::AllocOptions;
///
/// let opts = AllocOptions::aligned(64).zeroed();
/// assert_eq!(opts.alignment, 64);
/// assert!(opts.zero_fill);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AllocOptions {
    /// Required alignment of the returned pointer. Must be a power of two.
    pub alignment: usize,
    /// Zero the returned bytes before handing them out.
    pub zero_fill: bool,
}

impl AllocOptions {
    /// Alignment used when none is requested: that of `usize`.
    pub const DEFAULT_ALIGNMENT: usize = mem::align_of::<usize>();

    /// Default alignment, no zeroing.
    pub const fn new() -> Self {
        Self::aligned(Self::DEFAULT_ALIGNMENT)
    }

    /// The given alignment, no zeroing.
    pub const fn aligned(alignment: usize) -> Self {
        Self {
            alignment,
            zero_fill: false,
        }
    }

    /// Alignment suitable for values of type `T`.
    pub const fn for_type<T>() -> Self {
        Self::aligned(mem::align_of::<T>())
    }

    /// Same options with zero-filling enabled.
    pub const fn zeroed(self) -> Self {
        Self {
            zero_fill: true,
            ..self
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ArenaError> {
        if self.alignment.is_power_of_two() {
            Ok(())
        } else {
            Err(ArenaError::InvalidAlignment {
                alignment: self.alignment,
            })
        }
    }
}

impl Default for AllocOptions {
    fn default() -> Self {
        Self::new()
    }
}
