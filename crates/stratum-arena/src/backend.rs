//! Pairing of the memory provider and observer an arena talks to.

use std::fmt;
use std::sync::{Arc, LazyLock};

use crate::observer::{MemoryObserver, NoopObserver};
use crate::os::{SystemMemory, VirtualMemory};

static SYSTEM: LazyLock<Backend> =
    LazyLock::new(|| Backend::new(Arc::new(SystemMemory), Arc::new(NoopObserver)));

/// The [`VirtualMemory`] and [`MemoryObserver`] used by an arena.
///
/// Cloning is cheap: both halves are reference counted and may be shared by
/// any number of arenas.
#[derive(Clone)]
pub struct Backend {
    pub(crate) memory: Arc<dyn VirtualMemory>,
    pub(crate) observer: Arc<dyn MemoryObserver>,
}

impl Backend {
    /// Combine a memory provider and an observer.
    pub fn new(memory: Arc<dyn VirtualMemory>, observer: Arc<dyn MemoryObserver>) -> Self {
        Self { memory, observer }
    }

    /// OS virtual memory with no observer.
    pub fn system() -> Self {
        SYSTEM.clone()
    }

    /// Replace the memory provider.
    pub fn with_memory(mut self, memory: Arc<dyn VirtualMemory>) -> Self {
        self.memory = memory;
        self
    }

    /// Replace the observer.
    pub fn with_observer(mut self, observer: Arc<dyn MemoryObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Page size reported by the memory provider.
    pub fn page_size(&self) -> usize {
        self.memory.page_size()
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("page_size", &self.page_size())
            .finish_non_exhaustive()
    }
}
