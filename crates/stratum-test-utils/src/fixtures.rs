//! Arena fixtures and test logging.
//!
//! - [`counted_arena`]: arena whose blocks come from a [`CountingMemory`].
//! - [`observed_arena`]: arena reporting to a [`RecordingObserver`].
//! - [`init_test_tracing`]: route `tracing` output to the test harness.

use std::sync::Arc;

use stratum_arena::{Arena, ArenaBuilder};
use tracing_subscriber::EnvFilter;

use crate::{CountingMemory, RecordingObserver};

/// Reserve hint used by the small fixtures: 64 KiB.
pub const SMALL_RESERVE: usize = 64 * 1024;

/// Commit hint used by the small fixtures: 4 KiB.
pub const SMALL_COMMIT: usize = 4 * 1024;

/// Install a fmt subscriber writing through the test harness.
///
/// Filtered by `RUST_LOG` (default `warn`). Safe to call from every test.
pub fn init_test_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

/// Growable arena over a fresh [`CountingMemory`].
pub fn counted_arena(reserve: usize, commit: usize) -> (Arena<'static>, Arc<CountingMemory>) {
    let memory = Arc::new(CountingMemory::new());
    let arena = ArenaBuilder::new()
        .reserve_size(reserve)
        .commit_size(commit)
        .memory(memory.clone())
        .build()
        .expect("fixture arena");
    (arena, memory)
}

/// Growable arena reporting to a fresh [`RecordingObserver`].
pub fn observed_arena(reserve: usize, commit: usize) -> (Arena<'static>, Arc<RecordingObserver>) {
    let observer = Arc::new(RecordingObserver::new());
    let arena = ArenaBuilder::new()
        .reserve_size(reserve)
        .commit_size(commit)
        .observer(observer.clone())
        .build()
        .expect("fixture arena");
    (arena, observer)
}
