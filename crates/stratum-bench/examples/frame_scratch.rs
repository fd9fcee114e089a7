//! Per-frame arena usage with scratch helpers.
//!
//! Demonstrates: a persistent arena for results → a temp scope per frame →
//! a helper that builds intermediates in scratch memory and copies only its
//! answer into the caller's arena → clear between episodes.

use std::sync::Arc;

use stratum_arena::{acquire_scratch, AllocOptions, Arena, ArenaError, ArenaId};
use stratum_test_utils::CountingMemory;

/// Sum of squares of `values`, with the squares staged in scratch memory.
/// The result is stored in `out` so the caller keeps it.
fn sum_of_squares<'a>(
    out: &'a mut Arena<'static>,
    values: &[u32],
) -> Result<&'a mut [u64], ArenaError> {
    let conflicts: [ArenaId; 1] = [out.id()];
    let total = acquire_scratch(&conflicts, |scratch| {
        let squares = scratch.alloc_slice_fill_with(values.len(), |i| {
            let v = u64::from(values[i]);
            v * v
        })?;
        Ok::<u64, ArenaError>(squares.iter().sum())
    })??;
    out.alloc_slice_copy(&[total])
}

fn main() {
    println!("=== Stratum Frame Scratch Example ===\n");

    let memory = Arc::new(CountingMemory::new());
    let mut results = Arena::builder()
        .reserve_size(64 * 1024)
        .commit_size(4 * 1024)
        .memory(memory.clone())
        .build()
        .unwrap();

    for episode in 0..2 {
        println!("Episode {episode}: 60 frames");
        for frame in 0..60u32 {
            let mut temp = results.temp();
            let values: Vec<u32> = (0..256).map(|i| i * (frame + 1)).collect();
            let staged = temp.alloc_slice_copy(&values).unwrap();
            staged.reverse();
            temp.allocate(8 * 1024, AllocOptions::default().zeroed())
                .unwrap();
            drop(temp);

            let total = sum_of_squares(&mut results, &values).unwrap()[0];
            if frame % 20 == 0 {
                let stats = results.stats();
                println!(
                    "  frame {frame:>2}: total={total:>14} position={:>5} blocks={} free={}",
                    stats.position, stats.chain_blocks, stats.free_blocks
                );
            }
        }
        results.clear();
        println!(
            "  cleared: position={} reserves so far={}",
            results.position(),
            memory.reserves()
        );
    }

    println!("\nTrimmed {} bytes from free blocks", results.trim());
    results.destroy();
    println!("Live reservations after destroy: {}", memory.live_reservations());
    println!("Done.");
}
