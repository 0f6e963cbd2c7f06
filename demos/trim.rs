//! Shows the trim threshold at work. Try it with a small threshold:
//!
//! ```text
//! M_TRIM_THRESHOLD=0x40 cargo run --example trim
//! ```

use brkheap::{Heap, HeapError, SystemBreak};

fn program_break(heap: &Heap<SystemBreak>, label: &str) {
    println!("[{label}] region {:?}..{:?} ({} bytes)", heap.start(), heap.end(), heap.len());
}

fn main() -> Result<(), HeapError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut heap = Heap::system();

    let small = heap.allocate(100)?;
    let big = heap.allocate(64 * 1024)?;
    program_break(&heap, "after allocating");

    unsafe { heap.release(big) };
    program_break(&heap, "after releasing the big block");

    unsafe { heap.release(small) };
    program_break(&heap, "after releasing everything");

    for chunk in heap.chunks() {
        println!("{chunk}\n");
    }

    Ok(())
}
