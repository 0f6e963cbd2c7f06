//! # brkheap
//!
//! A worst-fit heap allocator that manages one contiguous region obtained by
//! moving the program break.
//!
//! ```text
//!   High Address ┌─────────────────────┐
//!                │       Stack         │ ↓ grows down
//!                │                     │
//!                │         ▲           │
//!                │       Heap          │ ↑ grows up (sbrk)
//!                ├─────────────────────┤ ← Program Break = region end
//!                │   Uninitialized     │
//!                │       Data          │
//!   Low Address  └─────────────────────┘
//! ```
//!
//! The region is split into chunks. Each chunk starts with a small header
//! holding its total size and whether it is available, so the region is an
//! implicit list: the next chunk is always `header + size` bytes further.
//!
//! ```text
//!   start                                                            end
//!     ┌────────┬──────────┬────────┬──────────────────┬────────┬──────┐
//!     │ header │ payload  │ header │     payload      │ header │ ...  │
//!     └────────┴──────────┴────────┴──────────────────┴────────┴──────┘
//!              ▲
//!              └── pointer returned by `allocate`
//! ```
//!
//! - **Allocation** picks the largest available chunk that fits (worst fit)
//!   and splits off the leftover. When nothing fits the region grows by
//!   exactly what was asked for.
//! - **Release** marks the chunk available again.
//! - After both, a single forward pass merges neighbouring available chunks
//!   and, when the last chunk is available and larger than the trim
//!   threshold (`M_TRIM_THRESHOLD`, 1 GB by default), gives the excess back
//!   to the OS.
//!
//! ## Quick Start
//!
//! ```rust
//! use brkheap::{FixedArena, Heap, HeapConfig};
//!
//! let mut heap = Heap::new(FixedArena::new(4096), HeapConfig::fixed(1024));
//!
//! let ptr = heap.allocate(32).unwrap();
//! unsafe { ptr.as_ptr().write_bytes(0, 32) };
//!
//! unsafe { heap.release(ptr) };
//!
//! for chunk in heap.chunks() {
//!     println!("{:#x}: {} bytes, available: {}", chunk.address, chunk.size, chunk.available);
//! }
//! ```
//!
//! ## Limitations
//!
//! - [`Heap`] is single-threaded; [`LockedHeap`] puts it behind a mutex.
//! - Payloads are only byte aligned.
//! - [`Heap::release`] trusts its input; use [`Heap::release_checked`] to
//!   detect foreign pointers and double frees.

mod chunk;
mod coalesce;
mod config;
mod diagnostics;
mod error;
mod heap;
mod kernel;
mod region;
mod sync;
mod trim;
mod utils;

pub use chunk::HEADER_SIZE;
pub use config::{HeapConfig, TrimThreshold};
pub use diagnostics::{ChunkInfo, Chunks};
pub use error::{HeapError, Result};
pub use heap::Heap;
pub use kernel::{BreakGrower, FixedArena};
pub use sync::LockedHeap;

#[cfg(any(unix, windows))]
pub use kernel::SystemBreak;

#[cfg(unix)]
pub use kernel::Sbrk;

#[cfg(windows)]
pub use kernel::ReservedBreak;
