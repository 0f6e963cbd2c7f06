use thiserror::Error;

/// Errors reported by the heap.
///
/// The core allocator only ever fails with [`HeapError::OutOfMemory`]. The other
/// variants come from hardening around the shared program break and from
/// [`crate::Heap::release_checked`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("out of memory (requested: {requested} bytes)")]
    OutOfMemory { requested: usize },

    #[error("program break moved underneath the heap (expected {expected:#x}, found {found:#x})")]
    BreakMoved { expected: usize, found: usize },

    #[error("address {addr:#x} is not an allocation of this heap")]
    InvalidAddress { addr: usize },

    #[error("double free detected at address {addr:#x}")]
    DoubleFree { addr: usize },
}

pub type Result<T> = core::result::Result<T, HeapError>;
