use std::{
    ptr::NonNull,
    sync::{Mutex, MutexGuard, PoisonError},
};

use crate::{config::HeapConfig, error::Result, heap::Heap, kernel::BreakGrower};

/// A [`Heap`] behind one exclusive lock.
///
/// Splitting and coalescing rewrite headers all over the region, so every
/// public operation holds the lock from start to end.
pub struct LockedHeap<G: BreakGrower> {
    inner: Mutex<Heap<G>>,
}

#[cfg(any(unix, windows))]
impl LockedHeap<crate::kernel::SystemBreak> {
    /// Shared heap on top of the process break.
    ///
    /// ```rust,ignore
    /// static HEAP: LockedHeap<SystemBreak> = LockedHeap::system();
    /// ```
    pub const fn system() -> Self {
        Self::from_heap(Heap::system())
    }
}

impl<G: BreakGrower> LockedHeap<G> {
    pub const fn new(grower: G, config: HeapConfig) -> Self {
        Self::from_heap(Heap::new(grower, config))
    }

    pub const fn from_heap(heap: Heap<G>) -> Self {
        Self {
            inner: Mutex::new(heap),
        }
    }

    /// Locks the heap for a sequence of operations, e.g. walking its chunks.
    /// A poisoned lock is recovered.
    pub fn lock(&self) -> MutexGuard<'_, Heap<G>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>> {
        self.lock().allocate(size)
    }

    /// **SAFETY**: same contract as [`Heap::release`].
    pub unsafe fn release(&self, ptr: NonNull<u8>) {
        unsafe { self.lock().release(ptr) }
    }

    pub fn release_checked(&self, ptr: NonNull<u8>) -> Result<()> {
        self.lock().release_checked(ptr)
    }

    pub fn trim(&self) -> Option<usize> {
        self.lock().trim()
    }

    pub fn into_inner(self) -> Heap<G> {
        self.inner.into_inner().unwrap_or_else(PoisonError::into_inner)
    }
}
