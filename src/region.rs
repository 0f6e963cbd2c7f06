use std::{iter::FusedIterator, marker::PhantomData, ptr::NonNull};

use log::{debug, warn};

use crate::{
    chunk::{Chunk, HEADER_SIZE},
    error::{HeapError, Result},
    kernel::BreakGrower,
};

/// The contiguous span `[start, end)` managed by a heap.
///
/// The region is created lazily: nothing is asked from the grower until the
/// first allocation, at which point `start` and `end` are pinned to the
/// current break. From then on it only grows or shrinks at its tail.
///
/// ```text
///  start                                                          end
///    |                                                              |
///    +------------+----------------------+-----------+--------------+
///    | Chunk      | Chunk                | Chunk     | Chunk        |
///    | (in use)   | (available)          | (in use)  | (available)  |
///    +------------+----------------------+-----------+--------------+
/// ```
///
/// Headers partition the region with no gaps, so walking it only needs the
/// `size` of each chunk.
pub(crate) struct Region<G> {
    grower: G,
    start: *mut u8,
    end: *mut u8,
    initialized: bool,
}

impl<G: BreakGrower> Region<G> {
    pub const fn new(grower: G) -> Self {
        Self {
            grower,
            start: std::ptr::null_mut(),
            end: std::ptr::null_mut(),
            initialized: false,
        }
    }

    #[inline]
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    #[inline]
    pub fn start(&self) -> *mut u8 {
        self.start
    }

    #[inline]
    pub fn end(&self) -> *mut u8 {
        self.end
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.end as usize - self.start as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn grower(&self) -> &G {
        &self.grower
    }

    /// Pins the region to the current break. Does nothing the second time.
    pub fn initialize(&mut self) -> Result<()> {
        if self.initialized {
            return Ok(());
        }

        let brk = unsafe { self.grower.grow_break(0) }
            .ok_or(HeapError::OutOfMemory { requested: 0 })?;

        self.start = brk.as_ptr();
        self.end = brk.as_ptr();
        self.initialized = true;

        debug!("region initialized at {:p}", self.start);

        Ok(())
    }

    /// Extends the region by exactly `n` bytes and returns the address of the
    /// first new byte, which is the old `end`.
    ///
    /// On failure the region is left untouched.
    pub fn grow(&mut self, n: usize) -> Result<NonNull<u8>> {
        self.initialize()?;

        let delta = isize::try_from(n).map_err(|_| HeapError::OutOfMemory { requested: n })?;

        let previous = unsafe { self.grower.grow_break(delta) }
            .ok_or(HeapError::OutOfMemory { requested: n })?;

        if previous.as_ptr() != self.end {
            if self.is_empty() {
                // Nothing lives in the region yet, follow the break.
                debug!("region re-based from {:p} to {:p}", self.start, previous);
                self.start = previous.as_ptr();
            } else {
                warn!(
                    "break moved underneath the heap: expected {:p}, found {:p}",
                    self.end, previous
                );
                let _ = unsafe { self.grower.grow_break(-delta) };
                return Err(HeapError::BreakMoved {
                    expected: self.end as usize,
                    found: previous.as_ptr() as usize,
                });
            }
        }

        self.end = unsafe { previous.as_ptr().add(n) };

        debug!("region grown by {n} bytes, end is now {:p}", self.end);

        Ok(previous)
    }

    /// Gives the last `n` bytes of the region back to the grower.
    ///
    /// Returns `false`, without touching anything, when the break is not at
    /// `end` anymore or the grower refuses.
    ///
    /// **SAFETY**: the last `n` bytes must not be used by any chunk afterwards.
    pub unsafe fn shrink(&mut self, n: usize) -> bool {
        debug_assert!(n <= self.len());

        let Ok(delta) = isize::try_from(n) else {
            return false;
        };

        match unsafe { self.grower.grow_break(0) } {
            Some(brk) if brk.as_ptr() == self.end => {}
            brk => {
                warn!(
                    "not shrinking: break is at {:?} but the region ends at {:p}",
                    brk, self.end
                );
                return false;
            }
        }

        if unsafe { self.grower.grow_break(-delta) }.is_none() {
            return false;
        }

        self.end = unsafe { self.end.sub(n) };

        true
    }

    /// Walks every chunk in address order.
    pub fn chunks(&self) -> ChunkIter<'_> {
        ChunkIter {
            current: self.start,
            end: self.end,
            marker: PhantomData,
        }
    }

    /// The chunk whose header starts at `ptr`.
    ///
    /// **SAFETY**: `ptr` must be a chunk boundary of this region, not `end`.
    #[inline]
    pub unsafe fn chunk_at(&self, ptr: *mut u8) -> Chunk {
        debug_assert!(ptr >= self.start && ptr < self.end);
        unsafe { Chunk::from_header(NonNull::new_unchecked(ptr)) }
    }
}

/// Iterator over the chunks of a [`Region`], from `start` to `end`.
pub(crate) struct ChunkIter<'a> {
    current: *mut u8,
    end: *mut u8,
    marker: PhantomData<&'a ()>,
}

impl Iterator for ChunkIter<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Self::Item> {
        if self.current == self.end {
            return None;
        }

        let chunk = unsafe { Chunk::from_header(NonNull::new_unchecked(self.current)) };
        debug_assert!(chunk.size() >= HEADER_SIZE, "corrupted chunk at {:p}", self.current);

        self.current = chunk.next_ptr().as_ptr();

        Some(chunk)
    }
}

impl FusedIterator for ChunkIter<'_> {}
