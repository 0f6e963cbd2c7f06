use std::{fmt, iter::FusedIterator};

use crate::region::ChunkIter;

/// Snapshot of one chunk, as reported by [`crate::Heap::chunks`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkInfo {
    /// Position of the chunk in address order, starting at 0.
    pub index: usize,
    /// Address of the chunk header.
    pub address: usize,
    /// Total size in bytes, header included.
    pub size: usize,
    pub available: bool,
}

impl ChunkInfo {
    /// Address handed out to the caller for this chunk.
    pub fn payload(&self) -> usize {
        self.address + crate::HEADER_SIZE
    }
}

impl fmt::Display for ChunkInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Chunk #{}", self.index + 1)?;
        writeln!(f, "Address: {:#x}", self.address)?;
        writeln!(f, "Size:    {}", self.size)?;
        write!(
            f,
            "Status: {}",
            if self.available { "Available" } else { "In Use" }
        )
    }
}

/// Read-only walk over the chunks of a heap. Every call to
/// [`crate::Heap::chunks`] starts a new walk from the region start.
pub struct Chunks<'a> {
    inner: std::iter::Enumerate<ChunkIter<'a>>,
}

impl<'a> Chunks<'a> {
    pub(crate) fn new(inner: ChunkIter<'a>) -> Self {
        Self {
            inner: inner.enumerate(),
        }
    }
}

impl Iterator for Chunks<'_> {
    type Item = ChunkInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let (index, chunk) = self.inner.next()?;

        Some(ChunkInfo {
            index,
            address: chunk.addr(),
            size: chunk.size(),
            available: chunk.is_available(),
        })
    }
}

impl FusedIterator for Chunks<'_> {}

/// Writes every chunk in the `meminfo` format, one blank line apart.
pub(crate) fn write_meminfo<W: fmt::Write>(chunks: Chunks<'_>, out: &mut W) -> fmt::Result {
    for info in chunks {
        writeln!(out, "{info}")?;
        writeln!(out)?;
    }

    Ok(())
}
