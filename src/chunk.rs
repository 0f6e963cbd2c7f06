use std::{mem, ptr::NonNull};

/// Size of the in-band header that precedes every chunk payload.
pub const HEADER_SIZE: usize = mem::size_of::<ChunkHeader>();

/// Metadata stored at the start of every chunk.
///
/// ```text
/// +---------------------+ <------+
/// |      available      |        |
/// +---------------------+        | -> Header (HEADER_SIZE bytes)
/// |        size         |        |
/// +---------------------+ <------+ <- pointer handed to the caller
/// |       Payload       |        |
/// |         ...         |        | -> size - HEADER_SIZE bytes
/// |                     |        |
/// +---------------------+ <------+ <- next chunk header (or region end)
/// ```
///
/// `size` counts the header too, so the next chunk always starts exactly
/// `size` bytes after this one. There are no links: the region is an implicit
/// list and walking it is plain byte-offset arithmetic.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ChunkHeader {
    /// Whether the chunk can be handed out again.
    pub available: bool,
    /// Total size of the chunk in bytes, header included.
    pub size: usize,
}

/// Handle to a chunk header living inside the region.
///
/// Sizes are never rounded, so a header can start at any byte offset. Every
/// access therefore goes through unaligned reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Chunk {
    ptr: NonNull<u8>,
}

impl Chunk {
    /// Views the header that starts at `ptr`.
    ///
    /// **SAFETY**: `ptr` must point to an initialized header inside the region,
    /// and the header must stay in the region for as long as the handle is used.
    #[inline]
    pub unsafe fn from_header(ptr: NonNull<u8>) -> Self {
        Self { ptr }
    }

    /// Recovers the chunk from the payload pointer returned by an allocation.
    ///
    /// **SAFETY**: `payload` must have been produced by [`Chunk::payload`].
    #[inline]
    pub unsafe fn from_payload(payload: NonNull<u8>) -> Self {
        unsafe { Self::from_header(payload.sub(HEADER_SIZE)) }
    }

    /// Writes a fresh header at `ptr`.
    ///
    /// **SAFETY**: `ptr..ptr + header.size` must be region memory owned by the
    /// allocator and `header.size` must be at least [`HEADER_SIZE`].
    #[inline]
    pub unsafe fn write(ptr: NonNull<u8>, header: ChunkHeader) -> Self {
        debug_assert!(header.size >= HEADER_SIZE);
        unsafe { ptr.cast::<ChunkHeader>().as_ptr().write_unaligned(header) };
        Self { ptr }
    }

    #[inline]
    fn header(&self) -> ChunkHeader {
        unsafe { self.ptr.cast::<ChunkHeader>().as_ptr().read_unaligned() }
    }

    #[inline]
    fn store(&mut self, header: ChunkHeader) {
        unsafe { self.ptr.cast::<ChunkHeader>().as_ptr().write_unaligned(header) }
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.header().size
    }

    #[inline]
    pub fn is_available(&self) -> bool {
        self.header().available
    }

    #[inline]
    pub fn set_size(&mut self, size: usize) {
        debug_assert!(size >= HEADER_SIZE);
        let header = self.header();
        self.store(ChunkHeader { size, ..header });
    }

    #[inline]
    pub fn set_available(&mut self, available: bool) {
        let header = self.header();
        self.store(ChunkHeader { available, ..header });
    }

    /// Address of the header.
    #[inline]
    pub fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    #[inline]
    pub fn addr(&self) -> usize {
        self.ptr.as_ptr() as usize
    }

    /// First byte after the header. This is what callers get back.
    #[inline]
    pub fn payload(&self) -> NonNull<u8> {
        unsafe { self.ptr.add(HEADER_SIZE) }
    }

    /// Address right after this chunk: the next header, or the region end.
    #[inline]
    pub fn next_ptr(&self) -> NonNull<u8> {
        unsafe { self.ptr.add(self.size()) }
    }
}
