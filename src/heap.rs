use std::{fmt, ptr::NonNull};

use log::{debug, trace};

use crate::{
    chunk::{Chunk, ChunkHeader, HEADER_SIZE},
    coalesce::coalesce,
    config::{HeapConfig, TrimThreshold},
    diagnostics::{self, Chunks},
    error::{HeapError, Result},
    kernel::BreakGrower,
    region::Region,
    trim::maybe_trim,
};

/// A worst-fit heap over a single contiguous region.
///
/// Every allocation is a chunk: an in-band header followed by the bytes the
/// caller asked for. Allocating looks for the *largest* available chunk that
/// fits, splits off whatever is left over, and only grows the region when no
/// chunk fits. Every allocation from an existing chunk and every release is
/// followed by a full coalescing pass, which also trims the region when the
/// trailing free chunk exceeds the configured threshold.
///
/// The heap is not thread safe. Wrap it in [`crate::LockedHeap`] to share it.
pub struct Heap<G: BreakGrower> {
    region: Region<G>,
    config: HeapConfig,
}

unsafe impl<G: BreakGrower + Send> Send for Heap<G> {}

#[cfg(any(unix, windows))]
impl Heap<crate::kernel::SystemBreak> {
    /// A heap on top of the process break, configured from the environment.
    ///
    /// There is only one break per process: build at most one of these.
    pub const fn system() -> Self {
        Self::new(
            crate::kernel::SystemBreak::new(),
            HeapConfig::new(TrimThreshold::Env(TrimThreshold::ENV_VAR)),
        )
    }
}

impl<G: BreakGrower> Heap<G> {
    /// Creates a heap. Nothing is requested from `grower` until the first
    /// allocation.
    pub const fn new(grower: G, config: HeapConfig) -> Self {
        Self {
            region: Region::new(grower),
            config,
        }
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn set_trim_threshold(&mut self, trim_threshold: TrimThreshold) {
        self.config.trim_threshold = trim_threshold;
    }

    pub fn grower(&self) -> &G {
        self.region.grower()
    }

    pub fn is_initialized(&self) -> bool {
        self.region.is_initialized()
    }

    /// First byte of the region. Null before the first allocation.
    pub fn start(&self) -> *mut u8 {
        self.region.start()
    }

    /// One past the last byte of the region. Null before the first allocation.
    pub fn end(&self) -> *mut u8 {
        self.region.end()
    }

    /// Size of the region in bytes.
    pub fn len(&self) -> usize {
        self.region.len()
    }

    pub fn is_empty(&self) -> bool {
        self.region.is_empty()
    }

    /// Allocates a block with at least `size` usable bytes and returns a
    /// pointer to its first byte.
    ///
    /// The block may be larger than requested when the chunk it came from
    /// could not be split. Zero sized requests are fine and get a chunk that
    /// is just a header.
    ///
    /// The returned pointer is only aligned to 1 byte.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>> {
        self.region.initialize()?;

        let total = size
            .checked_add(HEADER_SIZE)
            .ok_or(HeapError::OutOfMemory { requested: size })?;

        let chunk = match self.find_worst_fit(total) {
            Some(mut chunk) => {
                debug!(
                    "allocate({size}): reusing chunk at {:p} ({} bytes)",
                    chunk.as_ptr(),
                    chunk.size()
                );
                chunk.set_available(false);
                split(chunk, total);
                self.coalesce();
                chunk
            }
            None => {
                debug!("allocate({size}): no chunk fits, growing the region");
                let ptr = self.region.grow(total)?;
                unsafe {
                    Chunk::write(
                        ptr,
                        ChunkHeader {
                            available: false,
                            size: total,
                        },
                    )
                }
            }
        };

        Ok(chunk.payload())
    }

    /// Gives a block back to the heap.
    ///
    /// **SAFETY**: `ptr` must come from [`Heap::allocate`] on this same heap and
    /// must not have been released already. The caller can't touch the block
    /// after this call.
    pub unsafe fn release(&mut self, ptr: NonNull<u8>) {
        let mut chunk = unsafe { Chunk::from_payload(ptr) };
        debug!("release({ptr:p}): chunk of {} bytes", chunk.size());

        chunk.set_available(true);
        self.coalesce();
    }

    /// Same as [`Heap::release`], but `ptr` is validated first by walking the
    /// region, so bad pointers and double frees are reported instead of
    /// corrupting the heap.
    pub fn release_checked(&mut self, ptr: NonNull<u8>) -> Result<()> {
        let addr = ptr.as_ptr() as usize;

        let chunk = self
            .region
            .chunks()
            .find(|chunk| chunk.payload() == ptr)
            .ok_or(HeapError::InvalidAddress { addr })?;

        if chunk.is_available() {
            return Err(HeapError::DoubleFree { addr });
        }

        unsafe { self.release(ptr) };

        Ok(())
    }

    /// Trims the region if its last chunk is available and bigger than the
    /// trim threshold. Returns how many bytes went back to the grower.
    pub fn trim(&mut self) -> Option<usize> {
        let last = self.region.chunks().last()?;
        maybe_trim(&mut self.region, last, self.config.trim_threshold.resolve())
    }

    /// Walks the chunks of the heap in address order.
    pub fn chunks(&self) -> Chunks<'_> {
        Chunks::new(self.region.chunks())
    }

    /// Writes a human readable dump of every chunk.
    pub fn meminfo<W: fmt::Write>(&self, out: &mut W) -> fmt::Result {
        diagnostics::write_meminfo(self.chunks(), out)
    }

    /// Largest available chunk of at least `total` bytes. On ties the lowest
    /// address wins.
    fn find_worst_fit(&self, total: usize) -> Option<Chunk> {
        let mut worst: Option<Chunk> = None;

        for chunk in self.region.chunks() {
            if !chunk.is_available() || chunk.size() < total {
                continue;
            }

            if worst.is_none_or(|worst| chunk.size() > worst.size()) {
                worst = Some(chunk);
            }
        }

        worst
    }

    /// Restores the "no two adjacent available chunks" invariant and trims
    /// the tail of the region.
    fn coalesce(&mut self) {
        if let Some(last) = coalesce(&self.region) {
            maybe_trim(&mut self.region, last, self.config.trim_threshold.resolve());
        }
    }
}

impl<G: BreakGrower> fmt::Debug for Heap<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Heap")
            .field("start", &self.region.start())
            .field("end", &self.region.end())
            .field("config", &self.config)
            .finish()
    }
}

/// Cuts `chunk` down to `total` bytes when the leftover can hold a header of
/// its own. The leftover becomes a new available chunk right after it.
///
/// Otherwise the chunk keeps its full size and the caller gets the slack.
fn split(mut chunk: Chunk, total: usize) {
    let extra = chunk.size() - total;
    if extra <= HEADER_SIZE {
        return;
    }

    chunk.set_size(total);

    let rest = unsafe {
        Chunk::write(
            chunk.next_ptr(),
            ChunkHeader {
                available: true,
                size: extra,
            },
        )
    };

    trace!(
        "split chunk at {:p}: kept {total} bytes, {extra} bytes left at {:p}",
        chunk.as_ptr(),
        rest.as_ptr()
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::FixedArena;

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn heap(capacity: usize) -> Heap<FixedArena> {
        init_logger();
        Heap::new(FixedArena::new(capacity), HeapConfig::fixed(usize::MAX))
    }

    fn layout<G: BreakGrower>(heap: &Heap<G>) -> Vec<(bool, usize)> {
        heap.chunks().map(|info| (info.available, info.size)).collect()
    }

    /// Checks that chunks tile `[start, end)` and that no two neighbours are
    /// both available.
    fn assert_invariants<G: BreakGrower>(heap: &Heap<G>) {
        let mut expected = heap.start() as usize;
        let mut previous_available = false;

        for info in heap.chunks() {
            assert_eq!(info.address, expected, "gap before chunk #{}", info.index);
            assert!(info.size >= HEADER_SIZE);
            assert!(
                !(previous_available && info.available),
                "chunk #{} should have been merged",
                info.index
            );
            previous_available = info.available;
            expected += info.size;
        }

        assert_eq!(expected, heap.end() as usize);
    }

    /// Builds `[free 100 | used | free 200 | used]` header-inclusive sizes.
    fn two_holes(first: usize, second: usize) -> (Heap<FixedArena>, usize, usize) {
        let mut heap = heap(4096);

        let a = heap.allocate(first - HEADER_SIZE).unwrap();
        let _guard_a = heap.allocate(8).unwrap();
        let b = heap.allocate(second - HEADER_SIZE).unwrap();
        let _guard_b = heap.allocate(8).unwrap();

        unsafe {
            heap.release(a);
            heap.release(b);
        }

        (heap, a.as_ptr() as usize, b.as_ptr() as usize)
    }

    #[test]
    fn heap_is_lazy() {
        let heap = heap(1024);

        assert!(!heap.is_initialized());
        assert_eq!(heap.grower().used(), 0);
        assert_eq!(heap.chunks().count(), 0);
    }

    #[test]
    fn basic_alloc() {
        let mut heap = heap(1024);

        let block = heap.allocate(4).unwrap().cast::<u32>();
        unsafe {
            block.as_ptr().write_unaligned(23);
            assert_eq!(23, block.as_ptr().read_unaligned());
        }

        assert_eq!(block.as_ptr() as usize, heap.start() as usize + HEADER_SIZE);
        assert_eq!(layout(&heap), [(false, 4 + HEADER_SIZE)]);
    }

    #[test]
    fn fresh_allocations_are_appended() {
        let mut heap = heap(1024);

        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(32).unwrap();
        let c = heap.allocate(0).unwrap();

        assert_eq!(b.as_ptr() as usize, a.as_ptr() as usize + 16 + HEADER_SIZE);
        assert_eq!(c.as_ptr() as usize, b.as_ptr() as usize + 32 + HEADER_SIZE);
        assert_eq!(
            layout(&heap),
            [(false, 16 + HEADER_SIZE), (false, 32 + HEADER_SIZE), (false, HEADER_SIZE)]
        );
        assert_eq!(heap.len(), 48 + 3 * HEADER_SIZE);
        assert_invariants(&heap);
    }

    #[test]
    fn out_of_memory_is_reported() {
        let mut heap = heap(128);

        heap.allocate(64).unwrap();
        assert_eq!(heap.allocate(128), Err(HeapError::OutOfMemory { requested: 128 + HEADER_SIZE }));
        assert_eq!(heap.allocate(usize::MAX), Err(HeapError::OutOfMemory { requested: usize::MAX }));

        assert_eq!(layout(&heap), [(false, 64 + HEADER_SIZE)]);
    }

    #[test]
    fn worst_fit_picks_the_largest_chunk() {
        let (mut heap, _small, large) = two_holes(100, 200);

        let ptr = heap.allocate(10).unwrap();

        assert_eq!(ptr.as_ptr() as usize, large);
        assert_invariants(&heap);
    }

    #[test]
    fn worst_fit_prefers_lower_address_on_ties() {
        let (mut heap, first, _second) = two_holes(150, 150);

        let ptr = heap.allocate(10).unwrap();

        assert_eq!(ptr.as_ptr() as usize, first);
        assert_invariants(&heap);
    }

    #[test]
    fn too_small_chunks_are_skipped() {
        let (mut heap, _small, _large) = two_holes(100, 200);
        let before = heap.len();

        let ptr = heap.allocate(300).unwrap();

        assert_eq!(ptr.as_ptr() as usize, before + heap.start() as usize + HEADER_SIZE);
        assert_invariants(&heap);
    }

    #[test]
    fn split_leaves_an_available_remainder() {
        let mut heap = heap(4096);
        let big = heap.allocate(1000 - HEADER_SIZE).unwrap();
        let _guard = heap.allocate(8).unwrap();
        unsafe { heap.release(big) };

        let small = heap.allocate(10).unwrap();

        assert_eq!(small, big);
        assert_eq!(
            layout(&heap),
            [
                (false, 10 + HEADER_SIZE),
                (true, 1000 - (10 + HEADER_SIZE)),
                (false, 8 + HEADER_SIZE)
            ]
        );
        assert_invariants(&heap);
    }

    #[test]
    fn small_remainder_stays_inside_the_chunk() {
        let mut heap = heap(4096);
        let hole = heap.allocate(40).unwrap();
        let _guard = heap.allocate(8).unwrap();
        unsafe { heap.release(hole) };

        // Exactly one header worth of slack: not enough to split.
        let ptr = heap.allocate(40 - HEADER_SIZE).unwrap();

        assert_eq!(ptr, hole);
        assert_eq!(layout(&heap), [(false, 40 + HEADER_SIZE), (false, 8 + HEADER_SIZE)]);

        // The caller silently owns the whole payload.
        unsafe { ptr.as_ptr().write_bytes(0xAB, 40) };
        assert_invariants(&heap);
    }

    #[test]
    fn release_marks_and_merges() {
        let mut heap = heap(4096);

        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(32).unwrap();
        let c = heap.allocate(64).unwrap();
        let _guard = heap.allocate(8).unwrap();

        unsafe {
            heap.release(b);
            assert_eq!(layout(&heap)[1], (true, 32 + HEADER_SIZE));

            heap.release(a);
            heap.release(c);
        }

        assert_eq!(
            layout(&heap),
            [(true, 16 + 32 + 64 + 3 * HEADER_SIZE), (false, 8 + HEADER_SIZE)]
        );
        assert_invariants(&heap);
    }

    #[test]
    fn any_release_order_coalesces_into_one_chunk() {
        let orders = [
            [0, 1, 2],
            [0, 2, 1],
            [1, 0, 2],
            [1, 2, 0],
            [2, 0, 1],
            [2, 1, 0],
        ];

        for order in orders {
            let mut heap = heap(4096);
            let blocks = [
                heap.allocate(16).unwrap(),
                heap.allocate(32).unwrap(),
                heap.allocate(64).unwrap(),
            ];
            let _guard = heap.allocate(8).unwrap();

            for i in order {
                unsafe { heap.release(blocks[i]) };
                assert_invariants(&heap);
            }

            assert_eq!(
                layout(&heap),
                [(true, 112 + 3 * HEADER_SIZE), (false, 8 + HEADER_SIZE)],
                "release order {order:?}"
            );
        }
    }

    #[test]
    fn round_trip_leaves_a_single_free_chunk() {
        let mut heap = heap(4096);

        let ptr = heap.allocate(100).unwrap();
        unsafe { heap.release(ptr) };

        assert_eq!(layout(&heap), [(true, 100 + HEADER_SIZE)]);
        assert_eq!(heap.len(), 100 + HEADER_SIZE);
    }

    #[test]
    fn round_trip_trims_to_threshold() {
        let mut heap = heap(4096);
        heap.set_trim_threshold(TrimThreshold::Fixed(64));

        let ptr = heap.allocate(1000).unwrap();
        unsafe { heap.release(ptr) };

        assert_eq!(layout(&heap), [(true, 64)]);
        assert_eq!(heap.len(), 64);
        assert_eq!(heap.grower().used(), 64);
    }

    #[test]
    fn explicit_trim() {
        let mut heap = heap(4096);

        let _used = heap.allocate(100).unwrap();
        let tail = heap.allocate(1000 - HEADER_SIZE).unwrap();
        unsafe { heap.release(tail) };
        assert_eq!(heap.len(), 100 + HEADER_SIZE + 1000);

        heap.set_trim_threshold(TrimThreshold::Fixed(64));
        assert_eq!(heap.trim(), Some(936));
        assert_eq!(layout(&heap), [(false, 100 + HEADER_SIZE), (true, 64)]);
        assert_eq!(heap.len(), 100 + HEADER_SIZE + 64);

        assert_eq!(heap.trim(), None);
    }

    #[test]
    fn explicit_trim_ignores_used_tail() {
        let mut heap = heap(4096);
        heap.set_trim_threshold(TrimThreshold::Fixed(64));

        heap.allocate(1000 - HEADER_SIZE).unwrap();

        assert_eq!(heap.trim(), None);
        assert_eq!(heap.len(), 1000);
    }

    #[test]
    fn trimmed_space_is_reused() {
        let mut heap = heap(4096);
        heap.set_trim_threshold(TrimThreshold::Fixed(64));

        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(500).unwrap();
        unsafe { heap.release(b) };

        // The trimmed tail chunk is reused for anything that fits in it.
        let c = heap.allocate(64 - HEADER_SIZE).unwrap();
        assert_eq!(c, b);
        assert_ne!(a, c);
        assert_invariants(&heap);
    }

    #[test]
    fn allocate_release_scenario() {
        let mut heap = heap(4096);
        heap.set_trim_threshold(TrimThreshold::Fixed(64));

        let a = heap.allocate(16).unwrap();
        let b = heap.allocate(32).unwrap();
        let c = heap.allocate(64).unwrap();

        unsafe { heap.release(b) };
        let d = heap.allocate(8).unwrap();
        assert_eq!(d, b);

        // 32 + H bytes minus the 8 + H requested leaves 24 bytes, which holds
        // a header on 64-bit targets and splits.
        let rest = 32 - 8;
        if rest > HEADER_SIZE {
            assert_eq!(layout(&heap)[1], (false, 8 + HEADER_SIZE));
            assert_eq!(layout(&heap)[2], (true, rest));
        } else {
            assert_eq!(layout(&heap)[1], (false, 32 + HEADER_SIZE));
        }
        assert_invariants(&heap);

        unsafe {
            heap.release(c);
            heap.release(d);
            heap.release(a);
        }

        assert_eq!(layout(&heap), [(true, 64)]);
        assert_invariants(&heap);
    }

    #[test]
    fn checked_release_rejects_misuse() {
        let mut heap = heap(4096);

        let mut byte = 0u8;
        let outside = NonNull::from(&mut byte);
        assert_eq!(
            heap.release_checked(outside),
            Err(HeapError::InvalidAddress { addr: outside.as_ptr() as usize })
        );

        let a = heap.allocate(32).unwrap();
        let _guard = heap.allocate(8).unwrap();

        let inside = unsafe { a.add(1) };
        assert_eq!(
            heap.release_checked(inside),
            Err(HeapError::InvalidAddress { addr: inside.as_ptr() as usize })
        );

        assert_eq!(heap.release_checked(a), Ok(()));
        assert_eq!(
            heap.release_checked(a),
            Err(HeapError::DoubleFree { addr: a.as_ptr() as usize })
        );
    }

    #[test]
    fn meminfo_lists_every_chunk() {
        let mut heap = heap(4096);

        let a = heap.allocate(16).unwrap();
        heap.allocate(8).unwrap();
        unsafe { heap.release(a) };

        let mut out = String::new();
        heap.meminfo(&mut out).unwrap();

        let expected = format!(
            "Chunk #1\nAddress: {:#x}\nSize:    {}\nStatus: Available\n\n\
             Chunk #2\nAddress: {:#x}\nSize:    {}\nStatus: In Use\n\n",
            heap.start() as usize,
            16 + HEADER_SIZE,
            heap.start() as usize + 16 + HEADER_SIZE,
            8 + HEADER_SIZE,
        );
        assert_eq!(out, expected);
    }

    #[test]
    fn random_walk_keeps_invariants() {
        let mut heap = heap(1 << 20);
        heap.set_trim_threshold(TrimThreshold::Fixed(256));

        let mut live: Vec<NonNull<u8>> = Vec::new();
        let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
        let mut next = || {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            seed
        };

        for _ in 0..500 {
            let roll = next();
            if live.is_empty() || roll % 3 != 0 {
                let size = (next() % 200) as usize;
                let ptr = heap.allocate(size).unwrap();
                unsafe { ptr.as_ptr().write_bytes(0x5A, size) };
                live.push(ptr);
            } else {
                let index = (next() as usize) % live.len();
                let ptr = live.swap_remove(index);
                heap.release_checked(ptr).unwrap();
            }

            assert_invariants(&heap);
        }

        for ptr in live.drain(..) {
            heap.release_checked(ptr).unwrap();
            assert_invariants(&heap);
        }

        let chunks = layout(&heap);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].0);
        assert!(chunks[0].1 <= 256);
    }
}
