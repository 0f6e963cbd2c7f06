use std::{alloc::Layout, ptr::NonNull};

use crate::utils::align;

/// This trait is the only point of contact between the heap and whatever
/// provides its memory. It models a program break: one contiguous span that
/// can be extended or retracted at its tail.
///
/// **SAFETY**: implementors must guarantee that after a successful call with a
/// positive `delta` the bytes `[previous, previous + delta)` are readable and
/// writable until the break is moved below them again, and that consecutive
/// calls keep handing out contiguous memory unless someone else moved the break.
pub unsafe trait BreakGrower {
    /// Moves the break by `delta` bytes and returns the break as it was before
    /// the call. `grow_break(0)` queries the current break. Returns `None` when
    /// the request cannot be satisfied, in which case nothing changed.
    ///
    /// **SAFETY**: a negative `delta` must only release bytes the caller no
    /// longer uses.
    unsafe fn grow_break(&mut self, delta: isize) -> Option<NonNull<u8>>;
}

#[cfg(unix)]
mod unix {
    use super::BreakGrower;

    use libc::{c_void, intptr_t, sbrk};

    use std::ptr::NonNull;

    /// The process data segment, moved with `sbrk(2)`.
    ///
    /// There is a single break per process, so at most one heap should be
    /// built on top of this grower. Other break users (the libc allocator
    /// itself, for example) are detected by the region, not prevented.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct Sbrk;

    impl Sbrk {
        pub const fn new() -> Self {
            Sbrk
        }
    }

    unsafe impl BreakGrower for Sbrk {
        unsafe fn grow_break(&mut self, delta: isize) -> Option<NonNull<u8>> {
            let addr = unsafe { sbrk(delta as intptr_t) };

            if addr == usize::MAX as *mut c_void {
                return None;
            }

            NonNull::new(addr.cast())
        }
    }
}

#[cfg(unix)]
pub use unix::Sbrk;

/// Break grower backed by the operating system.
#[cfg(unix)]
pub type SystemBreak = Sbrk;

#[cfg(windows)]
mod windows {
    use std::{mem::MaybeUninit, os::raw::c_void, ptr::NonNull};

    use windows::Win32::System::{Memory, SystemInformation};

    use super::BreakGrower;
    use crate::utils::align;

    /// Windows has no data segment break, so we emulate one: a large span of
    /// address space is reserved up front and pages are committed and
    /// decommitted as the break moves.
    #[derive(Debug)]
    pub struct ReservedBreak {
        base: *mut u8,
        reserved: usize,
        committed: usize,
        brk: usize,
        page_size: usize,
    }

    impl ReservedBreak {
        /// Address space reserved when no explicit size is given.
        pub const DEFAULT_RESERVE: usize = if cfg!(target_pointer_width = "64") {
            1 << 36
        } else {
            1 << 28
        };

        pub const fn new() -> Self {
            Self::with_reserve(Self::DEFAULT_RESERVE)
        }

        /// Nothing is reserved until the break is first used.
        pub const fn with_reserve(reserved: usize) -> Self {
            Self {
                base: std::ptr::null_mut(),
                reserved,
                committed: 0,
                brk: 0,
                page_size: 0,
            }
        }

        fn reserve(&mut self) -> Option<()> {
            if !self.base.is_null() {
                return Some(());
            }

            unsafe {
                let mut system_info = MaybeUninit::uninit();
                SystemInformation::GetSystemInfo(system_info.as_mut_ptr());
                self.page_size = system_info.assume_init().dwPageSize as usize;

                self.reserved = align(self.reserved, self.page_size);
                let addr = Memory::VirtualAlloc(
                    None,
                    self.reserved,
                    Memory::MEM_RESERVE,
                    Memory::PAGE_NOACCESS,
                );

                self.base = NonNull::new(addr.cast::<u8>())?.as_ptr();
            }

            Some(())
        }
    }

    impl Default for ReservedBreak {
        fn default() -> Self {
            Self::new()
        }
    }

    unsafe impl Send for ReservedBreak {}

    unsafe impl BreakGrower for ReservedBreak {
        unsafe fn grow_break(&mut self, delta: isize) -> Option<NonNull<u8>> {
            self.reserve()?;

            let previous = self.brk;
            let brk = previous.checked_add_signed(delta)?;
            if brk > self.reserved {
                return None;
            }

            let needed = align(brk, self.page_size);

            unsafe {
                if needed > self.committed {
                    let addr = Memory::VirtualAlloc(
                        Some(self.base.add(self.committed) as *const c_void),
                        needed - self.committed,
                        Memory::MEM_COMMIT,
                        Memory::PAGE_READWRITE,
                    );
                    if addr.is_null() {
                        return None;
                    }
                    self.committed = needed;
                } else if needed < self.committed {
                    let decommitted = Memory::VirtualFree(
                        self.base.add(needed) as *mut c_void,
                        self.committed - needed,
                        Memory::MEM_DECOMMIT,
                    );
                    // Pages that failed to decommit stay committed and are
                    // reused by the next growth.
                    if decommitted.is_ok() {
                        self.committed = needed;
                    }
                }

                self.brk = brk;
                NonNull::new(self.base.add(previous))
            }
        }
    }
}

#[cfg(windows)]
pub use windows::ReservedBreak;

/// Break grower backed by the operating system.
#[cfg(windows)]
pub type SystemBreak = ReservedBreak;

/// A break over a fixed buffer owned by the grower itself.
///
/// Every arena is independent from the process break and from every other
/// arena, which makes it possible to run several heaps side by side.
///
/// ```text
/// base                   base + brk                 base + capacity
///  |                          |                             |
///  +--------------------------+-----------------------------+
///  |   handed out to the heap |        still available      |
///  +--------------------------+-----------------------------+
/// ```
#[derive(Debug)]
pub struct FixedArena {
    base: NonNull<u8>,
    layout: Layout,
    brk: usize,
}

impl FixedArena {
    /// Creates an arena able to hold `capacity` bytes, rounded up to the
    /// machine word.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` can't be described by a [`Layout`] or the buffer
    /// can't be allocated. Use [`FixedArena::try_new`] to handle that instead.
    pub fn new(capacity: usize) -> Self {
        match Self::try_new(capacity) {
            Some(arena) => arena,
            None => panic!("cannot allocate an arena of {capacity} bytes"),
        }
    }

    /// Same as [`FixedArena::new`], but returns `None` when the buffer can't
    /// be created.
    pub fn try_new(capacity: usize) -> Option<Self> {
        let word = std::mem::size_of::<usize>();
        if capacity > isize::MAX as usize - word {
            return None;
        }

        let size = align(capacity.max(1), word);
        let layout = Layout::from_size_align(size, word).ok()?;
        let base = NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) })?;

        Some(Self { base, layout, brk: 0 })
    }

    /// Total number of bytes the arena can hand out.
    pub fn capacity(&self) -> usize {
        self.layout.size()
    }

    /// Number of bytes currently below the break.
    pub fn used(&self) -> usize {
        self.brk
    }
}

unsafe impl Send for FixedArena {}

unsafe impl BreakGrower for FixedArena {
    unsafe fn grow_break(&mut self, delta: isize) -> Option<NonNull<u8>> {
        let brk = self.brk.checked_add_signed(delta)?;
        if brk > self.capacity() {
            return None;
        }

        let previous = unsafe { self.base.add(self.brk) };
        self.brk = brk;

        Some(previous)
    }
}

impl Drop for FixedArena {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.base.as_ptr(), self.layout) }
    }
}
