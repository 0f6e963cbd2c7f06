//! Helpers that don't particularly belong to any concrete module of the heap.

/// Rounds `to_be_aligned` up to a multiple of `alignment`, which must be a
/// power of two.
///
/// Used to size arena buffers in machine words and to commit whole pages
/// when the break is emulated.
pub fn align(to_be_aligned: usize, alignment: usize) -> usize {
    debug_assert!(alignment.is_power_of_two());
    (to_be_aligned + alignment - 1) & !(alignment - 1)
}
