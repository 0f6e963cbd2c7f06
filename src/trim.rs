use log::info;

use crate::{
    chunk::{Chunk, HEADER_SIZE},
    kernel::BreakGrower,
    region::Region,
};

/// Returns trailing free space to the grower once it exceeds `threshold`.
///
/// `last` must be the final chunk of `region`. If it is available and bigger
/// than the threshold, the region shrinks so that the chunk ends up exactly
/// `threshold` bytes long. A threshold below [`HEADER_SIZE`] is raised to it,
/// the chunk has to keep its header.
///
/// Returns how many bytes were released, if any.
pub(crate) fn maybe_trim<G: BreakGrower>(
    region: &mut Region<G>,
    mut last: Chunk,
    threshold: usize,
) -> Option<usize> {
    debug_assert_eq!(last.next_ptr().as_ptr(), region.end());

    if !last.is_available() {
        return None;
    }

    let threshold = threshold.max(HEADER_SIZE);
    let size = last.size();
    if size <= threshold {
        return None;
    }

    let excess = size - threshold;

    // The tail belongs to an available chunk, nobody is using it.
    if !unsafe { region.shrink(excess) } {
        return None;
    }

    last.set_size(threshold);

    info!("heap trimmed by {excess} bytes, last chunk is now {threshold} bytes");

    Some(excess)
}
