use log::trace;

use crate::{chunk::Chunk, kernel::BreakGrower, region::Region};

/// Merges every run of adjacent available chunks in one forward pass.
///
/// ```text
/// before:  | used | free | free | free | used | free |
///                 prev   cur
/// after:   | used |        free        | used | free |
/// ```
///
/// `prev` only moves forward when no merge happened, so a run of any length
/// collapses into its first chunk. Returns the last chunk of the region,
/// already merged, or `None` when the region holds no chunks.
pub(crate) fn coalesce<G: BreakGrower>(region: &Region<G>) -> Option<Chunk> {
    let end = region.end();
    let mut current = region.start();
    let mut prev: Option<Chunk> = None;

    while current != end {
        let chunk = unsafe { region.chunk_at(current) };

        match prev {
            Some(mut prev) if prev.is_available() && chunk.is_available() => {
                trace!(
                    "merging chunk at {:p} ({} bytes) into {:p} ({} bytes)",
                    chunk.as_ptr(),
                    chunk.size(),
                    prev.as_ptr(),
                    prev.size()
                );
                prev.set_size(prev.size() + chunk.size());
                current = prev.next_ptr().as_ptr();
            }
            _ => {
                prev = Some(chunk);
                current = chunk.next_ptr().as_ptr();
            }
        }
    }

    prev
}
