//! Run-length chunker: turns a linear pixel stream into `(run_length,
//! pixel_group)` pairs bounded by a configurable maximum chunk size.
//!
//! Groups consecutive equal pixels. Runs longer than 3 pixels become RLE
//! chunks (split at `max_chunk_size` pixels each); everything else
//! accumulates into a raw buffer that is itself split at `max_chunk_size`
//! unless `only_chunk_rle` is set, in which case raw buffers are emitted
//! whole and only RLE runs respect the chunk size limit. This matches QOI's
//! own framing, where "raw" pixels aren't a wire-level chunk at all and are
//! iterated individually by the caller.

use std::collections::VecDeque;

fn group_runs<P: Copy + PartialEq>(pixels: &[P]) -> Vec<(P, usize)> {
    let mut out = Vec::new();
    let mut iter = pixels.iter();
    if let Some(&first) = iter.next() {
        let mut cur = first;
        let mut count = 1usize;
        for &px in iter {
            if px == cur {
                count += 1;
            } else {
                out.push((cur, count));
                cur = px;
                count = 1;
            }
        }
        out.push((cur, count));
    }
    out
}

/// Lazy producer of `(run_length, pixels)` chunks over a pixel slice.
///
/// `run_length == 0` marks a raw chunk (`pixels` holds the literal pixels);
/// any other value marks an RLE chunk (`pixels` holds exactly one pixel,
/// repeated `run_length` times).
pub struct RleChunker<P> {
    groups: std::vec::IntoIter<(P, usize)>,
    max_chunk_size: usize,
    only_chunk_rle: bool,
    raw_buf: Vec<P>,
    pending: VecDeque<(u32, Vec<P>)>,
    done: bool,
}

impl<P: Copy + PartialEq> RleChunker<P> {
    /// `max_chunk_size == 0` means unbounded chunks.
    pub fn new(pixels: &[P], max_chunk_size: usize, only_chunk_rle: bool) -> Self {
        RleChunker {
            groups: group_runs(pixels).into_iter(),
            max_chunk_size,
            only_chunk_rle,
            raw_buf: Vec::new(),
            pending: VecDeque::new(),
            done: false,
        }
    }

    fn flush_raw(&mut self) {
        if self.raw_buf.is_empty() {
            return;
        }
        let buf = std::mem::take(&mut self.raw_buf);
        if self.max_chunk_size > 0 && !self.only_chunk_rle {
            for chunk in buf.chunks(self.max_chunk_size) {
                self.pending.push_back((0, chunk.to_vec()));
            }
        } else {
            self.pending.push_back((0, buf));
        }
    }
}

impl<P: Copy + PartialEq> Iterator for RleChunker<P> {
    type Item = (u32, Vec<P>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.pending.pop_front() {
                return Some(item);
            }
            if self.done {
                return None;
            }
            match self.groups.next() {
                Some((px, len)) if len > 3 => {
                    self.flush_raw();
                    if self.max_chunk_size > 0 {
                        let mut remaining = len;
                        while remaining > 0 {
                            let take = remaining.min(self.max_chunk_size);
                            self.pending.push_back((take as u32, vec![px]));
                            remaining -= take;
                        }
                    } else {
                        self.pending.push_back((len as u32, vec![px]));
                    }
                }
                Some((px, len)) => {
                    self.raw_buf.extend(std::iter::repeat(px).take(len));
                }
                None => {
                    self.flush_raw();
                    self.done = true;
                }
            }
        }
    }
}

/// Convenience: run the chunker to completion.
pub fn rle_chunks<P: Copy + PartialEq>(
    pixels: &[P],
    max_chunk_size: usize,
    only_chunk_rle: bool,
) -> Vec<(u32, Vec<P>)> {
    RleChunker::new(pixels, max_chunk_size, only_chunk_rle).collect()
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    fn total_emitted(chunks: &[(u32, Vec<u8>)]) -> usize {
        chunks.iter().map(|(n, px)| if *n > 0 { *n as usize } else { px.len() }).sum()
    }

    proptest! {
        /// Every emitted chunk list accounts for exactly as many pixels as
        /// went in, regardless of run structure or chunk size.
        #[test]
        fn total_pixel_count_always_matches_input(
            pixels in proptest::collection::vec(0u8..4, 0..200),
            max_chunk_size in 1usize..64,
            only_chunk_rle in any::<bool>(),
        ) {
            let chunks = rle_chunks(&pixels, max_chunk_size, only_chunk_rle);
            prop_assert_eq!(total_emitted(&chunks), pixels.len());
        }

        /// An RLE chunk (`run_length > 0`) never exceeds `max_chunk_size`
        /// pixels, and a raw chunk emitted while `only_chunk_rle` is unset
        /// never does either.
        #[test]
        fn chunks_respect_max_chunk_size(
            pixels in proptest::collection::vec(0u8..4, 0..200),
            max_chunk_size in 1usize..64,
        ) {
            for (run_len, group) in rle_chunks(&pixels, max_chunk_size, false) {
                let size = if run_len > 0 { run_len as usize } else { group.len() };
                prop_assert!(size <= max_chunk_size);
            }
        }

        /// Expanding the chunk list (repeating each RLE pixel `run_length`
        /// times, concatenating raw chunks as-is) reconstructs the exact
        /// original pixel sequence, not just its length.
        #[test]
        fn expanding_chunks_reconstructs_the_input(
            pixels in proptest::collection::vec(0u8..4, 0..200),
            max_chunk_size in 1usize..64,
            only_chunk_rle in any::<bool>(),
        ) {
            let chunks = rle_chunks(&pixels, max_chunk_size, only_chunk_rle);
            let mut rebuilt = Vec::with_capacity(pixels.len());
            for (run_len, group) in chunks {
                if run_len > 0 {
                    rebuilt.extend(std::iter::repeat(group[0]).take(run_len as usize));
                } else {
                    rebuilt.extend(group);
                }
            }
            prop_assert_eq!(rebuilt, pixels);
        }
    }
}
