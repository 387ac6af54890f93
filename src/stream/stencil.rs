//! Stenciled views: sparse, reordered sub-ranges of a parent stream.
//!
//! A stencil is an `(offset, length)` slice of a parent stream; a stencil
//! view concatenates an ordered sequence of slices (and, for sparse archive
//! members, synthesized zero runs) into a new [`SeekableStream`] without
//! materializing any bytes. Reads binary-search the cumulative segment
//! offsets, so a random read costs O(log k) plus the parent reads it maps to.

use std::sync::Arc;

use super::SeekableStream;
use crate::Result;

/// One segment of a stencil view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segment {
    /// Offset in the parent stream, or `None` for a synthesized zero run.
    pub source: Option<u64>,
    /// Length of the segment in bytes.
    pub length: u64,
}

impl Segment {
    /// A segment backed by parent bytes.
    pub fn data(source: u64, length: u64) -> Self {
        Self {
            source: Some(source),
            length,
        }
    }

    /// A segment of zeros.
    pub fn hole(length: u64) -> Self {
        Self {
            source: None,
            length,
        }
    }
}

/// A sparse, reordered view of a parent stream.
pub struct StencilView {
    parent: Arc<dyn SeekableStream>,
    segments: Vec<Segment>,
    /// Cumulative start offset of each segment in the view; same length as
    /// `segments`, strictly increasing (zero-length segments are dropped).
    starts: Vec<u64>,
    total: u64,
}

impl StencilView {
    /// Builds a view from `(parent_offset, length)` stencils.
    pub fn new(parent: Arc<dyn SeekableStream>, stencils: &[(u64, u64)]) -> Self {
        Self::from_segments(
            parent,
            stencils
                .iter()
                .map(|&(source, length)| Segment::data(source, length))
                .collect(),
        )
    }

    /// Builds a view from explicit segments, holes included.
    pub fn from_segments(parent: Arc<dyn SeekableStream>, segments: Vec<Segment>) -> Self {
        let mut kept = Vec::with_capacity(segments.len());
        let mut starts = Vec::with_capacity(segments.len());
        let mut total = 0u64;
        for segment in segments {
            if segment.length == 0 {
                continue;
            }
            starts.push(total);
            total += segment.length;
            kept.push(segment);
        }
        Self {
            parent,
            segments: kept,
            starts,
            total,
        }
    }

    /// Number of segments in the view.
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }
}

impl SeekableStream for StencilView {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.total || buf.is_empty() {
            return Ok(0);
        }
        let want = buf.len().min((self.total - offset) as usize);

        // First segment containing `offset`.
        let mut idx = match self.starts.binary_search(&offset) {
            Ok(i) => i,
            Err(i) => i - 1,
        };

        let mut done = 0usize;
        let mut pos = offset;
        while done < want && idx < self.segments.len() {
            let segment = self.segments[idx];
            let within = pos - self.starts[idx];
            let take = (want - done).min((segment.length - within) as usize);
            match segment.source {
                Some(source) => {
                    self.parent
                        .read_exact_at(source + within, &mut buf[done..done + take])?;
                }
                None => {
                    buf[done..done + take].fill(0);
                }
            }
            done += take;
            pos += take as u64;
            idx += 1;
        }
        Ok(done)
    }

    fn size(&self) -> u64 {
        self.total
    }
}
