//! Zstandard frame decoding for the seekable decompressor.
//!
//! zstd restart points are frame boundaries. The seekable-format convention
//! of many small frames (as produced by `zstd --seekable` or `t2sz`) gives
//! dense checkpoints; a single-frame file degrades to one checkpoint.
//! Skippable frames (such as a trailing seek table) are consumed without
//! producing output or checkpoints.

use std::io::{self, Read};

use byteorder::{ByteOrder, LittleEndian};

use crate::stream::StreamCursor;
use crate::{Error, Result};

use super::{map_decode_error, Codec, CountingReader, CountingSink};

/// Skippable frame magics span 0x184D2A50..=0x184D2A5F.
fn is_skippable_magic(head: &[u8]) -> bool {
    head.len() >= 4
        && head[1] == 0x2A
        && head[2] == 0x4D
        && head[3] == 0x18
        && (0x50..=0x5F).contains(&head[0])
}

/// Decodes one zstd frame, returning its decompressed size.
///
/// Skippable frames are consumed and report zero output.
pub(super) fn decode_unit(input: &mut CountingReader) -> Result<u64> {
    let start = input.position();
    let head = input.peek(8)?.to_vec();
    if is_skippable_magic(&head) {
        if head.len() < 8 {
            return Err(Error::Truncated {
                offset: start,
                expected: 8 - head.len() as u64,
            });
        }
        let payload = LittleEndian::read_u32(&head[4..8]) as u64;
        let mut remaining = 8 + payload;
        let mut scratch = [0u8; 4096];
        while remaining > 0 {
            let take = (remaining as usize).min(scratch.len());
            let n = input.read(&mut scratch[..take]).map_err(Error::Io)?;
            if n == 0 {
                return Err(Error::Truncated {
                    offset: input.position(),
                    expected: remaining,
                });
            }
            remaining -= n as u64;
        }
        return Ok(0);
    }

    let mut decoder = zstd::stream::read::Decoder::with_buffer(&mut *input)
        .map_err(|e| map_decode_error(Codec::Zstd, start, e))?
        .single_frame();
    let mut sink = CountingSink(0);
    io::copy(&mut decoder, &mut sink)
        .map_err(|e| map_decode_error(Codec::Zstd, start, e))?;
    Ok(sink.0)
}

/// Opens a decoder that reads forward across frame boundaries.
pub(super) fn open_from(cursor: StreamCursor) -> Result<Box<dyn Read + Send>> {
    let decoder = zstd::stream::read::Decoder::new(cursor)
        .map_err(|e| Error::decoder(Codec::Zstd.name(), 0, e.to_string()))?;
    Ok(Box::new(decoder))
}
