//! bzip2 stream decoding for the seekable decompressor.
//!
//! bzip2 restart points are logical stream boundaries (`BZh` magic). Files
//! produced by `pbzip2` or concatenation carry many streams; `bzip2` output
//! is a single stream.

use std::io::{self, Read};

use crate::stream::StreamCursor;
use crate::Result;

use super::{map_decode_error, Codec, CountingReader, CountingSink};

/// Decodes one bzip2 stream, returning its decompressed size.
pub(super) fn decode_unit(input: &mut CountingReader) -> Result<u64> {
    let start = input.position();
    let mut decoder = bzip2::bufread::BzDecoder::new(input);
    let mut sink = CountingSink(0);
    io::copy(&mut decoder, &mut sink)
        .map_err(|e| map_decode_error(Codec::Bzip2, start, e))?;
    Ok(sink.0)
}

/// Opens a decoder that reads forward across stream boundaries.
pub(super) fn open_from(cursor: StreamCursor) -> Result<Box<dyn Read + Send>> {
    Ok(Box::new(bzip2::read::MultiBzDecoder::new(cursor)))
}
