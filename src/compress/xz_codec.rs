//! xz stream decoding for the seekable decompressor.
//!
//! xz restart points are stream boundaries. Streams may be separated by
//! 4-byte-aligned null padding, which the scanner in the parent module
//! tolerates as trailing padding and the multi-stream decoder skips.

use std::io::{self, Read};

use crate::stream::StreamCursor;
use crate::Result;

use super::{map_decode_error, Codec, CountingReader, CountingSink};

/// Decodes one xz stream, returning its decompressed size.
pub(super) fn decode_unit(input: &mut CountingReader) -> Result<u64> {
    let start = input.position();
    let mut decoder = xz2::bufread::XzDecoder::new(input);
    let mut sink = CountingSink(0);
    io::copy(&mut decoder, &mut sink).map_err(|e| map_decode_error(Codec::Xz, start, e))?;
    Ok(sink.0)
}

/// Opens a decoder that reads forward across stream boundaries.
pub(super) fn open_from(cursor: StreamCursor) -> Result<Box<dyn Read + Send>> {
    Ok(Box::new(xz2::read::XzDecoder::new_multi_decoder(cursor)))
}
