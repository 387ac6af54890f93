//! gzip member decoding for the seekable decompressor.
//!
//! gzip restart points are member boundaries: each member carries its own
//! header, deflate stream, and CRC-32/ISIZE trailer, so a fresh decoder can
//! start at any member. Files written by `pigz`, `bgzip`, or plain
//! concatenation contain many members; a monolithic `gzip` file contains one.

use std::io::{self, Read};

use crate::stream::StreamCursor;
use crate::{Error, Result};

use super::{map_decode_error, Codec, CountingReader, CountingSink};

/// Decodes one gzip member, returning its decompressed size.
pub(super) fn decode_unit(input: &mut CountingReader) -> Result<u64> {
    let start = input.position();
    let mut decoder = flate2::bufread::GzDecoder::new(input);
    let mut sink = CountingSink(0);
    io::copy(&mut decoder, &mut sink)
        .map_err(|e| map_decode_error(Codec::Gzip, start, e))?;
    if decoder.header().is_none() {
        return Err(Error::decoder(Codec::Gzip.name(), start, "missing gzip header"));
    }
    Ok(sink.0)
}

/// Opens a decoder that reads forward across member boundaries.
pub(super) fn open_from(cursor: StreamCursor) -> Result<Box<dyn Read + Send>> {
    Ok(Box::new(flate2::read::MultiGzDecoder::new(cursor)))
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use crate::compress::{scan, Codec, CodecReader};
    use crate::stream::{MemoryStream, SeekableStream};

    fn gzip_member(data: &[u8]) -> Vec<u8> {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_scan_single_member() {
        let data = b"hello gzip world".repeat(100);
        let stream: Arc<dyn SeekableStream> =
            Arc::new(MemoryStream::new(gzip_member(&data)));
        let scanned = scan(stream, Codec::Gzip, 1024).unwrap();
        assert_eq!(scanned.uncompressed_size, data.len() as u64);
        assert_eq!(scanned.checkpoints.len(), 1);
        assert_eq!(scanned.checkpoints.export()[0].compressed_offset, 0);
    }

    #[test]
    fn test_scan_multi_member_records_boundaries() {
        let mut compressed = Vec::new();
        let mut total = 0u64;
        for i in 0..4 {
            let chunk = vec![b'a' + i; 3000];
            total += chunk.len() as u64;
            compressed.extend_from_slice(&gzip_member(&chunk));
        }
        let stream: Arc<dyn SeekableStream> = Arc::new(MemoryStream::new(compressed));
        let scanned = scan(stream, Codec::Gzip, 1).unwrap();
        assert_eq!(scanned.uncompressed_size, total);
        assert_eq!(scanned.checkpoints.len(), 4);
        let uncompressed: Vec<u64> = scanned
            .checkpoints
            .export()
            .iter()
            .map(|p| p.uncompressed_offset)
            .collect();
        assert_eq!(uncompressed, vec![0, 3000, 6000, 9000]);
    }

    #[test]
    fn test_seek_uses_checkpoints() {
        let mut compressed = Vec::new();
        let mut plain = Vec::new();
        for i in 0..4u8 {
            let chunk = vec![b'a' + i; 3000];
            plain.extend_from_slice(&chunk);
            compressed.extend_from_slice(&gzip_member(&chunk));
        }
        let stream: Arc<dyn SeekableStream> = Arc::new(MemoryStream::new(compressed));
        let scanned = scan(Arc::clone(&stream), Codec::Gzip, 1).unwrap();
        let mut reader = CodecReader::new(
            stream,
            Codec::Gzip,
            Arc::new(scanned.checkpoints),
            scanned.uncompressed_size,
        );

        // Jump into the third member, then back into the first.
        for &offset in &[7000u64, 100, 11999] {
            reader.seek(offset).unwrap();
            let mut buf = [0u8; 1];
            reader.read(&mut buf).unwrap();
            assert_eq!(buf[0], plain[offset as usize], "offset {offset}");
        }
    }

    #[test]
    fn test_garbage_after_member_rejected() {
        let mut compressed = gzip_member(b"data");
        compressed.extend_from_slice(b"TRAILING GARBAGE");
        let stream: Arc<dyn SeekableStream> = Arc::new(MemoryStream::new(compressed));
        assert!(scan(stream, Codec::Gzip, 1024).is_err());
    }

    #[test]
    fn test_trailing_zero_padding_tolerated() {
        let mut compressed = gzip_member(b"data");
        compressed.extend_from_slice(&[0u8; 512]);
        let stream: Arc<dyn SeekableStream> = Arc::new(MemoryStream::new(compressed));
        let scanned = scan(stream, Codec::Gzip, 1024).unwrap();
        assert_eq!(scanned.uncompressed_size, 4);
    }

    #[test]
    fn test_truncated_member() {
        let compressed = gzip_member(&b"some reasonably long content".repeat(50));
        let cut = &compressed[..compressed.len() / 2];
        let stream: Arc<dyn SeekableStream> =
            Arc::new(MemoryStream::new(cut.to_vec()));
        assert!(scan(stream, Codec::Gzip, 1024).is_err());
    }
}
