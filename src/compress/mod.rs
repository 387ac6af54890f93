//! Seekable decompression over compressed byte streams.
//!
//! A compressed stream supports random access only at *restartable*
//! positions: gzip member boundaries, bzip2 and xz stream boundaries, zstd
//! frame boundaries. [`scan`] decodes a stream once, records a
//! [`Checkpoint`] at each restartable boundary (thinned to the configured
//! spacing), and measures the total decompressed size. [`CodecReader`] then
//! serves positioned reads by restarting at the greatest checkpoint at or
//! before the target and decompressing forward; [`DecodedStream`] multiplexes
//! a pool of such readers behind the [`SeekableStream`] contract so container
//! parsers can run unchanged on top of compressed archives.
//!
//! A monolithic single-member stream gets exactly one checkpoint at offset
//! zero; seeking then degrades to decompress-from-start, which still honors
//! the seek-cost contract with a checkpoint count of one.

#[cfg(feature = "bzip2")]
mod bzip2_codec;
#[cfg(feature = "gzip")]
mod gzip_codec;
#[cfg(feature = "xz")]
mod xz_codec;
#[cfg(feature = "zstd")]
mod zstd_codec;

use std::io::{self, BufRead, Read};
use std::sync::Arc;

use crate::cache::CursorPool;
use crate::stream::{SeekableStream, StreamCursor};
use crate::{Error, Result};

/// Buffer size for skip-ahead and scan reads.
const SCAN_BUFFER_SIZE: usize = 64 * 1024;

/// Supported compression codecs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Codec {
    /// gzip (RFC 1952), possibly multi-member.
    Gzip,
    /// bzip2, possibly multi-stream.
    Bzip2,
    /// xz, possibly multi-stream.
    Xz,
    /// Zstandard, possibly multi-frame.
    Zstd,
}

impl Codec {
    /// All codecs in detection order.
    pub const ALL: &'static [Codec] = &[Codec::Gzip, Codec::Bzip2, Codec::Xz, Codec::Zstd];

    /// Returns the codec name as stored in the index.
    pub fn name(&self) -> &'static str {
        match self {
            Codec::Gzip => "gzip",
            Codec::Bzip2 => "bzip2",
            Codec::Xz => "xz",
            Codec::Zstd => "zstd",
        }
    }

    /// Looks a codec up by its index name.
    pub fn from_name(name: &str) -> Option<Codec> {
        match name {
            "gzip" => Some(Codec::Gzip),
            "bzip2" => Some(Codec::Bzip2),
            "xz" => Some(Codec::Xz),
            "zstd" => Some(Codec::Zstd),
            _ => None,
        }
    }

    /// Sniffs the codec from the first bytes of a stream.
    pub fn sniff(head: &[u8]) -> Option<Codec> {
        const XZ_MAGIC: &[u8] = &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
        const ZSTD_MAGIC: &[u8] = &[0x28, 0xB5, 0x2F, 0xFD];
        if head.starts_with(&[0x1F, 0x8B]) {
            Some(Codec::Gzip)
        } else if head.starts_with(b"BZh") {
            Some(Codec::Bzip2)
        } else if head.starts_with(XZ_MAGIC) {
            Some(Codec::Xz)
        } else if head.starts_with(ZSTD_MAGIC) {
            Some(Codec::Zstd)
        } else {
            None
        }
    }

    /// Detects the codec from a file extension.
    pub fn from_extension(extension: &str) -> Option<Codec> {
        match extension.to_ascii_lowercase().as_str() {
            "gz" | "gzip" | "tgz" => Some(Codec::Gzip),
            "bz2" | "bzip2" | "tbz2" => Some(Codec::Bzip2),
            "xz" | "txz" => Some(Codec::Xz),
            "zst" | "zstd" | "tzst" => Some(Codec::Zstd),
            _ => None,
        }
    }

    /// Returns `true` if support for this codec is compiled in.
    pub fn is_available(&self) -> bool {
        match self {
            Codec::Gzip => cfg!(feature = "gzip"),
            Codec::Bzip2 => cfg!(feature = "bzip2"),
            Codec::Xz => cfg!(feature = "xz"),
            Codec::Zstd => cfg!(feature = "zstd"),
        }
    }

    /// Checks whether `head` starts a restartable unit of this codec.
    fn is_unit_start(&self, head: &[u8]) -> bool {
        match self {
            Codec::Gzip => head.starts_with(&[0x1F, 0x8B]),
            Codec::Bzip2 => head.starts_with(b"BZh"),
            Codec::Xz => head.starts_with(&[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00]),
            // Standard frame or a skippable frame.
            Codec::Zstd => {
                head.starts_with(&[0x28, 0xB5, 0x2F, 0xFD])
                    || (head.len() >= 4
                        && head[1] == 0x2A
                        && head[2] == 0x4D
                        && head[3] == 0x18
                        && (0x50..=0x5F).contains(&head[0]))
            }
        }
    }

    /// Decodes exactly one restartable unit from `input`, returning the
    /// number of decompressed bytes it produced.
    fn decode_unit(&self, input: &mut CountingReader) -> Result<u64> {
        match self {
            #[cfg(feature = "gzip")]
            Codec::Gzip => gzip_codec::decode_unit(input),
            #[cfg(feature = "bzip2")]
            Codec::Bzip2 => bzip2_codec::decode_unit(input),
            #[cfg(feature = "xz")]
            Codec::Xz => xz_codec::decode_unit(input),
            #[cfg(feature = "zstd")]
            Codec::Zstd => zstd_codec::decode_unit(input),
            #[allow(unreachable_patterns)]
            _ => Err(unavailable(*self)),
        }
    }

    /// Opens a forward decoder over `stream` starting at the restartable
    /// position `offset`. The decoder continues across unit boundaries.
    fn open_from(
        &self,
        stream: Arc<dyn SeekableStream>,
        offset: u64,
    ) -> Result<Box<dyn Read + Send>> {
        let cursor = StreamCursor::at(stream, offset);
        match self {
            #[cfg(feature = "gzip")]
            Codec::Gzip => gzip_codec::open_from(cursor),
            #[cfg(feature = "bzip2")]
            Codec::Bzip2 => bzip2_codec::open_from(cursor),
            #[cfg(feature = "xz")]
            Codec::Xz => xz_codec::open_from(cursor),
            #[cfg(feature = "zstd")]
            Codec::Zstd => zstd_codec::open_from(cursor),
            #[allow(unreachable_patterns)]
            _ => Err(unavailable(*self)),
        }
    }
}

fn unavailable(codec: Codec) -> Error {
    Error::dependency_missing(codec.name(), "codec feature disabled in this build")
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// A decoder state snapshot enabling resumption of decompression mid-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    /// Offset in the decompressed byte stream.
    pub uncompressed_offset: u64,
    /// Offset in the compressed byte stream where decoding can restart.
    pub compressed_offset: u64,
    /// Optional decoder dictionary state (e.g. the deflate sliding window)
    /// for codecs that can resume from it. Persisted alongside the offsets.
    pub window: Option<Vec<u8>>,
}

impl Checkpoint {
    /// A checkpoint without dictionary state.
    pub fn at(uncompressed_offset: u64, compressed_offset: u64) -> Self {
        Self {
            uncompressed_offset,
            compressed_offset,
            window: None,
        }
    }
}

/// A sorted sequence of checkpoints for one compressed stream.
#[derive(Debug, Clone, Default)]
pub struct CheckpointIndex {
    points: Vec<Checkpoint>,
}

impl CheckpointIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores an index from persisted checkpoints.
    ///
    /// Fails with [`Error::IndexCorrupt`] if the sequence is not strictly
    /// increasing in both offsets.
    pub fn import(points: Vec<Checkpoint>) -> Result<Self> {
        for pair in points.windows(2) {
            if pair[1].uncompressed_offset <= pair[0].uncompressed_offset
                || pair[1].compressed_offset <= pair[0].compressed_offset
            {
                return Err(Error::IndexCorrupt(
                    "checkpoint sequence not strictly increasing".into(),
                ));
            }
        }
        Ok(Self { points })
    }

    /// Appends a checkpoint; offsets must be increasing.
    pub fn push(&mut self, point: Checkpoint) {
        debug_assert!(
            self.points
                .last()
                .map(|last| point.uncompressed_offset > last.uncompressed_offset)
                .unwrap_or(true)
        );
        self.points.push(point);
    }

    /// The greatest checkpoint at or before `uncompressed_offset`, if any.
    pub fn best_for(&self, uncompressed_offset: u64) -> Option<&Checkpoint> {
        match self
            .points
            .binary_search_by_key(&uncompressed_offset, |p| p.uncompressed_offset)
        {
            Ok(i) => Some(&self.points[i]),
            Err(0) => None,
            Err(i) => Some(&self.points[i - 1]),
        }
    }

    /// Number of checkpoints.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Returns `true` if the index holds no checkpoints.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Exports the checkpoint sequence for persistence.
    pub fn export(&self) -> &[Checkpoint] {
        &self.points
    }

    /// Keeps the first checkpoint and every later one at least `spacing`
    /// decompressed bytes after the previously kept checkpoint.
    pub fn thin(self, spacing: u64) -> Self {
        let mut kept: Vec<Checkpoint> = Vec::new();
        for point in self.points {
            match kept.last() {
                Some(last) if point.uncompressed_offset - last.uncompressed_offset < spacing => {}
                _ => kept.push(point),
            }
        }
        Self { points: kept }
    }
}

/// A buffered reader over a [`SeekableStream`] that tracks the absolute
/// offset of the next unconsumed byte.
///
/// The codec scanners rely on this: a `BufRead`-based decoder consumes
/// exactly the bytes of one unit, so after it finishes, [`position`] is the
/// start of the next unit.
///
/// [`position`]: CountingReader::position
pub struct CountingReader {
    stream: Arc<dyn SeekableStream>,
    buf: Vec<u8>,
    /// Absolute stream offset of `buf[0]`.
    buf_offset: u64,
    buf_len: usize,
    buf_pos: usize,
}

impl CountingReader {
    /// Creates a reader positioned at offset zero.
    pub fn new(stream: Arc<dyn SeekableStream>) -> Self {
        Self {
            stream,
            buf: vec![0u8; SCAN_BUFFER_SIZE],
            buf_offset: 0,
            buf_len: 0,
            buf_pos: 0,
        }
    }

    /// Absolute offset of the next unconsumed byte.
    pub fn position(&self) -> u64 {
        self.buf_offset + self.buf_pos as u64
    }

    /// Peeks at the next unconsumed bytes without consuming them.
    pub fn peek(&mut self, want: usize) -> io::Result<&[u8]> {
        if self.buf_pos + want > self.buf_len {
            // Refill from the current position so the window is contiguous.
            let pos = self.position();
            let n = self
                .stream
                .read_at(pos, &mut self.buf)
                .map_err(to_io_error)?;
            self.buf_offset = pos;
            self.buf_pos = 0;
            self.buf_len = n;
        }
        let end = (self.buf_pos + want).min(self.buf_len);
        Ok(&self.buf[self.buf_pos..end])
    }

    /// Returns `true` if every byte from the current position to the end of
    /// the stream is zero (trailing padding).
    pub fn rest_is_zero_padding(&mut self) -> io::Result<bool> {
        let mut pos = self.position();
        let size = self.stream.size();
        let mut probe = [0u8; 4096];
        while pos < size {
            let n = self
                .stream
                .read_at(pos, &mut probe)
                .map_err(to_io_error)?;
            if n == 0 {
                break;
            }
            if probe[..n].iter().any(|&b| b != 0) {
                return Ok(false);
            }
            pos += n as u64;
        }
        Ok(true)
    }
}

fn to_io_error(e: Error) -> io::Error {
    io::Error::new(io::ErrorKind::Other, e.to_string())
}

impl Read for CountingReader {
    fn read(&mut self, out: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(out.len());
        out[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl BufRead for CountingReader {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if self.buf_pos >= self.buf_len {
            let pos = self.position();
            let n = self
                .stream
                .read_at(pos, &mut self.buf)
                .map_err(to_io_error)?;
            self.buf_offset = pos;
            self.buf_pos = 0;
            self.buf_len = n;
        }
        Ok(&self.buf[self.buf_pos..self.buf_len])
    }

    fn consume(&mut self, amount: usize) {
        self.buf_pos = (self.buf_pos + amount).min(self.buf_len);
    }
}

/// A `Write` sink that only counts bytes.
pub(crate) struct CountingSink(pub u64);

impl io::Write for CountingSink {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0 += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Result of a full first pass over a compressed stream.
#[derive(Debug, Clone)]
pub struct ScanResult {
    /// Checkpoints at restartable boundaries, thinned by spacing.
    pub checkpoints: CheckpointIndex,
    /// Total decompressed size of the stream.
    pub uncompressed_size: u64,
}

/// Decodes the whole stream once, recording restartable boundaries.
///
/// Boundaries closer than `spacing` decompressed bytes to the previously
/// recorded one are skipped (the first boundary is always kept). Trailing
/// zero padding after the last unit is tolerated; any other trailing bytes
/// fail with [`Error::DecoderError`].
pub fn scan(stream: Arc<dyn SeekableStream>, codec: Codec, spacing: u64) -> Result<ScanResult> {
    if !codec.is_available() {
        return Err(unavailable(codec));
    }
    let mut input = CountingReader::new(Arc::clone(&stream));
    let mut checkpoints = CheckpointIndex::new();
    let mut uncompressed = 0u64;
    let mut last_kept: Option<u64> = None;

    loop {
        let unit_start = input.position();
        if unit_start >= stream.size() {
            break;
        }
        let head = input.peek(6)?.to_vec();
        if head.is_empty() {
            break;
        }
        if !codec.is_unit_start(&head) {
            if input.rest_is_zero_padding()? {
                break;
            }
            return Err(Error::decoder(
                codec.name(),
                unit_start,
                "garbage between compressed units",
            ));
        }

        let keep = match last_kept {
            None => true,
            Some(last) => uncompressed - last >= spacing,
        };
        let produced = codec.decode_unit(&mut input)?;
        if produced > 0 && keep {
            checkpoints.push(Checkpoint::at(uncompressed, unit_start));
            last_kept = Some(uncompressed);
        }
        uncompressed += produced;
    }

    if checkpoints.is_empty() && uncompressed == 0 {
        return Err(Error::decoder(codec.name(), 0, "empty compressed stream"));
    }
    Ok(ScanResult {
        checkpoints,
        uncompressed_size: uncompressed,
    })
}

/// A positioned reader over the decompressed view of a compressed stream.
///
/// Seeking restarts decoding at the greatest checkpoint at or before the
/// target; forward seeks within the current decoder just skip ahead.
pub struct CodecReader {
    stream: Arc<dyn SeekableStream>,
    codec: Codec,
    checkpoints: Arc<CheckpointIndex>,
    uncompressed_size: u64,
    decoder: Option<Box<dyn Read + Send>>,
    /// Decompressed offset of the next byte `read` returns.
    pos: u64,
}

impl CodecReader {
    /// Creates a reader positioned at decompressed offset zero.
    pub fn new(
        stream: Arc<dyn SeekableStream>,
        codec: Codec,
        checkpoints: Arc<CheckpointIndex>,
        uncompressed_size: u64,
    ) -> Self {
        Self {
            stream,
            codec,
            checkpoints,
            uncompressed_size,
            decoder: None,
            pos: 0,
        }
    }

    /// Current decompressed position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// Total decompressed size.
    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }

    /// Moves the read position to `target`.
    pub fn seek(&mut self, target: u64) -> Result<()> {
        let best = self
            .checkpoints
            .best_for(target)
            .map(|point| point.uncompressed_offset)
            .unwrap_or(0);
        // Keep decoding forward only when no checkpoint gets closer.
        if self.decoder.is_some() && target >= self.pos && self.pos >= best {
            return self.skip_to(target);
        }
        let point = self
            .checkpoints
            .best_for(target)
            .cloned()
            .unwrap_or_else(|| Checkpoint::at(0, 0));
        self.decoder = Some(
            self.codec
                .open_from(Arc::clone(&self.stream), point.compressed_offset)?,
        );
        self.pos = point.uncompressed_offset;
        self.skip_to(target)
    }

    fn skip_to(&mut self, target: u64) -> Result<()> {
        let mut scratch = [0u8; SCAN_BUFFER_SIZE];
        while self.pos < target {
            let take = ((target - self.pos) as usize).min(scratch.len());
            let n = self.read(&mut scratch[..take])?;
            if n == 0 {
                return Err(Error::Truncated {
                    offset: self.pos,
                    expected: target - self.pos,
                });
            }
        }
        Ok(())
    }

    /// Reads at the current position, advancing it.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        if self.decoder.is_none() {
            self.seek(self.pos)?;
        }
        let decoder = self.decoder.as_mut().expect("decoder just installed");
        match decoder.read(buf) {
            Ok(n) => {
                self.pos += n as u64;
                Ok(n)
            }
            Err(e) => Err(map_decode_error(self.codec, self.pos, e)),
        }
    }
}

/// Maps a codec `io::Error` to the crate error vocabulary.
pub(crate) fn map_decode_error(codec: Codec, offset: u64, e: io::Error) -> Error {
    let text = e.to_string();
    if e.kind() == io::ErrorKind::UnexpectedEof {
        Error::Truncated {
            offset,
            expected: 1,
        }
    } else if text.to_ascii_lowercase().contains("crc")
        || text.to_ascii_lowercase().contains("checksum")
    {
        Error::ChecksumMismatch {
            context: format!("{codec} stream at offset {offset:#x}"),
        }
    } else {
        Error::decoder(codec.name(), offset, text)
    }
}

/// Decompresses up to `len` leading bytes of a stream without building a
/// checkpoint index first (format sniffing inside compressed files).
pub fn peek_decompressed(
    stream: &Arc<dyn SeekableStream>,
    codec: Codec,
    len: usize,
) -> Result<Vec<u8>> {
    let mut reader = CodecReader::new(
        Arc::clone(stream),
        codec,
        Arc::new(CheckpointIndex::new()),
        u64::MAX,
    );
    let mut buf = vec![0u8; len];
    let mut done = 0;
    while done < len {
        let n = reader.read(&mut buf[done..])?;
        if n == 0 {
            break;
        }
        done += n;
    }
    buf.truncate(done);
    Ok(buf)
}

/// The decompressed view of a compressed stream, multiplexing a pool of
/// warm [`CodecReader`] cursors behind the [`SeekableStream`] contract.
pub struct DecodedStream {
    stream: Arc<dyn SeekableStream>,
    codec: Codec,
    checkpoints: Arc<CheckpointIndex>,
    uncompressed_size: u64,
    pool: CursorPool<CodecReader>,
    /// Reads larger than this fan out across cursors when `parallel` is on.
    fanout_threshold: usize,
    parallelism: usize,
}

impl DecodedStream {
    /// Creates a decoded view from scan results.
    pub fn new(
        stream: Arc<dyn SeekableStream>,
        codec: Codec,
        checkpoints: CheckpointIndex,
        uncompressed_size: u64,
        pool_capacity: usize,
        parallelism: usize,
    ) -> Self {
        Self {
            stream,
            codec,
            checkpoints: Arc::new(checkpoints),
            uncompressed_size,
            pool: CursorPool::new(pool_capacity.max(1)),
            fanout_threshold: 4 * 1024 * 1024,
            parallelism: parallelism.max(1),
        }
    }

    /// Runs the first pass and builds the decoded view in one step.
    pub fn open(
        stream: Arc<dyn SeekableStream>,
        codec: Codec,
        spacing: u64,
        pool_capacity: usize,
        parallelism: usize,
    ) -> Result<Self> {
        let scanned = scan(Arc::clone(&stream), codec, spacing)?;
        Ok(Self::new(
            stream,
            codec,
            scanned.checkpoints,
            scanned.uncompressed_size,
            pool_capacity,
            parallelism,
        ))
    }

    /// The codec of the underlying stream.
    pub fn codec(&self) -> Codec {
        self.codec
    }

    /// The checkpoint index backing seeks.
    pub fn checkpoints(&self) -> &CheckpointIndex {
        &self.checkpoints
    }

    /// Pool hit/miss statistics.
    pub fn pool_stats(&self) -> crate::cache::PoolStats {
        self.pool.stats()
    }

    fn read_at_with_cursor(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let mut cursor = self
            .pool
            .acquire(offset, |reader: &CodecReader| reader.position())
            .unwrap_or_else(|| {
                CodecReader::new(
                    Arc::clone(&self.stream),
                    self.codec,
                    Arc::clone(&self.checkpoints),
                    self.uncompressed_size,
                )
            });
        let result = (|| {
            cursor.seek(offset)?;
            let mut done = 0;
            while done < buf.len() {
                let n = cursor.read(&mut buf[done..])?;
                if n == 0 {
                    break;
                }
                done += n;
            }
            Ok(done)
        })();
        if result.is_ok() {
            self.pool.release(cursor);
        }
        result
    }
}

impl SeekableStream for DecodedStream {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.uncompressed_size {
            return Ok(0);
        }
        let want = buf.len().min((self.uncompressed_size - offset) as usize);
        let buf = &mut buf[..want];

        #[cfg(feature = "parallel")]
        if self.parallelism > 1 && want > self.fanout_threshold {
            use rayon::prelude::*;
            let chunk = want.div_ceil(self.parallelism);
            return buf
                .par_chunks_mut(chunk)
                .enumerate()
                .map(|(i, slice)| {
                    self.read_at_with_cursor(offset + (i * chunk) as u64, slice)
                })
                .try_reduce(|| 0, |a, b| Ok(a + b));
        }

        self.read_at_with_cursor(offset, buf)
    }

    fn size(&self) -> u64 {
        self.uncompressed_size
    }
}
