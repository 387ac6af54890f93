//! Seekable byte-stream abstraction.
//!
//! Everything the mount-source layer reads comes through [`SeekableStream`]:
//! host files, in-memory buffers, byte ranges of other streams, stenciled
//! views of sparse members, and decoded views of compressed streams. The
//! contract is deliberately narrow — positioned reads and a total size — so
//! that container parsers never assume anything else about their input.
//!
//! [`StreamCursor`] adapts any stream to `std::io::Read + Seek` for consumers
//! that want a sequential reader (the codec layer, the ZIP walker).

pub mod stencil;

pub use stencil::StencilView;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use positioned_io::ReadAt;

use crate::{Error, Result};

/// A thread-safe random-access byte stream.
///
/// `read_at` must be safe to call concurrently; implementations either use
/// positioned reads (`pread`) or guard a shared cursor internally.
pub trait SeekableStream: Send + Sync {
    /// Reads up to `buf.len()` bytes starting at `offset`.
    ///
    /// Returns the number of bytes read; `0` only at or past end of stream.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize>;

    /// Total size of the stream in bytes.
    fn size(&self) -> u64;

    /// Reads exactly `buf.len()` bytes starting at `offset`.
    ///
    /// Fails with [`Error::Truncated`] if the stream ends early.
    fn read_exact_at(&self, offset: u64, buf: &mut [u8]) -> Result<()> {
        let mut done = 0;
        while done < buf.len() {
            let n = self.read_at(offset + done as u64, &mut buf[done..])?;
            if n == 0 {
                return Err(Error::Truncated {
                    offset: offset + done as u64,
                    expected: (buf.len() - done) as u64,
                });
            }
            done += n;
        }
        Ok(())
    }

    /// Reads `len` bytes starting at `offset` into a fresh buffer, clamped
    /// to the end of the stream.
    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let available = self.size().saturating_sub(offset);
        let len = len.min(available as usize);
        let mut buf = vec![0u8; len];
        self.read_exact_at(offset, &mut buf)?;
        Ok(buf)
    }

    /// Reads the entire stream into memory.
    fn read_all(&self) -> Result<Vec<u8>> {
        self.read_range(0, self.size() as usize)
    }
}

impl SeekableStream for Arc<dyn SeekableStream> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        (**self).read_at(offset, buf)
    }

    fn size(&self) -> u64 {
        (**self).size()
    }
}

/// A host file exposed as a seekable stream via positioned reads.
pub struct FileStream {
    file: File,
    size: u64,
}

impl FileStream {
    /// Opens a file for positioned reading.
    ///
    /// Non-regular files without a meaningful size (pipes, sockets) are
    /// refused with [`Error::NotSeekable`].
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(Error::NotSeekable(format!(
                "{} is not a regular file",
                path.display()
            )));
        }
        Ok(Self {
            size: metadata.len(),
            file,
        })
    }

    /// Wraps an already open file.
    pub fn from_file(file: File) -> Result<Self> {
        let size = file.metadata()?.len();
        Ok(Self { file, size })
    }
}

impl SeekableStream for FileStream {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.size {
            return Ok(0);
        }
        Ok(self.file.read_at(offset, buf)?)
    }

    fn size(&self) -> u64 {
        self.size
    }
}

/// An in-memory byte buffer exposed as a seekable stream.
pub struct MemoryStream {
    data: Arc<[u8]>,
}

impl MemoryStream {
    /// Wraps a byte buffer.
    pub fn new(data: impl Into<Arc<[u8]>>) -> Self {
        Self { data: data.into() }
    }
}

impl From<Vec<u8>> for MemoryStream {
    fn from(data: Vec<u8>) -> Self {
        Self::new(data)
    }
}

impl SeekableStream for MemoryStream {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.data.len() as u64 {
            return Ok(0);
        }
        let start = offset as usize;
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// A contiguous byte range of a parent stream.
pub struct SubStream {
    parent: Arc<dyn SeekableStream>,
    start: u64,
    length: u64,
}

impl SubStream {
    /// Creates a view of `parent[start .. start + length]`, clamped to the
    /// parent's size.
    pub fn new(parent: Arc<dyn SeekableStream>, start: u64, length: u64) -> Self {
        let end = start.saturating_add(length).min(parent.size());
        let start = start.min(parent.size());
        Self {
            parent,
            start,
            length: end - start,
        }
    }
}

impl SeekableStream for SubStream {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        if offset >= self.length {
            return Ok(0);
        }
        let n = buf.len().min((self.length - offset) as usize);
        self.parent.read_at(self.start + offset, &mut buf[..n])
    }

    fn size(&self) -> u64 {
        self.length
    }
}

/// Adapts a [`SeekableStream`] to `std::io::Read + Seek`.
///
/// Each cursor tracks its own position; any number of cursors can read the
/// same stream concurrently.
pub struct StreamCursor {
    stream: Arc<dyn SeekableStream>,
    pos: u64,
}

impl StreamCursor {
    /// Creates a cursor at offset zero.
    pub fn new(stream: Arc<dyn SeekableStream>) -> Self {
        Self { stream, pos: 0 }
    }

    /// Creates a cursor at the given offset.
    pub fn at(stream: Arc<dyn SeekableStream>, pos: u64) -> Self {
        Self { stream, pos }
    }

    /// Current byte position.
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// The underlying stream.
    pub fn stream(&self) -> &Arc<dyn SeekableStream> {
        &self.stream
    }
}

impl Read for StreamCursor {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self
            .stream
            .read_at(self.pos, buf)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e.to_string()))?;
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for StreamCursor {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let size = self.stream.size() as i64;
        let target = match pos {
            SeekFrom::Start(offset) => offset as i64,
            SeekFrom::End(delta) => size + delta,
            SeekFrom::Current(delta) => self.pos as i64 + delta,
        };
        if target < 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek before start of stream",
            ));
        }
        self.pos = target as u64;
        Ok(self.pos)
    }
}
