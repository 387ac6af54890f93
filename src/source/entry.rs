//! Directory entry records and their locators.

use std::collections::BTreeMap;
use std::path::PathBuf;

use byteorder::{ByteOrder, LittleEndian};

use crate::paths;
use crate::stream::stencil::Segment;
use crate::{Error, Result};

/// The type of a directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryKind {
    /// Regular file.
    Regular,
    /// Directory.
    Directory,
    /// Symbolic link.
    Symlink,
    /// Hard link to another member of the same archive.
    Hardlink,
    /// Block device node.
    Block,
    /// Character device node.
    Char,
    /// Named pipe.
    Fifo,
    /// Unix domain socket.
    Socket,
}

impl EntryKind {
    /// Stable integer code stored in the index.
    pub fn code(&self) -> i64 {
        match self {
            EntryKind::Regular => 0,
            EntryKind::Directory => 1,
            EntryKind::Symlink => 2,
            EntryKind::Hardlink => 3,
            EntryKind::Block => 4,
            EntryKind::Char => 5,
            EntryKind::Fifo => 6,
            EntryKind::Socket => 7,
        }
    }

    /// Decodes an index code.
    pub fn from_code(code: i64) -> Result<Self> {
        Ok(match code {
            0 => EntryKind::Regular,
            1 => EntryKind::Directory,
            2 => EntryKind::Symlink,
            3 => EntryKind::Hardlink,
            4 => EntryKind::Block,
            5 => EntryKind::Char,
            6 => EntryKind::Fifo,
            7 => EntryKind::Socket,
            other => {
                return Err(Error::IndexCorrupt(format!("unknown entry kind {other}")));
            }
        })
    }

    /// POSIX file-type bits for this kind.
    ///
    /// Hardlinks report as regular files; the link relationship lives in
    /// the entry's `link_target`.
    pub fn mode_bits(&self) -> u32 {
        match self {
            EntryKind::Regular | EntryKind::Hardlink => 0o100000,
            EntryKind::Directory => 0o040000,
            EntryKind::Symlink => 0o120000,
            EntryKind::Block => 0o060000,
            EntryKind::Char => 0o020000,
            EntryKind::Fifo => 0o010000,
            EntryKind::Socket => 0o140000,
        }
    }
}

/// Data regions of a sparse member: `(logical_offset, length)` pairs over a
/// logical file of `total_size` bytes. Everything between regions is a hole.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SparseMap {
    /// Sorted, non-overlapping data regions.
    pub regions: Vec<(u64, u64)>,
    /// Logical (apparent) size of the member.
    pub total_size: u64,
}

impl SparseMap {
    /// Bytes actually stored in the archive for this member.
    pub fn stored_size(&self) -> u64 {
        self.regions.iter().map(|&(_, len)| len).sum()
    }

    /// Builds stencil segments over the stored bytes starting at
    /// `data_start` in the parent stream.
    pub fn to_segments(&self, data_start: u64) -> Vec<Segment> {
        let mut segments = Vec::with_capacity(self.regions.len() * 2 + 1);
        let mut logical = 0u64;
        let mut stored = data_start;
        for &(offset, length) in &self.regions {
            if offset > logical {
                segments.push(Segment::hole(offset - logical));
            }
            segments.push(Segment::data(stored, length));
            logical = offset + length;
            stored += length;
        }
        if self.total_size > logical {
            segments.push(Segment::hole(self.total_size - logical));
        }
        segments
    }

    /// Serializes the map for the index `sparsity` column.
    pub fn to_blob(&self) -> Vec<u8> {
        let mut blob = vec![0u8; 8 + 16 * self.regions.len() + 8];
        LittleEndian::write_u64(&mut blob[0..8], self.regions.len() as u64);
        let mut at = 8;
        for &(offset, length) in &self.regions {
            LittleEndian::write_u64(&mut blob[at..at + 8], offset);
            LittleEndian::write_u64(&mut blob[at + 8..at + 16], length);
            at += 16;
        }
        LittleEndian::write_u64(&mut blob[at..at + 8], self.total_size);
        blob
    }

    /// Deserializes a `sparsity` blob.
    pub fn from_blob(blob: &[u8]) -> Result<Self> {
        let corrupt = || Error::IndexCorrupt("malformed sparsity blob".into());
        if blob.len() < 16 {
            return Err(corrupt());
        }
        let count = LittleEndian::read_u64(&blob[0..8]) as usize;
        if blob.len() != 8 + 16 * count + 8 {
            return Err(corrupt());
        }
        let mut regions = Vec::with_capacity(count);
        let mut at = 8;
        for _ in 0..count {
            let offset = LittleEndian::read_u64(&blob[at..at + 8]);
            let length = LittleEndian::read_u64(&blob[at + 8..at + 16]);
            regions.push((offset, length));
            at += 16;
        }
        let total_size = LittleEndian::read_u64(&blob[at..at + 8]);
        Ok(Self {
            regions,
            total_size,
        })
    }
}

/// Where an entry's bytes live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Locator {
    /// No bytes (directories, fifos, synthesized entries).
    None,
    /// A byte range inside the (decompressed) archive stream.
    Archive {
        /// Offset of the member data in the archive stream.
        offset: u64,
        /// Bytes stored in the stream (differs from `size` for sparse
        /// members and compressed container entries).
        stored_size: u64,
        /// Sparse layout, if the member is sparse.
        sparsity: Option<SparseMap>,
    },
    /// A path on the host filesystem (folder and overlay sources).
    Host(PathBuf),
}

/// One resolved directory entry.
///
/// Immutable once materialized; composition layers stamp routing hints into
/// `route` on `lookup` and consume them again in `open`.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    /// Normalized parent directory path (`"/"` for top-level entries).
    pub parent: String,
    /// Entry name; empty only for the root directory.
    pub name: String,
    /// 1-based version; the highest version at a path is the current one.
    pub version: u64,
    /// Entry type.
    pub kind: EntryKind,
    /// Permission bits (no file-type bits).
    pub mode: u32,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Modification time, seconds since the epoch; may be negative.
    pub mtime: i64,
    /// Uncompressed size in bytes.
    pub size: u64,
    /// Symlink or hardlink target; empty otherwise.
    pub link_target: String,
    /// Where the bytes live.
    pub locator: Locator,
    /// Routing hints stamped by composition layers, outermost last.
    pub route: Vec<u32>,
    /// Extended attributes.
    pub xattrs: BTreeMap<String, Vec<u8>>,
    /// The member is encrypted; `open` needs a password.
    pub encrypted: bool,
    /// The container had no mtime for this member; zero was substituted.
    pub mtime_absent: bool,
}

impl FileEntry {
    /// Creates a regular-file entry with the given archive locator.
    pub fn regular(parent: &str, name: &str, size: u64) -> Self {
        Self {
            parent: parent.to_string(),
            name: name.to_string(),
            version: 1,
            kind: EntryKind::Regular,
            mode: 0o644,
            uid: 0,
            gid: 0,
            mtime: 0,
            size,
            link_target: String::new(),
            locator: Locator::None,
            route: Vec::new(),
            xattrs: BTreeMap::new(),
            encrypted: false,
            mtime_absent: false,
        }
    }

    /// Creates a directory entry with default permissions.
    ///
    /// Used when synthesizing parents the archive never recorded.
    pub fn directory(parent: &str, name: &str) -> Self {
        Self {
            kind: EntryKind::Directory,
            mode: 0o755,
            ..Self::regular(parent, name, 0)
        }
    }

    /// The root directory entry.
    pub fn root() -> Self {
        Self::directory("", "")
    }

    /// Full normalized path of this entry.
    pub fn path(&self) -> String {
        if self.name.is_empty() {
            "/".to_string()
        } else {
            paths::join(&self.parent, &self.name)
        }
    }

    /// Returns `true` for directory entries.
    pub fn is_dir(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    /// Returns `true` for symlink entries.
    pub fn is_symlink(&self) -> bool {
        self.kind == EntryKind::Symlink
    }

    /// Full POSIX mode: type bits plus permissions.
    pub fn full_mode(&self) -> u32 {
        self.kind.mode_bits() | (self.mode & 0o7777)
    }

    /// Stamps a composition layer's routing hint.
    pub fn route_push(&mut self, child: u32) {
        self.route.push(child);
    }

    /// Consumes the outermost routing hint.
    pub fn route_pop(&mut self) -> Option<u32> {
        self.route.pop()
    }
}

/// Filesystem statistics reported to the adapter above the crate.
#[derive(Debug, Clone, Copy)]
pub struct StatFs {
    /// Preferred I/O block size.
    pub block_size: u32,
    /// Total data blocks.
    pub blocks: u64,
    /// Total file nodes.
    pub files: u64,
    /// Maximum file name length.
    pub name_max: u32,
}

impl Default for StatFs {
    fn default() -> Self {
        Self {
            block_size: 512,
            blocks: 0,
            files: 0,
            name_max: 255,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_kind_codes_roundtrip() {
        for kind in [
            EntryKind::Regular,
            EntryKind::Directory,
            EntryKind::Symlink,
            EntryKind::Hardlink,
            EntryKind::Block,
            EntryKind::Char,
            EntryKind::Fifo,
            EntryKind::Socket,
        ] {
            assert_eq!(EntryKind::from_code(kind.code()).unwrap(), kind);
        }
        assert!(EntryKind::from_code(42).is_err());
    }

    #[test]
    fn test_full_mode() {
        let mut entry = FileEntry::regular("/", "f", 0);
        entry.mode = 0o640;
        assert_eq!(entry.full_mode(), 0o100640);

        let dir = FileEntry::directory("/", "d");
        assert_eq!(dir.full_mode(), 0o040755);
    }

    #[test]
    fn test_entry_path() {
        assert_eq!(FileEntry::regular("/", "a", 0).path(), "/a");
        assert_eq!(FileEntry::regular("/x/y", "z", 0).path(), "/x/y/z");
        assert_eq!(FileEntry::root().path(), "/");
    }

    #[test]
    fn test_route_stack() {
        let mut entry = FileEntry::regular("/", "f", 0);
        entry.route_push(2);
        entry.route_push(7);
        assert_eq!(entry.route_pop(), Some(7));
        assert_eq!(entry.route_pop(), Some(2));
        assert_eq!(entry.route_pop(), None);
    }

    #[test]
    fn test_sparse_map_blob_roundtrip() {
        let map = SparseMap {
            regions: vec![(0, 100), (4096, 50)],
            total_size: 8192,
        };
        let restored = SparseMap::from_blob(&map.to_blob()).unwrap();
        assert_eq!(restored, map);
        assert_eq!(restored.stored_size(), 150);

        assert!(SparseMap::from_blob(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_sparse_map_segments() {
        let map = SparseMap {
            regions: vec![(10, 5), (20, 5)],
            total_size: 30,
        };
        let segments = map.to_segments(1000);
        assert_eq!(
            segments,
            vec![
                Segment::hole(10),
                Segment::data(1000, 5),
                Segment::hole(5),
                Segment::data(1005, 5),
                Segment::hole(5),
            ]
        );
    }

    #[test]
    fn test_sparse_map_leading_data_region() {
        let map = SparseMap {
            regions: vec![(0, 8)],
            total_size: 8,
        };
        assert_eq!(map.to_segments(64), vec![Segment::data(64, 8)]);
    }
}
