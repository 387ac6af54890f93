//! The tar parser and indexer.
//!
//! Walks a tar byte stream sequentially, assembling entries out of header
//! blocks and their extension blocks (pax locals and globals, GNU long
//! names and link targets, GNU sparse maps in all three dialects, GNU
//! incremental dumpdirs), and writes the resulting rows into the SQLite
//! index in batches. The walk needs nothing from the stream but positioned
//! reads, so it runs unchanged on raw files and on decoded views of
//! compressed archives.
//!
//! Re-walking an archive that only grew is supported by starting at the
//! previously recorded terminator offset.

pub mod header;
pub mod pax;

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, warn};

use crate::index::{IndexedEntry, SqliteIndex};
use crate::options::{GnuIncremental, MountOptions};
use crate::paths;
use crate::source::{EntryKind, FileEntry, Locator, SparseMap};
use crate::stream::SeekableStream;
use crate::{Error, Result};

use header::{HeaderBlock, TypeFlag, BLOCK_SIZE};
use pax::PaxRecords;

/// Upper bound on extension payloads (pax records, long names, sparse maps)
/// read into memory during the walk.
const MAX_EXTENSION_SIZE: u64 = 1024 * 1024;

/// Entries sampled by the GNU-incremental auto-detection.
const INCREMENTAL_PROBE_ENTRIES: usize = 16;

/// Rows buffered before a batched index write.
const FLUSH_THRESHOLD: usize = 1000;

/// Outcome of one indexing walk.
#[derive(Debug, Clone)]
pub struct WalkOutcome {
    /// Entries written to the index, synthesized parents included.
    pub entries_indexed: u64,
    /// Offset of the archive terminator (or end of data); a later append
    /// walk starts here.
    pub parsed_until: u64,
    /// Whether GNU-incremental prefix stripping was in effect.
    pub is_incremental: bool,
}

/// Walks the archive from `start_offset` and writes entries to `index`.
pub fn index_archive(
    stream: &Arc<dyn SeekableStream>,
    options: &MountOptions,
    index: &SqliteIndex,
    start_offset: u64,
) -> Result<WalkOutcome> {
    let incremental = match options.gnu_incremental {
        GnuIncremental::On => true,
        GnuIncremental::Off => false,
        GnuIncremental::Auto => detect_incremental(stream)?,
    };
    if incremental {
        debug!("GNU-incremental prefix stripping active");
    }

    let mut walker = Walker {
        stream: Arc::clone(stream),
        options,
        index,
        incremental,
        globals: PaxRecords::default(),
        known_dirs: HashSet::from(["/".to_string()]),
        pending: Vec::new(),
        hardlinks: Vec::new(),
        entries_indexed: 0,
    };
    let parsed_until = walker.walk(start_offset)?;
    walker.flush()?;
    walker.verify_hardlinks()?;

    Ok(WalkOutcome {
        entries_indexed: walker.entries_indexed,
        parsed_until,
        is_incremental: incremental,
    })
}

struct Walker<'a> {
    stream: Arc<dyn SeekableStream>,
    options: &'a MountOptions,
    index: &'a SqliteIndex,
    incremental: bool,
    globals: PaxRecords,
    known_dirs: HashSet<String>,
    pending: Vec<IndexedEntry>,
    hardlinks: Vec<(String, String)>,
    entries_indexed: u64,
}

/// Extension state accumulated for the entry currently being assembled.
#[derive(Default)]
struct PendingExtensions {
    span_start: Option<u64>,
    local_records: Option<PaxRecords>,
    long_name: Option<Vec<u8>>,
    long_link: Option<Vec<u8>>,
}

impl Walker<'_> {
    fn walk(&mut self, start_offset: u64) -> Result<u64> {
        let size = self.stream.size();
        let mut offset = start_offset;
        let mut extensions = PendingExtensions::default();

        loop {
            if offset >= size {
                return Ok(size);
            }
            if size - offset < BLOCK_SIZE {
                // A tail shorter than a block is only acceptable as padding.
                let tail = self.stream.read_range(offset, BLOCK_SIZE as usize)?;
                if tail.iter().all(|&b| b == 0) {
                    return Ok(offset);
                }
                return Err(Error::Truncated {
                    offset,
                    expected: BLOCK_SIZE - (size - offset),
                });
            }

            let mut block = [0u8; BLOCK_SIZE as usize];
            self.stream.read_exact_at(offset, &mut block)?;

            if header::is_zero_block(&block) {
                if self.options.ignore_zeros {
                    offset += BLOCK_SIZE;
                    continue;
                }
                // Two consecutive zero blocks (or one at the very end)
                // terminate the archive.
                return Ok(offset);
            }

            let parsed = match header::parse_header(&block, offset) {
                Ok(parsed) => parsed,
                Err(e) if self.options.ignore_zeros => {
                    warn!("skipping corrupt tar header at offset {offset:#x}: {e}");
                    offset += BLOCK_SIZE;
                    continue;
                }
                Err(e) => return Err(e),
            };

            offset = self.consume(parsed, offset, &mut extensions)?;
        }
    }

    /// Handles one parsed header, returning the offset of the next header.
    fn consume(
        &mut self,
        parsed: HeaderBlock,
        offset: u64,
        extensions: &mut PendingExtensions,
    ) -> Result<u64> {
        let data_offset = offset + BLOCK_SIZE;
        let next_offset = data_offset + parsed.data_blocks() * BLOCK_SIZE;
        if next_offset > self.stream.size() {
            return Err(Error::Truncated {
                offset: data_offset,
                expected: next_offset - self.stream.size(),
            });
        }

        match parsed.type_flag {
            TypeFlag::PaxGlobal => {
                let data = self.read_extension(data_offset, parsed.size)?;
                self.globals.merge(&PaxRecords::parse(&data, offset)?);
            }
            TypeFlag::PaxLocal => {
                extensions.span_start.get_or_insert(offset);
                let data = self.read_extension(data_offset, parsed.size)?;
                let records = PaxRecords::parse(&data, offset)?;
                match &mut extensions.local_records {
                    Some(existing) => existing.merge(&records),
                    none => *none = Some(records),
                }
            }
            TypeFlag::GnuLongName => {
                extensions.span_start.get_or_insert(offset);
                let data = self.read_extension(data_offset, parsed.size)?;
                extensions.long_name = Some(trim_trailing_nuls(data));
            }
            TypeFlag::GnuLongLink => {
                extensions.span_start.get_or_insert(offset);
                let data = self.read_extension(data_offset, parsed.size)?;
                extensions.long_link = Some(trim_trailing_nuls(data));
            }
            TypeFlag::GnuVolumeLabel => {
                debug!("skipping volume label at offset {offset:#x}");
            }
            TypeFlag::Unknown(flag) => {
                warn!("skipping entry with unknown typeflag {flag:#x} at offset {offset:#x}");
                *extensions = PendingExtensions::default();
            }
            _ => {
                let taken = std::mem::take(extensions);
                return self.assemble(parsed, offset, taken);
            }
        }
        Ok(next_offset)
    }

    /// Builds the entry for a data-bearing header and returns the offset of
    /// the next header.
    fn assemble(
        &mut self,
        parsed: HeaderBlock,
        header_offset: u64,
        extensions: PendingExtensions,
    ) -> Result<u64> {
        let mut attributes = self.globals.clone();
        if let Some(local) = &extensions.local_records {
            attributes.merge(local);
        }

        let mut data_offset = header_offset + BLOCK_SIZE;
        let mut next_offset = data_offset + parsed.data_blocks() * BLOCK_SIZE;

        // Old-GNU sparse continuation blocks sit between header and data.
        let mut sparse = None;
        if parsed.type_flag == TypeFlag::GnuSparse {
            let mut regions = parsed.gnu_sparse.clone();
            let mut extended = parsed.gnu_sparse_extended;
            while extended {
                let mut block = [0u8; BLOCK_SIZE as usize];
                self.stream.read_exact_at(data_offset, &mut block)?;
                let (more, still_extended) =
                    header::parse_sparse_continuation(&block, data_offset)?;
                regions.extend(more);
                extended = still_extended;
                data_offset += BLOCK_SIZE;
                next_offset += BLOCK_SIZE;
            }
            sparse = Some(SparseMap {
                regions,
                total_size: parsed.gnu_sparse_realsize,
            });
        }

        // pax sparse: dialect 0.x in attributes, dialect 1.0 as data prefix.
        if sparse.is_none() {
            sparse = attributes.sparse_map_0_1(header_offset)?;
        }
        if sparse.is_none() && attributes.is_sparse_1_0() {
            let probe = self
                .stream
                .read_range(data_offset, MAX_EXTENSION_SIZE.min(parsed.size) as usize)?;
            let (mut map, consumed) = pax::parse_sparse_1_0_map(&probe, data_offset)?;
            // Trailing holes only show up in the realsize attribute.
            if let Some(real_size) = attributes.sparse_real_size() {
                map.total_size = map.total_size.max(real_size);
            }
            data_offset += consumed;
            sparse = Some(map);
        }

        // Name priority: sparse 1.0 real name, pax path, GNU long name,
        // header field.
        let raw_path = if let Some(name) = attributes.sparse_name() {
            name.to_string()
        } else if let Some(path) = attributes.path() {
            path.to_string()
        } else if let Some(long) = &extensions.long_name {
            self.options.encoding.decode(long)?
        } else {
            let mut name_bytes = parsed.name.clone();
            if self.incremental {
                name_bytes = strip_incremental_prefix(&name_bytes, &parsed.prefix);
            }
            self.options.encoding.decode(&name_bytes)?
        };
        let mut path = paths::normalize(&raw_path)?;
        if let Some(transform) = &self.options.transform {
            path = paths::normalize(&transform.apply(&path))?;
        }

        if path == "/" {
            // An explicit root entry (`./`) carries no new information.
            return Ok(next_offset);
        }

        let link_target = if let Some(link) = attributes.link_path() {
            link.to_string()
        } else if let Some(long) = &extensions.long_link {
            self.options.encoding.decode(long)?
        } else {
            self.options.encoding.decode(&parsed.link_name)?
        };

        let kind = match parsed.type_flag {
            TypeFlag::Directory | TypeFlag::GnuDumpDir => EntryKind::Directory,
            TypeFlag::SymLink => EntryKind::Symlink,
            TypeFlag::HardLink => EntryKind::Hardlink,
            TypeFlag::CharDevice => EntryKind::Char,
            TypeFlag::BlockDevice => EntryKind::Block,
            TypeFlag::Fifo => EntryKind::Fifo,
            _ => EntryKind::Regular,
        };

        let stored_size = match &sparse {
            Some(map) => map.stored_size(),
            None => attributes.size().unwrap_or(parsed.size),
        };
        let logical_size = match (&sparse, kind) {
            (Some(map), _) => map.total_size,
            (None, EntryKind::Regular) => stored_size,
            _ => 0,
        };

        let (parent, name) = paths::split(&path);
        self.synthesize_parents(&path)?;
        if kind == EntryKind::Directory {
            self.known_dirs.insert(path.clone());
        }
        if kind == EntryKind::Hardlink && !link_target.is_empty() {
            self.hardlinks
                .push((path.clone(), paths::normalize(&link_target)?));
        }

        let mut entry = FileEntry {
            parent: parent.to_string(),
            name: name.to_string(),
            version: 0, // assigned by the index
            kind,
            mode: parsed.mode,
            uid: attributes.uid().unwrap_or(parsed.uid),
            gid: attributes.gid().unwrap_or(parsed.gid),
            mtime: attributes.mtime().unwrap_or(parsed.mtime),
            size: logical_size,
            link_target,
            locator: Locator::Archive {
                offset: data_offset,
                stored_size,
                sparsity: sparse,
            },
            route: Vec::new(),
            xattrs: attributes
                .xattrs()
                .map(|(name, value)| (name.to_string(), value.as_bytes().to_vec()))
                .collect(),
            encrypted: false,
            mtime_absent: false,
        };
        if kind == EntryKind::Directory || kind == EntryKind::Hardlink {
            entry.locator = Locator::None;
        }

        self.push(IndexedEntry {
            entry,
            header_offset: Some(extensions.span_start.unwrap_or(header_offset)),
        })?;
        Ok(next_offset)
    }

    fn synthesize_parents(&mut self, path: &str) -> Result<()> {
        let missing: Vec<String> = paths::ancestors(path)
            .filter(|ancestor| !self.known_dirs.contains(*ancestor))
            .map(str::to_string)
            .collect();
        // Insert outermost first so listings always find a parent chain.
        for ancestor in missing.into_iter().rev() {
            let (parent, name) = paths::split(&ancestor);
            self.push(IndexedEntry {
                entry: FileEntry::directory(parent, name),
                header_offset: None,
            })?;
            self.known_dirs.insert(ancestor);
        }
        Ok(())
    }

    fn push(&mut self, row: IndexedEntry) -> Result<()> {
        self.pending.push(row);
        self.entries_indexed += 1;
        if self.pending.len() >= FLUSH_THRESHOLD {
            self.flush()?;
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            self.index.insert_indexed(&self.pending)?;
            self.pending.clear();
        }
        Ok(())
    }

    fn verify_hardlinks(&mut self) -> Result<()> {
        for (path, target) in &self.hardlinks {
            let (parent, name) = paths::split(target);
            if self.index.lookup(parent, name)?.is_none() {
                warn!("hardlink {path} points at missing target {target}");
            }
        }
        Ok(())
    }

    fn read_extension(&self, offset: u64, size: u64) -> Result<Vec<u8>> {
        if size > MAX_EXTENSION_SIZE {
            return Err(Error::tar_header(offset, "oversized extension payload"));
        }
        self.stream.read_range(offset, size as usize)
    }
}

fn trim_trailing_nuls(mut data: Vec<u8>) -> Vec<u8> {
    while data.last() == Some(&0) {
        data.pop();
    }
    data
}

/// Returns `true` if `field` looks like an octal epoch (the shape GNU
/// incremental archives leave in the ustar prefix field).
fn looks_like_octal_epoch(field: &[u8]) -> bool {
    field.len() >= 9 && field.iter().all(|&b| (b'0'..=b'7').contains(&b))
}

/// Strips an epoch-shaped prefix that the ustar join glued onto the name.
fn strip_incremental_prefix(name: &[u8], prefix: &[u8]) -> Vec<u8> {
    if looks_like_octal_epoch(prefix) && name.len() > prefix.len() {
        if let Some(rest) = name.strip_prefix(prefix) {
            if rest.first() == Some(&b'/') {
                return rest[1..].to_vec();
            }
        }
    }
    name.to_vec()
}

/// Samples leading entries to decide whether the archive is GNU-incremental.
fn detect_incremental(stream: &Arc<dyn SeekableStream>) -> Result<bool> {
    let size = stream.size();
    let mut offset = 0u64;
    for _ in 0..INCREMENTAL_PROBE_ENTRIES {
        if offset + BLOCK_SIZE > size {
            break;
        }
        let mut block = [0u8; BLOCK_SIZE as usize];
        stream.read_exact_at(offset, &mut block)?;
        if header::is_zero_block(&block) {
            break;
        }
        let Ok(parsed) = header::parse_header(&block, offset) else {
            break;
        };
        if parsed.type_flag == TypeFlag::GnuDumpDir || looks_like_octal_epoch(&parsed.prefix) {
            return Ok(true);
        }
        offset += BLOCK_SIZE + parsed.data_blocks() * BLOCK_SIZE;
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::MemoryStream;

    fn stream_of(data: Vec<u8>) -> Arc<dyn SeekableStream> {
        Arc::new(MemoryStream::new(data))
    }

    fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in entries {
            let mut tar_header = tar::Header::new_ustar();
            tar_header.set_size(data.len() as u64);
            tar_header.set_mode(0o644);
            tar_header.set_mtime(1_600_000_000);
            tar_header.set_cksum();
            builder
                .append_data(&mut tar_header, path, *data)
                .unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn index_bytes(data: Vec<u8>, options: &MountOptions) -> (SqliteIndex, WalkOutcome) {
        let index = SqliteIndex::create_in_memory().unwrap();
        let stream = stream_of(data);
        let outcome = index_archive(&stream, options, &index, 0).unwrap();
        (index, outcome)
    }

    #[test]
    fn test_simple_archive() {
        let data = build_tar(&[("bar", b"foo\n"), ("dir/baz", b"qux")]);
        let (index, outcome) = index_bytes(data, &MountOptions::default());

        let bar = index.lookup("/", "bar").unwrap().unwrap();
        assert_eq!(bar.size, 4);
        assert_eq!(bar.kind, EntryKind::Regular);
        assert_eq!(bar.mode, 0o644);
        assert_eq!(bar.mtime, 1_600_000_000);
        match bar.locator {
            Locator::Archive {
                offset,
                stored_size,
                ..
            } => {
                assert_eq!(offset, 512);
                assert_eq!(stored_size, 4);
            }
            other => panic!("unexpected locator {other:?}"),
        }

        // Implicit parent synthesized for dir/baz.
        let dir = index.lookup("/", "dir").unwrap().unwrap();
        assert_eq!(dir.kind, EntryKind::Directory);
        assert!(index.lookup("/dir", "baz").unwrap().is_some());
        assert_eq!(outcome.entries_indexed, 3);
    }

    #[test]
    fn test_parsed_until_points_at_terminator() {
        let data = build_tar(&[("a", b"1")]);
        let (_, outcome) = index_bytes(data, &MountOptions::default());
        // Header block + one data block.
        assert_eq!(outcome.parsed_until, 1024);
    }

    #[test]
    fn test_duplicate_paths_become_versions() {
        let data = build_tar(&[("same", b"v1"), ("same", b"v2!"), ("same", b"v3!!")]);
        let (index, _) = index_bytes(data, &MountOptions::default());
        assert_eq!(index.count_versions("/", "same").unwrap(), 3);
        let current = index.lookup("/", "same").unwrap().unwrap();
        assert_eq!(current.version, 3);
        assert_eq!(current.size, 4);
        assert_eq!(
            index.lookup_version("/", "same", 1).unwrap().unwrap().size,
            2
        );
    }

    #[test]
    fn test_long_gnu_names() {
        let long_name = format!("{}/file.txt", "very-long-directory-name".repeat(8));
        let data = build_tar(&[(long_name.as_str(), b"x")]);
        let (index, _) = index_bytes(data, &MountOptions::default());
        let normalized_long_name = paths::normalize(&long_name).unwrap();
        let (parent, name) = paths::split(&normalized_long_name);
        let entry = index.lookup(parent, name).unwrap().unwrap();
        assert_eq!(entry.size, 1);
    }

    #[test]
    fn test_symlink_and_hardlink() {
        let mut builder = tar::Builder::new(Vec::new());
        let mut tar_header = tar::Header::new_ustar();
        tar_header.set_size(4);
        tar_header.set_mode(0o644);
        tar_header.set_cksum();
        builder
            .append_data(&mut tar_header, "target", &b"data"[..])
            .unwrap();

        let mut link = tar::Header::new_ustar();
        link.set_entry_type(tar::EntryType::Symlink);
        link.set_size(0);
        link.set_cksum();
        builder
            .append_link(&mut link, "sym", "target")
            .unwrap();

        let mut hard = tar::Header::new_ustar();
        hard.set_entry_type(tar::EntryType::Link);
        hard.set_size(0);
        hard.set_cksum();
        builder
            .append_link(&mut hard, "hard", "target")
            .unwrap();

        let (index, _) = index_bytes(builder.into_inner().unwrap(), &MountOptions::default());

        let sym = index.lookup("/", "sym").unwrap().unwrap();
        assert_eq!(sym.kind, EntryKind::Symlink);
        assert_eq!(sym.link_target, "target");

        let hard = index.lookup("/", "hard").unwrap().unwrap();
        assert_eq!(hard.kind, EntryKind::Hardlink);
        assert_eq!(hard.link_target, "target");
    }

    #[test]
    fn test_path_traversal_rejected() {
        let mut block = header::tests::build_block("../escape", 0, b'0', b"ustar\000");
        let checksum: u64 = block
            .iter()
            .enumerate()
            .map(|(i, &b)| if (148..156).contains(&i) { b' ' as u64 } else { b as u64 })
            .sum();
        block[148..154].copy_from_slice(format!("{checksum:06o}").as_bytes());
        let mut data = block.to_vec();
        data.extend_from_slice(&[0u8; 1024]);

        let index = SqliteIndex::create_in_memory().unwrap();
        let err =
            index_archive(&stream_of(data), &MountOptions::default(), &index, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidPath { .. }));
    }

    #[test]
    fn test_truncated_archive() {
        let mut data = build_tar(&[("big", &[7u8; 5000])]);
        data.truncate(2000);
        let index = SqliteIndex::create_in_memory().unwrap();
        let err =
            index_archive(&stream_of(data), &MountOptions::default(), &index, 0).unwrap_err();
        assert!(matches!(err, Error::Truncated { .. }));
    }

    #[test]
    fn test_concatenated_archives_with_ignore_zeros() {
        let mut data = build_tar(&[("first", b"1")]);
        data.extend_from_slice(&build_tar(&[("second", b"2")]));

        // Default: parsing stops at the first terminator.
        let (index, _) = index_bytes(data.clone(), &MountOptions::default());
        assert!(index.lookup("/", "second").unwrap().is_none());

        // ignore_zeros discovers the second archive.
        let options = MountOptions::default().ignore_zeros(true);
        let (index, _) = index_bytes(data, &options);
        assert!(index.lookup("/", "first").unwrap().is_some());
        assert!(index.lookup("/", "second").unwrap().is_some());
    }

    #[test]
    fn test_append_reparses_only_the_tail() {
        let first = build_tar(&[("old", b"old")]);
        let (index, outcome) = index_bytes(first.clone(), &MountOptions::default());
        assert_eq!(outcome.entries_indexed, 1);

        // Simulate `tar --append`: new entries overwrite the terminator.
        let mut grown = first[..outcome.parsed_until as usize].to_vec();
        grown.extend_from_slice(&build_tar(&[("new", b"fresh")]));

        let outcome2 = index_archive(
            &stream_of(grown),
            &MountOptions::default(),
            &index,
            outcome.parsed_until,
        )
        .unwrap();
        assert_eq!(outcome2.entries_indexed, 1);
        assert!(index.lookup("/", "old").unwrap().is_some());
        assert!(index.lookup("/", "new").unwrap().is_some());
    }

    #[test]
    fn test_pax_long_path_and_mtime() {
        // The tar crate emits pax headers for GNU-incompatible values; craft
        // one manually to keep the dialect explicit.
        let mut builder = tar::Builder::new(Vec::new());
        let mut tar_header = tar::Header::new_ustar();
        tar_header.set_size(2);
        tar_header.set_mode(0o600);
        tar_header.set_cksum();
        builder
            .append_data(&mut tar_header, "short-name", &b"ok"[..])
            .unwrap();
        let plain = builder.into_inner().unwrap();

        // Prepend a pax local header overriding path and mtime.
        let pax_payload = {
            let mut payload = Vec::new();
            for (key, value) in [("path", "pax/override.txt"), ("mtime", "1234567890.5")] {
                let body_len = key.len() + value.len() + 2;
                let mut record_len = body_len + 1;
                while record_len.to_string().len() + 1 + body_len != record_len {
                    record_len = record_len.to_string().len() + 1 + body_len;
                }
                payload.extend_from_slice(format!("{record_len} {key}={value}\n").as_bytes());
            }
            payload
        };
        let mut pax_block = header::tests::build_block(
            "ignored-pax-name",
            pax_payload.len() as u64,
            b'x',
            b"ustar\000",
        );
        let checksum: u64 = pax_block
            .iter()
            .enumerate()
            .map(|(i, &b)| if (148..156).contains(&i) { b' ' as u64 } else { b as u64 })
            .sum();
        pax_block[148..154].copy_from_slice(format!("{checksum:06o}").as_bytes());

        let mut data = pax_block.to_vec();
        let mut padded = pax_payload.clone();
        padded.resize(padded.len().div_ceil(512) * 512, 0);
        data.extend_from_slice(&padded);
        data.extend_from_slice(&plain);

        let (index, _) = index_bytes(data, &MountOptions::default());
        let entry = index.lookup("/pax", "override.txt").unwrap().unwrap();
        assert_eq!(entry.size, 2);
        assert_eq!(entry.mtime, 1_234_567_890);
        assert!(index.lookup("/", "short-name").unwrap().is_none());
    }

    #[test]
    fn test_transform_rewrites_paths() {
        let options = MountOptions::default()
            .transform(crate::options::PathTransform::new("^/data/", "/").unwrap());
        let data = build_tar(&[("data/nested/file", b"zz")]);
        let (index, _) = index_bytes(data, &options);
        assert!(index.lookup("/nested", "file").unwrap().is_some());
        assert!(index.lookup("/data", "nested").unwrap().is_none());
    }

    #[test]
    fn test_incremental_prefix_stripping() {
        let epoch = b"14435456033";
        let mut block = header::tests::build_block("member.txt", 0, b'0', b"ustar\000");
        block[345..345 + epoch.len()].copy_from_slice(epoch);
        let checksum: u64 = block
            .iter()
            .enumerate()
            .map(|(i, &b)| if (148..156).contains(&i) { b' ' as u64 } else { b as u64 })
            .sum();
        block[148..154].copy_from_slice(format!("{checksum:06o}").as_bytes());
        let mut data = block.to_vec();
        data.extend_from_slice(&[0u8; 1024]);

        // Auto-detection notices the octal-epoch prefix and strips it.
        let (index, outcome) = index_bytes(data.clone(), &MountOptions::default());
        assert!(outcome.is_incremental);
        assert!(index.lookup("/", "member.txt").unwrap().is_some());

        // Forced off, the prefix joins like plain ustar.
        let options = MountOptions::default().gnu_incremental(GnuIncremental::Off);
        let (index, _) = index_bytes(data, &options);
        assert!(index
            .lookup("/14435456033", "member.txt")
            .unwrap()
            .is_some());
    }
}
