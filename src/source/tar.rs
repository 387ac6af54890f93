//! The tar-backed mount source.
//!
//! Opens a tar archive — raw or behind any supported codec — builds or
//! reuses its SQLite index, and serves lookups, listings, version history,
//! and member opens out of it. Member reads are byte-range views of the
//! (possibly decoded) archive stream: contiguous members become
//! [`SubStream`]s, sparse members become [`StencilView`]s, and nothing is
//! ever extracted.

use std::path::Path;
use std::sync::Arc;

use log::{debug, warn};

use crate::cache::EntryCache;
use crate::compress::{scan, Codec, DecodedStream};
use crate::index::{self, keys, Fingerprint, FingerprintStatus, SqliteIndex};
use crate::options::MountOptions;
use crate::paths;
use crate::source::{EntryKind, FileEntry, Locator, MountSource, StatFs};
use crate::stream::{FileStream, SeekableStream, StencilView, SubStream};
use crate::tar::{index_archive, WalkOutcome};
use crate::{Error, Result};

/// Version tag stored in indexes this backend creates.
const BACKEND_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum hardlink chain length followed by `open`.
const MAX_LINK_HOPS: usize = 40;

/// A tar archive presented as a mount source.
pub struct TarMountSource {
    /// The stream member offsets refer to: the raw file, or its decoded view.
    stream: Arc<dyn SeekableStream>,
    index: Arc<SqliteIndex>,
    cache: EntryCache,
}

impl TarMountSource {
    /// Opens a tar archive at `path`, reusing a cached index when it still
    /// matches the archive.
    pub fn open(path: &Path, options: &MountOptions) -> Result<Self> {
        options.validate()?;
        let file = FileStream::open(path)?;
        let mtime = std::fs::metadata(path)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64);
        let raw: Arc<dyn SeekableStream> = Arc::new(file);
        let fingerprint = Fingerprint::compute(&raw, mtime)?;
        let codec = sniff_codec(&raw)?;

        // Try to reuse a cached index before paying for a full walk.
        let index_path = index::resolve_index_path(path, options);
        if !options.recreate_index {
            if let Some(index_path) = index_path.as_deref().filter(|p| p.exists()) {
                match Self::reuse_index(index_path, &raw, codec, &fingerprint, options) {
                    Ok(source) => return Ok(source),
                    Err(e) if e.is_index_stale() => {
                        warn!(
                            "discarding unusable index {}: {e}",
                            index_path.display()
                        );
                    }
                    Err(e) => return Err(e),
                }
            }
        }

        Self::build(raw, codec, &fingerprint, index_path.as_deref(), options)
    }

    /// Opens a tar archive from an arbitrary seekable stream (nested
    /// mounts, remote objects). The index lives in memory.
    pub fn from_stream(
        raw: Arc<dyn SeekableStream>,
        options: &MountOptions,
    ) -> Result<Self> {
        let fingerprint = Fingerprint::compute(&raw, None)?;
        let codec = sniff_codec(&raw)?;
        Self::build(raw, codec, &fingerprint, None, options)
    }

    /// Attempts to serve from an existing index file: reused as-is on a
    /// fingerprint match, extended in place when an uncompressed archive
    /// only grew, rejected with a stale-index error otherwise.
    fn reuse_index(
        index_path: &Path,
        raw: &Arc<dyn SeekableStream>,
        codec: Option<Codec>,
        fingerprint: &Fingerprint,
        options: &MountOptions,
    ) -> Result<TarMountSource> {
        let stored = SqliteIndex::open_existing(index_path)?;
        if stored.get_metadata(keys::INDEX_COMPLETE)?.as_deref() != Some("1") {
            return Err(Error::IndexCorrupt("index is incomplete".into()));
        }
        match stored.validate_against(fingerprint, options)? {
            FingerprintStatus::Match => {
                debug!("reusing index {}", index_path.display());
                let stream = decoded_view(raw, codec, &stored, options)?;
                Ok(TarMountSource {
                    stream,
                    index: Arc::new(stored),
                    cache: EntryCache::new(options.entry_cache_size),
                })
            }
            FingerprintStatus::Grew if codec.is_none() => {
                let parsed_until: u64 = stored
                    .get_metadata(keys::PARSED_UNTIL)?
                    .and_then(|v| v.parse().ok())
                    .ok_or_else(|| Error::IndexCorrupt("missing parsed_until".into()))?;
                debug!("archive grew; appending to index from offset {parsed_until:#x}");
                let outcome = index_archive(raw, options, &stored, parsed_until)?;
                finish_index(&stored, fingerprint, options, &outcome, codec)?;
                Ok(TarMountSource {
                    stream: Arc::clone(raw),
                    index: Arc::new(stored),
                    cache: EntryCache::new(options.entry_cache_size),
                })
            }
            status => Err(Error::IndexFingerprintMismatch {
                reason: match status {
                    FingerprintStatus::Mismatch(reason) => reason,
                    _ => "compressed archive changed".to_string(),
                },
            }),
        }
    }

    /// Indexes the archive from scratch.
    fn build(
        raw: Arc<dyn SeekableStream>,
        codec: Option<Codec>,
        fingerprint: &Fingerprint,
        index_path: Option<&Path>,
        options: &MountOptions,
    ) -> Result<Self> {
        let mut index = match index_path {
            Some(path) => SqliteIndex::create_at(path)?,
            None => SqliteIndex::create_in_memory()?,
        };

        let stream = match codec {
            Some(codec) => {
                let scanned = scan(Arc::clone(&raw), codec, options.seek_point_spacing)?;
                index.store_checkpoints(codec.name(), &scanned.checkpoints)?;
                index.set_metadata(keys::CODEC, codec.name())?;
                index.set_metadata(
                    keys::UNCOMPRESSED_SIZE,
                    &scanned.uncompressed_size.to_string(),
                )?;
                Arc::new(DecodedStream::new(
                    Arc::clone(&raw),
                    codec,
                    scanned.checkpoints,
                    scanned.uncompressed_size,
                    options.cursor_pool_capacity,
                    options.parallelization.resolve(codec.name()),
                )) as Arc<dyn SeekableStream>
            }
            None => Arc::clone(&raw),
        };

        let outcome = index_archive(&stream, options, &index, 0)?;

        // Small archives stay in memory when a minimum count is configured.
        if options.index_minimum_file_count > 0
            && outcome.entries_indexed < options.index_minimum_file_count
        {
            if let Some(path) = index_path {
                debug!(
                    "only {} entries; keeping index in memory and removing {}",
                    outcome.entries_indexed,
                    path.display()
                );
                drop(index);
                let _ = std::fs::remove_file(path);
                for suffix in ["-wal", "-shm"] {
                    let _ = std::fs::remove_file(format!("{}{suffix}", path.display()));
                }
                index = SqliteIndex::create_in_memory()?;
                if let Some(codec) = codec {
                    // Rebuild cheap metadata for the in-memory copy.
                    index.set_metadata(keys::CODEC, codec.name())?;
                }
                index_archive(&stream, options, &index, 0)?;
            }
        }

        finish_index(&index, fingerprint, options, &outcome, codec)?;
        Ok(TarMountSource {
            stream,
            index: Arc::new(index),
            cache: EntryCache::new(options.entry_cache_size),
        })
    }

    /// The SQLite index backing this source.
    pub fn index(&self) -> &Arc<SqliteIndex> {
        &self.index
    }

    /// The (decoded) archive stream member locators refer to.
    pub fn archive_stream(&self) -> &Arc<dyn SeekableStream> {
        &self.stream
    }

    /// Offset one past the last indexed entry (the archive terminator).
    pub fn parsed_until(&self) -> Result<u64> {
        Ok(self
            .index
            .get_metadata(keys::PARSED_UNTIL)?
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| self.stream.size()))
    }

    fn open_resolved(&self, entry: &FileEntry, hops: usize) -> Result<Arc<dyn SeekableStream>> {
        if entry.kind == EntryKind::Hardlink {
            if hops >= MAX_LINK_HOPS {
                return Err(Error::invalid_path(format!(
                    "hardlink loop at {}",
                    entry.path()
                )));
            }
            let target = paths::normalize(&entry.link_target)?;
            let (parent, name) = paths::split(&target);
            let resolved = self
                .index
                .lookup(parent, name)?
                .ok_or_else(|| Error::not_found(&target))?;
            return self.open_resolved(&resolved, hops + 1);
        }

        match &entry.locator {
            Locator::Archive {
                offset,
                stored_size,
                sparsity,
            } => Ok(match sparsity {
                Some(map) => Arc::new(StencilView::from_segments(
                    Arc::clone(&self.stream),
                    map.to_segments(*offset),
                )),
                None => Arc::new(SubStream::new(
                    Arc::clone(&self.stream),
                    *offset,
                    *stored_size,
                )),
            }),
            // Symlinks read as their target path; directories as empty.
            _ => Ok(Arc::new(crate::stream::MemoryStream::new(
                entry.link_target.as_bytes().to_vec(),
            ))),
        }
    }
}

impl MountSource for TarMountSource {
    fn lookup(&self, path: &str) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        if path == "/" {
            return Ok(Some(FileEntry::root()));
        }
        if let Some(cached) = self.cache.get(&path) {
            return Ok(cached);
        }
        let (parent, name) = paths::split(&path);
        let entry = self.index.lookup(parent, name)?;
        self.cache.put(&path, entry.clone());
        Ok(entry)
    }

    fn list(&self, path: &str) -> Result<Option<Vec<(String, FileEntry)>>> {
        let path = paths::normalize(path)?;
        if path != "/" {
            match self.lookup(&path)? {
                Some(entry) if entry.is_dir() => {}
                _ => return Ok(None),
            }
        }
        Ok(Some(self.index.list(&path)?))
    }

    fn versions(&self, path: &str) -> Result<u64> {
        let path = paths::normalize(path)?;
        if path == "/" {
            return Ok(1);
        }
        let (parent, name) = paths::split(&path);
        self.index.count_versions(parent, name)
    }

    fn lookup_version(&self, path: &str, version: u64) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        let (parent, name) = paths::split(&path);
        self.index.lookup_version(parent, name, version)
    }

    fn open(&self, entry: &FileEntry) -> Result<Arc<dyn SeekableStream>> {
        self.open_resolved(entry, 0)
    }

    fn statfs(&self) -> StatFs {
        StatFs {
            block_size: 512,
            blocks: self.stream.size().div_ceil(512),
            files: self.index.file_count().unwrap_or(0),
            name_max: 255,
        }
    }

    fn exit(&self) -> Result<()> {
        self.cache.clear();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "tar"
    }
}

/// Writes the closing metadata of an indexing run.
fn finish_index(
    index: &SqliteIndex,
    fingerprint: &Fingerprint,
    options: &MountOptions,
    outcome: &WalkOutcome,
    codec: Option<Codec>,
) -> Result<()> {
    index.store_fingerprint(fingerprint)?;
    index.set_metadata(keys::BACKEND, "tar")?;
    index.set_metadata(keys::BACKEND_VERSION, BACKEND_VERSION)?;
    index.set_metadata(keys::ARG_HASH, &options.arg_hash().to_string())?;
    index.set_metadata(keys::PARSED_UNTIL, &outcome.parsed_until.to_string())?;
    index.set_metadata(
        keys::IS_GNU_INCREMENTAL,
        if outcome.is_incremental { "1" } else { "0" },
    )?;
    if let Some(codec) = codec {
        index.set_metadata(keys::CODEC, codec.name())?;
    }
    index.finalize()
}

/// Restores the decoded view of a compressed archive from a cached index.
fn decoded_view(
    raw: &Arc<dyn SeekableStream>,
    codec: Option<Codec>,
    index: &SqliteIndex,
    options: &MountOptions,
) -> Result<Arc<dyn SeekableStream>> {
    let Some(codec) = codec else {
        return Ok(Arc::clone(raw));
    };
    let checkpoints = index.load_checkpoints(codec.name())?;
    if checkpoints.is_empty() {
        return Err(Error::IndexCorrupt(format!(
            "index lacks {} checkpoints",
            codec.name()
        )));
    }
    let uncompressed_size: u64 = index
        .get_metadata(keys::UNCOMPRESSED_SIZE)?
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::IndexCorrupt("missing uncompressed_size".into()))?;
    Ok(Arc::new(DecodedStream::new(
        Arc::clone(raw),
        codec,
        checkpoints,
        uncompressed_size,
        options.cursor_pool_capacity,
        options.parallelization.resolve(codec.name()),
    )))
}

/// Sniffs a compression codec from the head of the stream.
fn sniff_codec(raw: &Arc<dyn SeekableStream>) -> Result<Option<Codec>> {
    let head = raw.read_range(0, 8)?;
    match Codec::sniff(&head) {
        Some(codec) if !codec.is_available() => Err(Error::dependency_missing(
            codec.name(),
            "codec feature disabled in this build",
        )),
        other => Ok(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::read_member;
    use std::io::Write;

    fn build_tar(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut builder = tar::Builder::new(Vec::new());
        for (path, data) in entries {
            let mut tar_header = tar::Header::new_ustar();
            tar_header.set_size(data.len() as u64);
            tar_header.set_mode(0o644);
            tar_header.set_mtime(1_600_000_000);
            tar_header.set_cksum();
            builder.append_data(&mut tar_header, path, *data).unwrap();
        }
        builder.into_inner().unwrap()
    }

    fn write_archive(dir: &Path, name: &str, bytes: &[u8]) -> std::path::PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }

    #[test]
    fn test_mount_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(
            dir.path(),
            "single-file.tar",
            &build_tar(&[("bar", b"foo\n")]),
        );
        let source = TarMountSource::open(&archive, &MountOptions::default()).unwrap();

        assert_eq!(read_member(&source, "/bar").unwrap(), b"foo\n");
        assert!(source.exists("/bar").unwrap());
        assert!(!source.exists("/baz").unwrap());
        assert_eq!(source.versions("/bar").unwrap(), 1);

        let listing = source.list("/").unwrap().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].0, "bar");

        // A sidecar index was written next to the archive.
        assert!(dir
            .path()
            .join(format!("single-file.tar{}", index::INDEX_SUFFIX))
            .exists());
    }

    #[test]
    fn test_index_reuse_and_recreate() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), "a.tar", &build_tar(&[("f", b"1st")]));
        drop(TarMountSource::open(&archive, &MountOptions::default()).unwrap());

        // Second open reuses the sidecar (observable: identical contents).
        let source = TarMountSource::open(&archive, &MountOptions::default()).unwrap();
        assert_eq!(read_member(&source, "/f").unwrap(), b"1st");
        drop(source);

        // Rewriting the archive with different contents forces a rebuild.
        std::fs::write(&archive, build_tar(&[("f", b"2nd")])).unwrap();
        let source = TarMountSource::open(&archive, &MountOptions::default()).unwrap();
        assert_eq!(read_member(&source, "/f").unwrap(), b"2nd");
    }

    #[test]
    fn test_append_only_growth_extends_index() {
        let dir = tempfile::tempdir().unwrap();
        let first = build_tar(&[("old", b"old")]);
        let archive = write_archive(dir.path(), "grow.tar", &first);
        let source = TarMountSource::open(&archive, &MountOptions::default()).unwrap();
        let parsed_until = source.parsed_until().unwrap();
        drop(source);

        let mut grown = first[..parsed_until as usize].to_vec();
        grown.extend_from_slice(&build_tar(&[("new", b"fresh")]));
        std::fs::write(&archive, &grown).unwrap();

        let source = TarMountSource::open(&archive, &MountOptions::default()).unwrap();
        assert_eq!(read_member(&source, "/old").unwrap(), b"old");
        assert_eq!(read_member(&source, "/new").unwrap(), b"fresh");
    }

    #[cfg(feature = "gzip")]
    #[test]
    fn test_compressed_archive_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let plain = build_tar(&[("data.bin", &[42u8; 5000]), ("hello", b"world\n")]);
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&plain).unwrap();
        let archive = write_archive(dir.path(), "c.tar.gz", &encoder.finish().unwrap());

        let source = TarMountSource::open(&archive, &MountOptions::default()).unwrap();
        assert_eq!(read_member(&source, "/hello").unwrap(), b"world\n");
        assert_eq!(read_member(&source, "/data.bin").unwrap(), vec![42u8; 5000]);
        drop(source);

        // Reopen reuses the checkpoint index from the sidecar.
        let source = TarMountSource::open(&archive, &MountOptions::default()).unwrap();
        assert_eq!(read_member(&source, "/hello").unwrap(), b"world\n");
    }

    #[test]
    fn test_versions_surface() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(
            dir.path(),
            "v.tar",
            &build_tar(&[("u", b"one"), ("u", b"two"), ("u", b"three")]),
        );
        let source = TarMountSource::open(&archive, &MountOptions::default()).unwrap();
        assert_eq!(source.versions("/u").unwrap(), 3);
        let current = source.lookup("/u").unwrap().unwrap();
        assert_eq!(current.version, 3);
        let v1 = source.lookup_version("/u", 1).unwrap().unwrap();
        assert_eq!(source.open(&v1).unwrap().read_all().unwrap(), b"one");
        assert_eq!(read_member(&source, "/u").unwrap(), b"three");
    }

    #[test]
    fn test_hardlink_resolution() {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        let mut tar_header = tar::Header::new_ustar();
        tar_header.set_size(5);
        tar_header.set_mode(0o644);
        tar_header.set_cksum();
        builder
            .append_data(&mut tar_header, "orig", &b"bytes"[..])
            .unwrap();
        let mut hard = tar::Header::new_ustar();
        hard.set_entry_type(tar::EntryType::Link);
        hard.set_size(0);
        hard.set_cksum();
        builder.append_link(&mut hard, "alias", "orig").unwrap();
        let archive = write_archive(dir.path(), "h.tar", &builder.into_inner().unwrap());

        let source = TarMountSource::open(&archive, &MountOptions::default()).unwrap();
        assert_eq!(read_member(&source, "/alias").unwrap(), b"bytes");
    }

    #[test]
    fn test_in_memory_below_minimum_count() {
        let dir = tempfile::tempdir().unwrap();
        let archive = write_archive(dir.path(), "tiny.tar", &build_tar(&[("one", b"1")]));
        let mut options = MountOptions::default();
        options.index_minimum_file_count = 100;
        let source = TarMountSource::open(&archive, &options).unwrap();
        assert_eq!(read_member(&source, "/one").unwrap(), b"1");
        assert!(!dir
            .path()
            .join(format!("tiny.tar{}", index::INDEX_SUFFIX))
            .exists());
    }

    #[test]
    fn test_seek_correctness_within_member() {
        let dir = tempfile::tempdir().unwrap();
        let payload: Vec<u8> = (0..40_000u32).map(|i| (i % 251) as u8).collect();
        let archive = write_archive(
            dir.path(),
            "s.tar",
            &build_tar(&[("blob", payload.as_slice())]),
        );
        let source = TarMountSource::open(&archive, &MountOptions::default()).unwrap();
        let entry = source.lookup("/blob").unwrap().unwrap();
        let stream = source.open(&entry).unwrap();
        assert_eq!(stream.size(), payload.len() as u64);
        for &(a, b) in &[(0usize, 10usize), (39_990, 40_000), (1_234, 20_000)] {
            assert_eq!(
                stream.read_range(a as u64, b - a).unwrap(),
                &payload[a..b],
                "range {a}..{b}"
            );
        }
    }
}
