//! The ZIP mount source.
//!
//! The central directory is walked exactly once, through the `zip` crate,
//! into an in-memory SQLite index; after that, reads never go through the
//! crate's sequential reader. Stored members are served as direct byte
//! ranges of the archive; deflated members are inflated from their byte
//! range on open. Encrypted members list normally and fail at `open`.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use log::warn;

use crate::cache::EntryCache;
use crate::index::SqliteIndex;
use crate::options::MountOptions;
use crate::paths;
use crate::source::{EntryKind, FileEntry, Locator, MountSource, StatFs};
use crate::stream::{FileStream, MemoryStream, SeekableStream, StreamCursor, SubStream};
use crate::{Error, Result};

/// How a member's bytes are stored in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Storage {
    Stored,
    Deflated,
    Unsupported(u16),
}

/// Read-path facts the metadata index does not carry.
#[derive(Debug, Clone)]
struct MemberAccess {
    member_index: usize,
    storage: Storage,
    data_start: u64,
    compressed_size: u64,
    encrypted: bool,
}

/// A ZIP archive presented as a mount source.
pub struct ZipMountSource {
    stream: Arc<dyn SeekableStream>,
    index: SqliteIndex,
    /// Keyed by `(path, version)`; versions count duplicate names in
    /// central-directory order.
    access: HashMap<(String, u64), MemberAccess>,
    cache: EntryCache,
    password: Option<Vec<u8>>,
}

impl ZipMountSource {
    /// Opens a ZIP archive at `path`.
    pub fn open(path: &Path, options: &MountOptions) -> Result<Self> {
        let stream: Arc<dyn SeekableStream> = Arc::new(FileStream::open(path)?);
        Self::from_stream(stream, options)
    }

    /// Opens a ZIP archive from an arbitrary seekable stream.
    pub fn from_stream(
        stream: Arc<dyn SeekableStream>,
        options: &MountOptions,
    ) -> Result<Self> {
        let mut archive = zip::ZipArchive::new(StreamCursor::new(Arc::clone(&stream)))
            .map_err(zip_err)?;

        let index = SqliteIndex::create_in_memory()?;
        let mut access = HashMap::new();
        let mut versions: HashMap<String, u64> = HashMap::new();
        let mut pending = Vec::new();
        let mut known_dirs: std::collections::HashSet<String> =
            std::collections::HashSet::from(["/".to_string()]);

        for member_index in 0..archive.len() {
            let member = archive.by_index_raw(member_index).map_err(zip_err)?;
            let raw_name = member.name_raw().to_vec();
            let decoded = options.encoding.decode(&raw_name)?;
            let is_dir = decoded.ends_with('/');
            let mut member_path = paths::normalize(&decoded)?;
            if let Some(transform) = &options.transform {
                member_path = paths::normalize(&transform.apply(&member_path))?;
            }
            if member_path == "/" {
                continue;
            }

            let storage = match member.compression() {
                zip::CompressionMethod::Stored => Storage::Stored,
                zip::CompressionMethod::Deflated => Storage::Deflated,
                other => Storage::Unsupported(compression_code(other)),
            };
            let unix_mode = member.unix_mode();
            let kind = if is_dir {
                EntryKind::Directory
            } else if unix_mode.map_or(false, |m| m & 0o170000 == 0o120000) {
                EntryKind::Symlink
            } else {
                EntryKind::Regular
            };

            // Synthesize parents the central directory never listed.
            for ancestor in paths::ancestors(&member_path)
                .filter(|a| !known_dirs.contains(*a))
                .map(str::to_string)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
            {
                let (parent, name) = paths::split(&ancestor);
                pending.push(FileEntry::directory(parent, name));
                known_dirs.insert(ancestor);
            }
            if kind == EntryKind::Directory {
                known_dirs.insert(member_path.clone());
            }

            let member_access = MemberAccess {
                member_index,
                storage,
                data_start: member.data_start(),
                compressed_size: member.compressed_size(),
                encrypted: member.encrypted(),
            };

            // Symlink targets are tiny; resolve them during the walk.
            let link_target = if kind == EntryKind::Symlink && !member_access.encrypted {
                read_via_range(&stream, &member_access)
                    .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
                    .unwrap_or_default()
            } else {
                String::new()
            };

            let (parent, name) = paths::split(&member_path);
            let entry = FileEntry {
                parent: parent.to_string(),
                name: name.to_string(),
                version: 0,
                kind,
                mode: unix_mode
                    .map(|m| m & 0o7777)
                    .unwrap_or(if is_dir { 0o755 } else { 0o644 }),
                uid: 0,
                gid: 0,
                mtime: dos_datetime_to_epoch(member.last_modified()),
                size: if kind == EntryKind::Regular {
                    member.size()
                } else {
                    0
                },
                link_target,
                locator: Locator::Archive {
                    offset: member_access.data_start,
                    stored_size: member_access.compressed_size,
                    sparsity: None,
                },
                route: Vec::new(),
                xattrs: Default::default(),
                encrypted: member_access.encrypted,
                mtime_absent: false,
            };
            pending.push(entry);

            let version = versions.entry(member_path.clone()).or_insert(0);
            *version += 1;
            access.insert((member_path, *version), member_access);
        }
        index.insert_entries(&pending)?;

        Ok(Self {
            stream,
            index,
            access,
            cache: EntryCache::new(options.entry_cache_size),
            password: options.resolve_password()?,
        })
    }

    fn member_access(&self, entry: &FileEntry) -> Result<&MemberAccess> {
        self.access
            .get(&(entry.path(), entry.version))
            .ok_or_else(|| Error::not_found(entry.path()))
    }

    fn open_encrypted(&self, entry: &FileEntry, access: &MemberAccess) -> Result<Arc<dyn SeekableStream>> {
        let Some(password) = &self.password else {
            return Err(Error::PasswordRequired { path: entry.path() });
        };
        // Decryption goes through the zip crate's reader; this is the one
        // read path that does.
        let mut archive = zip::ZipArchive::new(StreamCursor::new(Arc::clone(&self.stream)))
            .map_err(zip_err)?;
        let member = archive
            .by_index_decrypt(access.member_index, password)
            .map_err(zip_err)?
            .map_err(|_| Error::WrongPassword { path: entry.path() })?;
        let mut bytes = Vec::with_capacity(entry.size as usize);
        let mut reader = member;
        reader
            .read_to_end(&mut bytes)
            .map_err(|_| Error::WrongPassword { path: entry.path() })?;
        Ok(Arc::new(MemoryStream::new(bytes)))
    }
}

impl MountSource for ZipMountSource {
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
        if entry.is_dir() {
            return Ok(Arc::new(MemoryStream::new(Vec::new())));
        }
        let access = self.member_access(entry)?;
        if access.encrypted {
            return self.open_encrypted(entry, access);
        }
        match access.storage {
            Storage::Stored => Ok(Arc::new(SubStream::new(
                Arc::clone(&self.stream),
                access.data_start,
                access.compressed_size,
            ))),
            Storage::Deflated => Ok(Arc::new(MemoryStream::new(read_via_range(
                &self.stream,
                access,
            )?))),
            Storage::Unsupported(code) => Err(Error::dependency_missing(
                "zip",
                format!("compression method {code} is not supported"),
            )),
        }
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
        "zip"
    }
}

/// Reads a member's bytes through its byte range, inflating if needed.
fn read_via_range(stream: &Arc<dyn SeekableStream>, access: &MemberAccess) -> Result<Vec<u8>> {
    let compressed = SubStream::new(Arc::clone(stream), access.data_start, access.compressed_size);
    match access.storage {
        Storage::Stored => compressed.read_all(),
        Storage::Deflated => {
            #[cfg(feature = "gzip")]
            {
                let cursor = StreamCursor::new(Arc::new(compressed));
                let mut decoder = flate2::read::DeflateDecoder::new(cursor);
                let mut bytes = Vec::new();
                decoder
                    .read_to_end(&mut bytes)
                    .map_err(|e| Error::decoder("deflate", access.data_start, e.to_string()))?;
                Ok(bytes)
            }
            #[cfg(not(feature = "gzip"))]
            {
                Err(Error::dependency_missing(
                    "zip",
                    "deflate support requires the gzip feature",
                ))
            }
        }
        Storage::Unsupported(code) => Err(Error::dependency_missing(
            "zip",
            format!("compression method {code} is not supported"),
        )),
    }
}

fn compression_code(method: zip::CompressionMethod) -> u16 {
    // The zip crate hides the raw code behind a non-exhaustive enum.
    match method {
        zip::CompressionMethod::Stored => 0,
        zip::CompressionMethod::Deflated => 8,
        other => {
            warn!("unrecognized zip compression method {other:?}");
            u16::MAX
        }
    }
}

/// Converts the zip DOS timestamp to seconds since the epoch (UTC).
fn dos_datetime_to_epoch(datetime: zip::DateTime) -> i64 {
    let days = days_from_civil(
        datetime.year() as i64,
        datetime.month() as i64,
        datetime.day() as i64,
    );
    days * 86400
        + datetime.hour() as i64 * 3600
        + datetime.minute() as i64 * 60
        + datetime.second() as i64
}

/// Days since 1970-01-01 for a proleptic Gregorian date.
fn days_from_civil(year: i64, month: i64, day: i64) -> i64 {
    let year = if month <= 2 { year - 1 } else { year };
    let era = if year >= 0 { year } else { year - 399 } / 400;
    let year_of_era = year - era * 400;
    let day_of_year = (153 * (if month > 2 { month - 3 } else { month + 9 }) + 2) / 5 + day - 1;
    let day_of_era = year_of_era * 365 + year_of_era / 4 - year_of_era / 100 + day_of_year;
    era * 146_097 + day_of_era - 719_468
}

fn zip_err(e: zip::result::ZipError) -> Error {
    match e {
        zip::result::ZipError::Io(io) => Error::Io(io),
        other => Error::decoder("zip", 0, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::read_member;
    use std::io::Write;

    fn build_zip(entries: &[(&str, &[u8], zip::CompressionMethod)]) -> Vec<u8> {
        let mut writer = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
        for (name, data, method) in entries {
            let zip_options = zip::write::FileOptions::default()
                .compression_method(*method)
                .unix_permissions(0o640);
            writer.start_file(*name, zip_options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    fn mount(bytes: Vec<u8>) -> ZipMountSource {
        let stream: Arc<dyn SeekableStream> = Arc::new(MemoryStream::new(bytes));
        ZipMountSource::from_stream(stream, &MountOptions::default()).unwrap()
    }

    #[test]
    fn test_stored_and_deflated_members() {
        let data = b"zip contents, somewhat repetitive, repetitive".repeat(10);
        let source = mount(build_zip(&[
            ("stored.bin", &data, zip::CompressionMethod::Stored),
            ("deflated.bin", &data, zip::CompressionMethod::Deflated),
            ("dir/nested.txt", b"deep", zip::CompressionMethod::Deflated),
        ]));

        assert_eq!(read_member(&source, "/stored.bin").unwrap(), data);
        assert_eq!(read_member(&source, "/deflated.bin").unwrap(), data);
        assert_eq!(read_member(&source, "/dir/nested.txt").unwrap(), b"deep");

        // Synthesized parent directory.
        let dir = source.lookup("/dir").unwrap().unwrap();
        assert_eq!(dir.kind, EntryKind::Directory);

        let entry = source.lookup("/stored.bin").unwrap().unwrap();
        assert_eq!(entry.mode, 0o640);
        assert_eq!(entry.size, data.len() as u64);
    }

    #[test]
    fn test_stored_member_random_access() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        let source = mount(build_zip(&[(
            "blob",
            &data,
            zip::CompressionMethod::Stored,
        )]));
        let entry = source.lookup("/blob").unwrap().unwrap();
        let stream = source.open(&entry).unwrap();
        assert_eq!(stream.read_range(5000, 100).unwrap(), &data[5000..5100]);
    }

    #[test]
    fn test_duplicate_names_are_versions() {
        let source = mount(build_zip(&[
            ("dup", b"first", zip::CompressionMethod::Deflated),
            ("dup", b"second", zip::CompressionMethod::Deflated),
        ]));
        assert_eq!(source.versions("/dup").unwrap(), 2);
        assert_eq!(read_member(&source, "/dup").unwrap(), b"second");
        let v1 = source.lookup_version("/dup", 1).unwrap().unwrap();
        assert_eq!(source.open(&v1).unwrap().read_all().unwrap(), b"first");
    }

    #[test]
    fn test_listing() {
        let source = mount(build_zip(&[
            ("a.txt", b"1", zip::CompressionMethod::Stored),
            ("sub/b.txt", b"2", zip::CompressionMethod::Stored),
        ]));
        let mut names: Vec<String> = source
            .list("/")
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "sub"]);
        assert!(source.list("/a.txt").unwrap().is_none());
    }

    #[test]
    fn test_not_a_zip() {
        let stream: Arc<dyn SeekableStream> =
            Arc::new(MemoryStream::new(b"definitely not a zip file".to_vec()));
        assert!(ZipMountSource::from_stream(stream, &MountOptions::default()).is_err());
    }
}
