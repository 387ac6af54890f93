//! The single-file mount source.
//!
//! A compressed file that is not a container (plain `file.gz`, `log.xz`)
//! still mounts usefully: as a one-entry tree holding the decompressed
//! file, named after the archive with the codec extension stripped. The
//! decoded view is seekable through the same checkpoint machinery the tar
//! source uses, so random reads into a large compressed log are cheap.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::compress::{Codec, DecodedStream};
use crate::options::MountOptions;
use crate::paths;
use crate::source::{FileEntry, Locator, MountSource, StatFs};
use crate::stream::{FileStream, SeekableStream};
use crate::{Error, Result};

/// A single decompressed file presented as a one-entry mount source.
pub struct SingleFileMountSource {
    decoded: Arc<dyn SeekableStream>,
    name: String,
    mtime: i64,
}

impl SingleFileMountSource {
    /// Opens `path`, which must be a recognized compressed file.
    pub fn open(path: &std::path::Path, options: &MountOptions) -> Result<Self> {
        let raw: Arc<dyn SeekableStream> = Arc::new(FileStream::open(path)?);
        let head = raw.read_range(0, 8)?;
        let codec = Codec::sniff(&head).ok_or_else(|| {
            Error::dependency_missing(
                "single-file",
                format!("{} is not a recognized compressed file", path.display()),
            )
        })?;
        let mtime = std::fs::metadata(path)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Self::from_stream(raw, codec, &file_name, mtime, options)
    }

    /// Builds the source from an already sniffed stream. `file_name` may be
    /// a full path; only its final component names the entry.
    pub fn from_stream(
        raw: Arc<dyn SeekableStream>,
        codec: Codec,
        file_name: &str,
        mtime: i64,
        options: &MountOptions,
    ) -> Result<Self> {
        let decoded = DecodedStream::open(
            raw,
            codec,
            options.seek_point_spacing,
            options.cursor_pool_capacity,
            options.parallelization.resolve(codec.name()),
        )?;
        let base_name = std::path::Path::new(file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        Ok(Self {
            decoded: Arc::new(decoded),
            name: strip_codec_extension(&base_name, codec),
            mtime,
        })
    }

    fn entry(&self) -> FileEntry {
        FileEntry {
            mtime: self.mtime,
            locator: Locator::Archive {
                offset: 0,
                stored_size: self.decoded.size(),
                sparsity: None,
            },
            ..FileEntry::regular("/", &self.name, self.decoded.size())
        }
    }
}

/// Strips the codec's extension from a file name (`log.txt.gz` → `log.txt`).
fn strip_codec_extension(file_name: &str, codec: Codec) -> String {
    if let Some((stem, extension)) = file_name.rsplit_once('.') {
        if Codec::from_extension(extension) == Some(codec) && !stem.is_empty() {
            return stem.to_string();
        }
    }
    file_name.to_string()
}

impl MountSource for SingleFileMountSource {
    fn lookup(&self, path: &str) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        if path == "/" {
            return Ok(Some(FileEntry::root()));
        }
        if path == paths::join("/", &self.name) {
            return Ok(Some(self.entry()));
        }
        Ok(None)
    }

    fn list(&self, path: &str) -> Result<Option<Vec<(String, FileEntry)>>> {
        if paths::normalize(path)? != "/" {
            return Ok(None);
        }
        Ok(Some(vec![(self.name.clone(), self.entry())]))
    }

    fn open(&self, entry: &FileEntry) -> Result<Arc<dyn SeekableStream>> {
        if entry.name != self.name {
            return Err(Error::not_found(entry.path()));
        }
        Ok(Arc::clone(&self.decoded))
    }

    fn statfs(&self) -> StatFs {
        StatFs {
            files: 1,
            ..StatFs::default()
        }
    }

    fn xattrs(&self, _path: &str) -> Result<BTreeMap<String, Vec<u8>>> {
        Ok(BTreeMap::new())
    }

    fn backend_name(&self) -> &'static str {
        "single-file"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::read_member;
    use std::io::Write;

    #[cfg(feature = "gzip")]
    #[test]
    fn test_mounts_decompressed_file() {
        let dir = tempfile::tempdir().unwrap();
        let plain = b"the quick brown fox\n".repeat(200);
        let path = dir.path().join("story.txt.gz");
        let file = std::fs::File::create(&path).unwrap();
        let mut encoder =
            flate2::write::GzEncoder::new(file, flate2::Compression::default());
        encoder.write_all(&plain).unwrap();
        encoder.finish().unwrap();

        let source = SingleFileMountSource::open(&path, &MountOptions::default()).unwrap();
        let listing = source.list("/").unwrap().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].0, "story.txt");
        assert_eq!(read_member(&source, "/story.txt").unwrap(), plain);
        assert!(source.lookup("/other").unwrap().is_none());
        assert!(source.list("/story.txt").unwrap().is_none());
    }

    #[test]
    fn test_strip_codec_extension() {
        assert_eq!(strip_codec_extension("a.txt.gz", Codec::Gzip), "a.txt");
        assert_eq!(strip_codec_extension("a.zst", Codec::Zstd), "a");
        assert_eq!(strip_codec_extension("noext", Codec::Gzip), "noext");
        // Extension of a different codec stays.
        assert_eq!(strip_codec_extension("a.bz2", Codec::Gzip), "a.bz2");
    }

    #[test]
    fn test_rejects_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.txt");
        std::fs::write(&path, b"not compressed").unwrap();
        assert!(SingleFileMountSource::open(&path, &MountOptions::default()).is_err());
    }
}
