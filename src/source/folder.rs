//! The host-folder mount source.
//!
//! Wraps a directory tree on the host filesystem. Entries are materialized
//! on demand straight from `stat`; there is no index to build or cache. The
//! final path component is never dereferenced — symlinks are reported as
//! symlinks — but traversal *through* a symlinked directory works because
//! intermediate components resolve on the host, so links escaping the root
//! stay usable.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::paths;
use crate::source::{EntryKind, FileEntry, Locator, MountSource, StatFs};
use crate::stream::{FileStream, SeekableStream};
use crate::{Error, Result};

/// A host directory presented as a mount source.
pub struct FolderMountSource {
    root: PathBuf,
}

impl FolderMountSource {
    /// Wraps `root`, which must be an existing directory.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        if !root.is_dir() {
            return Err(Error::NotSeekable(format!(
                "{} is not a directory",
                root.display()
            )));
        }
        Ok(Self { root })
    }

    /// The wrapped host directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn host_path(&self, path: &str) -> PathBuf {
        let mut host = self.root.clone();
        for component in paths::components(path) {
            host.push(component);
        }
        host
    }

    fn entry_from_metadata(
        &self,
        parent: &str,
        name: &str,
        host: &Path,
        metadata: &Metadata,
    ) -> FileEntry {
        let kind = kind_of(metadata);
        let link_target = if kind == EntryKind::Symlink {
            std::fs::read_link(host)
                .map(|t| t.to_string_lossy().into_owned())
                .unwrap_or_default()
        } else {
            String::new()
        };
        let (mode, uid, gid, mtime) = unix_fields(metadata);
        FileEntry {
            parent: parent.to_string(),
            name: name.to_string(),
            version: 1,
            kind,
            mode,
            uid,
            gid,
            mtime,
            size: if kind == EntryKind::Regular {
                metadata.len()
            } else {
                0
            },
            link_target,
            locator: Locator::Host(host.to_path_buf()),
            route: Vec::new(),
            xattrs: BTreeMap::new(),
            encrypted: false,
            mtime_absent: false,
        }
    }
}

impl MountSource for FolderMountSource {
    fn lookup(&self, path: &str) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        let host = self.host_path(&path);
        let metadata = match std::fs::symlink_metadata(&host) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (parent, name) = paths::split(&path);
        Ok(Some(self.entry_from_metadata(
            parent, name, &host, &metadata,
        )))
    }

    fn list(&self, path: &str) -> Result<Option<Vec<(String, FileEntry)>>> {
        let path = paths::normalize(path)?;
        let host = self.host_path(&path);
        let read_dir = match std::fs::read_dir(&host) {
            Ok(read_dir) => read_dir,
            Err(e)
                if matches!(
                    e.kind(),
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::NotADirectory
                ) =>
            {
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        let mut entries = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry?;
            let name = dir_entry.file_name().to_string_lossy().into_owned();
            let child_host = dir_entry.path();
            let metadata = match std::fs::symlink_metadata(&child_host) {
                Ok(metadata) => metadata,
                // Raced deletion; skip.
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            let entry = self.entry_from_metadata(&path, &name, &child_host, &metadata);
            entries.push((name, entry));
        }
        Ok(Some(entries))
    }

    fn open(&self, entry: &FileEntry) -> Result<Arc<dyn SeekableStream>> {
        match &entry.locator {
            Locator::Host(host) => Ok(Arc::new(FileStream::open(host)?)),
            _ => Err(Error::invalid_path(format!(
                "{} is not folder-backed",
                entry.path()
            ))),
        }
    }

    fn statfs(&self) -> StatFs {
        StatFs::default()
    }

    fn backend_name(&self) -> &'static str {
        "folder"
    }
}

fn kind_of(metadata: &Metadata) -> EntryKind {
    let file_type = metadata.file_type();
    if file_type.is_dir() {
        EntryKind::Directory
    } else if file_type.is_symlink() {
        EntryKind::Symlink
    } else {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;
            if file_type.is_block_device() {
                return EntryKind::Block;
            } else if file_type.is_char_device() {
                return EntryKind::Char;
            } else if file_type.is_fifo() {
                return EntryKind::Fifo;
            } else if file_type.is_socket() {
                return EntryKind::Socket;
            }
        }
        EntryKind::Regular
    }
}

#[cfg(unix)]
fn unix_fields(metadata: &Metadata) -> (u32, u32, u32, i64) {
    use std::os::unix::fs::MetadataExt;
    (
        (metadata.mode() & 0o7777),
        metadata.uid(),
        metadata.gid(),
        metadata.mtime(),
    )
}

#[cfg(not(unix))]
fn unix_fields(metadata: &Metadata) -> (u32, u32, u32, i64) {
    let mtime = metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    (0o644, 0, 0, mtime)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::read_member;

    fn setup() -> (tempfile::TempDir, FolderMountSource) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("subfolder")).unwrap();
        std::fs::write(dir.path().join("subfolder/world"), b"hello\n").unwrap();
        std::fs::write(dir.path().join("ufo"), b"iriya\n").unwrap();
        let source = FolderMountSource::new(dir.path()).unwrap();
        (dir, source)
    }

    #[test]
    fn test_lookup_and_read() {
        let (_dir, source) = setup();
        let entry = source.lookup("/subfolder/world").unwrap().unwrap();
        assert_eq!(entry.kind, EntryKind::Regular);
        assert_eq!(entry.size, 6);
        assert_eq!(read_member(&source, "/subfolder/world").unwrap(), b"hello\n");
        assert!(source.lookup("/nope").unwrap().is_none());
    }

    #[test]
    fn test_list() {
        let (_dir, source) = setup();
        let mut names: Vec<String> = source
            .list("/")
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["subfolder", "ufo"]);

        assert!(source.list("/ufo").unwrap().is_none());
        assert!(source.list("/missing").unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_reported_not_followed() {
        let (dir, source) = setup();
        std::os::unix::fs::symlink("ufo", dir.path().join("link")).unwrap();
        let entry = source.lookup("/link").unwrap().unwrap();
        assert_eq!(entry.kind, EntryKind::Symlink);
        assert_eq!(entry.link_target, "ufo");
    }

    #[cfg(unix)]
    #[test]
    fn test_traversal_through_escaping_symlink() {
        let outside = tempfile::tempdir().unwrap();
        std::fs::write(outside.path().join("beyond"), b"outside!").unwrap();
        let (dir, source) = setup();
        std::os::unix::fs::symlink(outside.path(), dir.path().join("portal")).unwrap();

        // The link itself is a symlink entry...
        let entry = source.lookup("/portal").unwrap().unwrap();
        assert_eq!(entry.kind, EntryKind::Symlink);
        // ...but paths through it resolve on the host.
        assert_eq!(read_member(&source, "/portal/beyond").unwrap(), b"outside!");
    }

    #[test]
    fn test_rejects_non_directory_root() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("f");
        std::fs::write(&file, b"x").unwrap();
        assert!(FolderMountSource::new(&file).is_err());
    }
}
