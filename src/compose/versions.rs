//! The file-version layer: `.versions/` history directories.
//!
//! For any path with recorded history, `name.versions/` is a synthetic
//! directory whose children `1`, `2`, … resolve to the historical entries
//! in insertion order (highest = current). The synthetic names are never
//! forwarded to the child source; everything else passes through
//! untouched, and the virtual directories stay out of listings.

use std::sync::Arc;

use crate::paths;
use crate::source::{EntryKind, FileEntry, MountSource, StatFs};
use crate::stream::SeekableStream;
use crate::Result;

/// Suffix marking a synthetic version directory.
const VERSIONS_SUFFIX: &str = ".versions";

/// A single-child layer exposing version history.
pub struct FileVersionSource {
    child: Arc<dyn MountSource>,
}

/// How a path relates to the `.versions` namespace.
enum VersionPath {
    /// No `.versions` component; forward verbatim.
    Plain,
    /// `<base>.versions` — the synthetic directory itself.
    Directory { base: String },
    /// `<base>.versions/<N>` — one historical entry.
    Version { base: String, version: u64 },
    /// Anything deeper inside the synthetic namespace.
    Unresolvable,
}

impl FileVersionSource {
    /// Wraps a child source.
    pub fn new(child: Arc<dyn MountSource>) -> Self {
        Self { child }
    }

    fn classify(path: &str) -> VersionPath {
        let components: Vec<&str> = paths::components(path).collect();
        let versions_at = components
            .iter()
            .position(|c| c.len() > VERSIONS_SUFFIX.len() && c.ends_with(VERSIONS_SUFFIX));
        let Some(versions_at) = versions_at else {
            return VersionPath::Plain;
        };

        let mut base = String::new();
        for component in &components[..versions_at] {
            base.push('/');
            base.push_str(component);
        }
        let stem = &components[versions_at][..components[versions_at].len() - VERSIONS_SUFFIX.len()];
        base.push('/');
        base.push_str(stem);

        match components.len() - versions_at {
            1 => VersionPath::Directory { base },
            2 => match components[versions_at + 1].parse::<u64>() {
                Ok(version) if version > 0 => VersionPath::Version { base, version },
                _ => VersionPath::Unresolvable,
            },
            _ => VersionPath::Unresolvable,
        }
    }
}

impl MountSource for FileVersionSource {
    fn lookup(&self, path: &str) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        match Self::classify(&path) {
            VersionPath::Plain => self.child.lookup(&path),
            VersionPath::Directory { base } => {
                if self.child.versions(&base)? == 0 {
                    return Ok(None);
                }
                let (parent, name) = paths::split(&path);
                Ok(Some(FileEntry {
                    kind: EntryKind::Directory,
                    mode: 0o555,
                    ..FileEntry::regular(parent, name, 0)
                }))
            }
            VersionPath::Version { base, version } => {
                if version > self.child.versions(&base)? {
                    return Ok(None);
                }
                Ok(self.child.lookup_version(&base, version)?.map(|entry| {
                    // Present the historical entry under its numeric name.
                    let (parent, _) = paths::split(&path);
                    FileEntry {
                        parent: parent.to_string(),
                        name: version.to_string(),
                        ..entry
                    }
                }))
            }
            VersionPath::Unresolvable => Ok(None),
        }
    }

    fn list(&self, path: &str) -> Result<Option<Vec<(String, FileEntry)>>> {
        let path = paths::normalize(path)?;
        match Self::classify(&path) {
            VersionPath::Plain => self.child.list(&path),
            VersionPath::Directory { base } => {
                let count = self.child.versions(&base)?;
                if count == 0 {
                    return Ok(None);
                }
                let mut listing = Vec::with_capacity(count as usize);
                for version in 1..=count {
                    if let Some(entry) = self.child.lookup_version(&base, version)? {
                        let named = FileEntry {
                            parent: path.clone(),
                            name: version.to_string(),
                            ..entry
                        };
                        listing.push((version.to_string(), named));
                    }
                }
                Ok(Some(listing))
            }
            _ => Ok(None),
        }
    }

    fn versions(&self, path: &str) -> Result<u64> {
        let path = paths::normalize(path)?;
        match Self::classify(&path) {
            VersionPath::Plain => self.child.versions(&path),
            VersionPath::Directory { .. } | VersionPath::Version { .. } => Ok(1),
            VersionPath::Unresolvable => Ok(0),
        }
    }

    fn lookup_version(&self, path: &str, version: u64) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        match Self::classify(&path) {
            VersionPath::Plain => self.child.lookup_version(&path, version),
            _ if version == 1 => self.lookup(&path),
            _ => Ok(None),
        }
    }

    fn open(&self, entry: &FileEntry) -> Result<Arc<dyn SeekableStream>> {
        self.child.open(entry)
    }

    fn statfs(&self) -> StatFs {
        self.child.statfs()
    }

    fn enter(&self) -> Result<()> {
        self.child.enter()
    }

    fn exit(&self) -> Result<()> {
        self.child.exit()
    }

    fn backend_name(&self) -> &'static str {
        "file-versions"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::MountOptions;
    use crate::source::read_member;
    use crate::source::tar::TarMountSource;

    fn versioned_source() -> (tempfile::TempDir, FileVersionSource) {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = tar::Builder::new(Vec::new());
        for data in [&b"one"[..], b"two!", b"three"] {
            let mut tar_header = tar::Header::new_ustar();
            tar_header.set_size(data.len() as u64);
            tar_header.set_mode(0o644);
            tar_header.set_cksum();
            builder
                .append_data(&mut tar_header, "foo/fighter/ufo", data)
                .unwrap();
        }
        let path = dir.path().join("updated.tar");
        std::fs::write(&path, builder.into_inner().unwrap()).unwrap();
        let tar = TarMountSource::open(&path, &MountOptions::default()).unwrap();
        (dir, FileVersionSource::new(Arc::new(tar)))
    }

    #[test]
    fn test_plain_paths_forward() {
        let (_dir, source) = versioned_source();
        assert_eq!(read_member(&source, "/foo/fighter/ufo").unwrap(), b"three");
        assert_eq!(source.versions("/foo/fighter/ufo").unwrap(), 3);
    }

    #[test]
    fn test_version_directory_and_entries() {
        let (_dir, source) = versioned_source();

        let dir_entry = source.lookup("/foo/fighter/ufo.versions").unwrap().unwrap();
        assert!(dir_entry.is_dir());

        assert_eq!(
            read_member(&source, "/foo/fighter/ufo.versions/1").unwrap(),
            b"one"
        );
        assert_eq!(
            read_member(&source, "/foo/fighter/ufo.versions/2").unwrap(),
            b"two!"
        );
        assert_eq!(
            read_member(&source, "/foo/fighter/ufo.versions/3").unwrap(),
            b"three"
        );

        // The current entry equals the highest version.
        assert_eq!(
            read_member(&source, "/foo/fighter/ufo").unwrap(),
            read_member(&source, "/foo/fighter/ufo.versions/3").unwrap()
        );
    }

    #[test]
    fn test_version_directory_listing() {
        let (_dir, source) = versioned_source();
        let mut names: Vec<String> = source
            .list("/foo/fighter/ufo.versions")
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["1", "2", "3"]);
    }

    #[test]
    fn test_out_of_range_and_absent() {
        let (_dir, source) = versioned_source();
        assert!(source
            .lookup("/foo/fighter/ufo.versions/4")
            .unwrap()
            .is_none());
        assert!(source
            .lookup("/foo/fighter/ufo.versions/0")
            .unwrap()
            .is_none());
        assert!(source.lookup("/absent.versions").unwrap().is_none());
        assert!(source
            .lookup("/foo/fighter/ufo.versions/1/deeper")
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_versions_dir_hidden_from_parent_listing() {
        let (_dir, source) = versioned_source();
        let names: Vec<String> = source
            .list("/foo/fighter")
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["ufo"]);
    }
}
