//! The recursive-mount layer: archives inside archives.
//!
//! When a looked-up path crosses a member that is itself a recognized
//! archive, the layer mounts that member through the factory — lazily, on
//! first access — and splices the nested tree in at the member's path
//! (optionally rewritten by the mount-point transform). Mounted children
//! live in an arena of integer ids; entries are routed back to their owner
//! through the route stack, and the member itself stays reachable as an
//! earlier version so both views coexist under the file-version layer.
//!
//! Recursion depth is bounded by the configured parameter (−1 = unlimited):
//! each nested source is wrapped in another `AutoMountSource` with one less
//! depth remaining.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use log::{debug, warn};

use crate::options::MountOptions;
use crate::paths;
use crate::source::factory;
use crate::source::{EntryKind, FileEntry, MountSource, StatFs};
use crate::stream::SeekableStream;
use crate::{Error, Result};

/// Route tag for entries owned by the direct child (not a nested mount).
const DIRECT_CHILD: u32 = u32::MAX;

struct MountPoint {
    /// The nested source, already depth-wrapped.
    source: Arc<dyn MountSource>,
}

/// Lazily mounts recognized archives found inside the child tree.
pub struct AutoMountSource {
    child: Arc<dyn MountSource>,
    options: MountOptions,
    /// Remaining recursion depth below this layer; −1 is unlimited.
    depth: i32,
    /// Arena of nested mounts; ids index into it and never move.
    arena: RwLock<Vec<MountPoint>>,
    /// Mount-point path → arena id; `None` records a failed mount so it is
    /// not retried on every lookup.
    by_mount_path: RwLock<HashMap<String, Option<usize>>>,
    /// Member path → mount-point path (they differ under a transform).
    mount_path_of: RwLock<HashMap<String, String>>,
}

impl AutoMountSource {
    /// Wraps `child` with recursive mounting.
    pub fn new(child: Arc<dyn MountSource>, options: MountOptions, depth: i32) -> Self {
        Self {
            child,
            options,
            depth,
            arena: RwLock::new(Vec::new()),
            by_mount_path: RwLock::new(HashMap::new()),
            mount_path_of: RwLock::new(HashMap::new()),
        }
    }

    /// The exposed mount-point path for an archive member path.
    fn mount_path_for(&self, member_path: &str) -> String {
        let mut mount_path = member_path.to_string();
        if let Some(transform) = &self.options.transform_recursive_mount_point {
            mount_path = transform.apply(&mount_path);
        } else if self.options.strip_recursive_tar_extension {
            if let Some(stripped) = mount_path.strip_suffix(".tar") {
                mount_path = stripped.to_string();
            }
        }
        paths::normalize(&mount_path).unwrap_or_else(|_| member_path.to_string())
    }

    /// Mounts the archive member at `member_path` if it is not already
    /// mounted; returns the arena id on success.
    fn ensure_mounted(&self, member_path: &str, entry: &FileEntry) -> Option<usize> {
        let mount_path = self.mount_path_for(member_path);
        if let Some(&cached) = self.by_mount_path.read().expect("mount map").get(&mount_path) {
            return cached;
        }

        let mounted = self.mount(member_path, entry);
        if mounted.is_none() {
            warn!("could not mount nested archive {member_path}");
        }
        let mut by_mount_path = self.by_mount_path.write().expect("mount map");
        let mut mount_path_of = self.mount_path_of.write().expect("mount map");
        by_mount_path.insert(mount_path.clone(), mounted);
        mount_path_of.insert(member_path.to_string(), mount_path);
        mounted
    }

    fn mount(&self, member_path: &str, entry: &FileEntry) -> Option<usize> {
        let stream = match self.child.open(entry) {
            Ok(stream) => stream,
            Err(e) => {
                debug!("open of nested archive {member_path} failed: {e}");
                return None;
            }
        };
        let nested = match factory::open_from_stream(stream, member_path, &self.options) {
            Ok(nested) => nested,
            Err(e) => {
                debug!("nested mount of {member_path} failed: {e}");
                return None;
            }
        };
        let nested: Arc<dyn MountSource> = if self.depth == 1 {
            nested
        } else {
            let remaining = if self.depth < 0 { -1 } else { self.depth - 1 };
            Arc::new(AutoMountSource::new(nested, self.options.clone(), remaining))
        };

        let mut arena = self.arena.write().expect("mount arena");
        arena.push(MountPoint { source: nested });
        Some(arena.len() - 1)
    }

    /// Finds the longest mounted (or mountable) prefix of `path`, mounting
    /// lazily along the way. Returns the arena id and the remainder.
    fn resolve_prefix(&self, path: &str) -> Result<Option<(usize, String)>> {
        // Longest prefix first: "/a/b.tar/c" tries "/a/b.tar" before "/a".
        let mut prefixes: Vec<&str> = paths::ancestors(path).collect();
        prefixes.insert(0, path);
        for prefix in prefixes {
            if let Some(&Some(id)) = self
                .by_mount_path
                .read()
                .expect("mount map")
                .get(prefix)
            {
                let rest = paths::strip_prefix(path, prefix).expect("prefix invariant");
                return Ok(Some((id, rest.to_string())));
            }
            // Not mounted yet: a regular member here that sniffs as an
            // archive becomes a mount point now. With extension stripping,
            // the member backing this prefix carries the stripped suffix.
            let mut candidates = vec![prefix.to_string()];
            if self.options.strip_recursive_tar_extension && !prefix.ends_with(".tar") {
                candidates.push(format!("{prefix}.tar"));
            }
            for member_path in candidates {
                let Some(entry) = self.child.lookup(&member_path)? else {
                    continue;
                };
                if entry.kind != EntryKind::Regular
                    || !self.member_is_archive(&member_path, &entry)
                {
                    continue;
                }
                if let Some(id) = self.ensure_mounted(&member_path, &entry) {
                    let mount_path =
                        self.mount_path_of.read().expect("mount map")[&member_path].clone();
                    if let Some(rest) = paths::strip_prefix(path, &mount_path) {
                        return Ok(Some((id, rest.to_string())));
                    }
                }
            }
        }
        Ok(None)
    }

    fn member_is_archive(&self, member_path: &str, entry: &FileEntry) -> bool {
        let head = self
            .child
            .open(entry)
            .and_then(|stream| stream.read_range(0, 512))
            .unwrap_or_default();
        factory::looks_like_archive(member_path, &head)
    }

    fn mount_root_entry(&self, mount_path: &str) -> FileEntry {
        let (parent, name) = paths::split(mount_path);
        FileEntry {
            kind: EntryKind::Directory,
            mode: 0o755,
            ..FileEntry::regular(parent, name, 0)
        }
    }
}

impl MountSource for AutoMountSource {
    fn lookup(&self, path: &str) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        if let Some((id, rest)) = self.resolve_prefix(&path)? {
            if rest == "/" {
                return Ok(Some(self.mount_root_entry(&path)));
            }
            let arena = self.arena.read().expect("mount arena");
            return Ok(arena[id].source.lookup(&rest)?.map(|mut entry| {
                entry.route_push(id as u32);
                entry
            }));
        }
        Ok(self.child.lookup(&path)?.map(|mut entry| {
            entry.route_push(DIRECT_CHILD);
            entry
        }))
    }

    fn list(&self, path: &str) -> Result<Option<Vec<(String, FileEntry)>>> {
        let path = paths::normalize(path)?;
        if let Some((id, rest)) = self.resolve_prefix(&path)? {
            let arena = self.arena.read().expect("mount arena");
            let nested = arena[id].source.clone();
            drop(arena);
            return Ok(nested.list(&rest)?.map(|listing| {
                listing
                    .into_iter()
                    .map(|(name, mut entry)| {
                        entry.route_push(id as u32);
                        (name, entry)
                    })
                    .collect()
            }));
        }

        let Some(listing) = self.child.list(&path)? else {
            return Ok(None);
        };
        let mut merged = Vec::with_capacity(listing.len());
        for (name, mut entry) in listing {
            let member_path = paths::join(&path, &name);
            // Surface already- or eagerly-mountable archives as directories.
            let already_mounted = self
                .mount_path_of
                .read()
                .expect("mount map")
                .contains_key(&member_path);
            let mountable = entry.kind == EntryKind::Regular
                && (already_mounted
                    || (!self.options.lazy_mounting
                        && self.member_is_archive(&member_path, &entry)))
                && self.ensure_mounted(&member_path, &entry).is_some();
            if mountable {
                let mount_path = self.mount_path_of.read().expect("mount map")[&member_path].clone();
                let root_entry = self.mount_root_entry(&mount_path);
                let (_, mount_name) = paths::split(&mount_path);
                if mount_path != member_path {
                    // Transformed mount point: the member keeps its name,
                    // the directory appears beside it.
                    entry.route_push(DIRECT_CHILD);
                    merged.push((name, entry));
                }
                merged.push((mount_name.to_string(), root_entry));
            } else {
                entry.route_push(DIRECT_CHILD);
                merged.push((name, entry));
            }
        }
        Ok(Some(merged))
    }

    fn versions(&self, path: &str) -> Result<u64> {
        let path = paths::normalize(path)?;
        // A mount point has the nested root as its latest version on top of
        // the member's own history.
        let is_mount_point = matches!(
            self.by_mount_path.read().expect("mount map").get(&path),
            Some(Some(_))
        );
        let member_versions = self.child.versions(&path)?;
        if is_mount_point {
            Ok(member_versions + 1)
        } else if member_versions > 0 {
            Ok(member_versions)
        } else if self.lookup(&path)?.is_some() {
            Ok(1)
        } else {
            Ok(0)
        }
    }

    fn lookup_version(&self, path: &str, version: u64) -> Result<Option<FileEntry>> {
        let path = paths::normalize(path)?;
        let is_mount_point = matches!(
            self.by_mount_path.read().expect("mount map").get(&path),
            Some(Some(_))
        );
        if is_mount_point {
            let member_versions = self.child.versions(&path)?;
            if version == member_versions + 1 {
                return Ok(Some(self.mount_root_entry(&path)));
            }
            return Ok(self.child.lookup_version(&path, version)?.map(|mut entry| {
                entry.route_push(DIRECT_CHILD);
                entry
            }));
        }
        Ok(self.child.lookup_version(&path, version)?.map(|mut entry| {
            entry.route_push(DIRECT_CHILD);
            entry
        }))
    }

    fn open(&self, entry: &FileEntry) -> Result<Arc<dyn SeekableStream>> {
        if entry.is_dir() && entry.route.is_empty() {
            return Ok(Arc::new(crate::stream::MemoryStream::new(Vec::new())));
        }
        let mut entry = entry.clone();
        match entry.route_pop() {
            Some(DIRECT_CHILD) => self.child.open(&entry),
            Some(id) => {
                let arena = self.arena.read().expect("mount arena");
                let nested = arena
                    .get(id as usize)
                    .ok_or_else(|| Error::invalid_path("mount routing tag out of range"))?
                    .source
                    .clone();
                drop(arena);
                nested.open(&entry)
            }
            None => Err(Error::invalid_path("entry lost its mount routing tag")),
        }
    }

    fn statfs(&self) -> StatFs {
        self.child.statfs()
    }

    fn enter(&self) -> Result<()> {
        self.child.enter()
    }

    fn exit(&self) -> Result<()> {
        for mount in self.arena.read().expect("mount arena").iter() {
            mount.source.exit()?;
        }
        self.child.exit()
    }

    fn backend_name(&self) -> &'static str {
        "automount"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::MountOptions;
    use crate::source::read_member;
    use crate::source::tar::TarMountSource;

    /// Builds nested-tar bytes: outer contains `foo/lighter.tar`, which
    /// contains `fighter/bar`.
    fn nested_tar() -> Vec<u8> {
        let mut inner = tar::Builder::new(Vec::new());
        let mut tar_header = tar::Header::new_ustar();
        tar_header.set_size(4);
        tar_header.set_mode(0o644);
        tar_header.set_cksum();
        inner
            .append_data(&mut tar_header, "fighter/bar", &b"foo\n"[..])
            .unwrap();
        let inner_bytes = inner.into_inner().unwrap();

        let mut outer = tar::Builder::new(Vec::new());
        let mut tar_header = tar::Header::new_ustar();
        tar_header.set_size(inner_bytes.len() as u64);
        tar_header.set_mode(0o644);
        tar_header.set_cksum();
        outer
            .append_data(&mut tar_header, "foo/lighter.tar", inner_bytes.as_slice())
            .unwrap();
        outer.into_inner().unwrap()
    }

    fn mount_nested(options: MountOptions) -> (tempfile::TempDir, AutoMountSource) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested.tar");
        std::fs::write(&path, nested_tar()).unwrap();
        let tar = TarMountSource::open(&path, &options).unwrap();
        let depth = options.recursion_depth;
        let automount = AutoMountSource::new(Arc::new(tar), options, depth);
        (dir, automount)
    }

    #[test]
    fn test_read_through_nested_archive() {
        let (_dir, source) = mount_nested(MountOptions::default().recursion_depth(-1));
        assert_eq!(
            read_member(&source, "/foo/lighter.tar/fighter/bar").unwrap(),
            b"foo\n"
        );
    }

    #[test]
    fn test_mount_point_is_directory() {
        let (_dir, source) = mount_nested(MountOptions::default().recursion_depth(-1));
        // Resolve something through it first so the lazy mount exists.
        read_member(&source, "/foo/lighter.tar/fighter/bar").unwrap();

        let entry = source.lookup("/foo/lighter.tar").unwrap().unwrap();
        assert!(entry.is_dir());

        let mut names: Vec<String> = source
            .list("/foo/lighter.tar")
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["fighter"]);
    }

    #[test]
    fn test_original_member_is_earlier_version() {
        let (_dir, source) = mount_nested(MountOptions::default().recursion_depth(-1));
        read_member(&source, "/foo/lighter.tar/fighter/bar").unwrap();

        assert_eq!(source.versions("/foo/lighter.tar").unwrap(), 2);
        let original = source
            .lookup_version("/foo/lighter.tar", 1)
            .unwrap()
            .unwrap();
        assert_eq!(original.kind, EntryKind::Regular);
        // The original bytes are still readable as a tar file.
        let bytes = source.open(&original).unwrap().read_all().unwrap();
        assert_eq!(&bytes[257..262], b"ustar");

        let current = source
            .lookup_version("/foo/lighter.tar", 2)
            .unwrap()
            .unwrap();
        assert!(current.is_dir());
    }

    #[test]
    fn test_listing_shows_archive_as_directory() {
        let (_dir, source) = mount_nested(MountOptions::default().recursion_depth(-1));
        let listing = source.list("/foo").unwrap().unwrap();
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].0, "lighter.tar");
        assert!(listing[0].1.is_dir());
    }

    #[test]
    fn test_strip_tar_extension() {
        let options = MountOptions::default()
            .recursion_depth(-1)
            .strip_recursive_tar_extension(true);
        let (_dir, source) = mount_nested(options);
        assert_eq!(
            read_member(&source, "/foo/lighter/fighter/bar").unwrap(),
            b"foo\n"
        );
        // Both the stripped directory and the original member coexist.
        let mut names: Vec<String> = source
            .list("/foo")
            .unwrap()
            .unwrap()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["lighter", "lighter.tar"]);
    }

    #[test]
    fn test_single_level_depth_still_mounts_first_layer() {
        let (_dir, source) = mount_nested(MountOptions::default().recursion_depth(1));
        assert_eq!(
            read_member(&source, "/foo/lighter.tar/fighter/bar").unwrap(),
            b"foo\n"
        );
    }

    #[test]
    fn test_plain_files_pass_through() {
        let (_dir, source) = mount_nested(MountOptions::default().recursion_depth(-1));
        assert!(source.lookup("/absent").unwrap().is_none());
        let entry = source.lookup("/foo").unwrap().unwrap();
        assert!(entry.is_dir());
    }
}
